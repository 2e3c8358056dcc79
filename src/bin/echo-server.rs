//! echo-server: echoes every byte it receives back to the sender.
//!
//! Runs until the process is terminated.

use echo_reactor::config::ServerConfig;
use echo_reactor::{logging, server};
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::load()?;

    logging::init(&config.log_level);

    let addr = config.listen_addr()?;
    info!(
        addr = %addr,
        buffer_size = config.runtime.buffer_size,
        max_connections = config.runtime.max_connections,
        "Starting echo server"
    );

    let mut event_loop = server::bind(addr, config.runtime)?;
    event_loop.run()?;
    Ok(())
}

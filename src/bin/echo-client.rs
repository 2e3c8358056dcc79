//! echo-client: streams the lines of a file through an echo server and
//! prints round-trip statistics once the last line comes back.

use echo_reactor::client;
use echo_reactor::config::ClientConfig;
use echo_reactor::logging;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ClientConfig::load()?;

    logging::init(&config.log_level);

    let addr = config.server_addr()?;
    let lines = client::open_lines(&config.file)?;

    info!(
        server = %addr,
        file = %config.file.display(),
        "Starting echo client"
    );

    let summary = client::run(addr, lines, config.runtime)?;
    println!("{summary}");
    Ok(())
}

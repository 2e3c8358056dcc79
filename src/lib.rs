//! echo-reactor: a single-threaded reactor with a line-framed echo protocol
//!
//! Components:
//! - `runtime`: mio event loop dispatching readiness to a `Listener`
//! - `protocol`: `<timestamp>*<sequence>*<payload>\n` frame codec
//! - `client`: streams a line source and measures round-trip lag
//! - `server`: echoes every byte back unchanged
//! - `config`: CLI arguments merged with an optional TOML file

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod server;

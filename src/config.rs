//! Configuration for the echo server and client.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use crate::protocol::MAX_FRAME_LEN;
use crate::runtime::LoopConfig;
use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Port used by both binaries when none is given.
pub const DEFAULT_PORT: u16 = 8080;

/// Line source read by the client when none is given.
#[cfg(windows)]
pub const DEFAULT_FILE: &str = r"C:\huckfin.txt";
#[cfg(not(windows))]
pub const DEFAULT_FILE: &str = "huckfin.txt";

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "echo-server", version)]
#[command(about = "Echoes every byte it receives back to the sender", long_about = None)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(value_name = "PORT")]
    pub port: Option<u16>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the echo client
#[derive(Parser, Debug, Default)]
#[command(name = "echo-client", version)]
#[command(about = "Streams the lines of a file through an echo server", long_about = None)]
pub struct ClientArgs {
    /// Server port
    #[arg(value_name = "PORT")]
    pub port: Option<u16>,

    /// Server host
    #[arg(value_name = "HOST")]
    pub host: Option<String>,

    /// File whose lines are sent, one message per line
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` table
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: DEFAULT_PORT,
        }
    }
}

/// `[client]` table
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_file")]
    pub file: PathBuf,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            file: default_file(),
        }
    }
}

/// `[runtime]` table, event loop tuning
#[derive(Debug, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
            events_capacity: default_events_capacity(),
        }
    }
}

impl RuntimeSection {
    fn to_loop_config(&self) -> Result<LoopConfig, ConfigError> {
        if self.buffer_size < MAX_FRAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "runtime.buffer_size must be at least {MAX_FRAME_LEN} bytes, got {}",
                self.buffer_size
            )));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "runtime.max_connections must be positive".to_string(),
            ));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::Invalid(
                "runtime.events_capacity must be positive".to_string(),
            ));
        }

        Ok(LoopConfig {
            buffer_size: self.buffer_size,
            max_connections: self.max_connections,
            events_capacity: self.events_capacity,
        })
    }
}

/// `[logging]` table
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_file() -> PathBuf {
    PathBuf::from(DEFAULT_FILE)
}

fn default_buffer_size() -> usize {
    LoopConfig::default().buffer_size
}

fn default_max_connections() -> usize {
    LoopConfig::default().max_connections
}

fn default_events_capacity() -> usize {
    LoopConfig::default().events_capacity
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Read `path`, or fall back to defaults when no file is given.
    pub fn read(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved echo server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub runtime: LoopConfig,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ServerArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they name.
    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = TomlConfig::read(args.config.as_deref())?;

        Ok(ServerConfig {
            bind: args.bind.unwrap_or(toml_config.server.bind),
            port: args.port.unwrap_or(toml_config.server.port),
            runtime: toml_config.runtime.to_loop_config()?,
            log_level: args.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Socket address to listen on.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.bind, self.port)
    }
}

/// Resolved echo client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub file: PathBuf,
    pub runtime: LoopConfig,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(ClientArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they name.
    pub fn from_args(args: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = TomlConfig::read(args.config.as_deref())?;

        Ok(ClientConfig {
            host: args.host.unwrap_or(toml_config.client.host),
            port: args.port.unwrap_or(toml_config.client.port),
            file: args.file.unwrap_or(toml_config.client.file),
            runtime: toml_config.runtime.to_loop_config()?,
            log_level: args.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Socket address of the echo server.
    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve(&self.host, self.port)
    }
}

/// Resolve `host:port`, preferring IPv4 since the server binds IPv4 by
/// default.
fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let resolve_error = |source: std::io::Error| ConfigError::Resolve {
        addr: format!("{host}:{port}"),
        source,
    };

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(resolve_error)?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| {
            resolve_error(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses found",
            ))
        })
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Invalid(String),

    #[error("config error: cannot resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.client.host, "localhost");
        assert_eq!(config.client.port, 8080);
        assert_eq!(config.client.file, PathBuf::from(DEFAULT_FILE));
        assert_eq!(config.runtime.buffer_size, 8 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            bind = "127.0.0.1"
            port = 9000

            [client]
            host = "example.org"
            file = "/tmp/lines.txt"

            [runtime]
            buffer_size = 16384
            max_connections = 64

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.client.host, "example.org");
        assert_eq!(config.client.port, 8080);
        assert_eq!(config.client.file, PathBuf::from("/tmp/lines.txt"));
        assert_eq!(config.runtime.buffer_size, 16384);
        assert_eq!(config.runtime.max_connections, 64);
        assert_eq!(config.runtime.events_capacity, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_client_positional_args() {
        let args =
            ClientArgs::try_parse_from(["echo-client", "9001", "10.0.0.1", "in.txt"]).unwrap();
        assert_eq!(args.port, Some(9001));
        assert_eq!(args.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(args.file, Some(PathBuf::from("in.txt")));

        let config = ClientConfig::from_args(args).unwrap();
        assert_eq!(
            config.server_addr().unwrap(),
            "10.0.0.1:9001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_client_defaults() {
        let args = ClientArgs::try_parse_from(["echo-client"]).unwrap();
        let config = ClientConfig::from_args(args).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.file, PathBuf::from(DEFAULT_FILE));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = config_file(
            r#"
            [server]
            bind = "127.0.0.1"
            port = 7000

            [logging]
            level = "warn"
            "#,
        );

        let args = ServerArgs {
            port: Some(7001),
            config: Some(file.path().to_path_buf()),
            ..ServerArgs::default()
        };
        let config = ServerConfig::from_args(args).unwrap();
        assert_eq!(config.port, 7001);
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.log_level, "warn");
        assert_eq!(
            config.listen_addr().unwrap(),
            "127.0.0.1:7001".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_buffer_smaller_than_frame() {
        let file = config_file("[runtime]\nbuffer_size = 1024\n");
        let args = ServerArgs {
            config: Some(file.path().to_path_buf()),
            ..ServerArgs::default()
        };
        match ServerConfig::from_args(args) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("buffer_size")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        match TomlConfig::read(Some(&path)) {
            Err(ConfigError::FileRead { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bad_toml() {
        let file = config_file("[server]\nport = \"not a number\"\n");
        match TomlConfig::read(Some(file.path())) {
            Err(err @ ConfigError::TomlParse { .. }) => {
                assert!(err.to_string().starts_with("config error"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

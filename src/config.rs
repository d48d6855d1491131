//! Configuration module for the chatroom server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Port used when none is given (or the given one does not parse).
pub const DEFAULT_PORT: u16 = 8000;

/// Command-line arguments for the chat server
#[derive(Parser, Debug)]
#[command(name = "chatroom")]
#[command(author = "chatroom authors")]
#[command(version = "0.1.0")]
#[command(about = "A multi-client line-oriented TCP chat server", long_about = None)]
pub struct CliArgs {
    /// Port to listen on (falls back to 8000 if missing or not a number)
    pub port: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum number of simultaneously connected clients
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Do not read operator announcements from standard input
    #[arg(long)]
    pub no_admin: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum number of connected clients
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
        }
    }
}

/// Per-connection limits
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Bytes a client may have queued for delivery before it is dropped
    #[serde(default = "default_outbound_limit")]
    pub outbound_limit: usize,
    /// Longest line accepted before it is force-split
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Size of a single socket read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_limit: default_outbound_limit(),
            max_line_length: default_max_line_length(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Operator console configuration
#[derive(Debug, Deserialize)]
pub struct AdminConfig {
    /// Read operator announcements from standard input
    #[serde(default = "default_admin_enabled")]
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_admin_enabled(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_backlog() -> i32 {
    128
}

fn default_max_connections() -> usize {
    512
}

fn default_outbound_limit() -> usize {
    64 * 1024 // 64 KB
}

fn default_max_line_length() -> usize {
    4096
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_admin_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub max_connections: usize,
    pub outbound_limit: usize,
    pub max_line_length: usize,
    pub read_buffer_size: usize,
    pub admin_console: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::parse_from(["chatroom"]), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already-parsed CLI args, reading the TOML file they name.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli
                .port
                .as_deref()
                .and_then(parse_port)
                .unwrap_or(toml_config.server.port),
            backlog: toml_config.server.backlog,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            outbound_limit: toml_config.connection.outbound_limit,
            max_line_length: toml_config.connection.max_line_length,
            read_buffer_size: toml_config.connection.read_buffer_size,
            admin_console: !cli.no_admin && toml_config.admin.enabled,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// `host:port` string suitable for parsing into a socket address.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse the positional port argument; anything but a plain integer is rejected.
pub fn parse_port(arg: &str) -> Option<u16> {
    arg.trim().parse().ok()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.max_connections, 512);
        assert_eq!(config.connection.outbound_limit, 64 * 1024);
        assert!(config.admin.enabled);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9001
            max_connections = 16

            [connection]
            outbound_limit = 1024
            max_line_length = 256

            [admin]
            enabled = false

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.connection.outbound_limit, 1024);
        assert_eq!(config.connection.max_line_length, 256);
        assert_eq!(config.connection.read_buffer_size, 1024);
        assert!(!config.admin.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_positional_port() {
        let cli = CliArgs::parse_from(["chatroom", "9001"]);
        let config = Config::merge(cli, TomlConfig::default());
        assert_eq!(config.port, 9001);
        assert_eq!(config.listen_addr(), "0.0.0.0:9001");
    }

    #[test]
    fn test_unparseable_port_falls_back() {
        let cli = CliArgs::parse_from(["chatroom", "eighty"]);
        assert_eq!(Config::merge(cli, TomlConfig::default()).port, DEFAULT_PORT);

        let cli = CliArgs::parse_from(["chatroom", "70000"]);
        assert_eq!(Config::merge(cli, TomlConfig::default()).port, DEFAULT_PORT);

        assert_eq!(Config::default().port, DEFAULT_PORT);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            host = "10.0.0.1"
            port = 7000
            max_connections = 8
        "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from([
            "chatroom",
            "7100",
            "--host",
            "127.0.0.1",
            "--no-admin",
            "--log-level",
            "trace",
        ]);
        let config = Config::merge(cli, toml_config);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7100);
        assert_eq!(config.max_connections, 8);
        assert!(!config.admin_console);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::parse_from(["chatroom", "--config", "/nonexistent/chatroom.toml"]);
        match Config::from_cli(cli) {
            Err(ConfigError::FileRead(path, _)) => {
                assert_eq!(path, PathBuf::from("/nonexistent/chatroom.toml"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

//! Configuration module for quarantine-server.
//!
//! Supports command-line arguments and a configuration file. The file is
//! TOML, or the legacy JSON format when its name ends in `.json`.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "quarantine-server")]
#[command(author = "quarantine-server authors")]
#[command(version = "0.1.0")]
#[command(about = "Remote file signature scan and quarantine server", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML, or legacy JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host address to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrently running request handlers
    #[arg(short = 'n', long)]
    pub max_handlers: Option<usize>,

    /// Directory quarantined files are moved into
    #[arg(short, long)]
    pub quarantine_dir: Option<PathBuf>,

    /// Number of runtime worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seconds to wait for a request after accepting a connection
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Concurrency ceiling for request handlers
    #[serde(default = "default_max_handlers")]
    pub max_handlers: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Largest request read from a connection, in bytes
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Seconds to wait for the request
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_handlers: default_max_handlers(),
            backlog: default_backlog(),
            workers: None,
            max_request_size: default_max_request_size(),
            read_timeout: default_read_timeout(),
        }
    }
}

/// Quarantine store configuration
#[derive(Debug, Deserialize)]
pub struct QuarantineConfig {
    #[serde(default = "default_quarantine_dir")]
    pub dir: PathBuf,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            dir: default_quarantine_dir(),
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

/// Legacy JSON configuration, e.g. `server.config.json`:
///
/// ```json
/// {"THREADS_NUM": 4, "PORT": 8080, "QUARANTINE_DIR": "quarantine"}
/// ```
#[derive(Debug, Deserialize)]
pub struct JsonConfig {
    #[serde(rename = "THREADS_NUM", deserialize_with = "number_or_string")]
    pub threads_num: usize,
    #[serde(rename = "PORT", deserialize_with = "number_or_string")]
    pub port: u16,
    #[serde(rename = "QUARANTINE_DIR")]
    pub quarantine_dir: PathBuf,
}

impl From<JsonConfig> for TomlConfig {
    fn from(json: JsonConfig) -> Self {
        TomlConfig {
            server: ServerConfig {
                port: json.port,
                max_handlers: json.threads_num,
                ..ServerConfig::default()
            },
            quarantine: QuarantineConfig {
                dir: json.quarantine_dir,
            },
            logging: LoggingConfig::default(),
        }
    }
}

/// Accept `4` as well as `"4"`
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr + TryFrom<u64>,
    T::Err: std::fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => T::try_from(n).map_err(|_| serde::de::Error::custom("number out of range")),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_handlers() -> usize {
    4
}

fn default_backlog() -> u32 {
    128
}

fn default_max_request_size() -> usize {
    2048
}

fn default_read_timeout() -> u64 {
    30 // seconds
}

fn default_quarantine_dir() -> PathBuf {
    PathBuf::from("quarantine")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_handlers: usize,
    pub backlog: u32,
    pub workers: Option<usize>,
    pub max_request_size: usize,
    pub read_timeout: Duration,
    pub quarantine_dir: PathBuf,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional config file.
    /// CLI arguments take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let file_config = match cli.config {
            Some(ref path) => load_file(path)?,
            None => TomlConfig::default(),
        };
        Self::merge(cli, file_config)
    }

    fn merge(cli: CliArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            max_handlers: cli.max_handlers.unwrap_or(file.server.max_handlers),
            backlog: file.server.backlog,
            workers: cli.workers.or(file.server.workers).filter(|&n| n > 0),
            max_request_size: file.server.max_request_size,
            read_timeout: Duration::from_secs(cli.read_timeout.unwrap_or(file.server.read_timeout)),
            quarantine_dir: cli.quarantine_dir.unwrap_or(file.quarantine.dir),
            log_level: cli.log_level.unwrap_or(file.logging.level),
        };

        if config.max_handlers == 0 {
            return Err(ConfigError::Invalid("max_handlers must be at least 1"));
        }
        if config.max_request_size == 0 {
            return Err(ConfigError::Invalid("max_request_size must be at least 1"));
        }
        Ok(config)
    }

    /// `host:port` listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_file(path: &PathBuf) -> Result<TomlConfig, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.clone(), e))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let json: JsonConfig = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::JsonParse(path.clone(), e))?;
        Ok(json.into())
    } else {
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    JsonParse(PathBuf, serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::from_args(CliArgs::default()).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
        assert_eq!(config.max_handlers, 4);
        assert_eq!(config.max_request_size, 2048);
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.quarantine_dir, PathBuf::from("quarantine"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            max_handlers = 16
            workers = 4
            read_timeout = 5

            [quarantine]
            dir = "/var/lib/quarantine"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_handlers, 16);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.read_timeout, 5);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.quarantine.dir, PathBuf::from("/var/lib/quarantine"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str("[server]\nport = 9000\nmax_handlers = 2\n").unwrap();
        let cli = CliArgs {
            port: Some(7000),
            quarantine_dir: Some(PathBuf::from("/tmp/q")),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, file).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_handlers, 2);
        assert_eq!(config.quarantine_dir, PathBuf::from("/tmp/q"));
    }

    #[test]
    fn test_zero_handlers_rejected() {
        let cli = CliArgs {
            max_handlers: Some(0),
            ..CliArgs::default()
        };
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_legacy_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"THREADS_NUM": "3", "PORT": 8181, "QUARANTINE_DIR": "/tmp/quarantine"}}"#
        )
        .unwrap();

        let cli = CliArgs {
            config: Some(file.path().to_path_buf()),
            ..CliArgs::default()
        };
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.max_handlers, 3);
        assert_eq!(config.port, 8181);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.quarantine_dir, PathBuf::from("/tmp/quarantine"));
    }

    #[test]
    fn test_missing_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/server.toml")),
            ..CliArgs::default()
        };
        let err = Config::from_args(cli).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read config file"));
    }
}

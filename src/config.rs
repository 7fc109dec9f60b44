//! Configuration module for the muxd server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the command server
#[derive(Parser, Debug)]
#[command(name = "muxd")]
#[command(author = "muxd authors")]
#[command(version = "0.1.0")]
#[command(about = "A multi-client command server over Unix domain sockets", long_about = None)]
pub struct CliArgs {
    /// Path of the Unix domain socket to serve on
    pub socket: Option<PathBuf>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen backlog for the server socket
    #[arg(short, long)]
    pub backlog: Option<i32>,

    /// Maximum frame size in bytes, terminator included
    #[arg(short, long)]
    pub frame_size: Option<usize>,

    /// Poll timeout in milliseconds when sessions are connected
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Pause in milliseconds after a poll cycle with no readiness
    #[arg(long)]
    pub idle_wait_ms: Option<u64>,

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
    pub session: SessionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Path of the Unix domain socket to serve on
    pub socket: Option<PathBuf>,
    /// Listen backlog for the server socket
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            backlog: default_backlog(),
        }
    }
}

/// Session-related configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Maximum frame size in bytes, terminator included
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_size: default_frame_size(),
        }
    }
}

/// Event-loop timing configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Poll timeout in milliseconds when sessions are connected
    #[serde(default)]
    pub poll_timeout_ms: u64,
    /// Pause in milliseconds after a poll cycle with no readiness
    #[serde(default = "default_idle_wait")]
    pub idle_wait_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 0,
            idle_wait_ms: default_idle_wait(),
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

fn default_backlog() -> i32 {
    10
}

fn default_frame_size() -> usize {
    1024
}

fn default_idle_wait() -> u64 {
    1 // milliseconds
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub socket: PathBuf,
    pub backlog: i32,
    pub frame_size: usize,
    pub poll_timeout_ms: u64,
    pub idle_wait_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let socket = cli
            .socket
            .or(toml_config.server.socket)
            .ok_or(ConfigError::MissingSocketPath)?;

        Ok(Config {
            socket,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            frame_size: cli.frame_size.unwrap_or(toml_config.session.frame_size),
            poll_timeout_ms: cli
                .poll_timeout_ms
                .unwrap_or(toml_config.runtime.poll_timeout_ms),
            idle_wait_ms: cli
                .idle_wait_ms
                .unwrap_or(toml_config.runtime.idle_wait_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingSocketPath,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingSocketPath => {
                write!(
                    f,
                    "No socket path given: pass one on the command line or set server.socket in the config file"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

//! Configuration module for the lineprime server.
//!
//! Supports command-line arguments, the `PORT` and `LOG_FILE` environment
//! variables and an optional TOML configuration file. CLI arguments (and
//! their environment fallbacks) take precedence over config file values.

use chrono::FixedOffset;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "lineprime")]
#[command(version = "0.1.0")]
#[command(about = "Line-oriented TCP text analysis server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Number of pool workers (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Longest line accepted before a newline arrives, in bytes
    #[arg(long)]
    pub max_line_bytes: Option<usize>,

    /// Give up on a worker reply after this many milliseconds (0 = wait forever)
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Audit log file; relative paths resolve against the working directory
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// UTC offset in minutes for audit timestamps (e.g., -300)
    #[arg(long, allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,

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
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of pool workers
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Longest line accepted before a newline arrives, in bytes
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Worker reply timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            max_connections: default_max_connections(),
            max_line_bytes: default_max_line_bytes(),
            request_timeout_ms: None,
        }
    }
}

/// Audit log configuration
#[derive(Debug, Deserialize)]
pub struct AuditConfig {
    /// Audit log file
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    /// UTC offset in minutes for timestamps
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            utc_offset_minutes: default_utc_offset_minutes(),
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
    5050
}

fn default_max_connections() -> usize {
    10000
}

fn default_max_line_bytes() -> usize {
    64 * 1024 // 64 KB
}

fn default_log_file() -> PathBuf {
    PathBuf::from("server_log.txt")
}

fn default_utc_offset_minutes() -> i32 {
    -5 * 60 // America/Bogota
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_connections: usize,
    pub max_line_bytes: usize,
    pub request_timeout: Option<Duration>,
    pub log_file: PathBuf,
    pub utc_offset: FixedOffset,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let cwd = std::env::current_dir().map_err(ConfigError::WorkingDir)?;
        Self::resolve(cli, toml_config, &cwd)
    }

    /// Merge CLI args over TOML values and resolve derived settings.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig, cwd: &Path) -> Result<Self, ConfigError> {
        let workers = match cli.workers.or(toml_config.server.workers) {
            None | Some(0) => num_cpus(),
            Some(n) => n,
        };

        let request_timeout = cli
            .request_timeout_ms
            .or(toml_config.server.request_timeout_ms)
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);

        let offset_minutes = cli
            .utc_offset_minutes
            .unwrap_or(toml_config.audit.utc_offset_minutes);
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or(ConfigError::InvalidUtcOffset(offset_minutes))?;

        let log_file = cli.log_file.unwrap_or(toml_config.audit.file);

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections)
                .max(1),
            max_line_bytes: cli
                .max_line_bytes
                .unwrap_or(toml_config.server.max_line_bytes)
                .max(1),
            request_timeout,
            log_file: resolve_log_path(&log_file, cwd),
            utc_offset,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Anchor a relative audit path at `base`.
pub fn resolve_log_path(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    WorkingDir(std::io::Error),
    InvalidUtcOffset(i32),
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
            ConfigError::WorkingDir(e) => {
                write!(f, "Failed to determine working directory: {}", e)
            }
            ConfigError::InvalidUtcOffset(minutes) => {
                write!(f, "UTC offset of {} minutes is out of range", minutes)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_args() -> CliArgs {
        CliArgs::try_parse_from(["lineprime"]).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 5050);
        assert_eq!(config.server.workers, None);
        assert_eq!(config.audit.file, PathBuf::from("server_log.txt"));
        assert_eq!(config.audit.utc_offset_minutes, -300);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 6000
            workers = 4
            max_line_bytes = 512
            request_timeout_ms = 1500

            [audit]
            file = "/var/log/lineprime.txt"
            utc_offset_minutes = 60

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.max_line_bytes, 512);
        assert_eq!(config.server.request_timeout_ms, Some(1500));
        assert_eq!(config.audit.file, PathBuf::from("/var/log/lineprime.txt"));
        assert_eq!(config.audit.utc_offset_minutes, 60);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_resolve_defaults() {
        let config = Config::resolve(no_args(), TomlConfig::default(), Path::new("/srv/app")).unwrap();
        assert!(config.workers >= 1);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_line_bytes, 64 * 1024);
        assert_eq!(config.log_file, PathBuf::from("/srv/app/server_log.txt"));
        assert_eq!(config.utc_offset.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let cli = CliArgs::try_parse_from([
            "lineprime",
            "--port",
            "7000",
            "--workers",
            "3",
            "--request-timeout-ms",
            "250",
            "--max-line-bytes",
            "128",
            "--utc-offset-minutes",
            "-180",
            "--log-level",
            "trace",
        ])
        .unwrap();
        let toml_config: TomlConfig = toml::from_str("[server]\nport = 6000\nworkers = 8\n").unwrap();

        let config = Config::resolve(cli, toml_config, Path::new("/srv")).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.workers, 3);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_line_bytes, 128);
        assert_eq!(config.utc_offset.local_minus_utc(), -3 * 3600);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_zero_workers_means_auto() {
        let toml_config: TomlConfig = toml::from_str("[server]\nworkers = 0\n").unwrap();
        let config = Config::resolve(no_args(), toml_config, Path::new("/")).unwrap();
        assert_eq!(config.workers, num_cpus());
    }

    #[test]
    fn test_invalid_utc_offset() {
        let toml_config: TomlConfig =
            toml::from_str("[audit]\nutc_offset_minutes = 100000\n").unwrap();
        let err = Config::resolve(no_args(), toml_config, Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUtcOffset(100000)));
    }

    #[test]
    fn test_absolute_log_path_kept() {
        assert_eq!(
            resolve_log_path(Path::new("/tmp/audit.txt"), Path::new("/srv")),
            PathBuf::from("/tmp/audit.txt")
        );
        assert_eq!(
            resolve_log_path(Path::new("logs/audit.txt"), Path::new("/srv")),
            PathBuf::from("/srv/logs/audit.txt")
        );
    }
}

//! FleetSync Configuration
//!
//! Configuration structures for a single game-server process taking part
//! in a FleetSync network.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main FleetSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSyncConfig {
    /// Identity of this server inside the network
    pub network: NetworkConfig,

    /// Shared database connection configuration
    pub database: DatabaseConfig,

    /// Heartbeat / staleness configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this process in the network topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Unique server id (primary key of the `network_servers` row)
    pub id: u32,

    /// Name of the node this server belongs to (e.g. "lobby")
    pub node: String,

    /// Display name of this server
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Address players use to reach this server
    #[serde(default = "default_ip")]
    pub ip: String,

    /// Game port of this server
    #[serde(default = "default_game_port")]
    pub port: u16,

    /// Slot count reported when the host does not supply one
    #[serde(default = "default_max_players")]
    pub max_players: u32,
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// MySQL / MariaDB host
    pub host: String,

    /// MySQL port
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user
    pub user: String,

    /// Database password
    pub password: String,

    /// Database name
    pub database: String,

    /// Number of request workers (one cached connection each)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Network synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Heartbeat period in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Seconds after the last sync before a server counts as offline
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_display_name() -> String {
    "FleetSync: Server".to_string()
}

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_game_port() -> u16 {
    19132
}

fn default_max_players() -> u32 {
    100
}

fn default_db_port() -> u16 {
    3306
}

fn default_workers() -> usize {
    2
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_staleness_secs() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            staleness_secs: default_staleness_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Apply command line flags on top of the configured values
    pub fn with_overrides(mut self, level: Option<String>, format: Option<String>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(format) = format {
            self.format = format;
        }
        self
    }
}

impl FleetSyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: FleetSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.network.node.is_empty() {
            return Err(crate::Error::Config("network.node cannot be empty".into()));
        }

        if self.network.node.len() > 32 {
            return Err(crate::Error::Config(
                "network.node must be at most 32 characters".into(),
            ));
        }

        if self.database.host.is_empty() {
            return Err(crate::Error::Config("database.host cannot be empty".into()));
        }

        if self.database.database.is_empty() {
            return Err(crate::Error::Config("database.database cannot be empty".into()));
        }

        if self.database.workers == 0 {
            return Err(crate::Error::Config("database.workers must be at least 1".into()));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::Error::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got \"{}\"",
                self.logging.format
            )));
        }

        if self.sync.heartbeat_interval_ms == 0 {
            return Err(crate::Error::Config(
                "sync.heartbeat_interval_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.sync.heartbeat_interval_ms)
    }

    /// Get staleness threshold as Duration
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.sync.staleness_secs)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        PathBuf::from("fleetsync.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[network]
id = 4
node = "skywars"
display_name = "SkyWars #4"
ip = "10.0.0.14"
port = 19134

[database]
host = "db.internal"
user = "fleet"
password = "secret"
database = "network"
workers = 3
"#;

    #[test]
    fn test_parse_config() {
        let config = FleetSyncConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.network.id, 4);
        assert_eq!(config.network.node, "skywars");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.workers, 3);
        assert_eq!(config.sync.staleness_secs, 100);
        assert_eq!(config.staleness(), Duration::from_secs(100));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_zero_workers() {
        let toml = SAMPLE.replace("workers = 3", "workers = 0");
        let err = FleetSyncConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_rejects_empty_node() {
        let toml = SAMPLE.replace("node = \"skywars\"", "node = \"\"");
        assert!(FleetSyncConfig::from_str(&toml).is_err());
    }

    #[test]
    fn test_logging_section_with_flag_overrides() {
        let toml = format!("{}\n[logging]\nlevel = \"debug\"\nformat = \"json\"\n", SAMPLE);
        let config = FleetSyncConfig::from_str(&toml).unwrap();

        let logging = config.logging.clone().with_overrides(None, None);
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, "json");

        let logging = config.logging.with_overrides(Some("warn".into()), None);
        assert_eq!(logging.level, "warn");
        assert_eq!(logging.format, "json");
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let toml = format!("{}\n[logging]\nformat = \"xml\"\n", SAMPLE);
        let err = FleetSyncConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("logging.format"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = FleetSyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.network.ip, "10.0.0.14");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
    }
}

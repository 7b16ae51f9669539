//! Configuration for Cadence

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "CADENCE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scheduler / batch configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Tracking link configuration
    #[serde(default)]
    pub tracking: TrackingConfig,

    /// Gmail transport configuration
    #[serde(default)]
    pub gmail: GmailConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum enrollments processed per invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Lease held on a claimed enrollment, in seconds
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,

    /// Shared secret expected as a bearer token on the trigger endpoint
    pub cron_secret: Option<String>,

    /// Run the engine in-process on this interval (seconds); disabled when unset
    pub interval_secs: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            lease_secs: default_lease_secs(),
            cron_secret: None,
            interval_secs: None,
        }
    }
}

fn default_batch_size() -> i64 {
    50
}

fn default_lease_secs() -> i64 {
    300
}

/// Tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Public base URL the tracking endpoints are reachable at
    #[serde(default = "default_tracking_base_url")]
    pub base_url: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_tracking_base_url(),
        }
    }
}

fn default_tracking_base_url() -> String {
    "http://localhost:8080".to_string()
}

/// Gmail API transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// OAuth client id
    pub client_id: Option<String>,

    /// OAuth client secret
    pub client_secret: Option<String>,

    /// Long-lived refresh token for the sending mailbox
    pub refresh_token: Option<String>,

    /// Sender address (From header)
    pub sender: Option<String>,

    /// Optional display name for the sender
    pub sender_name: Option<String>,

    /// Gmail REST API base URL
    #[serde(default = "default_gmail_api_base_url")]
    pub api_base_url: String,

    /// OAuth token endpoint
    #[serde(default = "default_gmail_token_url")]
    pub token_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_gmail_timeout")]
    pub timeout_secs: u64,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            sender: None,
            sender_name: None,
            api_base_url: default_gmail_api_base_url(),
            token_url: default_gmail_token_url(),
            timeout_secs: default_gmail_timeout(),
        }
    }
}

fn default_gmail_api_base_url() -> String {
    "https://gmail.googleapis.com".to_string()
}

fn default_gmail_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_gmail_timeout() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the environment and default file locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let mut config = Self::from_file(Path::new(&path))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/cadence/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                let mut config = Self::from_file(&path)?;
                config.apply_env_overrides();
                return Ok(config);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Secrets may be supplied through the environment instead of the file
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Ok(secret) = std::env::var("CADENCE_CRON_SECRET") {
            self.scheduler.cron_secret = Some(secret);
        }
        if let Ok(secret) = std::env::var("GMAIL_CLIENT_SECRET") {
            self.gmail.client_secret = Some(secret);
        }
        if let Ok(token) = std::env::var("GMAIL_REFRESH_TOKEN") {
            self.gmail.refresh_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let scheduler = SchedulerConfig::default();
        assert_eq!(scheduler.batch_size, 50);
        assert_eq!(scheduler.lease_secs, 300);
        assert!(scheduler.interval_secs.is_none());

        let gmail = GmailConfig::default();
        assert_eq!(gmail.api_base_url, "https://gmail.googleapis.com");
        assert_eq!(gmail.timeout_secs, 30);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
port = 9000

[database]
url = "postgres://localhost/cadence"

[scheduler]
batch_size = 25
cron_secret = "s3cret"

[tracking]
base_url = "https://crm.example.com"

[gmail]
sender = "sales@example.com"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/cadence"));
        assert_eq!(config.scheduler.batch_size, 25);
        assert_eq!(config.scheduler.lease_secs, 300);
        assert_eq!(config.scheduler.cron_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.tracking.base_url, "https://crm.example.com");
        assert_eq!(config.gmail.sender.as_deref(), Some("sales@example.com"));
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.database.url.is_none());
        assert_eq!(config.tracking.base_url, "http://localhost:8080");
    }
}

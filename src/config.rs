use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::scanner::normalize_extension;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Environment variables with this prefix override file values,
/// e.g. `PICKLY_SMB__PASSWORD`.
const ENV_PREFIX: &str = "PICKLY_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Invalid(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub smb: SmbConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmbConfig {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub domain: String,
    pub share: String,
    /// Where the share is mounted locally when using the mounted-share backend.
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
}

impl SmbConfig {
    pub fn resolved_mount_point(&self) -> PathBuf {
        self.mount_point
            .clone()
            .unwrap_or_else(|| PathBuf::from("/mnt").join(&self.share))
    }
}

impl fmt::Debug for SmbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmbConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("share", &self.share)
            .field("mount_point", &self.mount_point)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub sd_mount_base: PathBuf,
    pub temp_dir: PathBuf,
    pub remote_base_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sd_mount_base: PathBuf::from("/media/pi"),
            temp_dir: PathBuf::from("/tmp/pickly-transfer"),
            remote_base_path: "/incoming".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Seconds between device scans
    pub poll_interval: u64,
    pub supported_extensions: Vec<String>,
    pub min_file_size: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval: 2,
            supported_extensions: Vec::new(),
            min_file_size: 1_000_000,
        }
    }
}

impl MonitoringConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub max_retries: u32,
    /// Seconds to wait between attempts
    pub retry_delay: u64,
    pub chunk_size: usize,
    pub verify_checksums: bool,
    pub backoff: Backoff,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: 5,
            chunk_size: 1024 * 1024,
            verify_checksums: true,
            backoff: Backoff::Fixed,
        }
    }
}

impl TransferConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Optional log file; console output is always on
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

fn default_port() -> u16 {
    445
}

impl AppConfig {
    /// Load the JSON document at `path`, overlay `PICKLY_*` environment
    /// variables, then validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let config: AppConfig = Figment::new()
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()
    }

    /// Parse a JSON document without environment overrides.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = Figment::new().merge(Json::string(json)).extract()?;
        config.validate()
    }

    fn validate(mut self) -> Result<Self, ConfigError> {
        if self.smb.server.trim().is_empty() {
            return Err(ConfigError::Invalid("smb.server must not be empty".into()));
        }
        if self.smb.share.trim().is_empty() {
            return Err(ConfigError::Invalid("smb.share must not be empty".into()));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "transfer.chunk_size must be greater than zero".into(),
            ));
        }
        if self.transfer.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "transfer.max_retries must be at least 1".into(),
            ));
        }
        if self.monitoring.poll_interval == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.poll_interval must be at least 1 second".into(),
            ));
        }

        self.monitoring.supported_extensions = self
            .monitoring
            .supported_extensions
            .iter()
            .filter_map(|ext| normalize_extension(ext))
            .collect();

        Ok(self)
    }
}

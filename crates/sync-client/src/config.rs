//! Client configuration loading

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::transport::RetryPolicy;

/// Shortest timer period; `tokio::time::interval` rejects zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a sync client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the sync server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Directory holding the local replica file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_push_interval")]
    pub push_interval_ms: u64,

    #[serde(default = "default_pull_interval")]
    pub pull_interval_ms: u64,

    #[serde(default = "default_autosave_interval")]
    pub autosave_interval_ms: u64,

    /// Attempts per fetch or push before giving up on the cycle
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// How long shutdown waits for in-flight timers before aborting them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "default_true")]
    pub sync_enabled: bool,

    /// Collection created on first start if no collection has this name
    #[serde(default)]
    pub default_collection: Option<String>,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn default_push_interval() -> u64 {
    3000
}

fn default_pull_interval() -> u64 {
    5000
}

fn default_autosave_interval() -> u64 {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_shutdown_grace() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            data_dir: default_data_dir(),
            push_interval_ms: default_push_interval(),
            pull_interval_ms: default_pull_interval(),
            autosave_interval_ms: default_autosave_interval(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
            sync_enabled: default_true(),
            default_collection: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file, or defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: ClientConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Reject timer periods of zero.
    pub fn validate(&self) -> Result<()> {
        for (name, ms) in [
            ("push_interval_ms", self.push_interval_ms),
            ("pull_interval_ms", self.pull_interval_ms),
            ("autosave_interval_ms", self.autosave_interval_ms),
        ] {
            if ms == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    // Interval getters never return zero, even for configs built in code.

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms).max(MIN_INTERVAL)
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms).max(MIN_INTERVAL)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms).max(MIN_INTERVAL)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.push_interval(), Duration::from_secs(3));
        assert_eq!(config.pull_interval(), Duration::from_secs(5));
        assert_eq!(config.autosave_interval(), Duration::from_secs(2));
        assert_eq!(config.retry_attempts, 3);
        assert!(config.sync_enabled);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "server_url": "http://sync.local:9000", "retry_attempts": 5 }"#,
        )
        .unwrap();

        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.server_url, "http://sync.local:9000");
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay_ms, 2000);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ClientConfig::load(&path).is_err());
    }

    #[test]
    fn test_retry_policy_never_zero_attempts() {
        let config = ClientConfig {
            retry_attempts: 0,
            ..ClientConfig::default()
        };
        assert_eq!(config.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_zero_interval_is_rejected_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "push_interval_ms": 0 }"#).unwrap();

        let err = ClientConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("push_interval_ms"));
    }

    #[test]
    fn test_interval_getters_never_return_zero() {
        let config = ClientConfig {
            push_interval_ms: 0,
            pull_interval_ms: 0,
            autosave_interval_ms: 0,
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.push_interval(), MIN_INTERVAL);
        assert_eq!(config.pull_interval(), MIN_INTERVAL);
        assert_eq!(config.autosave_interval(), MIN_INTERVAL);
    }
}

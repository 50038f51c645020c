//! Configuration loading for agentbus.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::DEFAULT_REDIS_URL;
use crate::error::Error;
use crate::protocol::DEFAULT_PREFIX;

pub type Result<T> = std::result::Result<T, Error>;

/// Get the agentbus home directory (~/.agentbus).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".agentbus"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.agentbus/settings.json
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_path()?)
}

/// Load settings from an explicit path.
pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings or return default if not found.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_else(|e| {
        tracing::debug!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.redis_url.trim().is_empty() {
        return Err(Error::Config("redis_url must not be empty".to_string()));
    }
    if settings.channel_prefix.is_empty() {
        return Err(Error::Config("channel_prefix must not be empty".to_string()));
    }
    if let Some(agent_id) = settings.agent_id.as_deref() {
        if agent_id.is_empty() {
            return Err(Error::Config("agent_id must not be empty".to_string()));
        }
        if agent_id.contains(':') {
            tracing::warn!(
                "agent_id '{}' contains ':'; agent listings report only the text after the last ':'",
                agent_id
            );
        }
    }
    if settings.heartbeat_interval_secs == Some(0) {
        return Err(Error::Config(
            "heartbeat_interval_secs must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Default agent id: `agent:` plus the creation time in seconds.
///
/// Two agents started within the same microsecond collide, so long-running
/// deployments should configure an explicit id.
pub fn default_agent_id() -> String {
    format!("agent:{}", crate::protocol::current_timestamp())
}

/// Messaging settings, supplied by the embedding application.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Settings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
}

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_channel_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_poll_timeout_ms() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            channel_prefix: default_channel_prefix(),
            agent_id: None,
            verbose: false,
            poll_timeout_ms: default_poll_timeout_ms(),
            heartbeat_interval_secs: None,
        }
    }
}

impl Settings {
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.redis_url, "redis://localhost:6379/0");
        assert_eq!(settings.channel_prefix, "aider:");
        assert!(settings.agent_id.is_none());
        assert_eq!(settings.poll_timeout(), Duration::from_millis(10));
        assert!(settings.heartbeat_interval().is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"agent_id": "coder", "heartbeat_interval_secs": 5}"#).unwrap();

        let settings = load_settings_from(&path).unwrap();
        assert_eq!(settings.agent_id.as_deref(), Some("coder"));
        assert_eq!(settings.channel_prefix, "aider:");
        assert_eq!(settings.heartbeat_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = load_settings_from(&temp_dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_validation() {
        assert!(validate_settings(&Settings::default()).is_ok());
        assert!(validate_settings(&Settings::default().with_prefix("")).is_err());
        assert!(validate_settings(&Settings::default().with_redis_url(" ")).is_err());
        assert!(validate_settings(&Settings::default().with_agent_id("")).is_err());
        assert!(validate_settings(&Settings::default().with_agent_id("agent:1")).is_ok());

        let mut settings = Settings::default();
        settings.heartbeat_interval_secs = Some(0);
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn test_default_agent_id_scheme() {
        let id = default_agent_id();
        let seconds: f64 = id.strip_prefix("agent:").unwrap().parse().unwrap();
        assert!(seconds > 1_600_000_000.0);
    }
}

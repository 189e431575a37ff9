//! Tunables for polling, retry and batch pacing

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-collection sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Non-forced fetches closer together than this are suppressed
    pub min_fetch_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Total invocations of a rate-limited call, including the first
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    /// Upper bound of the random jitter added to each back-off delay
    pub max_jitter_ms: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    /// Bound on a single fetch; 0 disables it
    pub fetch_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_fetch_interval_ms: 3_000,
            poll_interval_ms: 30_000,
            max_retries: 4,
            base_retry_delay_ms: 3_000,
            max_jitter_ms: 2_000,
            batch_size: 2,
            batch_pause_ms: 1_000,
            fetch_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Header bell: frequent polls, gentle bulk writes
    pub fn notification_bell() -> Self {
        Self::default()
    }

    /// Full notifications page
    pub fn notifications_page() -> Self {
        Self {
            poll_interval_ms: 60_000,
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            batch_size: 3,
            ..Self::default()
        }
    }

    /// Open conversation
    pub fn chat() -> Self {
        Self {
            min_fetch_interval_ms: 1_000,
            poll_interval_ms: 3_000,
            max_retries: 3,
            base_retry_delay_ms: 1_000,
            ..Self::default()
        }
    }

    /// "My projects" listing
    pub fn projects() -> Self {
        Self {
            min_fetch_interval_ms: 5_000,
            poll_interval_ms: 60_000,
            max_retries: 3,
            base_retry_delay_ms: 2_000,
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.min_fetch_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_ms > 0).then(|| Duration::from_millis(self.fetch_timeout_ms))
    }
}

/// Settings for every synced view, as read from a TOML file with one table
/// per view. A table only overrides the keys it names; everything else comes
/// from that view's preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSettings {
    pub notification_bell: SyncConfig,
    pub notifications_page: SyncConfig,
    pub chat: SyncConfig,
    pub projects: SyncConfig,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            notification_bell: SyncConfig::notification_bell(),
            notifications_page: SyncConfig::notifications_page(),
            chat: SyncConfig::chat(),
            projects: SyncConfig::projects(),
        }
    }
}

impl SyncSettings {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let mut tables: toml::Table = toml::from_str(raw)?;
        let presets = Self::default();
        let settings = Self {
            notification_bell: overlay(
                "notification_bell",
                presets.notification_bell,
                tables.remove("notification_bell"),
            )?,
            notifications_page: overlay(
                "notifications_page",
                presets.notifications_page,
                tables.remove("notifications_page"),
            )?,
            chat: overlay("chat", presets.chat, tables.remove("chat"))?,
            projects: overlay("projects", presets.projects, tables.remove("projects"))?,
        };
        if let Some(unknown) = tables.keys().next() {
            return Err(ConfigError::Invalid(format!("unknown view table `{unknown}`")));
        }
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

fn overlay(
    view: &str,
    preset: SyncConfig,
    overrides: Option<toml::Value>,
) -> Result<SyncConfig, ConfigError> {
    let Some(overrides) = overrides else {
        return Ok(preset);
    };
    let toml::Value::Table(overrides) = overrides else {
        return Err(ConfigError::Invalid(format!("`{view}` must be a table")));
    };
    let toml::Value::Table(mut merged) = toml::Value::try_from(&preset)? else {
        return Err(ConfigError::Invalid(format!("`{view}` preset is not a table")));
    };
    merged.extend(overrides);

    let config: SyncConfig = toml::Value::Table(merged).try_into()?;
    config.validate()?;
    Ok(config)
}

//! Matsuri configuration system.
//!
//! Loaded from `matsuri.toml` (path overridable via `MATSURI_CONFIG`);
//! secrets can be injected through `MATSURI_*` environment variables so
//! tokens never need to live in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MatsuriError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatsuriConfig {
    #[serde(default)]
    pub line: LineConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl MatsuriConfig {
    /// Load config from `MATSURI_CONFIG` or the default path, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("MATSURI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MatsuriError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MatsuriError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Get the default config path (~/.matsuri/matsuri.toml).
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("matsuri.toml")
    }

    /// Get the Matsuri home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".matsuri")
    }

    /// Overlay secrets from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MATSURI_LINE_ACCESS_TOKEN") {
            self.line.channel_access_token = v;
        }
        if let Ok(v) = std::env::var("MATSURI_LINE_CHANNEL_SECRET") {
            self.line.channel_secret = v;
        }
        if let Ok(v) = std::env::var("MATSURI_DISCORD_WEBHOOK_URL") {
            self.discord.webhook_url = v;
        }
    }

    /// Reject configurations that cannot start.
    pub fn validate(&self) -> Result<()> {
        if self.line.enabled {
            if self.line.channel_access_token.is_empty() {
                return Err(MatsuriError::Config(
                    "line.channel_access_token is required (or MATSURI_LINE_ACCESS_TOKEN)".into(),
                ));
            }
            if self.line.channel_secret.is_empty() {
                return Err(MatsuriError::Config(
                    "line.channel_secret is required (or MATSURI_LINE_CHANNEL_SECRET)".into(),
                ));
            }
        }
        if self.discord.enabled && self.discord.webhook_url.is_empty() {
            return Err(MatsuriError::Config(
                "discord.webhook_url is required when the discord announcer is enabled".into(),
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(MatsuriError::Config(
                "scheduler.poll_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// LINE Messaging API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    #[serde(default)]
    pub channel_access_token: String,
    #[serde(default)]
    pub channel_secret: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            channel_access_token: String::new(),
            channel_secret: String::new(),
            enabled: true,
        }
    }
}

/// Discord announcement webhook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub enabled: bool,
}

/// Event store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    MatsuriConfig::home_dir()
        .join("matsuri.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Reminder scheduler cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between poll cycle starts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How far ahead of "now" due reminders are selected.
    #[serde(default = "default_lookahead")]
    pub lookahead_secs: u64,
}

fn default_poll_interval() -> u64 {
    60
}
fn default_lookahead() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            lookahead_secs: default_lookahead(),
        }
    }
}

/// Webhook gateway listen address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn bool_true() -> bool {
    true
}

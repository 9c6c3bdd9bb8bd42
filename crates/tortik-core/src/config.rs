//! Tortik configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TortikConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_database() -> String { "~/.tortik/tortik.db".into() }

impl Default for TortikConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl TortikConfig {
    /// Load config from the default path (~/.tortik/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::TortikError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::TortikError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TortikError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tortik")
            .join("config.toml")
    }

    /// Get the tortik home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tortik")
    }

    /// Bot token with the `TORTIK_BOT_TOKEN` env var taking precedence.
    pub fn bot_token(&self) -> Option<String> {
        if let Ok(token) = std::env::var("TORTIK_BOT_TOKEN")
            && !token.trim().is_empty()
        {
            return Some(token.trim().to_string());
        }
        let configured = self.telegram.bot_token.trim();
        (!configured.is_empty()).then(|| configured.to_string())
    }
}

/// Telegram polling and delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 { 30 }
fn default_send_timeout() -> u64 { 10 }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            poll_timeout_secs: default_poll_timeout(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

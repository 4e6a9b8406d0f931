//! Configuration management.
//!
//! Loads configuration from `${TETHER_HOME}/config.toml` with sensible
//! defaults. Precedence for overridable values is env > config > default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Which event schema the client speaks end-to-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Native event schema end-to-end.
    #[default]
    Canonical,
    /// Older ad-hoc `{type, data}` schema for backward compatibility.
    Legacy,
}

impl DispatchMode {
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "canonical" => Some(DispatchMode::Canonical),
            "legacy" => Some(DispatchMode::Legacy),
            _ => None,
        }
    }
}

/// Background deletion of sessions that never received a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub ttl_minutes: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: 30,
        }
    }
}

/// Connection timeouts.
///
/// A turn can stream for minutes, so the read timeout is long; establishing
/// the connection should be fast, so the connect timeout is short.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub read_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 600,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the agent execution service.
    pub base_url: String,
    pub app_name: String,
    pub user_id: String,
    pub mode: DispatchMode,
    pub cleanup: CleanupConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            app_name: "default".to_string(),
            user_id: "user".to_string(),
            mode: DispatchMode::default(),
            cleanup: CleanupConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Loads config from `${TETHER_HOME}/config.toml`, falling back to
    /// defaults when the file does not exist, then applies env overrides.
    pub fn load() -> Result<Self> {
        let path = config_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("TETHER_BASE_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                validate_url(trimmed)?;
                self.base_url = trimmed.to_string();
            }
        }
        if let Ok(mode) = std::env::var("TETHER_MODE") {
            if let Some(mode) = DispatchMode::from_id(&mode) {
                self.mode = mode;
            }
        }
        Ok(())
    }
}

/// Returns `${TETHER_HOME}/config.toml`, defaulting TETHER_HOME to
/// `~/.tether`.
pub fn config_path() -> PathBuf {
    tether_home().join("config.toml")
}

pub fn tether_home() -> PathBuf {
    if let Ok(home) = std::env::var("TETHER_HOME") {
        if !home.trim().is_empty() {
            return PathBuf::from(home);
        }
    }
    std::env::var("HOME")
        .map(|home| Path::new(&home).join(".tether"))
        .unwrap_or_else(|_| PathBuf::from(".tether"))
}

fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid base URL: {url}"))?;
    Ok(())
}

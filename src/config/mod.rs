//! Configuration storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::ReconcileSettings;

const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_DEDUP_WINDOW_MS: u64 = 2000;
const DEFAULT_RECONCILE_WINDOW_MS: u64 = 5000;
/// Upper bound for either window (one hour).
const MAX_WINDOW_MS: u64 = 3_600_000;

/// Convert a configured window, clamping values beyond `MAX_WINDOW_MS`.
fn window(name: &str, ms: u64) -> chrono::Duration {
    if ms > MAX_WINDOW_MS {
        tracing::warn!("{} = {} is too large, using {}", name, ms, MAX_WINDOW_MS);
    }
    let ms = i64::try_from(ms.min(MAX_WINDOW_MS)).unwrap_or(i64::MAX);
    chrono::Duration::milliseconds(ms)
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the support backend REST API
    pub api_url: String,
    /// Bearer token sent with every API and push request
    pub api_token: Option<String>,
    /// WebSocket endpoint for real-time events
    pub realtime_url: Option<String>,
    /// Same sender + content within this window is one message
    pub dedup_window_ms: u64,
    /// Max distance between a pending send and its confirmation
    pub reconcile_window_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            realtime_url: None,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            reconcile_window_ms: DEFAULT_RECONCILE_WINDOW_MS,
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "deskchat", "deskchat")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            Self::parse(&content)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// `DESKCHAT_API_URL` and `DESKCHAT_API_TOKEN` win over the file.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(url) = get("DESKCHAT_API_URL").filter(|v| !v.is_empty()) {
            self.api_url = url;
        }
        if let Some(token) = get("DESKCHAT_API_TOKEN").filter(|v| !v.is_empty()) {
            self.api_token = Some(token);
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;
        self.save_to(&Self::config_path()?)
    }

    /// Write to a sibling temp file, restrict it, then move it over `path`
    /// so the token is never readable and a crash leaves the old file intact.
    fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let tmp = path.with_extension("toml.tmp");
        fs::write(&tmp, content).context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .context("Failed to set config permissions")?;
        }

        fs::rename(&tmp, path).context("Failed to replace config file")?;
        tracing::debug!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            dedup_window: window("dedup_window_ms", self.dedup_window_ms),
            reconcile_window: window("reconcile_window_ms", self.reconcile_window_ms),
        }
    }
}

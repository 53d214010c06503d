use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncSettings,
}

/// Tunables for sync cycles. Every field has a default so a partial `[sync]`
/// table is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_age_minutes: u64,
    pub failure_window_minutes: u64,
    pub connection_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub per_provider_concurrency: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_age_minutes: 60,
            failure_window_minutes: 24 * 60,
            connection_timeout_secs: 15,
            fetch_timeout_secs: 60,
            per_provider_concurrency: 2,
        }
    }
}

impl SyncSettings {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_age_minutes as i64)
    }

    pub fn failure_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.failure_window_minutes as i64)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn concurrency(&self) -> usize {
        self.per_provider_concurrency.max(1)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".worklog")
}

pub fn load_config(data_dir: &Path) -> Result<AppConfig> {
    let path = data_dir.join("config.toml");
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_config(contents: &str) -> Result<AppConfig> {
    Ok(toml::from_str(contents)?)
}

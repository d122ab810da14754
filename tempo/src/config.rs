use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use tokio::time::Duration;

/// Tick cadence bounds: the spec'd resolution is at most one second, and
/// anything under 100ms just burns CPU.
const MIN_TICK_MS: u64 = 100;
const MAX_TICK_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub pomodoro_minutes: u64,
    pub break_minutes: u64,
    pub tick_interval_ms: u64,
    pub socket_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pomodoro_minutes: 25,
            break_minutes: 5,
            tick_interval_ms: 1_000,
            socket_path: tempo_ipc::SOCKET_PATH.into(),
        }
    }
}

impl Config {
    pub fn pomodoro_ms(&self) -> u64 {
        self.pomodoro_minutes.max(1) * 60 * 1000
    }

    pub fn break_ms(&self) -> u64 {
        self.break_minutes.max(1) * 60 * 1000
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.clamp(MIN_TICK_MS, MAX_TICK_MS))
    }
}

pub fn load_config() -> Result<Config> {
    match ProjectDirs::from("com", "tempo", "tempo") {
        Some(proj_dirs) => {
            let path = proj_dirs.config_dir().join("tempo.toml");
            if path.exists() {
                let config_str = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file at {:?}", path))?;
                toml::from_str(&config_str)
                    .with_context(|| format!("Failed to parse config file at {:?}", path))
            } else {
                Ok(Config::default())
            }
        }
        None => Ok(Config::default()),
    }
}

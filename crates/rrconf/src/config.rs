use rrconf_common::rrconf_config_dir;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::randr::gamma::GammaTuning;

fn default_settle_delay_ms() -> u64 {
    3000
}
fn default_pushes() -> u32 {
    2
}

fn default_timeout_secs() -> u32 {
    15
}
fn default_confirm_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_ipc_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub gamma: GammaConfig,
    pub confirm: ConfirmConfig,
    pub log: LogConfig,
    pub ipc: IpcConfig,
}

/// Some drivers drop a gamma ramp written right after a mode set, so the
/// ramp is pushed again after a delay.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GammaConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_pushes")]
    pub pushes: u32,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            pushes: default_pushes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfirmConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,

    #[serde(default = "default_confirm_enabled")]
    pub enabled: bool,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            enabled: default_confirm_enabled(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IpcConfig {
    #[serde(default = "default_ipc_enabled")]
    pub enabled: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            enabled: default_ipc_enabled(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let user_config = rrconf_config_dir().join("config.toml");
        let system_config = PathBuf::from("/etc/rrconf/config.toml");
        Self::load_first(&[user_config, system_config])
    }

    /// First file in `paths` that exists and parses, else the defaults.
    fn load_first(paths: &[PathBuf]) -> Self {
        for path in paths {
            if !path.exists() {
                continue;
            }
            match Self::load_from_path(path) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to load {}: {}", path.display(), e);
                }
            }
        }

        log::info!("Using default configuration");
        Self::default()
    }

    fn load_from_path(path: &PathBuf) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to read file: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse TOML: {}", e))
    }

    pub fn gamma_tuning(&self) -> GammaTuning {
        GammaTuning {
            settle_delay: Duration::from_millis(self.gamma.settle_delay_ms),
            pushes: self.gamma.pushes.max(1),
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        rrconf_common::logging::parse_level(&self.log.level)
    }

    /// Countdown length in seconds, or `None` when applies need no
    /// confirmation.
    pub fn confirm_timeout(&self) -> Option<u32> {
        (self.confirm.enabled && self.confirm.timeout_secs > 0).then_some(self.confirm.timeout_secs)
    }
}

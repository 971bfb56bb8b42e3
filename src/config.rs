//! Configuration management for readpace.
//!
//! Loads config from a YAML file in one of the standard locations.
//! Every section and field has a default, so a partial file is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::history;
use crate::progress::{AutoSaveSettings, DEFAULT_AUTO_SAVE_INTERVAL};
use crate::store::JsonBookStore;
use crate::timing::{self, DEFAULT_WPM};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub wpm: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { wpm: DEFAULT_WPM }
    }
}

impl ReaderConfig {
    pub fn clamped_wpm(&self) -> u32 {
        timing::clamp_wpm(self.wpm)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub auto_save_interval: usize,
    pub auto_save_enabled: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
            auto_save_enabled: true,
        }
    }
}

impl ProgressConfig {
    pub fn auto_save(&self) -> AutoSaveSettings {
        AutoSaveSettings {
            interval: self.auto_save_interval.max(1),
            enabled: self.auto_save_enabled,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Library JSON file; defaults to the user data directory
    pub library_path: Option<PathBuf>,
    /// Session history directory; defaults to the user data directory
    pub history_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_path.clone().or_else(JsonBookStore::default_path)
    }

    pub fn history_dir(&self) -> Option<PathBuf> {
        self.history_dir.clone().or_else(history::default_history_dir)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub reader: ReaderConfig,
    pub progress: ProgressConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./readpace.yaml
    /// 2. ~/.config/readpace/config.yaml
    /// 3. /etc/readpace/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("readpace.yaml")),
                dirs::home_dir().map(|h| h.join(".config/readpace/config.yaml")),
                Some(PathBuf::from("/etc/readpace/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

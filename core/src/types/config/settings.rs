use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Tunables persisted as settings.toml.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(default)]
    pub summary: SummarySettings,
    #[serde(default)]
    pub live: LiveSettings,
}

impl Settings {
    /// Loads settings from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the list of validation errors; empty if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.live.slice_size == 0 {
            errors.push("live.slice_size must be at least 1".to_string());
        }
        if self.live.initial_add_threshold == 0 {
            errors.push("live.initial_add_threshold must be at least 1".to_string());
        }
        if self.live.max_add_threshold < self.live.initial_add_threshold {
            errors.push(
                "live.max_add_threshold must not be below live.initial_add_threshold".to_string(),
            );
        }
        if self.live.change_threshold == 0 {
            errors.push("live.change_threshold must be at least 1".to_string());
        }
        if self.live.remove_threshold == 0 {
            errors.push("live.remove_threshold must be at least 1".to_string());
        }

        errors
    }

    /// Returns a copy with invalid values replaced by defaults.
    pub fn with_defaults_for_invalid(&self) -> Self {
        let defaults = LiveSettings::default();
        let live = &self.live;

        let initial_add_threshold = if live.initial_add_threshold == 0 {
            defaults.initial_add_threshold
        } else {
            live.initial_add_threshold
        };

        Self {
            summary: self.summary.clone(),
            live: LiveSettings {
                slice_size: if live.slice_size == 0 {
                    defaults.slice_size
                } else {
                    live.slice_size
                },
                initial_add_threshold,
                max_add_threshold: live.max_add_threshold.max(initial_add_threshold),
                change_threshold: if live.change_threshold == 0 {
                    defaults.change_threshold
                } else {
                    live.change_threshold
                },
                remove_threshold: if live.remove_threshold == 0 {
                    defaults.remove_threshold
                } else {
                    live.remove_threshold
                },
                flush_delay_ms: live.flush_delay_ms,
            },
        }
    }
}

/// Summary cache settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummarySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Debounce window between the first unsaved change and the flush.
    #[serde(default = "default_summary_flush_delay_ms")]
    pub flush_delay_ms: u64,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            flush_delay_ms: default_summary_flush_delay_ms(),
        }
    }
}

/// Live query session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    /// Record ids evaluated per population slice.
    #[serde(default = "default_slice_size")]
    pub slice_size: usize,
    #[serde(default = "default_initial_add_threshold")]
    pub initial_add_threshold: usize,
    /// Upper bound the add threshold grows to under sustained load.
    #[serde(default = "default_max_add_threshold")]
    pub max_add_threshold: usize,
    #[serde(default = "default_change_threshold")]
    pub change_threshold: usize,
    #[serde(default = "default_remove_threshold")]
    pub remove_threshold: usize,
    #[serde(default = "default_live_flush_delay_ms")]
    pub flush_delay_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            slice_size: default_slice_size(),
            initial_add_threshold: default_initial_add_threshold(),
            max_add_threshold: default_max_add_threshold(),
            change_threshold: default_change_threshold(),
            remove_threshold: default_remove_threshold(),
            flush_delay_ms: default_live_flush_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_summary_flush_delay_ms() -> u64 {
    5_000
}

fn default_slice_size() -> usize {
    32
}

fn default_initial_add_threshold() -> usize {
    32
}

fn default_max_add_threshold() -> usize {
    3_000
}

fn default_change_threshold() -> usize {
    32
}

fn default_remove_threshold() -> usize {
    32
}

fn default_live_flush_delay_ms() -> u64 {
    2_000
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

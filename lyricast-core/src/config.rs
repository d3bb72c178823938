use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "lyricast";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Session tunables.
///
/// All fields have defaults; a missing or partial config file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sampling loop cadence in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Position divergence (in seconds) a follower tolerates before seeking
    /// its local transport. Absorbs network jitter and independent clock
    /// drift; only gross divergence is corrected.
    #[serde(default = "default_sync_tolerance_secs")]
    pub sync_tolerance_secs: f64,
    /// Volume used when no persisted volume is found.
    #[serde(default = "default_volume")]
    pub default_volume: f64,
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_sync_tolerance_secs() -> f64 {
    1.0
}

const fn default_volume() -> f64 {
    1.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            sync_tolerance_secs: default_sync_tolerance_secs(),
            default_volume: default_volume(),
        }
    }
}

impl SessionConfig {
    /// Get the configuration directory path (~/.config/lyricast/)
    #[must_use]
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(CONFIG_DIR_NAME)
    }

    /// Get the config file path (~/.config/lyricast/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }

    /// Load config from file, writing a commented template on first run.
    ///
    /// Unlike credentials-style configs there are no required fields, so a
    /// fresh install proceeds with defaults after the template is written.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config file cannot be read or parsed.
    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_path, CONFIG_TEMPLATE)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Sampling loop cadence as a [`Duration`].
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Soft-sync position tolerance as a [`Duration`].
    #[must_use]
    pub fn sync_tolerance(&self) -> Duration {
        crate::time::duration_from_secs_lossy(self.sync_tolerance_secs)
    }
}

const CONFIG_TEMPLATE: &str = r#"# Lyricast Configuration
# ~/.config/lyricast/config.toml

# Sampling loop cadence in milliseconds. The cue display only re-renders
# when the active cue changes, so a faster tick costs little.
tick_interval_ms = 100

# Follower peers seek their local transport only when it diverges from the
# authority by more than this many seconds.
sync_tolerance_secs = 1.0

# Volume used when no persisted volume is found.
default_volume = 1.0
"#;

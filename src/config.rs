//! Configuration.
//!
//! `Settings` is the persisted user configuration in
//! `~/.config/modlens/settings.json`. `AnalysisOptions` is what a run
//! actually uses: settings overlaid with command-line flags, validated
//! before any work starts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::downloaders::RetryPolicy;
use crate::error::ConfigError;
use crate::games::GameType;

/// Default download ceiling per archive (4 GiB).
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// User settings for modlens
#[derive(Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Nexus Mods API key
    #[serde(default)]
    pub nexus_api_key: String,

    /// Worker pool size (None = CPU thread count)
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Per-archive download ceiling in bytes
    #[serde(default)]
    pub max_archive_bytes: Option<u64>,

    /// Hash file contents by default
    #[serde(default)]
    pub compute_hashes: bool,

    /// Base directory for scratch files (empty = system temp)
    #[serde(default)]
    pub temp_dir: String,

    /// Game used for Nexus lookups and plugin flags
    #[serde(default)]
    pub game: Option<GameType>,
}

// Hand-written so the API key never reaches logs
impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.nexus_api_key.is_empty() {
            "<unset>"
        } else {
            "<redacted>"
        };
        f.debug_struct("Settings")
            .field("nexus_api_key", &key)
            .field("concurrency", &self.concurrency)
            .field("max_archive_bytes", &self.max_archive_bytes)
            .field("compute_hashes", &self.compute_hashes)
            .field("temp_dir", &self.temp_dir)
            .field("game", &self.game)
            .finish()
    }
}

impl Settings {
    /// Get the config directory path (~/.config/modlens)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("modlens");

        Ok(config_dir)
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|path| Self::load_from(&path)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load from a specific file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    pub fn has_nexus_key(&self) -> bool {
        !self.nexus_api_key.trim().is_empty()
    }
}

/// Options for one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOptions {
    /// Mods processed at the same time
    pub concurrency: usize,
    pub compute_hashes: bool,
    pub max_archive_bytes: u64,
    /// Scratch base directory (None = system temp)
    pub temp_dir: Option<PathBuf>,
    pub game: GameType,
    pub retry: RetryPolicy,
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            compute_hashes: false,
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            temp_dir: None,
            game: GameType::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl AnalysisOptions {
    /// Options seeded from persisted settings.
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        Self {
            concurrency: settings.concurrency.unwrap_or(defaults.concurrency),
            compute_hashes: settings.compute_hashes,
            max_archive_bytes: settings.max_archive_bytes.unwrap_or(defaults.max_archive_bytes),
            temp_dir: (!settings.temp_dir.is_empty()).then(|| PathBuf::from(&settings.temp_dir)),
            game: settings.game.unwrap_or(defaults.game),
            retry: defaults.retry,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }

        if self.max_archive_bytes == 0 {
            return Err(ConfigError::ZeroArchiveLimit);
        }

        if let Some(dir) = &self.temp_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(ConfigError::TempDirNotDirectory(dir.clone()));
            }
        }

        Ok(())
    }
}

//! Settings persistence.
//!
//! Stores user preferences in ~/.config/crowbar/settings.json. A missing or
//! unreadable file falls back to defaults so a broken settings file never
//! blocks the tool itself.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Most-recent-first, deduplicated recent archive list cap.
const MAX_RECENT_ARCHIVES: usize = 10;

fn default_compression_level() -> u32 {
    5
}

/// User settings for crowbar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Recently opened archives, most recent first.
    #[serde(default)]
    pub recent_archives: Vec<String>,

    /// Directory the last archive was opened from.
    #[serde(default)]
    pub last_open_dir: String,

    /// Directory the last extraction went to.
    #[serde(default)]
    pub last_extract_dir: String,

    /// Compression level used by `create` when none is given (0-9).
    #[serde(default = "default_compression_level")]
    pub default_compression_level: u32,

    /// Whether listings include hidden files when browsing directories.
    #[serde(default)]
    pub show_hidden_files: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recent_archives: Vec::new(),
            last_open_dir: String::new(),
            last_extract_dir: String::new(),
            default_compression_level: default_compression_level(),
            show_hidden_files: false,
        }
    }
}

impl Settings {
    /// Get the config directory path (~/.config/crowbar)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("crowbar");

        Ok(config_dir)
    }

    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Could not load settings: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Try to load settings, returning error on failure
    fn try_load() -> Result<Self> {
        let path = Self::settings_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {:?}", config_dir))?;

        let path = Self::settings_path()?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        std::fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Record an archive as most recently opened, deduplicating and capping
    /// the list.
    pub fn add_recent_archive(&mut self, path: &str) {
        self.recent_archives.retain(|entry| entry != path);
        self.recent_archives.insert(0, path.to_string());
        self.recent_archives.truncate(MAX_RECENT_ARCHIVES);
    }

    pub fn clear_recent_archives(&mut self) {
        self.recent_archives.clear();
    }
}

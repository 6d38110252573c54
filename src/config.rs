/// Application configuration
///
/// Stored as JSON in the user's config directory:
/// - Linux: ~/.config/photo-swipe/config.json
/// - macOS: ~/Library/Application Support/photo-swipe/config.json
/// - Windows: %APPDATA%\photo-swipe\config.json
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::media::cache::TierSizes;

/// Overrides `library_root` when set
pub const LIBRARY_ENV: &str = "PHOTO_SWIPE_LIBRARY";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Folder treated as the photo library
    pub library_root: Option<PathBuf>,
    /// Triage database; defaults to `.photo-swipe/triage.db` inside the library
    pub database_path: Option<PathBuf>,
    /// Bounding box for thumbnails (width, height)
    pub thumbnail_size: (u32, u32),
    /// Bounding box for full-size display (width, height)
    pub full_size: (u32, u32),
    /// Completed decoded images kept in memory
    pub cache_capacity: usize,
    /// How many photos after the current one to prefetch
    pub prefetch_ahead: usize,
    /// tracing filter used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        let sizes = TierSizes::default();
        Self {
            library_root: None,
            database_path: None,
            thumbnail_size: sizes.thumbnail,
            full_size: sizes.full,
            cache_capacity: 64,
            prefetch_ahead: 1,
            log_filter: "photo_swipe=info".to_string(),
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push("photo-swipe");
        path.push("config.json");
        Ok(path)
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::default_path()?)?;
        if let Some(root) = std::env::var_os(LIBRARY_ENV) {
            config.library_root = Some(PathBuf::from(root));
        }
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_json(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(io_err)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn tier_sizes(&self) -> TierSizes {
        TierSizes {
            thumbnail: self.thumbnail_size,
            full: self.full_size,
        }
    }

    /// Where the triage state for the library at `root` lives.
    pub fn database_path_for(&self, root: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| root.join(".photo-swipe").join("triage.db"))
    }
}

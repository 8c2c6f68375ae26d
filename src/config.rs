//! Plugin loading settings.
//!
//! Settings are read from TOML; every field has a default so an empty file
//! (or no file at all) is valid.
//!
//! ```toml
//! trusted_prefix = "builtin."
//! cache_dir = "/var/cache/pluginhub"
//! strict_integrity = false
//!
//! [download]
//! connect_timeout_secs = 30
//! timeout_secs = 300
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors reading plugin settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read plugin settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plugin settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings governing how declarations are loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Names starting with this prefix are tried in the bootstrap pass.
    pub trusted_prefix: String,
    /// Directory substituted for `${PLUGIN_CACHE}` in declared paths.
    pub cache_dir: Option<PathBuf>,
    /// Reject (delete and skip) downloads whose digest does not match.
    pub strict_integrity: bool,
    /// Download client settings.
    pub download: DownloadSettings,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            trusted_prefix: "builtin.".into(),
            cache_dir: None,
            strict_integrity: false,
            download: DownloadSettings::default(),
        }
    }
}

impl PluginSettings {
    /// Parse settings from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Configured cache directory, or the platform cache directory.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(|| {
            directories::ProjectDirs::from("", "", "pluginhub")
                .map(|dirs| dirs.cache_dir().join("plugins"))
        })
    }
}

/// Settings for the plugin path download client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds; 0 disables it.
    pub timeout_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            timeout_secs: 300,
            user_agent: concat!("pluginhub/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl DownloadSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

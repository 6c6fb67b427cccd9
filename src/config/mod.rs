//! Configuration management for bookrule.
//!
//! Configuration is read from `~/.config/bookrule/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::orchestrator::{CrawlSettings, DEFAULT_MAX_PAGES, DEFAULT_WORKERS};
use crate::request::RequestDefaults;
use crate::script::ScriptLimits;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub script: ScriptLimits,
    pub sources: SourcesConfig,
}

/// HTTP and crawl settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// User agent sent when a source does not set one
    pub user_agent: Option<String>,
    /// Sources searched concurrently
    pub workers: usize,
    /// Page cap for one chapter body or table of contents
    pub max_pages: usize,
    /// Pause between pages of one crawl, in milliseconds
    pub page_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: None,
            workers: DEFAULT_WORKERS,
            max_pages: DEFAULT_MAX_PAGES,
            page_delay_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// JSON file holding the source list
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/bookrule/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("bookrule").join("config.toml"))
    }

    /// Source list path: the configured one, else `~/.config/bookrule/sources.json`.
    pub fn sources_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.sources.path {
            Some(path) => Ok(path.clone()),
            None => {
                let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
                Ok(config_dir.join("bookrule").join("sources.json"))
            }
        }
    }

    pub fn crawl_settings(&self) -> CrawlSettings {
        let mut request = RequestDefaults {
            timeout: Duration::from_secs(self.fetch.timeout_secs.max(1)),
            ..Default::default()
        };
        if let Some(user_agent) = self.fetch.user_agent.as_ref().filter(|ua| !ua.is_empty()) {
            request.user_agent = user_agent.clone();
        }

        CrawlSettings {
            workers: self.fetch.workers.max(1),
            max_pages: self.fetch.max_pages.max(1),
            page_delay: Duration::from_millis(self.fetch.page_delay_ms),
            request,
            script: self.script,
        }
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# bookrule configuration

[fetch]
# Per-request timeout in seconds
timeout_secs = 15

# User agent for sources that do not declare one
# user_agent = "Mozilla/5.0"

# Number of sources searched at the same time
workers = 10

# Maximum pages fetched for one chapter body or table of contents
max_pages = 30

# Pause between pages of one chapter (milliseconds)
page_delay_ms = 300

[script]
# Operation limit for one script evaluation
max_operations = 200000

# Longest string a script may build (bytes)
max_string_size = 4194304

[sources]
# JSON array of book sources. Defaults to sources.json next to this file.
# path = "/path/to/sources.json"
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

use std::path::Path;
use std::sync::Arc;

use crate::app::error::{BookruleError, Result};
use crate::config::Config;
use crate::domain::Source;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::orchestrator::Orchestrator;

pub struct AppContext {
    pub config: Config,
    pub orchestrator: Orchestrator,
}

impl AppContext {
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let mut config = Config::load().map_err(|e| BookruleError::Config(e.to_string()))?;
        if let Some(workers) = workers {
            config.fetch.workers = workers;
        }
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let settings = config.crawl_settings();
        let fetcher: Arc<dyn Fetcher + Send + Sync> =
            Arc::new(HttpFetcher::with_timeout(settings.request.timeout * 2)?);
        let orchestrator = Orchestrator::new(fetcher, settings);

        Ok(Self {
            config,
            orchestrator,
        })
    }

    /// Read the source list from `path`, or from the configured location.
    pub fn load_sources(&self, path: Option<&Path>) -> Result<Vec<Source>> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self
                .config
                .sources_path()
                .map_err(|e| BookruleError::Config(e.to_string()))?,
        };

        let content = std::fs::read_to_string(&path)?;
        parse_sources(&content)
    }
}

/// Parse a JSON source list. A single source object is accepted too.
pub fn parse_sources(content: &str) -> Result<Vec<Source>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let sources = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(sources)
}

/// Find a source by URL, ignoring a trailing slash.
pub fn find_source<'a>(sources: &'a [Source], url: &str) -> Result<&'a Source> {
    let wanted = url.trim().trim_end_matches('/');
    sources
        .iter()
        .find(|source| source.url.trim_end_matches('/') == wanted)
        .ok_or_else(|| BookruleError::SourceNotFound(url.to_string()))
}

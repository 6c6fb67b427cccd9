//! Running sources against the network.
//!
//! [`Orchestrator::search`] fans a keyword out to every searchable source and
//! streams one [`SearchBatch`](crate::domain::SearchBatch) per source as each
//! finishes. The crawl operations ([`Orchestrator::book_info`],
//! [`Orchestrator::chapter_list`], [`Orchestrator::content`]) walk one book's
//! pages sequentially.

mod crawl;
mod search;

#[cfg(test)]
mod stub;

use std::sync::Arc;
use std::time::Duration;

use crate::app::Result;
use crate::domain::Source;
use crate::fetcher::Fetcher;
use crate::normalizer::ContentNormalizer;
use crate::request::{PreparedRequest, RequestBuilder, RequestDefaults};
use crate::rule::{Node, RuleInterpreter};
use crate::script::{RhaiEvaluator, ScriptLimits};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_MAX_PAGES: usize = 30;
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// Sources searched at the same time.
    pub workers: usize,
    /// Upper bound on pages fetched for one chapter body or one table of
    /// contents.
    pub max_pages: usize,
    /// Pause between consecutive pages of one crawl.
    pub page_delay: Duration,
    pub request: RequestDefaults,
    pub script: ScriptLimits,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_pages: DEFAULT_MAX_PAGES,
            page_delay: DEFAULT_PAGE_DELAY,
            request: RequestDefaults::default(),
            script: ScriptLimits::default(),
        }
    }
}

pub struct Orchestrator {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    settings: Arc<CrawlSettings>,
    normalizer: ContentNormalizer,
}

impl Orchestrator {
    pub fn new(fetcher: Arc<dyn Fetcher + Send + Sync>, settings: CrawlSettings) -> Self {
        Self {
            fetcher,
            settings: Arc::new(settings),
            normalizer: ContentNormalizer::new(),
        }
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Fetch a link found on a page. Links skip template expansion.
    async fn load_link(&self, source: &Source, rules: &RuleInterpreter, url: &str) -> Result<LoadedPage> {
        let request = RequestBuilder::new(source, rules.bridge(), &self.settings.request).link(url)?;
        fetch_page(self.fetcher.as_ref(), &request).await
    }
}

/// A fetched and decoded page.
#[derive(Debug, Clone)]
struct LoadedPage {
    /// Final URL; links on the page resolve against it.
    url: String,
    text: String,
}

impl LoadedPage {
    fn node(&self) -> Node {
        Node::text(self.text.as_str())
    }
}

/// Each task gets its own interpreter, so no script state is shared.
fn interpreter(settings: &CrawlSettings) -> RuleInterpreter {
    RuleInterpreter::with_evaluator(Box::new(RhaiEvaluator::with_limits(settings.script)))
}

async fn load(
    fetcher: &(dyn Fetcher + Send + Sync),
    settings: &CrawlSettings,
    source: &Source,
    rules: &RuleInterpreter,
    template: &str,
    keyword: Option<&str>,
    page: u32,
) -> Result<LoadedPage> {
    let request = {
        let mut builder = RequestBuilder::new(source, rules.bridge(), &settings.request).page(page);
        if let Some(keyword) = keyword {
            builder = builder.keyword(keyword);
        }
        builder.build(template)?
    };
    fetch_page(fetcher, &request).await
}

async fn fetch_page(fetcher: &(dyn Fetcher + Send + Sync), request: &PreparedRequest) -> Result<LoadedPage> {
    let fetched = fetcher.fetch(request).await?;
    let text = fetched.text(request.charset.as_deref())?;
    Ok(LoadedPage {
        url: fetched.url,
        text,
    })
}

/// Evaluate an optional field rule; unconfigured fields are empty.
fn field(rules: &RuleInterpreter, node: &Node, rule: &str, base_url: &str) -> String {
    if rule.trim().is_empty() {
        return String::new();
    }
    rules.text(node, rule, base_url).trim().to_string()
}

fn url_field(rules: &RuleInterpreter, node: &Node, rule: &str, base_url: &str) -> String {
    if rule.trim().is_empty() {
        return String::new();
    }
    rules.url(node, rule, base_url)
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// A leading `-` on a list rule reverses the list; `+` is accepted and ignored.
fn split_reverse(rule: &str) -> (bool, &str) {
    let rule = rule.trim();
    match rule.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, rule.strip_prefix('+').unwrap_or(rule)),
    }
}

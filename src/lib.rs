//! # Bookrule
//!
//! A rule engine for book sources: declarative scraping configurations that
//! describe how to search a site, read a book's details, list its chapters
//! and extract chapter text.
//!
//! ## Architecture
//!
//! ```text
//! Source → RequestBuilder → Fetcher → RuleInterpreter → ContentNormalizer
//!                    ↑                       ↓
//!                    └──── ScriptBridge ─────┘
//! ```
//!
//! - [`request`]: Turns URL templates into concrete HTTP requests
//! - [`fetcher`]: HTTP client with charset detection
//! - [`rule`]: Evaluates extraction rules over HTML and JSON
//! - [`script`]: Embedded script evaluation for rules and URLs
//! - [`orchestrator`]: Search fan-out and paginated crawling
//! - [`normalizer`]: Chapter text cleanup
//!
//! ## Quick Start
//!
//! ```bash
//! # Search all enabled sources
//! bookrule --sources sources.json search "三体"
//!
//! # List chapters of a book
//! bookrule toc https://www.example.com /book/1.html
//!
//! # Read one chapter
//! bookrule content https://www.example.com /book/1/1.html
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together config and
/// orchestrator, and loads the source list.
pub mod app;

/// Command-line interface using clap.
///
/// - `search <keyword>` - Search every enabled source
/// - `sources [--explore <source>]` - List sources or explore entries
/// - `explore <source> <entry>` - Load one explore page
/// - `info`, `toc`, `content` - Walk one book
pub mod cli;

/// Configuration loaded from `~/.config/bookrule/config.toml`.
pub mod config;

/// Core domain models.
///
/// - [`Source`](domain::Source): A site's scraping configuration
/// - [`Book`](domain::Book): Search result or detail page, with SHA256 ID
/// - [`Chapter`](domain::Chapter), [`Content`](domain::Content)
pub mod domain;

/// HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for page fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Chapter text normalization: replacement rules, markup stripping,
/// paragraph indentation.
pub mod normalizer;

/// Search fan-out and sequential crawling of detail, TOC and content pages.
pub mod orchestrator;

/// URL template expansion into [`PreparedRequest`](request::PreparedRequest)s.
pub mod request;

/// The extraction rule language.
pub mod rule;

/// Script envelopes and the embedded evaluator.
pub mod script;

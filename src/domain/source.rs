use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scraping configuration for one site.
///
/// Sources are read once per run and never mutated by rule evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Source {
    /// Identity of the source and the base URL for relative links.
    pub url: String,
    pub name: String,
    pub group: Option<String>,
    pub enabled: bool,
    pub enabled_explore: bool,
    /// Request pacing hint as declared by the source author (e.g. `"1000"`).
    pub concurrent_rate: Option<String>,
    pub weight: i32,
    pub custom_order: i32,
    /// Milliseconds since the epoch on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds_option", alias = "lastUpdateTime")]
    pub last_updated: Option<DateTime<Utc>>,
    /// JSON object of default request headers.
    pub header: Option<String>,
    pub login_url: Option<String>,
    pub enabled_cookie_jar: bool,
    pub search_url: Option<String>,
    pub explore_url: Option<String>,
    pub search: ListRule,
    pub explore: ListRule,
    pub book_info: BookInfoRule,
    pub toc: TocRule,
    pub content: ContentRule,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: String::new(),
            group: None,
            enabled: true,
            enabled_explore: true,
            concurrent_rate: None,
            weight: 0,
            custom_order: 0,
            last_updated: None,
            header: None,
            login_url: None,
            enabled_cookie_jar: false,
            search_url: None,
            explore_url: None,
            search: ListRule::default(),
            explore: ListRule::default(),
            book_info: BookInfoRule::default(),
            toc: TocRule::default(),
            content: ContentRule::default(),
        }
    }
}

/// Rules for a list of books (search results or an explore page).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListRule {
    pub book_list: String,
    pub name: String,
    pub author: String,
    pub intro: String,
    pub kind: String,
    pub last_chapter: String,
    pub cover_url: String,
    pub book_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BookInfoRule {
    /// Narrows the page to the info block before the field rules run.
    pub init: String,
    pub name: String,
    pub author: String,
    pub intro: String,
    pub kind: String,
    pub last_chapter: String,
    pub cover_url: String,
    pub toc_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TocRule {
    /// A leading `-` reverses the extracted list.
    pub chapter_list: String,
    pub chapter_name: String,
    pub chapter_url: String,
    pub is_volume: String,
    pub next_toc_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContentRule {
    pub content: String,
    pub next_content_url: String,
    /// `pattern##replacement` entries applied before markup stripping.
    pub replace_regex: Vec<String>,
}

/// One entry of a source's explore menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExploreEntry {
    pub title: String,
    pub url: String,
}

impl Source {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }

    /// Whether the source takes part in a search fan-out.
    pub fn is_searchable(&self) -> bool {
        self.enabled
            && self
                .search_url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty())
    }

    /// Default headers declared by the source, in key order.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let Some(raw) = self.header.as_deref().filter(|h| !h.trim().is_empty()) else {
            return BTreeMap::new();
        };

        match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw) {
            Ok(map) => map
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect(),
            Err(err) => {
                tracing::warn!(source = %self.url, %err, "ignoring malformed source header");
                BTreeMap::new()
            }
        }
    }

    /// Parse `exploreUrl` into menu entries.
    ///
    /// Entries are `title::url`, separated by newlines or `&&`. Lines without
    /// a `::` are treated as a bare URL titled by itself.
    pub fn explore_entries(&self) -> Vec<ExploreEntry> {
        let Some(raw) = self.explore_url.as_deref() else {
            return Vec::new();
        };

        raw.split(['\n', '\r'])
            .flat_map(|line| line.split("&&"))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once("::") {
                Some((title, url)) => ExploreEntry {
                    title: title.trim().to_string(),
                    url: url.trim().to_string(),
                },
                None => ExploreEntry {
                    title: entry.to_string(),
                    url: entry.to_string(),
                },
            })
            .filter(|entry| !entry.url.is_empty())
            .collect()
    }

    /// Rules used for explore pages; falls back to the search rules.
    pub fn explore_rules(&self) -> &ListRule {
        if self.explore.book_list.trim().is_empty() {
            &self.search
        } else {
            &self.explore
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_camel_case() {
        let source: Source = serde_json::from_str(
            r#"{
                "url": "https://s.com",
                "name": "S",
                "searchUrl": "/search?q={{key}}",
                "search": { "bookList": "class.item", "bookUrl": "a@href" },
                "content": { "content": "id.content", "replaceRegex": ["ad##"] }
            }"#,
        )
        .unwrap();

        assert!(source.enabled);
        assert_eq!(source.search.book_list, "class.item");
        assert_eq!(source.search.book_url, "a@href");
        assert_eq!(source.content.replace_regex, vec!["ad##"]);
        assert!(source.is_searchable());
    }

    #[test]
    fn test_last_update_time_in_millis() {
        let source: Source =
            serde_json::from_str(r#"{"url": "https://s.com", "lastUpdateTime": 1700000000000}"#).unwrap();
        assert_eq!(source.last_updated.map(|t| t.timestamp()), Some(1_700_000_000));

        let source: Source = serde_json::from_str(r#"{"url": "https://s.com"}"#).unwrap();
        assert!(source.last_updated.is_none());
    }

    #[test]
    fn test_disabled_source_not_searchable() {
        let source = Source {
            enabled: false,
            search_url: Some("/s".into()),
            ..Default::default()
        };
        assert!(!source.is_searchable());

        let source = Source {
            search_url: Some("  ".into()),
            ..Default::default()
        };
        assert!(!source.is_searchable());
    }

    #[test]
    fn test_headers_accept_non_string_values() {
        let source = Source {
            header: Some(r#"{"User-Agent": "x", "X-Count": 3}"#.into()),
            ..Default::default()
        };
        let headers = source.headers();
        assert_eq!(headers.get("User-Agent").map(String::as_str), Some("x"));
        assert_eq!(headers.get("X-Count").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_malformed_headers_ignored() {
        let source = Source {
            header: Some("not json".into()),
            ..Default::default()
        };
        assert!(source.headers().is_empty());
    }

    #[test]
    fn test_explore_entries() {
        let source = Source {
            explore_url: Some("Hot::/hot/{{page}}&&New::/new\n/plain".into()),
            ..Default::default()
        };
        let entries = source.explore_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title, "Hot");
        assert_eq!(entries[0].url, "/hot/{{page}}");
        assert_eq!(entries[2].title, "/plain");
    }

    #[test]
    fn test_explore_rules_fallback() {
        let mut source = Source::default();
        source.search.book_list = "li".into();
        assert_eq!(source.explore_rules().book_list, "li");

        source.explore.book_list = "div".into();
        assert_eq!(source.explore_rules().book_list, "div");
    }
}

//! The rule DSL.
//!
//! A rule is a `||`-separated list of alternatives; the first alternative
//! with a non-empty result wins. Each alternative is a cascade of `@`-joined
//! steps in one of three dialects:
//!
//! ```text
//! class.book-list@tag.li        structural (CSS plus aliases)
//! //div[@id='list']/a/@href     XPath subset
//! $.data.list[*].name           JSON path subset
//! ```
//!
//! Any alternative may end with a `##pattern##replacement` regex affix, and a
//! rule may contain a script envelope (`<js>…</js>`, `{{…}}`, `@js:…`) that is
//! handed to the [`ScriptBridge`](crate::script::ScriptBridge).
//!
//! Evaluation never fails from the caller's point of view: any [`RuleError`]
//! is logged and the result is empty.

mod css;
mod grammar;
mod interpreter;
mod json;
mod node;
mod xpath;

pub use grammar::with_default_leaf;
pub use interpreter::RuleInterpreter;
pub use node::{Fragment, Node};

use thiserror::Error;
use url::Url;

use crate::request::split_url_options;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid regex `{pattern}`: {reason}")]
    Regex { pattern: String, reason: String },

    #[error("index ranges are not supported: `{0}`")]
    UnsupportedRange(String),

    #[error("xpath: {0}")]
    Path(String),

    #[error("json: {0}")]
    Json(String),
}

/// Resolve `link` against `base`.
///
/// An inline options block (`url,{...}`) is kept and only the URL part is
/// resolved. Links that cannot be resolved are returned trimmed.
pub fn absolute_url(base: &str, link: &str) -> String {
    let link = link.trim();
    if link.is_empty() {
        return String::new();
    }

    let (target, options) = split_url_options(link);
    let resolved = match Url::parse(base).and_then(|base| base.join(target.trim())) {
        Ok(url) => url.to_string(),
        Err(_) => target.trim().to_string(),
    };

    match options {
        Some(options) => format!("{resolved},{options}"),
        None => resolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url("https://s.com", "/x"), "https://s.com/x");
        assert_eq!(absolute_url("https://s.com/a/b.html", "c.html"), "https://s.com/a/c.html");
        assert_eq!(absolute_url("https://s.com", "https://y.com/x"), "https://y.com/x");
        assert_eq!(absolute_url("https://s.com", "  "), "");
        assert_eq!(absolute_url("not a base", "/x"), "/x");
    }

    #[test]
    fn test_absolute_url_keeps_options() {
        assert_eq!(
            absolute_url("https://s.com", "/search,{\"method\":\"POST\"}"),
            "https://s.com/search,{\"method\":\"POST\"}"
        );
    }
}

//! Turning a source's URL template into a concrete request.
//!
//! A template is a URL, optionally followed by a JSON options block:
//!
//! ```text
//! /search?q={{key}}&p={{page}}
//! /search,{"method":"POST","body":"q={{key}}","charset":"gbk"}
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use encoding_rs::Encoding;
use percent_encoding::{percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::domain::Source;
use crate::script::{find_envelope, Bindings, EnvelopeKind, ScriptBridge, ScriptInput};

/// `encodeURIComponent`: everything but `A-Za-z0-9-_.!~*'()`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Legacy form encoding: everything but `A-Za-z0-9-_.*`.
const LEGACY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'*');

const MAX_SCRIPT_PASSES: usize = 8;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("empty URL template")]
    EmptyTemplate,

    #[error("invalid URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("invalid request options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("unsupported method `{0}`")]
    Method(String),

    #[error("unknown charset `{0}`")]
    Charset(String),
}

/// Settings applied to every request.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            user_agent: concat!("Mozilla/5.0 (compatible; bookrule/", env!("CARGO_PKG_VERSION"), ")")
                .to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// A request ready to hand to a [`Fetcher`](crate::fetcher::Fetcher).
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
    /// Charset declared by the options block, used first when decoding.
    pub charset: Option<String>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UrlOptions {
    method: Option<String>,
    charset: Option<String>,
    headers: BTreeMap<String, Value>,
    body: Option<Value>,
}

impl UrlOptions {
    fn charset(&self) -> Option<String> {
        self.charset
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }
}

/// Builds [`PreparedRequest`]s from a source's URL templates.
pub struct RequestBuilder<'a> {
    source: &'a Source,
    bridge: &'a ScriptBridge,
    defaults: &'a RequestDefaults,
    keyword: Option<&'a str>,
    page: u32,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(source: &'a Source, bridge: &'a ScriptBridge, defaults: &'a RequestDefaults) -> Self {
        Self {
            source,
            bridge,
            defaults,
            keyword: None,
            page: 1,
        }
    }

    pub fn keyword(mut self, keyword: &'a str) -> Self {
        self.keyword = Some(keyword);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn build(&self, template: &str) -> Result<PreparedRequest, RequestError> {
        let template = template.trim();
        if template.is_empty() {
            return Err(RequestError::EmptyTemplate);
        }

        let template = self.run_scripts(template);
        let template = self.substitute_variables(&template);

        let (target, options) = split_url_options(&template);
        let options: UrlOptions = match options {
            Some(raw) => serde_json::from_str(raw)?,
            None => UrlOptions::default(),
        };

        let encoded_key = match self.keyword {
            Some(keyword) => encode_keyword(keyword, options.charset().as_deref())?,
            None => String::new(),
        };
        let target = substitute_keyword(target, &encoded_key);
        self.prepare(&target, options, Some(&encoded_key))
    }

    /// Build a request for a link scraped from a page.
    ///
    /// No template step runs: the link is only resolved against the source
    /// URL. A trailing options block is honoured when it parses as JSON;
    /// otherwise the `,{` belongs to the link itself.
    pub fn link(&self, link: &str) -> Result<PreparedRequest, RequestError> {
        let link = link.trim();
        if link.is_empty() {
            return Err(RequestError::EmptyTemplate);
        }

        let (target, options) = match split_url_options(link) {
            (target, Some(raw)) => match serde_json::from_str::<UrlOptions>(raw) {
                Ok(options) => (target, options),
                Err(_) => (link, UrlOptions::default()),
            },
            (target, None) => (target, UrlOptions::default()),
        };
        self.prepare(target, options, None)
    }

    fn prepare(
        &self,
        target: &str,
        options: UrlOptions,
        encoded_key: Option<&str>,
    ) -> Result<PreparedRequest, RequestError> {
        let charset = options.charset();
        let url = resolve(&self.source.url, target)?;

        let method = match options.method.as_deref().map(str::trim) {
            None | Some("") => Method::GET,
            Some(name) => Method::from_bytes(name.to_ascii_uppercase().as_bytes())
                .map_err(|_| RequestError::Method(name.to_string()))?,
        };

        let mut headers = Vec::new();
        for (name, value) in self.source.headers() {
            set_header(&mut headers, &name, value);
        }
        for (name, value) in options.headers {
            match header_value(value) {
                Some(value) => set_header(&mut headers, &name, value),
                None => warn!(source = %self.source.url, header = %name, "ignoring non-scalar header value"),
            }
        }

        let substitute = |body: &str| match encoded_key {
            Some(key) => substitute_keyword(body, key),
            None => body.to_string(),
        };
        let body = match (method == Method::GET, options.body) {
            (true, _) | (false, None | Some(Value::Null)) => None,
            (false, Some(Value::String(body))) => Some(substitute(&body)),
            (false, Some(other)) => Some(substitute(&other.to_string())),
        };
        if let Some(body) = &body {
            if !has_header(&headers, "content-type") {
                let content_type = if serde_json::from_str::<Value>(body).is_ok_and(|v| v.is_object()) {
                    "application/json".to_string()
                } else {
                    format!(
                        "application/x-www-form-urlencoded; charset={}",
                        charset.as_deref().unwrap_or("utf-8")
                    )
                };
                set_header(&mut headers, "Content-Type", content_type);
            }
        }
        apply_default_headers(&mut headers, self.defaults);

        debug!(source = %self.source.url, %method, %url, "built request");

        Ok(PreparedRequest {
            method,
            url,
            headers,
            body,
            timeout: self.defaults.timeout,
            charset,
        })
    }

    /// Replace script envelopes with their output.
    ///
    /// `{{js:…}}` is interpolated in place; `<js>` and `@js:` receive the text
    /// before them as `result` and their output replaces it.
    fn run_scripts(&self, template: &str) -> String {
        let mut current = template.to_string();
        for _ in 0..MAX_SCRIPT_PASSES {
            let Some(envelope) = find_envelope(&current, false) else {
                break;
            };
            let bindings = Bindings::new(
                ScriptInput::Text(envelope.before.to_string()),
                &self.source.url,
            )
            .with_var("key", self.keyword.unwrap_or_default())
            .with_var("page", self.page.to_string());
            let output = self.bridge.eval(envelope.script, &bindings).into_text();

            current = match envelope.kind {
                EnvelopeKind::Braces => format!("{}{output}{}", envelope.before, envelope.after),
                EnvelopeKind::Tag | EnvelopeKind::Inline => format!("{output}{}", envelope.after),
            };
        }
        current
    }

    fn substitute_variables(&self, template: &str) -> String {
        let page = self.page.to_string();
        let text = template
            .replace("{{baseUrl}}", &self.source.url)
            .replace("{{page}}", &page);
        select_page_list(&text, self.page)
    }
}

/// Split a template at the first `,` followed (after whitespace) by `{`.
///
/// Everything before is the URL; the rest, starting at `{`, is the options
/// block. A URL that itself contains `,{` is split in the wrong place.
pub fn split_url_options(template: &str) -> (&str, Option<&str>) {
    for (pos, _) in template.match_indices(',') {
        let rest = template[pos + 1..].trim_start();
        if rest.starts_with('{') {
            return (&template[..pos], Some(rest));
        }
    }
    (template, None)
}

/// Percent-encode a search keyword for the given charset.
pub fn encode_keyword(keyword: &str, charset: Option<&str>) -> Result<String, RequestError> {
    let label = charset.unwrap_or("utf-8");
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| RequestError::Charset(label.to_string()))?;

    if encoding == encoding_rs::UTF_8 {
        return Ok(percent_encode(keyword.as_bytes(), COMPONENT).to_string());
    }

    let (bytes, _, had_errors) = encoding.encode(keyword);
    if had_errors {
        warn!(charset = label, "keyword has characters outside the charset");
    }
    Ok(percent_encode(&bytes, LEGACY).to_string())
}

fn substitute_keyword(text: &str, encoded: &str) -> String {
    text.replace("{{key}}", encoded).replace("{key}", encoded)
}

/// `<a,b,c>` picks the entry for the current page, clamped to the last one.
fn select_page_list(text: &str, page: u32) -> String {
    static PAGE_LIST: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(regex) = PAGE_LIST
        .get_or_init(|| Regex::new(r"<([^<>]*,[^<>]*)>").ok())
        .as_ref()
    else {
        return text.to_string();
    };

    regex
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entries: Vec<&str> = caps[1].split(',').map(str::trim).collect();
            let index = usize::try_from(page.saturating_sub(1))
                .unwrap_or(usize::MAX)
                .min(entries.len() - 1);
            entries[index].to_string()
        })
        .into_owned()
}

fn resolve(base: &str, target: &str) -> Result<Url, RequestError> {
    let target = target.trim();
    let parsed = match Url::parse(base) {
        Ok(base) => base.join(target),
        Err(_) => Url::parse(target),
    };
    parsed.map_err(|source| RequestError::InvalidUrl {
        url: target.to_string(),
        source,
    })
}

fn header_value(value: Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
}

fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value));
}

fn apply_default_headers(headers: &mut Vec<(String, String)>, defaults: &RequestDefaults) {
    if !has_header(headers, "user-agent") {
        headers.push(("User-Agent".to_string(), defaults.user_agent.clone()));
    }
    if !has_header(headers, "cache-control") {
        headers.push(("Cache-Control".to_string(), "no-cache".to_string()));
    }
    if !has_header(headers, "pragma") {
        headers.push(("Pragma".to_string(), "no-cache".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source {
            url: "https://s.com".to_string(),
            header: Some(r#"{"Referer":"https://s.com/","X-Level":3}"#.to_string()),
            ..Default::default()
        }
    }

    fn build(template: &str, keyword: &str, page: u32) -> Result<PreparedRequest, RequestError> {
        let source = source();
        let bridge = ScriptBridge::default();
        let defaults = RequestDefaults::default();
        RequestBuilder::new(&source, &bridge, &defaults)
            .keyword(keyword)
            .page(page)
            .build(template)
    }

    #[test]
    fn test_plain_get() {
        let request = build("/search?q={{key}}&p={{page}}", "rust lang", 2).unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url.as_str(), "https://s.com/search?q=rust%20lang&p=2");
        assert!(request.body.is_none());
        assert_eq!(request.header("referer"), Some("https://s.com/"));
        assert_eq!(request.header("x-level"), Some("3"));
        assert_eq!(request.header("cache-control"), Some("no-cache"));
        assert!(request.header("user-agent").is_some_and(|ua| ua.contains("bookrule")));
    }

    #[test]
    fn test_single_brace_key_and_base_url() {
        let request = build("{{baseUrl}}/s/{key}.html", "a/b", 1).unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/s/a%2Fb.html");
    }

    #[test]
    fn test_post_options() {
        let request = build(
            r#"/search, {"method":"post","body":"searchkey={{key}}","headers":{"User-Agent":"custom","X-Id":7}}"#,
            "三体",
            1,
        )
        .unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url.as_str(), "https://s.com/search");
        assert_eq!(request.body.as_deref(), Some("searchkey=%E4%B8%89%E4%BD%93"));
        assert_eq!(request.header("user-agent"), Some("custom"));
        assert_eq!(request.header("x-id"), Some("7"));
        assert!(request
            .header("content-type")
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded")));
    }

    #[test]
    fn test_json_body_object() {
        let request = build(r#"/api,{"method":"POST","body":{"q":"{{key}}"}}"#, "x", 1).unwrap();
        assert_eq!(request.body.as_deref(), Some(r#"{"q":"x"}"#));
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_gbk_keyword_encoding() {
        let request = build(r#"/s?q={{key}},{"charset":"gbk"}"#, "三体", 1).unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/s?q=%C8%FD%CC%E5");
        assert_eq!(request.charset.as_deref(), Some("gbk"));
    }

    #[test]
    fn test_keyword_encoding_sets() {
        assert_eq!(encode_keyword("a b!*'()~", None).unwrap(), "a%20b!*'()~");
        assert_eq!(
            encode_keyword("a b!*-_.", Some("gbk")).unwrap(),
            "a%20b%21*-_."
        );
        assert!(encode_keyword("x", Some("klingon")).is_err());
    }

    #[test]
    fn test_split_url_options() {
        assert_eq!(split_url_options("/a?b=1"), ("/a?b=1", None));
        assert_eq!(
            split_url_options("/a,  {\"method\":\"POST\"}"),
            ("/a", Some("{\"method\":\"POST\"}"))
        );
        assert_eq!(split_url_options("/a,b,{}"), ("/a,b", Some("{}")));
    }

    #[test]
    fn test_comma_brace_inside_url_is_misread() {
        // The heuristic splits at the first `,{`, even inside a query value.
        let (url, options) = split_url_options("/s?f=a,{x},{\"method\":\"GET\"}");
        assert_eq!(url, "/s?f=a");
        assert_eq!(options, Some("{x},{\"method\":\"GET\"}"));
        assert!(matches!(
            build("/s?f=a,{x},{\"method\":\"GET\"}", "k", 1),
            Err(RequestError::Options(_))
        ));
    }

    #[test]
    fn test_scraped_links_skip_template_steps() {
        let source = source();
        let bridge = ScriptBridge::default();
        let defaults = RequestDefaults::default();
        let builder = RequestBuilder::new(&source, &bridge, &defaults).keyword("k").page(2);

        let request = builder.link("/b/<1,2>/{key}.html").unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/b/%3C1,2%3E/%7Bkey%7D.html");
        assert_eq!(request.header("referer"), Some("https://s.com/"));

        let request = builder.link("/s?f=a,{x}").unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/s?f=a,{x}");
        assert_eq!(request.method, Method::GET);

        let request = builder.link(r#"/c/2,{"method":"POST","body":"id={key}"}"#).unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/c/2");
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.body.as_deref(), Some("id={key}"));

        assert!(matches!(builder.link("  "), Err(RequestError::EmptyTemplate)));
    }

    #[test]
    fn test_page_list() {
        assert_eq!(select_page_list("/list/<a,b,c>.html", 2), "/list/b.html");
        assert_eq!(select_page_list("/list/<a,b,c>.html", 9), "/list/c.html");
        assert_eq!(select_page_list("/list/<only>.html", 1), "/list/<only>.html");
    }

    #[test]
    fn test_script_templates() {
        let request = build("/s?q={{key}}&t={{js: (20 + 22).to_string()}}", "k", 1).unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/s?q=k&t=42");

        let request = build("@js: baseUrl + \"/p/\" + page + \"?q=\" + key", "k", 3).unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/p/3?q=k");

        let request = build("/ignored<js>result.replace(\"ignored\", \"kept\"); result</js>", "k", 1)
            .unwrap();
        assert_eq!(request.url.as_str(), "https://s.com/kept");
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(build("  ", "k", 1), Err(RequestError::EmptyTemplate)));
        assert!(matches!(
            build(r#"/a,{"method":"GET POST"}"#, "k", 1),
            Err(RequestError::Method(_))
        ));

        let source = Source::default();
        let bridge = ScriptBridge::default();
        let defaults = RequestDefaults::default();
        let err = RequestBuilder::new(&source, &bridge, &defaults)
            .build("/relative-without-base")
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl { .. }));
    }
}

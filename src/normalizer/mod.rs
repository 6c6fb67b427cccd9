use std::sync::OnceLock;

use html_escape::decode_html_entities;
use regex::Regex;
use tracing::warn;

/// Placeholder for a line break while markup is stripped.
const LINE_BREAK: char = '\u{E000}';

/// Paragraph indent: two ideographic spaces.
const INDENT: &str = "\u{3000}\u{3000}";

struct Patterns {
    breaks: Regex,
    blocks: Regex,
    tags: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                breaks: Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>").ok()?,
                blocks: Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").ok()?,
                tags: Regex::new(r"(?s)<[^>]*>").ok()?,
            })
        })
        .as_ref()
}

/// Turns extracted chapter markup into typeset plain text.
#[derive(Debug, Clone)]
pub struct ContentNormalizer;

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize `body`, applying the source's `pattern##replacement` rules
    /// first.
    pub fn normalize(&self, body: &str, replace_rules: &[String]) -> String {
        let mut text = apply_replacements(body, replace_rules);

        if let Some(patterns) = patterns() {
            text = patterns
                .breaks
                .replace_all(&text, LINE_BREAK.to_string().as_str())
                .into_owned();
            text = patterns.blocks.replace_all(&text, "").into_owned();
            text = patterns.tags.replace_all(&text, "").into_owned();
        }
        let text = decode_html_entities(&text)
            .replace(LINE_BREAK, "\n")
            .replace('\u{a0}', " ");

        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| format!("{INDENT}{line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn apply_replacements(body: &str, rules: &[String]) -> String {
    let mut text = body.to_string();
    for rule in rules {
        let rule = rule.strip_prefix("##").unwrap_or(rule);
        let (pattern, replacement) = rule.split_once("##").unwrap_or((rule, ""));
        if pattern.trim().is_empty() {
            continue;
        }
        match Regex::new(pattern) {
            Ok(regex) => text = regex.replace_all(&text, replacement).into_owned(),
            Err(err) => warn!(pattern, %err, "skipping invalid replacement rule"),
        }
    }
    text
}

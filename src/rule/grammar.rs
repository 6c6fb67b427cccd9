//! Rule string parsing.
//!
//! Parsing never fails: it only splits text. Selectors, XPath expressions,
//! JSON paths and regexes are compiled when an alternative is evaluated, so a
//! malformed later alternative cannot affect an earlier one that succeeds.

use regex::Regex;

use super::RuleError;
use crate::script::find_envelope;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RuleExpr {
    Alternation(Vec<Alternative>),
    /// A script envelope. `head` feeds the script; `tail` post-processes its
    /// output.
    Scripted {
        head: Option<Box<RuleExpr>>,
        script: String,
        tail: Option<Box<RuleExpr>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Structural,
    Path,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Alternative {
    pub dialect: Dialect,
    /// Dialect came from an explicit `@css:`/`@xpath:`/`@json:` marker.
    pub marked: bool,
    /// Rule text with any dialect marker and regex affix removed.
    pub body: String,
    pub affix: Option<RegexAffix>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegexAffix {
    pub pattern: String,
    pub replacement: String,
}

impl RegexAffix {
    pub fn apply(&self, text: &str) -> Result<String, RuleError> {
        let regex = Regex::new(&self.pattern).map_err(|err| RuleError::Regex {
            pattern: self.pattern.clone(),
            reason: err.to_string(),
        })?;
        Ok(regex
            .replace_all(text, self.replacement.as_str())
            .into_owned())
    }
}

impl Alternative {
    /// Cascade steps of a structural alternative.
    pub fn steps(&self) -> Vec<&str> {
        split_top_level(&self.body, "@", false)
            .into_iter()
            .map(str::trim)
            .filter(|step| !step.is_empty())
            .collect()
    }
}

pub(crate) fn parse(rule: &str) -> RuleExpr {
    let rule = rule.trim();

    if let Some(envelope) = find_envelope(rule, true) {
        let head = envelope.before.trim().trim_end_matches('@').trim();
        let tail = envelope.after.trim().trim_start_matches('@').trim();
        return RuleExpr::Scripted {
            head: (!head.is_empty()).then(|| Box::new(parse(head))),
            script: envelope.script.to_string(),
            tail: (!tail.is_empty()).then(|| Box::new(parse(tail))),
        };
    }

    RuleExpr::Alternation(
        split_top_level(rule, "||", false)
            .into_iter()
            .map(parse_alternative)
            .collect(),
    )
}

fn parse_alternative(raw: &str) -> Alternative {
    let raw = raw.trim();
    let (body, affix) = split_affix(raw);
    let body = body.trim();

    let (dialect, marked, body) = if let Some(rest) = body.strip_prefix("@css:") {
        (Dialect::Structural, true, rest)
    } else if let Some(rest) = body.strip_prefix("@xpath:") {
        (Dialect::Path, true, rest)
    } else if let Some(rest) = body.strip_prefix("@json:") {
        (Dialect::Json, true, rest)
    } else if body.starts_with('/') || body.starts_with("./") {
        (Dialect::Path, false, body)
    } else if body.starts_with("$.") || body.starts_with("$[") {
        (Dialect::Json, false, body)
    } else {
        (Dialect::Structural, false, body)
    };

    Alternative {
        dialect,
        marked,
        body: body.trim().to_string(),
        affix,
    }
}

fn split_affix(raw: &str) -> (&str, Option<RegexAffix>) {
    let Some((body, rest)) = raw.split_once("##") else {
        return (raw, None);
    };
    let (pattern, replacement) = rest.split_once("##").unwrap_or((rest, ""));
    if pattern.is_empty() {
        return (body, None);
    }
    (
        body,
        Some(RegexAffix {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        }),
    )
}

/// Give every single-step structural alternative an explicit `@leaf`.
///
/// Rules containing a script envelope are returned unchanged.
pub fn with_default_leaf(rule: &str, leaf: &str) -> String {
    if find_envelope(rule, true).is_some() {
        return rule.to_string();
    }

    split_top_level(rule.trim(), "||", false)
        .into_iter()
        .map(|raw| {
            let alternative = parse_alternative(raw);
            let single_step = alternative.dialect == Dialect::Structural
                && !alternative.body.is_empty()
                && alternative.steps().len() == 1;
            if !single_step {
                return raw.trim().to_string();
            }
            let raw = raw.trim();
            match raw.find("##") {
                Some(pos) => format!("{}@{leaf}{}", raw[..pos].trim_end(), &raw[pos..]),
                None => format!("{raw}@{leaf}"),
            }
        })
        .collect::<Vec<_>>()
        .join("||")
}

/// Split `text` on `delim`, ignoring occurrences nested in `[]` or `()`.
///
/// With `quotes` set, single- and double-quoted spans are skipped too.
pub(crate) fn split_top_level<'a>(text: &'a str, delim: &str, quotes: bool) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, ch)) = iter.next() {
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' if quotes => quote = Some(ch),
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && text[i..].starts_with(delim) => {
                parts.push(&text[start..i]);
                start = i + delim.len();
                while iter.peek().is_some_and(|(j, _)| *j < start) {
                    iter.next();
                }
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternatives(rule: &str) -> Vec<Alternative> {
        match parse(rule) {
            RuleExpr::Alternation(alts) => alts,
            other => panic!("expected alternation, got {other:?}"),
        }
    }

    #[test]
    fn test_split_alternation_and_cascade() {
        let alts = alternatives("class.a@tag.li||id.b@text");
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[0].steps(), vec!["class.a", "tag.li"]);
        assert_eq!(alts[1].steps(), vec!["id.b", "text"]);
    }

    #[test]
    fn test_brackets_protect_delimiters() {
        let alts = alternatives("a[href*='@']@href");
        assert_eq!(alts[0].steps(), vec!["a[href*='@']", "href"]);
    }

    #[test]
    fn test_dialect_detection() {
        assert_eq!(alternatives("//div/a")[0].dialect, Dialect::Path);
        assert_eq!(alternatives("./a")[0].dialect, Dialect::Path);
        assert_eq!(alternatives("@xpath:div")[0].dialect, Dialect::Path);
        assert_eq!(alternatives("$.data.list")[0].dialect, Dialect::Json);
        assert_eq!(alternatives("@json:data")[0].body, "data");
        assert_eq!(alternatives("@css:div > a@href")[0].steps(), vec!["div > a", "href"]);
        assert_eq!(alternatives("class.x")[0].dialect, Dialect::Structural);
        assert!(alternatives("@css:x")[0].marked);
        assert!(!alternatives("x")[0].marked);
    }

    #[test]
    fn test_path_body_keeps_at_signs() {
        let alts = alternatives("//a/@href##\\?.*##");
        assert_eq!(alts[0].body, "//a/@href");
        assert_eq!(alts[0].affix.as_ref().unwrap().pattern, "\\?.*");
    }

    #[test]
    fn test_regex_affix() {
        let alts = alternatives("p@text##foo##bar");
        let affix = alts[0].affix.as_ref().unwrap();
        assert_eq!(affix.apply("foobaz").unwrap(), "barbaz");

        let alts = alternatives("p@text##\\s+");
        assert_eq!(alts[0].affix.as_ref().unwrap().apply("a b  c").unwrap(), "abc");

        let alts = alternatives("p##(\\d+)-(\\d+)##$2-$1");
        assert_eq!(alts[0].affix.as_ref().unwrap().apply("1-2").unwrap(), "2-1");
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let alts = alternatives("p##(unclosed");
        assert!(alts[0].affix.as_ref().unwrap().apply("x").is_err());
    }

    #[test]
    fn test_script_envelope_takes_priority() {
        match parse("class.a@text<js>result.split(\"||\")</js>") {
            RuleExpr::Scripted { head, script, tail } => {
                assert_eq!(script, "result.split(\"||\")");
                assert!(tail.is_none());
                let RuleExpr::Alternation(alts) = *head.unwrap() else {
                    panic!("head should be an alternation");
                };
                assert_eq!(alts.len(), 1);
                assert_eq!(alts[0].steps(), vec!["class.a", "text"]);
            }
            other => panic!("expected script, got {other:?}"),
        }
    }

    #[test]
    fn test_inline_script_without_head() {
        match parse("@js:result + \"@x||y\"") {
            RuleExpr::Scripted { head, script, .. } => {
                assert!(head.is_none());
                assert_eq!(script, "result + \"@x||y\"");
            }
            other => panic!("expected script, got {other:?}"),
        }
    }

    #[test]
    fn test_with_default_leaf() {
        assert_eq!(with_default_leaf("id.content", "html"), "id.content@html");
        assert_eq!(with_default_leaf("id.content@text", "html"), "id.content@text");
        assert_eq!(
            with_default_leaf("id.content##ad##||class.c", "html"),
            "id.content@html##ad##||class.c@html"
        );
        assert_eq!(with_default_leaf("//div[@id='c']", "html"), "//div[@id='c']");
        assert_eq!(with_default_leaf("<js>result</js>", "html"), "<js>result</js>");
        assert_eq!(with_default_leaf("@css:#content", "html"), "@css:#content@html");
    }

    #[test]
    fn test_split_top_level_quotes() {
        assert_eq!(
            split_top_level("a='x|y'|b", "|", true),
            vec!["a='x|y'", "b"]
        );
        assert_eq!(split_top_level("a||b||", "||", false), vec!["a", "b", ""]);
    }
}

//! Sandboxed script escape hatch for rules and URL templates.
//!
//! Rules may embed a script in one of three envelopes:
//!
//! ```text
//! <js>result.to_upper()</js>
//! {{js: baseUrl + "/x"}}
//! tag.a@href@js: result + "?full=1"
//! ```
//!
//! The script runs with `result` (the current content) and `baseUrl` bound,
//! plus any named variables the caller adds. Only the functions registered in
//! [`natives`] are reachable from a script.

mod natives;
mod rhai_engine;

pub use natives::{aes_cbc_decrypt, base64_decode, base64_encode, md5_hex};
pub use rhai_engine::{RhaiEvaluator, ScriptLimits};

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("script evaluation failed: {0}")]
    Eval(String),

    #[error("invalid base64 input: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decryption failed: {0}")]
    Crypto(String),
}

/// Value bound to `result` when a script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptInput {
    Text(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Bindings {
    pub result: ScriptInput,
    pub base_url: String,
    pub vars: BTreeMap<String, String>,
}

impl Bindings {
    pub fn new(result: ScriptInput, base_url: &str) -> Self {
        Self {
            result,
            base_url: base_url.to_string(),
            vars: BTreeMap::new(),
        }
    }

    pub fn with_var(mut self, name: &str, value: impl Into<String>) -> Self {
        self.vars.insert(name.to_string(), value.into());
        self
    }
}

/// Result of a script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Empty,
    Text(String),
    List(Vec<String>),
}

impl ScriptValue {
    /// Scalar form; lists are joined with newlines.
    pub fn into_text(self) -> String {
        match self {
            ScriptValue::Empty => String::new(),
            ScriptValue::Text(text) => text,
            ScriptValue::List(items) => items.join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ScriptValue::Empty => true,
            ScriptValue::Text(text) => text.is_empty(),
            ScriptValue::List(items) => items.is_empty(),
        }
    }
}

/// Script engine seam.
///
/// Implementations must not keep state between calls: every evaluation sees
/// only the bindings it was given.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, script: &str, bindings: &Bindings) -> Result<ScriptValue, ScriptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// `<js>…</js>`
    Tag,
    /// `{{js: …}}` or, in rules, bare `{{…}}`
    Braces,
    /// `@js:…` to end of string
    Inline,
}

/// A script envelope located inside a larger string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub kind: EnvelopeKind,
    pub before: &'a str,
    pub script: &'a str,
    pub after: &'a str,
}

/// Locate the first script envelope in `text`.
///
/// With `bare_braces` unset only `{{js:…}}` counts as a brace envelope, since
/// URL templates use `{{name}}` for variables.
pub fn find_envelope(text: &str, bare_braces: bool) -> Option<Envelope<'_>> {
    let mut candidates = Vec::with_capacity(3);

    if let Some(pos) = text.find("<js>") {
        let body = &text[pos + 4..];
        let (script, after) = match body.find("</js>") {
            Some(end) => (&body[..end], &body[end + 5..]),
            None => (body, ""),
        };
        candidates.push(Envelope {
            kind: EnvelopeKind::Tag,
            before: &text[..pos],
            script,
            after,
        });
    }

    let brace_start = if bare_braces {
        text.find("{{")
    } else {
        text.find("{{js:")
    };
    if let Some(pos) = brace_start {
        let body = &text[pos + 2..];
        if let Some(end) = body.find("}}") {
            let inner = &body[..end];
            let script = inner.trim_start().strip_prefix("js:").unwrap_or(inner);
            candidates.push(Envelope {
                kind: EnvelopeKind::Braces,
                before: &text[..pos],
                script,
                after: &body[end + 2..],
            });
        }
    }

    if let Some(pos) = text.find("@js:") {
        candidates.push(Envelope {
            kind: EnvelopeKind::Inline,
            before: &text[..pos],
            script: &text[pos + 4..],
            after: "",
        });
    }

    candidates
        .into_iter()
        .min_by_key(|envelope| envelope.before.len())
}

/// Runs scripts through an [`Evaluator`], absorbing failures.
pub struct ScriptBridge {
    evaluator: Box<dyn Evaluator>,
}

impl ScriptBridge {
    pub fn new(evaluator: Box<dyn Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Evaluate a bare script. Errors are logged and yield [`ScriptValue::Empty`].
    pub fn eval(&self, script: &str, bindings: &Bindings) -> ScriptValue {
        match self.evaluator.evaluate(script.trim(), bindings) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "script failed; treating result as empty");
                ScriptValue::Empty
            }
        }
    }

    /// Strip one envelope from `rule` and evaluate what is inside it.
    ///
    /// Text without an envelope is evaluated as a script as-is.
    pub fn eval_rule(&self, rule: &str, bindings: &Bindings) -> ScriptValue {
        match find_envelope(rule, false) {
            Some(envelope) => self.eval(envelope.script, bindings),
            None => self.eval(rule, bindings),
        }
    }
}

impl Default for ScriptBridge {
    fn default() -> Self {
        Self::new(Box::new(RhaiEvaluator::new()))
    }
}

impl std::fmt::Debug for ScriptBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBridge").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Evaluator for Failing {
        fn evaluate(&self, _: &str, _: &Bindings) -> Result<ScriptValue, ScriptError> {
            Err(ScriptError::Eval("boom".into()))
        }
    }

    #[test]
    fn test_find_tag_envelope() {
        let env = find_envelope("class.a@text<js>result + 1</js>@tail", true).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Tag);
        assert_eq!(env.before, "class.a@text");
        assert_eq!(env.script, "result + 1");
        assert_eq!(env.after, "@tail");
    }

    #[test]
    fn test_find_inline_envelope_runs_to_end() {
        let env = find_envelope("a@href@js: result || \"x\"", true).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Inline);
        assert_eq!(env.before, "a@href");
        assert_eq!(env.script, " result || \"x\"");
        assert_eq!(env.after, "");
    }

    #[test]
    fn test_earliest_envelope_wins() {
        let env = find_envelope("{{js: 1}}<js>2</js>", true).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Braces);
        assert_eq!(env.script, " 1");
        assert_eq!(env.after, "<js>2</js>");
    }

    #[test]
    fn test_bare_braces_only_in_rules() {
        assert!(find_envelope("/s?q={{key}}&p={{page}}", false).is_none());
        let env = find_envelope("/s?q={{key}}", true).unwrap();
        assert_eq!(env.script, "key");
    }

    #[test]
    fn test_unclosed_braces_ignored() {
        assert!(find_envelope("abc {{ def", true).is_none());
    }

    #[test]
    fn test_bridge_absorbs_errors() {
        let bridge = ScriptBridge::new(Box::new(Failing));
        let value = bridge.eval("anything", &Bindings::new(ScriptInput::Text(String::new()), ""));
        assert_eq!(value, ScriptValue::Empty);
    }

    #[test]
    fn test_eval_rule_strips_envelope() {
        let bridge = ScriptBridge::default();
        let bindings = Bindings::new(ScriptInput::Text("abc".into()), "https://s.com");
        assert_eq!(
            bridge.eval_rule("<js>result + \"!\"</js>", &bindings),
            ScriptValue::Text("abc!".into())
        );
        assert_eq!(
            bridge.eval_rule("@js:baseUrl", &bindings),
            ScriptValue::Text("https://s.com".into())
        );
    }

    #[test]
    fn test_value_into_text() {
        assert_eq!(ScriptValue::List(vec!["a".into(), "b".into()]).into_text(), "a\nb");
        assert_eq!(ScriptValue::Empty.into_text(), "");
        assert!(ScriptValue::List(vec![]).is_empty());
    }
}

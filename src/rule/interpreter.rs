use std::borrow::Cow;

use serde_json::Value;
use tracing::debug;

use super::css;
use super::grammar::{self, Alternative, Dialect, RuleExpr};
use super::json;
use super::node::{Node, Parsed};
use super::xpath::{self, PathItem};
use super::{absolute_url, RuleError};
use crate::script::{Bindings, Evaluator, ScriptBridge, ScriptInput, ScriptValue};

/// Evaluates rule strings against nodes.
///
/// The base URL is passed on every call; the interpreter itself holds only
/// the script bridge and can be shared between calls for different pages.
#[derive(Debug, Default)]
pub struct RuleInterpreter {
    bridge: ScriptBridge,
}

impl RuleInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator(evaluator: Box<dyn Evaluator>) -> Self {
        Self {
            bridge: ScriptBridge::new(evaluator),
        }
    }

    pub fn bridge(&self) -> &ScriptBridge {
        &self.bridge
    }

    /// Select nodes from raw fetched content.
    pub fn elements(&self, content: &str, rule: &str, base_url: &str) -> Vec<Node> {
        self.elements_of(&Node::text(content), rule, base_url)
    }

    /// Select nodes below `node`.
    pub fn elements_of(&self, node: &Node, rule: &str, base_url: &str) -> Vec<Node> {
        if rule.trim().is_empty() {
            return Vec::new();
        }
        self.eval_elements(node, &grammar::parse(rule), base_url)
    }

    /// Extract text. Multiple results are joined with `\n`.
    pub fn text(&self, node: &Node, rule: &str, base_url: &str) -> String {
        self.texts(node, rule, base_url).join("\n")
    }

    /// Extract every text result separately.
    pub fn texts(&self, node: &Node, rule: &str, base_url: &str) -> Vec<String> {
        self.eval_text(node, &grammar::parse(rule), base_url, Render::Text)
    }

    /// Like [`text`](Self::text), but elements selected by a path expression
    /// yield their outer HTML, so block structure survives for the
    /// normalizer.
    pub fn markup(&self, node: &Node, rule: &str, base_url: &str) -> String {
        self.eval_text(node, &grammar::parse(rule), base_url, Render::Markup)
            .join("\n")
    }

    /// Extract a link and resolve it against `base_url`.
    pub fn url(&self, node: &Node, rule: &str, base_url: &str) -> String {
        let text = self.text(node, rule, base_url);
        let first = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        absolute_url(base_url, first)
    }

    fn eval_elements(&self, node: &Node, expr: &RuleExpr, base_url: &str) -> Vec<Node> {
        match expr {
            RuleExpr::Alternation(alternatives) => {
                for alternative in alternatives {
                    match self.alternative_elements(node, alternative) {
                        Ok(nodes) if !nodes.is_empty() => return nodes,
                        Ok(_) => {}
                        Err(err) => debug!(%err, rule = %alternative.body, "rule alternative failed"),
                    }
                }
                Vec::new()
            }
            RuleExpr::Scripted { head, script, tail } => {
                let input = match head {
                    Some(head) => ScriptInput::List(
                        self.eval_elements(node, head, base_url)
                            .iter()
                            .map(|node| node.source().to_string())
                            .collect(),
                    ),
                    None => ScriptInput::Text(node.source().to_string()),
                };
                let output = self.run_script(script, input, base_url);
                let nodes: Vec<Node> = output
                    .into_iter()
                    .filter(|text| !text.trim().is_empty())
                    .map(Node::Text)
                    .collect();
                match tail {
                    Some(tail) => nodes
                        .iter()
                        .flat_map(|node| self.eval_elements(node, tail, base_url))
                        .collect(),
                    None => nodes,
                }
            }
        }
    }

    fn eval_text(&self, node: &Node, expr: &RuleExpr, base_url: &str, render: Render) -> Vec<String> {
        match expr {
            RuleExpr::Alternation(alternatives) => {
                for alternative in alternatives {
                    match self.alternative_text(node, alternative, base_url, render) {
                        Ok(values) if !values.is_empty() => return values,
                        Ok(_) => {}
                        Err(err) => debug!(%err, rule = %alternative.body, "rule alternative failed"),
                    }
                }
                Vec::new()
            }
            RuleExpr::Scripted { head, script, tail } => {
                let input = match head {
                    Some(head) => self.eval_text(node, head, base_url, render).join("\n"),
                    None => node.source().to_string(),
                };
                let output = self.run_script(script, ScriptInput::Text(input), base_url);
                match tail {
                    Some(tail) => output
                        .iter()
                        .flat_map(|text| {
                            self.eval_text(&Node::text(text.as_str()), tail, base_url, render)
                        })
                        .collect(),
                    None => output.into_iter().filter(|text| !text.is_empty()).collect(),
                }
            }
        }
    }

    fn run_script(&self, script: &str, input: ScriptInput, base_url: &str) -> Vec<String> {
        match self.bridge.eval(script, &Bindings::new(input, base_url)) {
            ScriptValue::Empty => Vec::new(),
            ScriptValue::Text(text) => vec![text],
            ScriptValue::List(items) => items,
        }
    }

    fn alternative_elements(
        &self,
        node: &Node,
        alternative: &Alternative,
    ) -> Result<Vec<Node>, RuleError> {
        let node = match &alternative.affix {
            Some(affix) => Cow::Owned(node.with_source(affix.apply(node.source())?)),
            None => Cow::Borrowed(node),
        };

        match effective_dialect(&node, alternative) {
            Dialect::Structural => {
                let steps = alternative.steps();
                if steps.is_empty() {
                    return Ok(vec![node.into_owned()]);
                }
                let parsed = Parsed::new(&node);
                let Some(root) = parsed.root() else {
                    return Ok(Vec::new());
                };
                Ok(css::select(root, &steps)?
                    .into_iter()
                    .map(Node::markup)
                    .collect())
            }
            Dialect::Path => {
                let parsed = Parsed::new(&node);
                let Some(root) = parsed.root() else {
                    return Ok(Vec::new());
                };
                Ok(xpath::evaluate(root, &alternative.body)?
                    .into_iter()
                    .map(|item| match item {
                        PathItem::Element(element) => Node::path(element),
                        PathItem::Text(text) => Node::Text(text),
                    })
                    .filter(|node| !node.is_empty())
                    .collect())
            }
            Dialect::Json => {
                let document = parse_json(node.source())?;
                let values = json::query(&document, &alternative.body)?;
                // A path ending on an array selects its items.
                let values: Vec<&Value> = match values.as_slice() {
                    [Value::Array(items)] => items.iter().collect(),
                    _ => values,
                };
                Ok(values
                    .into_iter()
                    .map(|value| Node::Text(json::value_text(value)))
                    .filter(|node| !node.is_empty())
                    .collect())
            }
        }
    }

    fn alternative_text(
        &self,
        node: &Node,
        alternative: &Alternative,
        base_url: &str,
        render: Render,
    ) -> Result<Vec<String>, RuleError> {
        let values = match effective_dialect(node, alternative) {
            Dialect::Structural => structural_text(node, &alternative.steps(), base_url, render)?,
            Dialect::Path => {
                let parsed = Parsed::new(node);
                match parsed.root() {
                    Some(root) => xpath::evaluate(root, &alternative.body)?
                        .into_iter()
                        .map(|item| match item {
                            PathItem::Element(element) => match render {
                                Render::Text => css::full_text(element),
                                Render::Markup => element.html(),
                            },
                            PathItem::Text(text) => text,
                        })
                        .collect(),
                    None => Vec::new(),
                }
            }
            Dialect::Json => {
                let document = parse_json(node.source())?;
                json::query(&document, &alternative.body)?
                    .into_iter()
                    .map(json::value_text)
                    .collect()
            }
        };

        let values = match &alternative.affix {
            Some(affix) => values
                .iter()
                .map(|value| affix.apply(value))
                .collect::<Result<Vec<_>, _>>()?,
            None => values,
        };

        Ok(values.into_iter().filter(|value| !value.is_empty()).collect())
    }
}

/// How selected elements turn into strings when a rule ends without a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Render {
    Text,
    Markup,
}

/// Unmarked alternatives over JSON text use the JSON dialect.
fn effective_dialect(node: &Node, alternative: &Alternative) -> Dialect {
    if alternative.marked
        || alternative.dialect != Dialect::Structural
        || matches!(alternative.body.as_str(), "" | "text")
    {
        return alternative.dialect;
    }
    match node {
        Node::Text(text) if looks_like_json(text) => Dialect::Json,
        _ => Dialect::Structural,
    }
}

fn looks_like_json(text: &str) -> bool {
    let text = text.trim_start();
    (text.starts_with('{') || text.starts_with('[')) && serde_json::from_str::<Value>(text).is_ok()
}

fn parse_json(text: &str) -> Result<Value, RuleError> {
    serde_json::from_str(text).map_err(|err| RuleError::Json(err.to_string()))
}

fn structural_text(
    node: &Node,
    steps: &[&str],
    base_url: &str,
    render: Render,
) -> Result<Vec<String>, RuleError> {
    let Some((leaf, selectors)) = steps.split_last() else {
        let leaf = match render {
            Render::Text => "text",
            Render::Markup => "html",
        };
        return Ok(match node {
            Node::Text(text) => vec![text.clone()],
            Node::Markup(_) | Node::Path(_) => leaf_of_root(node, leaf, base_url)?,
        });
    };

    if let (Node::Text(text), []) = (node, selectors) {
        if *leaf == "text" {
            return Ok(vec![text.clone()]);
        }
    }

    let parsed = Parsed::new(node);
    let Some(root) = parsed.root() else {
        return Ok(Vec::new());
    };
    let elements = css::select(root, selectors)?;
    if elements.is_empty() {
        return Ok(Vec::new());
    }
    css::extract_leaf(&elements, leaf, base_url)
}

fn leaf_of_root(node: &Node, leaf: &str, base_url: &str) -> Result<Vec<String>, RuleError> {
    let parsed = Parsed::new(node);
    match parsed.root() {
        Some(root) => css::extract_leaf(&[root], leaf, base_url),
        None => Ok(Vec::new()),
    }
}

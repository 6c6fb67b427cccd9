//! A small XPath 1.0 subset evaluated directly over the HTML tree.
//!
//! Supported: absolute and relative location paths, `/` and `//`, name tests,
//! `*`, `.`, `..`, `text()`, `@name`, `@*`, unions with `|`, and predicates
//! built from positions (`N`, `last()`, `last()-N`, `position() op N`),
//! attribute tests, child-element tests (`[a]`, `[p='v']`), `contains`,
//! `starts-with`, `text()='v'`, `not`, `and` and `or`. Other axes and
//! functions are rejected.

use std::collections::HashSet;

use scraper::ElementRef;

use super::css::{full_text, own_text};
use super::grammar::split_top_level;
use super::RuleError;

/// One result of an XPath evaluation.
#[derive(Debug, Clone)]
pub(crate) enum PathItem<'a> {
    Element(ElementRef<'a>),
    Text(String),
}

pub(crate) fn evaluate<'a>(
    context: ElementRef<'a>,
    expr: &str,
) -> Result<Vec<PathItem<'a>>, RuleError> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for part in split_top_level(expr, "|", true) {
        let path = LocationPath::parse(part.trim())?;
        for item in path.evaluate(context) {
            match item {
                Item::Node(ctx) => {
                    let element = ctx.element();
                    if seen.insert(element.id()) {
                        out.push(PathItem::Element(element));
                    }
                }
                Item::Text(text) => out.push(PathItem::Text(text)),
            }
        }
    }

    Ok(out)
}

/// Context node. The document node has no element of its own, so it carries
/// the root `<html>` element.
#[derive(Debug, Clone, Copy)]
enum Ctx<'a> {
    Document(ElementRef<'a>),
    Element(ElementRef<'a>),
}

impl<'a> Ctx<'a> {
    fn element(self) -> ElementRef<'a> {
        match self {
            Ctx::Document(element) | Ctx::Element(element) => element,
        }
    }

    fn children(self) -> Vec<ElementRef<'a>> {
        match self {
            Ctx::Document(root) => vec![root],
            Ctx::Element(element) => element.children().filter_map(ElementRef::wrap).collect(),
        }
    }

    fn descendant_or_self(self) -> Vec<Ctx<'a>> {
        let mut out = Vec::new();
        let element = match self {
            Ctx::Document(root) => {
                out.push(self);
                root
            }
            Ctx::Element(element) => element,
        };
        out.extend(
            element
                .descendants()
                .filter_map(ElementRef::wrap)
                .map(Ctx::Element),
        );
        out
    }

    fn key(self) -> (bool, impl std::hash::Hash + Eq) {
        (matches!(self, Ctx::Document(_)), self.element().id())
    }
}

#[derive(Debug, Clone)]
enum Item<'a> {
    Node(Ctx<'a>),
    Text(String),
}

fn document_root(element: ElementRef<'_>) -> ElementRef<'_> {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .last()
        .unwrap_or(element)
}

#[derive(Debug)]
struct LocationPath {
    absolute: bool,
    steps: Vec<PathStep>,
}

#[derive(Debug)]
struct PathStep {
    descendant: bool,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, PartialEq)]
enum NodeTest {
    Name(String),
    AnyElement,
    Text,
    Attr(String),
    AnyAttr,
    SelfNode,
    Parent,
}

impl LocationPath {
    fn parse(expr: &str) -> Result<Self, RuleError> {
        if expr.is_empty() {
            return Err(RuleError::Path("empty expression".to_string()));
        }

        let (absolute, rest, mut descendant) = if let Some(rest) = expr.strip_prefix("//") {
            (true, rest, true)
        } else if let Some(rest) = expr.strip_prefix(".//") {
            (false, rest, true)
        } else if let Some(rest) = expr.strip_prefix("./") {
            (false, rest, false)
        } else if let Some(rest) = expr.strip_prefix('/') {
            (true, rest, false)
        } else {
            (false, expr, false)
        };

        let mut steps = Vec::new();
        for segment in split_top_level(rest, "/", true) {
            let segment = segment.trim();
            if segment.is_empty() {
                descendant = true;
                continue;
            }
            steps.push(PathStep::parse(segment, descendant)?);
            descendant = false;
        }

        if steps.is_empty() && !absolute {
            return Err(RuleError::Path(format!("no steps in `{expr}`")));
        }

        Ok(Self { absolute, steps })
    }

    fn evaluate<'a>(&self, context: ElementRef<'a>) -> Vec<Item<'a>> {
        let start = if self.absolute {
            Ctx::Document(document_root(context))
        } else {
            Ctx::Element(context)
        };
        let mut current = vec![Item::Node(start)];

        for step in &self.steps {
            let mut next = Vec::new();
            let mut seen = HashSet::new();

            for item in &current {
                let Item::Node(ctx) = item else { continue };
                let contexts = if step.descendant {
                    ctx.descendant_or_self()
                } else {
                    vec![*ctx]
                };
                for inner in contexts {
                    let candidates = step.test.candidates(inner);
                    for candidate in apply_predicates(candidates, &step.predicates) {
                        if let Item::Node(node) = &candidate {
                            if !seen.insert(node.key()) {
                                continue;
                            }
                        }
                        next.push(candidate);
                    }
                }
            }

            current = next;
            if current.is_empty() {
                break;
            }
        }

        current
    }
}

impl PathStep {
    fn parse(segment: &str, descendant: bool) -> Result<Self, RuleError> {
        let (test, predicates) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };

        Ok(Self {
            descendant,
            test: NodeTest::parse(test.trim())?,
            predicates: bracket_groups(predicates)?
                .into_iter()
                .map(Predicate::parse)
                .collect::<Result<_, _>>()?,
        })
    }
}

impl NodeTest {
    fn parse(test: &str) -> Result<Self, RuleError> {
        Ok(match test {
            "." => NodeTest::SelfNode,
            ".." => NodeTest::Parent,
            "*" | "node()" => NodeTest::AnyElement,
            "text()" => NodeTest::Text,
            "@*" => NodeTest::AnyAttr,
            _ => match test.strip_prefix('@') {
                Some(name) if is_name(name) => NodeTest::Attr(name.to_string()),
                None if is_name(test) => NodeTest::Name(test.to_ascii_lowercase()),
                _ => return Err(RuleError::Path(format!("unsupported step `{test}`"))),
            },
        })
    }

    fn candidates<'a>(&self, ctx: Ctx<'a>) -> Vec<Item<'a>> {
        match self {
            NodeTest::Name(name) => ctx
                .children()
                .into_iter()
                .filter(|element| element.value().name() == name)
                .map(|element| Item::Node(Ctx::Element(element)))
                .collect(),
            NodeTest::AnyElement => ctx
                .children()
                .into_iter()
                .map(|element| Item::Node(Ctx::Element(element)))
                .collect(),
            NodeTest::Text => match ctx {
                Ctx::Document(_) => Vec::new(),
                Ctx::Element(element) => element
                    .children()
                    .filter_map(|child| child.value().as_text().map(|t| t.trim().to_string()))
                    .filter(|text| !text.is_empty())
                    .map(Item::Text)
                    .collect(),
            },
            NodeTest::Attr(name) => match ctx {
                Ctx::Document(_) => Vec::new(),
                Ctx::Element(element) => element
                    .value()
                    .attr(name)
                    .map(|value| Item::Text(value.to_string()))
                    .into_iter()
                    .collect(),
            },
            NodeTest::AnyAttr => match ctx {
                Ctx::Document(_) => Vec::new(),
                Ctx::Element(element) => element
                    .value()
                    .attrs()
                    .map(|(_, value)| Item::Text(value.to_string()))
                    .collect(),
            },
            NodeTest::SelfNode => vec![Item::Node(ctx)],
            NodeTest::Parent => match ctx {
                Ctx::Document(_) => Vec::new(),
                Ctx::Element(element) => {
                    let parent = match element.parent().and_then(ElementRef::wrap) {
                        Some(parent) => Ctx::Element(parent),
                        None => Ctx::Document(document_root(element)),
                    };
                    vec![Item::Node(parent)]
                }
            },
        }
    }
}

fn is_name(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
        && !text.contains("::")
}

/// Split `[a][b]` into `["a", "b"]`, honouring nesting and quotes.
fn bracket_groups(text: &str) -> Result<Vec<&str>, RuleError> {
    let mut groups = Vec::new();
    let mut rest = text.trim_start();

    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(RuleError::Path(format!("unexpected `{rest}`")));
        }
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, ch) in rest.char_indices() {
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
                continue;
            }
            match ch {
                '\'' | '"' => quote = Some(ch),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| RuleError::Path(format!("unclosed predicate in `{text}`")))?;
        groups.push(&rest[1..end]);
        rest = rest[end + 1..].trim_start();
    }

    Ok(groups)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Cmp {
    fn eval(self, left: i64, right: i64) -> bool {
        match self {
            Cmp::Lt => left < right,
            Cmp::Le => left <= right,
            Cmp::Gt => left > right,
            Cmp::Ge => left >= right,
            Cmp::Eq => left == right,
            Cmp::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attr(String),
    /// Child elements with this name.
    Child(String),
    Text,
    Dot,
}

#[derive(Debug)]
enum Predicate {
    Position(usize),
    /// `last()` minus an offset.
    Last(usize),
    PositionCmp(Cmp, i64),
    Exists(Operand),
    Equals {
        operand: Operand,
        value: String,
        negate: bool,
    },
    Contains(Operand, String),
    StartsWith(Operand, String),
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    fn parse(text: &str) -> Result<Self, RuleError> {
        let text = text.trim();

        let ors = split_top_level(text, " or ", true);
        if ors.len() > 1 {
            return fold(ors, Predicate::Or);
        }
        let ands = split_top_level(text, " and ", true);
        if ands.len() > 1 {
            return fold(ands, Predicate::And);
        }

        if let Some(inner) = text.strip_prefix("not(").and_then(|r| r.strip_suffix(')')) {
            return Ok(Predicate::Not(Box::new(Predicate::parse(inner)?)));
        }

        if let Ok(position) = text.parse::<usize>() {
            if position == 0 {
                return Err(RuleError::Path("positions start at 1".to_string()));
            }
            return Ok(Predicate::Position(position));
        }

        if let Some(rest) = text.strip_prefix("last()") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(Predicate::Last(0));
            }
            let offset = rest
                .strip_prefix('-')
                .and_then(|n| n.trim().parse::<usize>().ok())
                .ok_or_else(|| RuleError::Path(format!("unsupported predicate `{text}`")))?;
            return Ok(Predicate::Last(offset));
        }

        if let Some(rest) = text.strip_prefix("position()") {
            let rest = rest.trim();
            for (token, cmp) in [
                ("<=", Cmp::Le),
                (">=", Cmp::Ge),
                ("!=", Cmp::Ne),
                ("<", Cmp::Lt),
                (">", Cmp::Gt),
                ("=", Cmp::Eq),
            ] {
                if let Some(number) = rest.strip_prefix(token) {
                    let number = number
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| RuleError::Path(format!("bad position in `{text}`")))?;
                    return Ok(Predicate::PositionCmp(cmp, number));
                }
            }
            return Err(RuleError::Path(format!("unsupported predicate `{text}`")));
        }

        if let Some((operand, value)) = call(text, "contains")? {
            return Ok(Predicate::Contains(operand, value));
        }
        if let Some((operand, value)) = call(text, "starts-with")? {
            return Ok(Predicate::StartsWith(operand, value));
        }

        for (token, negate) in [("!=", true), ("=", false)] {
            let sides = split_top_level(text, token, true);
            if sides.len() == 2 {
                return Ok(Predicate::Equals {
                    operand: parse_operand(sides[0])?,
                    value: parse_literal(sides[1])?,
                    negate,
                });
            }
        }

        Ok(Predicate::Exists(parse_operand(text)?))
    }

    fn matches(&self, item: &Item<'_>, position: usize, size: usize) -> bool {
        match self {
            Predicate::Position(n) => position == *n,
            Predicate::Last(offset) => position + offset == size,
            Predicate::PositionCmp(cmp, n) => {
                cmp.eval(i64::try_from(position).unwrap_or(i64::MAX), *n)
            }
            Predicate::Exists(operand @ (Operand::Attr(_) | Operand::Child(_))) => {
                !operand_values(item, operand).is_empty()
            }
            Predicate::Exists(operand) => operand_values(item, operand)
                .iter()
                .any(|value| !value.is_empty()),
            Predicate::Equals {
                operand,
                value,
                negate,
            } => operand_values(item, operand)
                .iter()
                .any(|actual| (actual == value) != *negate),
            Predicate::Contains(operand, needle) => operand_values(item, operand)
                .iter()
                .any(|actual| actual.contains(needle.as_str())),
            Predicate::StartsWith(operand, prefix) => operand_values(item, operand)
                .iter()
                .any(|actual| actual.starts_with(prefix.as_str())),
            Predicate::Not(inner) => !inner.matches(item, position, size),
            Predicate::And(left, right) => {
                left.matches(item, position, size) && right.matches(item, position, size)
            }
            Predicate::Or(left, right) => {
                left.matches(item, position, size) || right.matches(item, position, size)
            }
        }
    }
}

fn fold(
    parts: Vec<&str>,
    combine: fn(Box<Predicate>, Box<Predicate>) -> Predicate,
) -> Result<Predicate, RuleError> {
    let mut iter = parts.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| RuleError::Path("empty predicate".to_string()))?;
    let mut acc = Predicate::parse(first)?;
    for part in iter {
        acc = combine(Box::new(acc), Box::new(Predicate::parse(part)?));
    }
    Ok(acc)
}

/// Parse `name(operand, 'literal')`.
fn call(text: &str, name: &str) -> Result<Option<(Operand, String)>, RuleError> {
    let Some(inner) = text
        .strip_prefix(name)
        .map(str::trim_start)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return Ok(None);
    };
    let args = split_top_level(inner, ",", true);
    if args.len() != 2 {
        return Err(RuleError::Path(format!("{name}() takes two arguments")));
    }
    Ok(Some((parse_operand(args[0])?, parse_literal(args[1])?)))
}

fn parse_operand(text: &str) -> Result<Operand, RuleError> {
    let text = text.trim();
    match text {
        "text()" => Ok(Operand::Text),
        "." => Ok(Operand::Dot),
        _ => match text.strip_prefix('@') {
            Some(name) if is_name(name) => Ok(Operand::Attr(name.to_string())),
            None if is_name(text) => Ok(Operand::Child(text.to_string())),
            _ => Err(RuleError::Path(format!("unsupported operand `{text}`"))),
        },
    }
}

fn parse_literal(text: &str) -> Result<String, RuleError> {
    let text = text.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(inner.to_string());
        }
    }
    Err(RuleError::Path(format!("expected a quoted string, got `{text}`")))
}

/// Every string value the operand takes on `item`; empty when it selects
/// nothing.
fn operand_values(item: &Item<'_>, operand: &Operand) -> Vec<String> {
    match item {
        Item::Node(ctx) => {
            let element = ctx.element();
            match operand {
                Operand::Attr(name) => element
                    .value()
                    .attr(name)
                    .map(str::to_string)
                    .into_iter()
                    .collect(),
                Operand::Child(name) => element
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|child| child.value().name().eq_ignore_ascii_case(name))
                    .map(full_text)
                    .collect(),
                Operand::Text => vec![own_text(element)],
                Operand::Dot => vec![full_text(element)],
            }
        }
        Item::Text(text) => match operand {
            Operand::Attr(_) | Operand::Child(_) => Vec::new(),
            Operand::Text | Operand::Dot => vec![text.clone()],
        },
    }
}

fn apply_predicates<'a>(mut items: Vec<Item<'a>>, predicates: &[Predicate]) -> Vec<Item<'a>> {
    for predicate in predicates {
        let size = items.len();
        items = items
            .into_iter()
            .enumerate()
            .filter(|(i, item)| predicate.matches(item, i + 1, size))
            .map(|(_, item)| item)
            .collect();
    }
    items
}

//! Structural (CSS-based) steps and leaf extraction.

use scraper::{ElementRef, Selector};

use super::{absolute_url, RuleError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexSpec {
    At(i64),
    Exclude(i64),
}

#[derive(Debug)]
enum StepKind {
    Children,
    Css(Selector),
    OwnTextContains(String),
}

#[derive(Debug)]
pub(crate) struct Step {
    kind: StepKind,
    index: Option<IndexSpec>,
}

impl Step {
    pub fn parse(raw: &str) -> Result<Self, RuleError> {
        let (base, index) = split_index(raw.trim())?;
        let base = base.trim();

        let kind = if base == "children" {
            StepKind::Children
        } else if let Some(classes) = base.strip_prefix("class.") {
            let css: String = classes
                .split_whitespace()
                .map(|class| format!(".{class}"))
                .collect();
            StepKind::Css(compile(&css)?)
        } else if let Some(id) = base.strip_prefix("id.") {
            StepKind::Css(compile(&format!("#{id}"))?)
        } else if let Some(tag) = base.strip_prefix("tag.") {
            StepKind::Css(compile(tag)?)
        } else if let Some(needle) = base.strip_prefix("text.") {
            StepKind::OwnTextContains(needle.to_string())
        } else {
            StepKind::Css(compile(base)?)
        };

        Ok(Self { kind, index })
    }

    /// Apply the step to every root, indexing each root's matches separately.
    pub fn apply<'a>(&self, roots: &[ElementRef<'a>]) -> Vec<ElementRef<'a>> {
        let mut out = Vec::new();
        for root in roots {
            let matched: Vec<ElementRef<'a>> = match &self.kind {
                StepKind::Children => root.children().filter_map(ElementRef::wrap).collect(),
                StepKind::Css(selector) => root.select(selector).collect(),
                StepKind::OwnTextContains(needle) => root
                    .descendants()
                    .skip(1)
                    .filter_map(ElementRef::wrap)
                    .filter(|element| own_text(*element).contains(needle.as_str()))
                    .collect(),
            };
            out.extend(apply_index(matched, self.index));
        }
        out
    }
}

fn compile(css: &str) -> Result<Selector, RuleError> {
    if css.trim().is_empty() {
        return Err(RuleError::Selector {
            selector: css.to_string(),
            reason: "empty selector".to_string(),
        });
    }
    Selector::parse(css).map_err(|err| RuleError::Selector {
        selector: css.to_string(),
        reason: err.to_string(),
    })
}

/// Strip trailing index suffixes (`.N`, `!N`, `[N]`, `[!N]`), keeping the
/// rightmost one.
fn split_index(raw: &str) -> Result<(&str, Option<IndexSpec>), RuleError> {
    let mut rest = raw;
    let mut index = None;

    loop {
        let found = if rest.ends_with(']') {
            let Some(open) = rest.rfind('[') else { break };
            let inner = &rest[open + 1..rest.len() - 1];
            parse_index(inner, '!').map(|spec| (open, spec))
        } else {
            let Some(pos) = rest.rfind(['.', '!']) else { break };
            if pos == 0 {
                break;
            }
            let marker = rest[pos..].chars().next().unwrap_or('.');
            let inner = &rest[pos + 1..];
            let inner_with_marker = if marker == '!' { &rest[pos..] } else { inner };
            parse_index(inner_with_marker, '!').map(|spec| (pos, spec))
        };

        match found {
            Some((pos, spec)) => {
                let spec = spec?;
                index.get_or_insert(spec);
                rest = &rest[..pos];
            }
            None => break,
        }
    }

    Ok((rest, index))
}

/// Parse `N`, `-N`, `!N` or `!-N`. Range forms are reported as unsupported;
/// anything else is not an index.
fn parse_index(text: &str, exclude_marker: char) -> Option<Result<IndexSpec, RuleError>> {
    let (exclude, number) = match text.strip_prefix(exclude_marker) {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    if is_range(number) {
        return Some(Err(RuleError::UnsupportedRange(text.to_string())));
    }

    let digits = number.strip_prefix('-').unwrap_or(number);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = number.parse().ok()?;
    Some(Ok(if exclude {
        IndexSpec::Exclude(value)
    } else {
        IndexSpec::At(value)
    }))
}

fn is_range(text: &str) -> bool {
    text.contains(':')
        && text.bytes().any(|b| b.is_ascii_digit())
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || b == b':' || b == b'-')
}

fn resolve_position(len: usize, index: i64) -> Option<usize> {
    if index >= 0 {
        let index = usize::try_from(index).ok()?;
        (index < len).then_some(index)
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

pub(crate) fn apply_index<T>(mut items: Vec<T>, spec: Option<IndexSpec>) -> Vec<T> {
    match spec {
        None => items,
        Some(IndexSpec::At(index)) => match resolve_position(items.len(), index) {
            Some(pos) => vec![items.swap_remove(pos)],
            None => Vec::new(),
        },
        Some(IndexSpec::Exclude(index)) => {
            if let Some(pos) = resolve_position(items.len(), index) {
                items.remove(pos);
            }
            items
        }
    }
}

/// Run a cascade of structural steps. An empty intermediate set ends the
/// cascade early.
pub(crate) fn select<'a>(
    root: ElementRef<'a>,
    steps: &[&str],
) -> Result<Vec<ElementRef<'a>>, RuleError> {
    let mut current = vec![root];
    for raw in steps {
        let step = Step::parse(raw)?;
        current = step.apply(&current);
        if current.is_empty() {
            break;
        }
    }
    Ok(current)
}

/// Resolve the final step of a text rule against `elements`.
pub(crate) fn extract_leaf(
    elements: &[ElementRef<'_>],
    leaf: &str,
    base_url: &str,
) -> Result<Vec<String>, RuleError> {
    let values: Vec<String> = match leaf {
        "text" => elements.iter().map(|e| full_text(*e)).collect(),
        "ownText" => elements.iter().map(|e| own_text(*e)).collect(),
        "textNodes" => elements.iter().map(|e| text_nodes(*e)).collect(),
        "html" | "all" => elements.iter().map(|e| e.html()).collect(),
        _ if is_attribute_name(leaf) && elements.iter().any(|e| e.value().attr(leaf).is_some()) => {
            elements
                .iter()
                .filter_map(|e| e.value().attr(leaf))
                .map(|value| match leaf {
                    "href" | "src" => absolute_url(base_url, value),
                    _ => value.to_string(),
                })
                .collect()
        }
        _ => {
            let step = Step::parse(leaf)?;
            step.apply(elements)
                .into_iter()
                .next()
                .map(full_text)
                .into_iter()
                .collect()
        }
    };

    Ok(values.into_iter().filter(|v| !v.is_empty()).collect())
}

fn is_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

/// Element text with whitespace runs collapsed.
/// Block-level tags that separate words when flattened to text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "footer",
    "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav", "ol", "p", "pre",
    "section", "table", "td", "th", "tr", "ul",
];

/// All descendant text, with block boundaries read as whitespace.
pub(crate) fn full_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    push_text(element, &mut text);
    collapse_whitespace(&text)
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let block = BLOCK_TAGS.contains(&child.value().name());
            if block {
                out.push(' ');
            }
            push_text(child, out);
            if block {
                out.push(' ');
            }
        }
    }
}

/// Text of direct text children only.
pub(crate) fn own_text(element: ElementRef<'_>) -> String {
    let joined: String = element
        .children()
        .filter_map(|child| child.value().as_text().map(|text| text.to_string()))
        .collect();
    collapse_whitespace(&joined)
}

fn text_nodes(element: ElementRef<'_>) -> String {
    element
        .children()
        .filter_map(|child| child.value().as_text().map(|text| text.trim().to_string()))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

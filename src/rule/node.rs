use scraper::{ElementRef, Html};

/// Serialized element: outer markup plus the element's tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub html: String,
    pub tag: String,
}

/// Subject of an extraction.
///
/// Markup and path nodes are stored serialized so node lists are owned,
/// `Send`, and can outlive the document they were selected from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Element produced by a structural selection.
    Markup(Fragment),
    /// Element produced by an XPath evaluation.
    Path(Fragment),
    /// Raw string: fetched content, script output, attribute or JSON value.
    Text(String),
}

impl Node {
    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    pub(crate) fn markup(element: ElementRef<'_>) -> Self {
        Node::Markup(Fragment::of(element))
    }

    pub(crate) fn path(element: ElementRef<'_>) -> Self {
        Node::Path(Fragment::of(element))
    }

    /// Serialized form handed to scripts and regex affixes.
    pub fn source(&self) -> &str {
        match self {
            Node::Markup(fragment) | Node::Path(fragment) => &fragment.html,
            Node::Text(text) => text,
        }
    }

    /// Same kind of node with different serialized content.
    pub(crate) fn with_source(&self, source: String) -> Node {
        match self {
            Node::Markup(fragment) => Node::Markup(Fragment {
                html: source,
                tag: fragment.tag.clone(),
            }),
            Node::Path(fragment) => Node::Path(Fragment {
                html: source,
                tag: fragment.tag.clone(),
            }),
            Node::Text(_) => Node::Text(source),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source().trim().is_empty()
    }
}

impl Fragment {
    fn of(element: ElementRef<'_>) -> Self {
        Self {
            html: element.html(),
            tag: element.value().name().to_string(),
        }
    }

    /// Markup that survives fragment parsing in a `<body>` context.
    ///
    /// Table parts and options are dropped by the HTML parser unless they
    /// appear inside their required parent.
    fn wrapped(&self) -> String {
        match self.tag.as_str() {
            "tr" => format!("<table><tbody>{}</tbody></table>", self.html),
            "td" | "th" => format!("<table><tbody><tr>{}</tr></tbody></table>", self.html),
            "thead" | "tbody" | "tfoot" | "caption" | "colgroup" => {
                format!("<table>{}</table>", self.html)
            }
            "col" => format!("<table><colgroup>{}</colgroup></table>", self.html),
            "option" | "optgroup" => format!("<select>{}</select>", self.html),
            _ => self.html.clone(),
        }
    }

    fn is_document_level(&self) -> bool {
        matches!(self.tag.as_str(), "html" | "head" | "body")
    }
}

/// A node parsed back into a tree for selection.
pub(crate) struct Parsed {
    html: Html,
    tag: Option<String>,
}

impl Parsed {
    pub fn new(node: &Node) -> Self {
        match node {
            Node::Text(text) => Self {
                html: Html::parse_document(text),
                tag: None,
            },
            Node::Markup(fragment) | Node::Path(fragment) if fragment.is_document_level() => Self {
                html: Html::parse_document(&fragment.html),
                tag: Some(fragment.tag.clone()),
            },
            Node::Markup(fragment) | Node::Path(fragment) => Self {
                html: Html::parse_fragment(&fragment.wrapped()),
                tag: Some(fragment.tag.clone()),
            },
        }
    }

    /// Element standing for the original node.
    pub fn root(&self) -> Option<ElementRef<'_>> {
        let root = self.html.root_element();
        let Some(tag) = self.tag.as_deref() else {
            return Some(root);
        };
        if tag == "html" {
            return Some(root);
        }
        root.descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .find(|element| element.value().name() == tag)
    }
}

//! The node graph and style graph of an output document.
//!
//! Nodes and styles refer to each other by id; internally node class lists
//! hold class *names* and are resolved to style ids only when the document
//! is written out (see [`wire`]).

pub mod builder;
pub mod ids;
pub mod index;
pub mod wire;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

pub use builder::{BuildOutput, GraphBuilder};
pub use ids::{IdGenerator, is_uuid_v4};
pub use index::GraphIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    External,
    Page,
    Section,
    Email,
    Phone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkData {
    pub mode: LinkMode,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Block,
    Section,
    Heading,
    Paragraph,
    Link(LinkData),
    HtmlEmbed { html: String },
    Text { text: String },
}

impl NodeKind {
    /// Value of the `type` field on the wire; text leaves have none.
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeKind::Block => "Block",
            NodeKind::Section => "Section",
            NodeKind::Heading => "Heading",
            NodeKind::Paragraph => "Paragraph",
            NodeKind::Link(_) => "Link",
            NodeKind::HtmlEmbed { .. } => "HtmlEmbed",
            NodeKind::Text { .. } => "Text",
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeKind::Text { .. })
    }

    pub fn embed_html(&self) -> Option<&str> {
        match self {
            NodeKind::HtmlEmbed { html } => Some(html),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub tag: String,
    /// Class names, in the order they apply.
    pub classes: Vec<String>,
    pub children: Vec<String>,
    /// Element attributes carried to the builder as `xattr`.
    pub attributes: Vec<(String, String)>,
}

impl GraphNode {
    pub fn new(id: String, kind: NodeKind, tag: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            tag: tag.into(),
            classes: Vec::new(),
            children: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn text(id: String, text: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Text { text: text.into() }, "")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStyle {
    pub id: String,
    pub name: String,
    pub style_less: String,
    /// Variant key to declaration string.
    pub variants: BTreeMap<String, String>,
}

/// Counters the builder reports alongside the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMeta {
    pub unlinked_symbol_count: usize,
    pub dropped_links: usize,
    pub dyn_bind_removed_count: usize,
    pub dyn_list_bind_removed_count: usize,
    pub pagination_removed_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub styles: Vec<GraphStyle>,
    pub meta: DocumentMeta,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn style_named(&self, name: &str) -> Option<&GraphStyle> {
        self.styles.iter().find(|style| style.name == name)
    }

    /// Ids of nodes no other node lists as a child, in document order.
    pub fn roots(&self) -> Vec<&str> {
        let children: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|node| node.children.iter().map(String::as_str))
            .collect();
        self.nodes
            .iter()
            .filter(|node| !children.contains(node.id.as_str()))
            .map(|node| node.id.as_str())
            .collect()
    }

    /// `(node id, html)` for every raw-markup node.
    pub fn embeds(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes
            .iter()
            .filter_map(|node| node.kind.embed_html().map(|html| (node.id.as_str(), html)))
    }
}

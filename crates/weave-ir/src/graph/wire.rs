//! The `XscpData` clipboard document the builder imports.
//!
//! Class references are written as style ids. Resolution is an explicit two
//! pass step: collect the name-to-id table from the styles, then rewrite
//! every node's class list through it (and the reverse when reading).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DocumentMeta, Graph, GraphNode, GraphStyle, LinkData, NodeKind};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XscpData {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Payload,
    #[serde(default)]
    pub meta: DocumentMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub nodes: Vec<WireNode>,
    pub styles: Vec<WireStyle>,
    #[serde(default)]
    pub assets: Vec<Value>,
    #[serde(default)]
    pub ix1: Vec<Value>,
    #[serde(default)]
    pub ix2: Interactions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interactions {
    #[serde(default)]
    pub interactions: Vec<Value>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default, rename = "actionLists")]
    pub action_lists: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireNode {
    Text(WireText),
    Element(WireElement),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireText {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: bool,
    pub v: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireElement {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub data: WireNodeData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireNodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub xattr: Vec<XAttr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<WireEmbed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XAttr {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEmbed {
    #[serde(rename = "type")]
    pub kind: String,
    pub meta: EmbedMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedMeta {
    pub html: String,
    #[serde(default)]
    pub div: bool,
    #[serde(default)]
    pub script: bool,
    #[serde(default)]
    pub compilable: bool,
    #[serde(default)]
    pub iframe: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireStyle {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub fake: bool,
    #[serde(rename = "type", default = "class_type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub comb: String,
    #[serde(rename = "styleLess", default)]
    pub style_less: String,
    #[serde(default)]
    pub variants: BTreeMap<String, WireVariant>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

fn class_type() -> String {
    "class".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireVariant {
    #[serde(rename = "styleLess")]
    pub style_less: String,
}

impl XscpData {
    /// Lower a graph to the wire shape, resolving class names to style ids.
    pub fn from_graph(graph: &Graph, document_type: &str) -> Self {
        let mut ids_by_name: HashMap<&str, &str> = HashMap::new();
        for style in &graph.styles {
            ids_by_name.entry(style.name.as_str()).or_insert(style.id.as_str());
        }
        let nodes = graph
            .nodes
            .iter()
            .map(|node| lower_node(node, &ids_by_name))
            .collect();
        let styles = graph.styles.iter().map(lower_style).collect();
        Self {
            kind: document_type.to_string(),
            payload: Payload {
                nodes,
                styles,
                assets: Vec::new(),
                ix1: Vec::new(),
                ix2: Interactions::default(),
            },
            meta: graph.meta.clone(),
        }
    }

    /// Lift a wire document back into a graph, resolving style ids to names.
    ///
    /// Ids that name no style are kept verbatim so validation can flag them.
    pub fn into_graph(self) -> Graph {
        let mut names_by_id: HashMap<String, String> = HashMap::new();
        for style in &self.payload.styles {
            names_by_id
                .entry(style.id.clone())
                .or_insert_with(|| style.name.clone());
        }
        let nodes = self
            .payload
            .nodes
            .into_iter()
            .map(|node| lift_node(node, &names_by_id))
            .collect();
        let styles = self.payload.styles.into_iter().map(lift_style).collect();
        Graph {
            nodes,
            styles,
            meta: self.meta,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

fn lower_node(node: &GraphNode, ids_by_name: &HashMap<&str, &str>) -> WireNode {
    if let NodeKind::Text { text } = &node.kind {
        return WireNode::Text(WireText {
            id: node.id.clone(),
            text: true,
            v: text.clone(),
        });
    }
    let classes = node
        .classes
        .iter()
        .map(|name| {
            ids_by_name
                .get(name.as_str())
                .map(|id| id.to_string())
                .unwrap_or_else(|| name.clone())
        })
        .collect();
    let mut data = WireNodeData {
        tag: Some(node.tag.clone()),
        xattr: node
            .attributes
            .iter()
            .map(|(name, value)| XAttr {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
        ..WireNodeData::default()
    };
    match &node.kind {
        NodeKind::Link(link) => data.link = Some(link.clone()),
        NodeKind::HtmlEmbed { html } => {
            let lower = html.to_ascii_lowercase();
            data.embed = Some(WireEmbed {
                kind: "html".to_string(),
                meta: EmbedMeta {
                    html: html.clone(),
                    div: true,
                    script: lower.contains("<script"),
                    compilable: false,
                    iframe: lower.contains("<iframe"),
                },
            });
        }
        _ => {}
    }
    WireNode::Element(WireElement {
        id: node.id.clone(),
        kind: node.kind.type_name().to_string(),
        tag: node.tag.clone(),
        classes,
        children: node.children.clone(),
        data,
    })
}

fn lower_style(style: &GraphStyle) -> WireStyle {
    WireStyle {
        id: style.id.clone(),
        fake: false,
        kind: class_type(),
        name: style.name.clone(),
        namespace: String::new(),
        comb: String::new(),
        style_less: style.style_less.clone(),
        variants: style
            .variants
            .iter()
            .map(|(key, style_less)| {
                (
                    key.clone(),
                    WireVariant {
                        style_less: style_less.clone(),
                    },
                )
            })
            .collect(),
        children: Vec::new(),
        selector: None,
    }
}

fn lift_node(node: WireNode, names_by_id: &HashMap<String, String>) -> GraphNode {
    match node {
        WireNode::Text(text) => GraphNode::text(text.id, text.v),
        WireNode::Element(element) => {
            let kind = match element.kind.as_str() {
                "Section" => NodeKind::Section,
                "Heading" => NodeKind::Heading,
                "Paragraph" => NodeKind::Paragraph,
                "Link" => match element.data.link.clone() {
                    Some(link) => NodeKind::Link(link),
                    None => NodeKind::Block,
                },
                "HtmlEmbed" => NodeKind::HtmlEmbed {
                    html: element
                        .data
                        .embed
                        .as_ref()
                        .map(|embed| embed.meta.html.clone())
                        .unwrap_or_default(),
                },
                _ => NodeKind::Block,
            };
            GraphNode {
                id: element.id,
                kind,
                tag: element.tag,
                classes: element
                    .classes
                    .into_iter()
                    .map(|id| names_by_id.get(&id).cloned().unwrap_or(id))
                    .collect(),
                children: element.children,
                attributes: element
                    .data
                    .xattr
                    .into_iter()
                    .map(|attr| (attr.name, attr.value))
                    .collect(),
            }
        }
    }
}

fn lift_style(style: WireStyle) -> GraphStyle {
    GraphStyle {
        id: style.id,
        name: style.name,
        style_less: style.style_less,
        variants: style
            .variants
            .into_iter()
            .map(|(key, variant)| (key, variant.style_less))
            .collect(),
    }
}

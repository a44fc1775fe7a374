//! Element tree plus class index in, node graph plus style graph out.

use std::collections::HashSet;

use tracing::{debug, warn};
use url::Url;

use super::{DocumentMeta, Graph, GraphNode, GraphStyle, IdGenerator, LinkData, LinkMode, NodeKind};
use crate::css::index::ClassIndex;
use crate::css::parser::declarations_to_css;
use crate::diagnostics::diagnostics_enabled;
use crate::html::{ParsedElement, ParsedNode};

/// Elements the builder cannot model natively and keeps as raw markup.
const OPAQUE_ELEMENTS: &[&str] = &[
    "img", "svg", "video", "audio", "iframe", "input", "textarea", "select", "button", "form",
    "table", "canvas", "picture", "object", "embed", "math",
];

const SECTION_ELEMENTS: &[&str] = &["section", "header", "footer", "nav", "main", "article", "aside"];

/// Builder output: the graph plus the CSS that stays outside it.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub graph: Graph,
    pub embed_css: String,
}

pub struct GraphBuilder<'a> {
    ids: &'a mut IdGenerator,
    nodes: Vec<GraphNode>,
    referenced: Vec<String>,
    meta: DocumentMeta,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(ids: &'a mut IdGenerator) -> Self {
        Self {
            ids,
            nodes: Vec::new(),
            referenced: Vec::new(),
            meta: DocumentMeta::default(),
        }
    }

    pub fn build(mut self, tree: &[ParsedNode], index: &ClassIndex, embed_css: String) -> BuildOutput {
        for node in tree {
            self.add_node(node);
        }
        let styles = self.build_styles(index);
        if diagnostics_enabled("graph") {
            debug!(
                nodes = self.nodes.len(),
                styles = styles.len(),
                "diagnostics: graph built"
            );
        }
        BuildOutput {
            graph: Graph {
                nodes: self.nodes,
                styles,
                meta: self.meta,
            },
            embed_css,
        }
    }

    /// Emit `root` and its subtree in pre-order, with an explicit stack.
    fn add_node(&mut self, root: &ParsedNode) {
        let mut stack: Vec<(&ParsedNode, Option<usize>)> = vec![(root, None)];
        while let Some((node, parent)) = stack.pop() {
            let id = self.ids.next_id();
            let position = self.nodes.len();
            match node {
                ParsedNode::Text { text } => {
                    self.nodes.push(GraphNode::text(id.clone(), text.clone()));
                }
                ParsedNode::Markup { html } => {
                    let kind = NodeKind::HtmlEmbed { html: html.clone() };
                    self.nodes.push(GraphNode::new(id.clone(), kind, "div".to_string()));
                }
                ParsedNode::Element(element) => {
                    let kind = self.kind_for(element);
                    let opaque = matches!(kind, NodeKind::HtmlEmbed { .. });
                    let tag = match &kind {
                        NodeKind::Block if element.tag == "a" => "div".to_string(),
                        NodeKind::HtmlEmbed { .. } => "div".to_string(),
                        _ => element.tag.clone(),
                    };
                    let mut graph_node = GraphNode::new(id.clone(), kind, tag);
                    if !opaque {
                        graph_node.classes = element.classes.clone();
                        graph_node.attributes = element
                            .attributes
                            .iter()
                            .filter(|(name, _)| !is_link_attribute(&element.tag, name))
                            .cloned()
                            .collect();
                        for class in &element.classes {
                            if !self.referenced.contains(class) {
                                self.referenced.push(class.clone());
                            }
                        }
                        stack.extend(element.children.iter().rev().map(|child| (child, Some(position))));
                    }
                    self.nodes.push(graph_node);
                }
            }
            if let Some(parent) = parent {
                self.nodes[parent].children.push(id);
            }
        }
    }

    fn kind_for(&mut self, element: &ParsedElement) -> NodeKind {
        let tag = element.tag.as_str();
        if OPAQUE_ELEMENTS.contains(&tag) {
            return NodeKind::HtmlEmbed {
                html: element.to_html(),
            };
        }
        if SECTION_ELEMENTS.contains(&tag) {
            return NodeKind::Section;
        }
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => NodeKind::Heading,
            "p" => NodeKind::Paragraph,
            "a" => match element.attr("href") {
                Some(href) => match classify_link(href, element.attr("target")) {
                    Some(link) => NodeKind::Link(link),
                    None => {
                        warn!(href = %href, "dropped script link");
                        self.meta.dropped_links += 1;
                        NodeKind::Block
                    }
                },
                None => NodeKind::Block,
            },
            _ => NodeKind::Block,
        }
    }

    /// One style per indexed class, then empty styles for classes that are
    /// used in markup but never styled.
    fn build_styles(&mut self, index: &ClassIndex) -> Vec<GraphStyle> {
        let mut styles = Vec::with_capacity(index.len());
        let mut seen = HashSet::new();
        for entry in index.entries() {
            seen.insert(entry.name.clone());
            styles.push(GraphStyle {
                id: self.ids.next_id(),
                name: entry.name.clone(),
                style_less: declarations_to_css(&entry.base),
                variants: entry
                    .variants
                    .iter()
                    .map(|(key, declarations)| (key.clone(), declarations_to_css(declarations)))
                    .collect(),
            });
        }
        for class in std::mem::take(&mut self.referenced) {
            if seen.insert(class.clone()) {
                styles.push(GraphStyle {
                    id: self.ids.next_id(),
                    name: class,
                    style_less: String::new(),
                    variants: Default::default(),
                });
            }
        }
        styles
    }
}

fn is_link_attribute(tag: &str, name: &str) -> bool {
    tag == "a" && matches!(name, "href" | "target")
}

/// Structured link data for an `href`, or `None` for script URLs.
pub fn classify_link(href: &str, target: Option<&str>) -> Option<LinkData> {
    let url = href.trim();
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.starts_with("javascript:") || compact.starts_with("vbscript:") {
        return None;
    }
    let mode = if compact.starts_with("mailto:") {
        LinkMode::Email
    } else if compact.starts_with("tel:") {
        LinkMode::Phone
    } else if url.starts_with('#') {
        LinkMode::Section
    } else if url.starts_with("//") || Url::parse(url).is_ok() {
        LinkMode::External
    } else {
        LinkMode::Page
    };
    Some(LinkData {
        mode,
        url: url.to_string(),
        target: target.map(str::to_string).filter(|t| !t.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::index::ClassIndex;
    use crate::css::parser::Declaration;

    fn element(tag: &str, classes: &[&str], children: Vec<ParsedNode>) -> ParsedNode {
        let mut el = ParsedElement::new(tag);
        el.classes = classes.iter().map(|c| c.to_string()).collect();
        el.children = children;
        ParsedNode::Element(el)
    }

    fn text(t: &str) -> ParsedNode {
        ParsedNode::Text { text: t.to_string() }
    }

    #[test]
    fn maps_tags_to_node_kinds() {
        let mut ids = IdGenerator::seeded(3);
        let mut link = ParsedElement::new("a");
        link.attributes.push(("href".into(), "https://example.com".into()));
        link.attributes.push(("target".into(), "_blank".into()));
        link.attributes.push(("rel".into(), "noopener".into()));
        let tree = vec![element(
            "section",
            &["hero"],
            vec![
                element("h2", &[], vec![text("Title")]),
                element("p", &[], vec![text("Body")]),
                ParsedNode::Element(link),
                element("img", &["pic"], vec![]),
                element("br", &[], vec![]),
            ],
        )];
        let out = GraphBuilder::new(&mut ids).build(&tree, &ClassIndex::default(), String::new());
        let kinds: Vec<&str> = out.graph.nodes.iter().map(|n| n.kind.type_name()).collect();
        assert_eq!(
            kinds,
            vec!["Section", "Heading", "Text", "Paragraph", "Text", "Link", "HtmlEmbed", "Block"]
        );
        let link = &out.graph.nodes[5];
        assert_eq!(
            link.kind,
            NodeKind::Link(LinkData {
                mode: LinkMode::External,
                url: "https://example.com".into(),
                target: Some("_blank".into()),
            })
        );
        assert_eq!(link.attributes, vec![("rel".to_string(), "noopener".to_string())]);
        assert_eq!(out.graph.nodes[6].kind.embed_html(), Some("<img class=\"pic\">"));
        assert_eq!(out.graph.nodes[0].children.len(), 5);
    }

    #[test]
    fn script_links_are_dropped_and_counted() {
        let mut ids = IdGenerator::seeded(4);
        let mut link = ParsedElement::new("a");
        link.attributes.push(("href".into(), " JaVaScript:alert(1)".into()));
        link.children.push(text("x"));
        let out = GraphBuilder::new(&mut ids).build(
            &[ParsedNode::Element(link)],
            &ClassIndex::default(),
            String::new(),
        );
        assert_eq!(out.graph.meta.dropped_links, 1);
        assert_eq!(out.graph.nodes[0].kind, NodeKind::Block);
        assert_eq!(out.graph.nodes[0].children.len(), 1);
    }

    #[test]
    fn styles_cover_index_and_unstyled_classes() {
        let mut ids = IdGenerator::seeded(5);
        let mut index = ClassIndex::default();
        index.insert("card", None, &[Declaration::new("padding", "8px")]);
        index.insert("card", Some("medium"), &[Declaration::new("padding", "4px")]);
        let tree = vec![element("div", &["card", "plain"], vec![])];
        let out = GraphBuilder::new(&mut ids).build(&tree, &index, ".x{}".into());
        let styles = &out.graph.styles;
        assert_eq!(styles.len(), 2);
        assert_eq!(styles[0].name, "card");
        assert_eq!(styles[0].style_less, "padding: 8px;");
        assert_eq!(styles[0].variants.get("medium").map(String::as_str), Some("padding: 4px;"));
        assert_eq!(styles[1].name, "plain");
        assert!(styles[1].style_less.is_empty());
        assert_eq!(out.embed_css, ".x{}");
    }

    #[test]
    fn deep_trees_and_raw_markup_build_without_recursion() {
        let mut ids = IdGenerator::seeded(6);
        let mut node = ParsedNode::Markup {
            html: "<div><div>x</div></div>".into(),
        };
        for _ in 0..5_000 {
            node = element("div", &[], vec![node]);
        }
        let out = GraphBuilder::new(&mut ids).build(std::slice::from_ref(&node), &ClassIndex::default(), String::new());
        assert_eq!(out.graph.nodes.len(), 5_001);
        let last = out.graph.nodes.last().unwrap();
        assert_eq!(last.kind.embed_html(), Some("<div><div>x</div></div>"));
        assert_eq!(last.tag, "div");
        for pair in out.graph.nodes.windows(2) {
            assert_eq!(pair[0].children, vec![pair[1].id.clone()]);
        }
        // Drop the nested test tree one level at a time.
        while let ParsedNode::Element(mut el) = node {
            node = el.children.pop().unwrap_or(ParsedNode::Text { text: String::new() });
        }
    }

    #[test]
    fn link_modes() {
        let mode = |href: &str| classify_link(href, None).map(|l| l.mode);
        assert_eq!(mode("mailto:a@b.c"), Some(LinkMode::Email));
        assert_eq!(mode("tel:+1555"), Some(LinkMode::Phone));
        assert_eq!(mode("#pricing"), Some(LinkMode::Section));
        assert_eq!(mode("/about"), Some(LinkMode::Page));
        assert_eq!(mode("//cdn.example.com/x"), Some(LinkMode::External));
        assert_eq!(mode("java\tscript:void(0)"), None);
    }
}

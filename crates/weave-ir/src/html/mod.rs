//! Markup normalizer: HTML in, a canonical element tree out.
//!
//! Parsing goes through `scraper` (html5ever), so tag soup is repaired the
//! way a browser would. Stylesheets, scripts and other non-visual markup are
//! harvested into side artifacts, tag/descendant selectors are promoted
//! into classes and inline `style=""` attributes become classes of their own.

pub mod fragment;
pub mod promote;

use std::collections::HashMap;
use std::ops::Deref;

use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::css::parser::{CssRule, ParsedStylesheet, RuleKind, parse_declarations, parse_stylesheet};
use crate::diagnostics::diagnostics_enabled;
use crate::error::ParseError;
use crate::profile::TargetProfile;

pub use fragment::{VOID_ELEMENTS, escape_attr, escape_text, is_void};
pub use promote::Promotion;

/// Elements harvested into side artifacts or dropped from the tree.
const NON_VISUAL: &[&str] = &[
    "head", "title", "meta", "base", "style", "script", "link", "noscript", "template",
];

/// Elements whose whitespace is significant.
const PREFORMATTED: &[&str] = &["pre", "textarea", "code"];

/// Element nesting kept as a tree; anything deeper is carried as raw markup.
pub const MAX_TREE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedNode {
    Element(ParsedElement),
    Text { text: String },
    /// A subtree nested past [`MAX_TREE_DEPTH`], serialized as parsed.
    Markup { html: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedElement {
    pub tag: String,
    pub classes: Vec<String>,
    /// Attributes in document order, without `class` and `style`.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<ParsedNode>,
}

impl ParsedElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            classes: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Serialize the element and its subtree as HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_element(&mut out, self);
        out
    }
}

enum Step<'a> {
    Node(&'a ParsedNode),
    Open(&'a ParsedElement),
    Close(&'a str),
}

fn write_element(out: &mut String, root: &ParsedElement) {
    let mut stack = vec![Step::Open(root)];
    while let Some(step) = stack.pop() {
        let element = match step {
            Step::Node(ParsedNode::Element(element)) | Step::Open(element) => element,
            Step::Node(ParsedNode::Text { text }) => {
                out.push_str(&escape_text(text));
                continue;
            }
            Step::Node(ParsedNode::Markup { html }) => {
                out.push_str(html);
                continue;
            }
            Step::Close(tag) => {
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
                continue;
            }
        };
        out.push('<');
        out.push_str(&element.tag);
        if !element.classes.is_empty() {
            out.push_str(" class=\"");
            out.push_str(&escape_attr(&element.classes.join(" ")));
            out.push('"');
        }
        for (name, value) in &element.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
        if is_void(&element.tag) {
            continue;
        }
        stack.push(Step::Close(&element.tag));
        stack.extend(element.children.iter().rev().map(Step::Node));
    }
}

/// Output of [`normalize`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedMarkup {
    /// Children of `<body>`.
    pub nodes: Vec<ParsedNode>,
    /// Caller CSS plus harvested `<style>` blocks, with promoted selectors
    /// rewritten and inline styles appended as rules.
    pub stylesheet: ParsedStylesheet,
    pub promotions: Vec<Promotion>,
    pub js_embed: String,
    pub html_embed: String,
}

/// Parse markup and stylesheet together and produce the canonical tree.
pub fn normalize(html: &str, css: &str, profile: &TargetProfile) -> Result<NormalizedMarkup, ParseError> {
    let document = Html::parse_document(html);
    for error in document.errors.iter().take(8) {
        if diagnostics_enabled("html") {
            debug!(error = %error, "diagnostics: html parse recovery");
        }
    }
    let harvest = harvest_non_visual(&document);
    let mut combined_css = css.to_string();
    for block in &harvest.styles {
        if !combined_css.is_empty() && !combined_css.ends_with('\n') {
            combined_css.push('\n');
        }
        combined_css.push_str(block);
    }
    let mut stylesheet = parse_stylesheet(&combined_css)?;

    let existing = collect_class_names(&document);
    let mut namer = promote::ClassNamer::new(existing);
    let (assigned, promotions) =
        promote::promote_selectors(&document, &mut stylesheet, profile, &mut namer);
    for promotion in &promotions {
        info!(
            selector = %promotion.selector,
            class = %promotion.class,
            matched = promotion.matched,
            "promoted selector to class"
        );
    }

    let mut state = TreeState {
        assigned: &assigned,
        profile,
        namer: &mut namer,
        inline_rules: Vec::new(),
        inline_counter: 0,
    };
    let nodes = match find_body(&document) {
        Some(body) => state.convert_body(body),
        None => Vec::new(),
    };
    let mut order = stylesheet.rules.len();
    for (class, body) in std::mem::take(&mut state.inline_rules) {
        stylesheet.rules.push(CssRule {
            selector: format!(".{class}"),
            declarations: parse_declarations(&body),
            kind: RuleKind::Style,
            media: None,
            raw: None,
            order,
        });
        order += 1;
    }

    Ok(NormalizedMarkup {
        nodes,
        stylesheet,
        promotions,
        js_embed: harvest.scripts.join("\n"),
        html_embed: harvest.markup.join("\n"),
    })
}

#[derive(Default)]
struct Harvest {
    styles: Vec<String>,
    scripts: Vec<String>,
    markup: Vec<String>,
}

fn harvest_non_visual(document: &Html) -> Harvest {
    let mut harvest = Harvest::default();
    let Ok(selector) = Selector::parse("style, script, link, noscript, template") else {
        return harvest;
    };
    for element in document.select(&selector) {
        if element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| matches!(ancestor.value().name(), "noscript" | "template"))
        {
            continue;
        }
        let el = element.value();
        match el.name() {
            "style" => harvest.styles.push(element.text().collect()),
            "script" => {
                let ty = el.attr("type").map(|v| v.trim().to_ascii_lowercase());
                let inline = el.attr("src").is_none_or(|src| src.trim().is_empty());
                if inline && !matches!(ty.as_deref(), Some(t) if t.contains("json")) {
                    let code: String = element.text().collect();
                    if !code.trim().is_empty() {
                        harvest.scripts.push(code);
                    }
                } else {
                    harvest.markup.push(element.html());
                }
            }
            "link" => {
                let stylesheet = el
                    .attr("rel")
                    .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")));
                if stylesheet {
                    harvest.markup.push(element.html());
                }
            }
            _ => harvest.markup.push(element.html()),
        }
    }
    harvest
}

fn collect_class_names(document: &Html) -> Vec<String> {
    document
        .tree
        .nodes()
        .filter_map(|node| match node.value() {
            Node::Element(el) => Some(el.classes().map(str::to_string).collect::<Vec<_>>()),
            _ => None,
        })
        .flatten()
        .collect()
}

fn find_body(document: &Html) -> Option<NodeRef<'_, Node>> {
    let selector = Selector::parse("body").ok()?;
    document.select(&selector).next().map(|el| *el)
}

struct TreeState<'a> {
    assigned: &'a HashMap<NodeId, Vec<String>>,
    profile: &'a TargetProfile,
    namer: &'a mut promote::ClassNamer,
    inline_rules: Vec<(String, String)>,
    inline_counter: usize,
}

/// An element still collecting children during [`TreeState::convert_body`].
struct OpenElement {
    id: NodeId,
    element: ParsedElement,
    preformatted: bool,
}

impl TreeState<'_> {
    /// Convert the children of `<body>` with an explicit stack. Subtrees
    /// nested past [`MAX_TREE_DEPTH`] become [`ParsedNode::Markup`].
    fn convert_body(&mut self, body: NodeRef<'_, Node>) -> Vec<ParsedNode> {
        let mut roots = Vec::new();
        let mut open: Vec<OpenElement> = Vec::new();
        let mut skipping: Option<NodeId> = None;
        let mut deep = 0usize;
        for edge in body.traverse() {
            match edge {
                Edge::Open(node) if node.id() == body.id() => {}
                Edge::Close(node) if node.id() == body.id() => {}
                Edge::Open(_) if skipping.is_some() => {}
                Edge::Close(node) if skipping.is_some() => {
                    if skipping == Some(node.id()) {
                        skipping = None;
                    }
                }
                Edge::Open(node) => {
                    let preformatted = open.last().is_some_and(|parent| parent.preformatted);
                    let converted = match node.value() {
                        Node::Element(el) if NON_VISUAL.contains(&el.name()) => {
                            skipping = Some(node.id());
                            None
                        }
                        Node::Element(_) if open.len() >= MAX_TREE_DEPTH => {
                            skipping = Some(node.id());
                            deep += 1;
                            ElementRef::wrap(node).map(|el| ParsedNode::Markup { html: el.html() })
                        }
                        Node::Element(_) => {
                            let element = self.convert_element(node);
                            let preformatted = preformatted || PREFORMATTED.contains(&element.tag.as_str());
                            open.push(OpenElement {
                                id: node.id(),
                                element,
                                preformatted,
                            });
                            None
                        }
                        Node::Text(text) => convert_text(text.deref(), preformatted),
                        _ => None,
                    };
                    if let Some(converted) = converted {
                        attach(&mut open, &mut roots, converted);
                    }
                }
                Edge::Close(node) => {
                    if open.last().is_some_and(|top| top.id == node.id()) {
                        if let Some(done) = open.pop() {
                            attach(&mut open, &mut roots, ParsedNode::Element(done.element));
                        }
                    }
                }
            }
        }
        if deep > 0 {
            warn!(subtrees = deep, max_depth = MAX_TREE_DEPTH, "kept deeply nested markup as raw html");
        }
        roots
    }

    /// Tag, classes and attributes of one element; children are filled in
    /// by the caller.
    fn convert_element(&mut self, node: NodeRef<'_, Node>) -> ParsedElement {
        let Node::Element(el) = node.value() else {
            return ParsedElement::new("div");
        };
        let mut element = ParsedElement::new(el.name().to_ascii_lowercase());
        for class in el.classes() {
            if !element.classes.iter().any(|c| c == class) {
                element.classes.push(class.to_string());
            }
        }
        if let Some(extra) = self.assigned.get(&node.id()) {
            for class in extra {
                if !element.classes.contains(class) {
                    element.classes.push(class.clone());
                }
            }
        }
        for (name, value) in el.attrs() {
            match name {
                "class" => {}
                "style" => {
                    if parse_declarations(value).is_empty() {
                        continue;
                    }
                    self.inline_counter += 1;
                    let base = format!("{}inline-{}", self.profile.synthesized_prefix, self.inline_counter);
                    let class = self.namer.claim(&base);
                    element.classes.push(class.clone());
                    self.inline_rules.push((class, value.to_string()));
                }
                _ => element.attributes.push((name.to_string(), value.to_string())),
            }
        }
        element
    }
}

fn attach(open: &mut [OpenElement], roots: &mut Vec<ParsedNode>, node: ParsedNode) {
    match open.last_mut() {
        Some(parent) => parent.element.children.push(node),
        None => roots.push(node),
    }
}

fn convert_text(raw: &str, preformatted: bool) -> Option<ParsedNode> {
    if preformatted {
        return Some(ParsedNode::Text { text: raw.to_string() });
    }
    if raw.trim().is_empty() {
        return None;
    }
    Some(ParsedNode::Text {
        text: collapse_whitespace(raw),
    })
}

fn collapse_whitespace(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut prev_was_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &ParsedNode) -> &ParsedElement {
        match node {
            ParsedNode::Element(el) => el,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn builds_tree_from_body() {
        let normalized = normalize(
            "<html><body><div class='hero  hero'>\n  <h1 id=t>Hi   there</h1>\n  <!-- c --></div></body></html>",
            "",
            &TargetProfile::default(),
        )
        .unwrap();
        assert_eq!(normalized.nodes.len(), 1);
        let div = element(&normalized.nodes[0]);
        assert_eq!(div.classes, vec!["hero"]);
        assert_eq!(div.children.len(), 1);
        let h1 = element(&div.children[0]);
        assert_eq!(h1.attr("id"), Some("t"));
        assert_eq!(h1.children, vec![ParsedNode::Text { text: "Hi there".into() }]);
    }

    #[test]
    fn harvests_styles_scripts_and_opaque_markup() {
        let normalized = normalize(
            "<head><style>.a{color:red}</style><link rel=stylesheet href=x.css></head><body><p class=a>x</p><script>init();</script><script src=lib.js></script><noscript><img src=p.gif></noscript></body>",
            ".b{margin:0}",
            &TargetProfile::default(),
        )
        .unwrap();
        assert_eq!(normalized.stylesheet.rules.len(), 2);
        assert_eq!(normalized.js_embed, "init();");
        assert!(normalized.html_embed.contains("x.css"));
        assert!(normalized.html_embed.contains("lib.js"));
        assert!(normalized.html_embed.contains("<noscript>"));
        assert_eq!(normalized.nodes.len(), 1);
    }

    #[test]
    fn promotes_tag_and_descendant_selectors() {
        let normalized = normalize(
            "<body><nav><a href='/'>Home</a></nav><a href='/x'>Out</a><h1>T</h1></body>",
            "nav a { color: red } nav a:hover { color: blue } h1 { margin: 0 } @media (max-width: 991px) { h1 { margin: 4px } } p { color: green }",
            &TargetProfile::default(),
        )
        .unwrap();
        let selectors: Vec<_> = normalized
            .stylesheet
            .rules
            .iter()
            .map(|r| r.selector.as_str())
            .collect();
        assert_eq!(
            selectors,
            vec![".el-nav-a", ".el-nav-a:hover", ".el-h1", ".el-h1", "p"]
        );
        let nav = element(&normalized.nodes[0]);
        assert_eq!(element(&nav.children[0]).classes, vec!["el-nav-a"]);
        assert!(element(&normalized.nodes[1]).classes.is_empty());
        assert_eq!(element(&normalized.nodes[2]).classes, vec!["el-h1"]);
        assert_eq!(normalized.promotions.len(), 2);
    }

    #[test]
    fn inline_styles_become_classes() {
        let normalized = normalize(
            "<body><div class='el-inline-1' style='color: red; padding: 2px'>x</div><span style=''>y</span></body>",
            "",
            &TargetProfile::default(),
        )
        .unwrap();
        let div = element(&normalized.nodes[0]);
        assert_eq!(div.classes, vec!["el-inline-1", "el-inline-1-2"]);
        assert!(div.attr("style").is_none());
        let rule = normalized.stylesheet.rules.last().unwrap();
        assert_eq!(rule.selector, ".el-inline-1-2");
        assert_eq!(rule.declarations.len(), 2);
        assert!(element(&normalized.nodes[1]).classes.is_empty());
    }

    #[test]
    fn deep_nesting_is_cut_into_raw_markup() {
        let depth = MAX_TREE_DEPTH + 40;
        let html = format!(
            "<body>{}<b onclick=\"x()\">deep</b>{}</body>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        let normalized = normalize(&html, "", &TargetProfile::default()).unwrap();
        let mut node = &normalized.nodes[0];
        let mut levels = 0;
        while let ParsedNode::Element(el) = node {
            levels += 1;
            assert_eq!(el.children.len(), 1);
            node = &el.children[0];
        }
        assert_eq!(levels, MAX_TREE_DEPTH);
        match node {
            ParsedNode::Markup { html } => {
                assert!(html.starts_with("<div><div>"));
                assert!(html.contains("deep</b>"));
            }
            other => panic!("expected raw markup, got {other:?}"),
        }
        let root = element(&normalized.nodes[0]);
        assert_eq!(root.to_html().matches("<div>").count(), depth);
    }

    #[test]
    fn serializes_elements_back_to_html() {
        let mut img = ParsedElement::new("img");
        img.attributes.push(("alt".into(), "a \"q\"".into()));
        let mut p = ParsedElement::new("p");
        p.classes.push("lead".into());
        p.children.push(ParsedNode::Text { text: "1 < 2".into() });
        p.children.push(ParsedNode::Element(img));
        assert_eq!(
            p.to_html(),
            "<p class=\"lead\">1 &lt; 2<img alt=\"a &quot;q&quot;\"></p>"
        );
    }
}

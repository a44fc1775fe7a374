//! Best-effort repair of a node/style graph.
//!
//! Repairs run in a fixed order, each one gated on the preflight finding it
//! answers. Every change is recorded as an [`AppliedFix`] and logged, and
//! running the pass over its own output changes nothing.

pub mod markup;

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::chunk::{ChunkKind, chunk};
use crate::css::parser::{Declaration, declarations_to_css, parse_declarations};
use crate::diagnostics::diagnostics_enabled;
use crate::graph::{Graph, GraphIndex, GraphNode, GraphStyle, IdGenerator, NodeKind};
use crate::html::fragment::{escape_attr, escape_text, is_void};
use crate::preflight::{IssueCode, ValidationIssue, has_code, state_base, used_classes, validate};
use crate::profile::{STATE_SUFFIX, TargetProfile};

pub use markup::{needs_sanitizing, sanitize_markup};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedFix {
    pub code: IssueCode,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct SanitizeOutcome {
    pub graph: Graph,
    pub fixes: Vec<AppliedFix>,
    /// Reserved class names and what they were renamed to.
    pub renames: BTreeMap<String, String>,
}

impl SanitizeOutcome {
    pub fn changed(&self) -> bool {
        !self.fixes.is_empty()
    }
}

/// Validate `graph` and repair whatever the findings allow.
pub fn sanitize(graph: &Graph, profile: &TargetProfile, ids: &mut IdGenerator) -> SanitizeOutcome {
    let issues = validate(graph, &[], profile);
    Sanitizer::new(profile, ids).run(graph, &issues)
}

pub struct Sanitizer<'a> {
    profile: &'a TargetProfile,
    ids: &'a mut IdGenerator,
    fixes: Vec<AppliedFix>,
}

impl<'a> Sanitizer<'a> {
    pub fn new(profile: &'a TargetProfile, ids: &'a mut IdGenerator) -> Self {
        Self {
            profile,
            ids,
            fixes: Vec::new(),
        }
    }

    pub fn run(mut self, graph: &Graph, issues: &[ValidationIssue]) -> SanitizeOutcome {
        let mut graph = graph.clone();
        let mut renames = BTreeMap::new();
        let wants = |codes: &[IssueCode]| codes.iter().any(|code| has_code(issues, *code));

        if wants(&[IssueCode::DuplicateNodeId, IssueCode::DuplicateStyleId, IssueCode::IdCollision]) {
            self.dedupe_ids(&mut graph);
        }
        if wants(&[IssueCode::DuplicateStyleName]) {
            self.merge_duplicate_styles(&mut graph);
        }
        if wants(&[IssueCode::OrphanedState, IssueCode::IllegalVariant]) {
            self.drop_orphaned_states(&mut graph);
        }
        if wants(&[IssueCode::OrphanChildRef, IssueCode::DanglingClassRef, IssueCode::OrphanedState]) {
            self.drop_dangling_references(&mut graph);
        }
        if wants(&[IssueCode::Cycle, IssueCode::MultipleParents]) {
            self.break_cycles(&mut graph);
        }
        if wants(&[IssueCode::ReservedClassName]) {
            renames = self.rename_reserved(&mut graph);
        }
        if wants(&[IssueCode::DepthExceeded]) {
            self.collapse_deep_subtrees(&mut graph);
        }
        self.clean_embed_markup(&mut graph);
        if wants(&[IssueCode::EmbedOverLimit]) || self.has_oversized_embed(&graph) {
            self.split_oversized_embeds(&mut graph);
        }

        SanitizeOutcome {
            graph,
            fixes: self.fixes,
            renames,
        }
    }

    fn record(&mut self, code: IssueCode, description: String) {
        info!(target: "weave::repair", code = %code, "{description}");
        self.fixes.push(AppliedFix { code, description });
    }

    fn fresh_id(&mut self, taken: &mut HashSet<String>) -> String {
        loop {
            let id = self.ids.next_id();
            if taken.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Later occurrences of an id get fresh ids; the k-th child reference to
    /// a duplicated id is pointed at its k-th occurrence.
    fn dedupe_ids(&mut self, graph: &mut Graph) {
        let mut taken: HashSet<String> = graph
            .nodes
            .iter()
            .map(|node| node.id.clone())
            .chain(graph.styles.iter().map(|style| style.id.clone()))
            .collect();
        let mut occurrences: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        for position in 0..graph.nodes.len() {
            let old = graph.nodes[position].id.clone();
            if seen.insert(old.clone()) {
                continue;
            }
            let fresh = self.fresh_id(&mut taken);
            occurrences
                .entry(old.clone())
                .or_insert_with(|| vec![old.clone()])
                .push(fresh.clone());
            graph.nodes[position].id = fresh.clone();
            self.record(
                IssueCode::DuplicateNodeId,
                format!("gave duplicate node {old} the new id {fresh}"),
            );
        }
        if !occurrences.is_empty() {
            let mut references: HashMap<String, usize> = HashMap::new();
            for node in &mut graph.nodes {
                for child in &mut node.children {
                    if let Some(ids) = occurrences.get(child.as_str()) {
                        let k = references.entry(child.clone()).or_default();
                        if let Some(target) = ids.get(*k) {
                            *child = target.clone();
                        }
                        *k += 1;
                    }
                }
            }
        }

        let node_ids: HashSet<String> = graph.nodes.iter().map(|node| node.id.clone()).collect();
        let mut style_ids: HashSet<String> = HashSet::new();
        for position in 0..graph.styles.len() {
            let old = graph.styles[position].id.clone();
            let collides = node_ids.contains(&old);
            if style_ids.insert(old.clone()) && !collides {
                continue;
            }
            let fresh = self.fresh_id(&mut taken);
            style_ids.insert(fresh.clone());
            let name = graph.styles[position].name.clone();
            graph.styles[position].id = fresh.clone();
            let code = if collides {
                IssueCode::IdCollision
            } else {
                IssueCode::DuplicateStyleId
            };
            self.record(code, format!("gave style `{name}` the new id {fresh} (was {old})"));
        }
    }

    fn merge_duplicate_styles(&mut self, graph: &mut Graph) {
        let mut first: HashMap<String, usize> = HashMap::new();
        let mut merged: Vec<GraphStyle> = Vec::with_capacity(graph.styles.len());
        for style in std::mem::take(&mut graph.styles) {
            match first.get(&style.name) {
                Some(&position) => {
                    let target = &mut merged[position];
                    target.style_less = merge_declarations(&target.style_less, &style.style_less);
                    for (key, body) in style.variants {
                        let entry = target.variants.entry(key).or_default();
                        *entry = merge_declarations(entry, &body);
                    }
                    let description = format!(
                        "merged duplicate style {} into `{}` ({})",
                        style.id, style.name, target.id
                    );
                    self.record(IssueCode::DuplicateStyleName, description);
                }
                None => {
                    first.insert(style.name.clone(), merged.len());
                    merged.push(style);
                }
            }
        }
        graph.styles = merged;
    }

    fn drop_orphaned_states(&mut self, graph: &mut Graph) {
        let names: HashSet<String> = graph.styles.iter().map(|style| style.name.clone()).collect();
        let used = used_classes(&graph.nodes);
        let mut kept = Vec::with_capacity(graph.styles.len());
        for mut style in std::mem::take(&mut graph.styles) {
            if let Some((base, _)) = state_base(&style.name, &used, self.profile) {
                if !names.contains(base) {
                    self.record(
                        IssueCode::OrphanedState,
                        format!("dropped state style `{}` with no base class", style.name),
                    );
                    continue;
                }
            }
            let illegal: Vec<String> = style
                .variants
                .keys()
                .filter(|key| !self.profile.is_legal_variant(key))
                .cloned()
                .collect();
            for key in illegal {
                style.variants.remove(&key);
                self.record(
                    IssueCode::IllegalVariant,
                    format!("dropped unknown variant `{key}` from `{}`", style.name),
                );
            }
            kept.push(style);
        }
        graph.styles = kept;
    }

    fn drop_dangling_references(&mut self, graph: &mut Graph) {
        let node_ids: HashSet<String> = graph.nodes.iter().map(|node| node.id.clone()).collect();
        let names: HashSet<String> = graph.styles.iter().map(|style| style.name.clone()).collect();
        let mut fixes = Vec::new();
        for node in &mut graph.nodes {
            let before = node.children.len();
            node.children.retain(|child| node_ids.contains(child));
            if node.children.len() != before {
                fixes.push((
                    IssueCode::OrphanChildRef,
                    format!(
                        "removed {} missing child reference(s) from node {}",
                        before - node.children.len(),
                        node.id
                    ),
                ));
            }
            let mut dropped = Vec::new();
            node.classes.retain(|class| {
                let keep = names.contains(class);
                if !keep {
                    dropped.push(class.clone());
                }
                keep
            });
            for class in dropped {
                fixes.push((
                    IssueCode::DanglingClassRef,
                    format!("removed unstyled class `{class}` from node {}", node.id),
                ));
            }
        }
        for (code, description) in fixes {
            self.record(code, description);
        }
    }

    /// Remove back edges, then keep only the first reference to every node.
    fn break_cycles(&mut self, graph: &mut Graph) {
        let index = GraphIndex::new(&graph.nodes);
        let back: Vec<(String, String)> = index
            .back_edges()
            .into_iter()
            .map(|(parent, child)| (graph.nodes[parent].id.clone(), graph.nodes[child].id.clone()))
            .collect();
        for (parent, child) in back {
            if let Some(node) = graph.nodes.iter_mut().find(|node| node.id == parent) {
                node.children.retain(|id| *id != child);
            }
            self.record(
                IssueCode::Cycle,
                format!("removed child reference {parent} -> {child} that closed a cycle"),
            );
        }

        let mut claimed: HashSet<String> = HashSet::new();
        let mut fixes = Vec::new();
        for node in &mut graph.nodes {
            let parent = node.id.clone();
            node.children.retain(|child| {
                let first = claimed.insert(child.clone());
                if !first {
                    fixes.push(format!("removed extra parent reference {parent} -> {child}"));
                }
                first
            });
        }
        for description in fixes {
            self.record(IssueCode::MultipleParents, description);
        }
    }

    fn rename_reserved(&mut self, graph: &mut Graph) -> BTreeMap<String, String> {
        let mut taken: HashSet<String> = graph.styles.iter().map(|style| style.name.clone()).collect();
        let mut renames: BTreeMap<String, String> = BTreeMap::new();
        for style in &graph.styles {
            let base = base_name(&style.name, self.profile);
            if self.profile.is_reserved(base) && !renames.contains_key(base) {
                let renamed = unique_name(&format!("{}{base}", self.profile.rename_prefix), &mut taken);
                renames.insert(base.to_string(), renamed);
            }
        }
        if renames.is_empty() {
            return renames;
        }
        for style in &mut graph.styles {
            if let Some(renamed) = rename(&style.name, &renames, self.profile) {
                style.name = renamed;
            }
        }
        for node in &mut graph.nodes {
            for class in &mut node.classes {
                if let Some(renamed) = rename(class, &renames, self.profile) {
                    *class = renamed;
                }
            }
        }
        for (old, new) in &renames {
            self.record(
                IssueCode::ReservedClassName,
                format!("renamed reserved class `{old}` to `{new}`"),
            );
        }
        renames
    }

    /// Nodes at the depth ceiling that still have children become a single
    /// embed holding the serialized subtree.
    fn collapse_deep_subtrees(&mut self, graph: &mut Graph) {
        let max_depth = self.profile.limits.max_depth;
        let index = GraphIndex::new(&graph.nodes);
        let depths = index.depths();
        let targets: Vec<usize> = (0..graph.nodes.len())
            .filter(|&position| depths[position] == max_depth && !index.children(position).is_empty())
            .collect();
        let mut removed = vec![false; graph.nodes.len()];
        let mut collapsed = Vec::new();
        for position in targets {
            if removed[position] {
                continue;
            }
            let (html, descendants) = subtree_html(&graph.nodes, &index, position);
            for &descendant in &descendants {
                removed[descendant] = true;
            }
            collapsed.push((position, sanitize_markup(&html), descendants.len()));
        }
        for (position, html, count) in collapsed {
            let node = &mut graph.nodes[position];
            node.kind = NodeKind::HtmlEmbed { html };
            node.tag = "div".to_string();
            node.classes.clear();
            node.attributes.clear();
            node.children.clear();
            let description = format!(
                "collapsed {count} node(s) below {} at depth {max_depth} into an embed",
                node.id
            );
            self.record(IssueCode::DepthExceeded, description);
        }
        let mut position = 0;
        graph.nodes.retain(|_| {
            let keep = !removed[position];
            position += 1;
            keep
        });
    }

    fn clean_embed_markup(&mut self, graph: &mut Graph) {
        let mut fixes = Vec::new();
        for node in &mut graph.nodes {
            if let NodeKind::HtmlEmbed { html } = &mut node.kind {
                let cleaned = sanitize_markup(html);
                if cleaned != *html {
                    *html = cleaned;
                    fixes.push(format!("rewrote unsafe markup in embed node {}", node.id));
                }
            }
        }
        for description in fixes {
            self.record(IssueCode::UnsafeEmbedMarkup, description);
        }
    }

    fn has_oversized_embed(&self, graph: &Graph) -> bool {
        graph
            .embeds()
            .any(|(_, html)| html.len() > self.profile.limits.embed_hard_limit)
    }

    /// Oversized embeds become a run of sibling embeds when every piece fits.
    fn split_oversized_embeds(&mut self, graph: &mut Graph) {
        let hard_limit = self.profile.limits.embed_hard_limit;
        let ceiling = self.profile.chunk_ceiling();
        let mut taken: HashSet<String> = graph
            .nodes
            .iter()
            .map(|node| node.id.clone())
            .chain(graph.styles.iter().map(|style| style.id.clone()))
            .collect();
        let mut nodes = Vec::with_capacity(graph.nodes.len());
        let mut siblings: HashMap<String, Vec<String>> = HashMap::new();
        for mut node in std::mem::take(&mut graph.nodes) {
            let pieces = match node.kind.embed_html() {
                Some(html) if html.len() > hard_limit => chunk(html, ChunkKind::Html, ceiling),
                _ => {
                    nodes.push(node);
                    continue;
                }
            };
            if pieces.len() < 2 || pieces.iter().any(|piece| piece.size > hard_limit) {
                if diagnostics_enabled("repair") {
                    debug!(node = %node.id, pieces = pieces.len(), "diagnostics: embed cannot be split");
                }
                nodes.push(node);
                continue;
            }
            let mut pieces = pieces.into_iter();
            let mut extra = Vec::new();
            let mut new_nodes = Vec::new();
            if let Some(first) = pieces.next() {
                node.kind = NodeKind::HtmlEmbed { html: first.content };
            }
            for piece in pieces {
                let id = self.fresh_id(&mut taken);
                extra.push(id.clone());
                new_nodes.push(GraphNode::new(id, NodeKind::HtmlEmbed { html: piece.content }, "div"));
            }
            self.record(
                IssueCode::EmbedOverLimit,
                format!("split embed node {} into {} parts", node.id, extra.len() + 1),
            );
            siblings.insert(node.id.clone(), extra);
            nodes.push(node);
            nodes.extend(new_nodes);
        }
        if !siblings.is_empty() {
            for node in &mut nodes {
                if node.children.iter().any(|child| siblings.contains_key(child)) {
                    let mut children = Vec::with_capacity(node.children.len());
                    for child in node.children.drain(..) {
                        let extra = siblings.get(&child).cloned().unwrap_or_default();
                        children.push(child);
                        children.extend(extra);
                    }
                    node.children = children;
                }
            }
        }
        graph.nodes = nodes;
    }
}

fn base_name<'a>(name: &'a str, profile: &TargetProfile) -> &'a str {
    profile.split_state_style(name).map_or(name, |(base, _)| base)
}

fn rename(name: &str, renames: &BTreeMap<String, String>, profile: &TargetProfile) -> Option<String> {
    if let Some(renamed) = renames.get(name) {
        return Some(renamed.clone());
    }
    match profile.split_state_style(name) {
        Some((base, suffix)) => renames
            .get(base)
            .map(|renamed| format!("{renamed}{STATE_SUFFIX}{suffix}")),
        None => renames.get(name).cloned(),
    }
}

fn unique_name(candidate: &str, taken: &mut HashSet<String>) -> String {
    let mut name = candidate.to_string();
    let mut n = 2;
    while !taken.insert(name.clone()) {
        name = format!("{candidate}-{n}");
        n += 1;
    }
    name
}

/// Later declarations replace earlier ones of the same property in place.
fn merge_declarations(first: &str, second: &str) -> String {
    let mut merged: Vec<Declaration> = parse_declarations(first);
    for declaration in parse_declarations(second) {
        match merged
            .iter_mut()
            .find(|existing| existing.property == declaration.property)
        {
            Some(existing) => *existing = declaration,
            None => merged.push(declaration),
        }
    }
    declarations_to_css(&merged)
}

enum Frame {
    Enter(usize),
    Close(String),
}

/// Serialize the subtree at `root` without recursion; also returns the
/// positions of every descendant visited.
fn subtree_html(nodes: &[GraphNode], index: &GraphIndex, root: usize) -> (String, Vec<usize>) {
    let mut out = String::new();
    let mut descendants = Vec::new();
    let mut stack = vec![Frame::Enter(root)];
    while let Some(frame) = stack.pop() {
        let position = match frame {
            Frame::Close(tag) => {
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
                continue;
            }
            Frame::Enter(position) => position,
        };
        if position != root {
            descendants.push(position);
        }
        let node = &nodes[position];
        let tag = match &node.kind {
            NodeKind::Text { text } => {
                out.push_str(&escape_text(text));
                continue;
            }
            NodeKind::HtmlEmbed { html } => {
                out.push_str(html);
                continue;
            }
            NodeKind::Link(_) => "a",
            _ if node.tag.is_empty() => "div",
            _ => node.tag.as_str(),
        };
        out.push('<');
        out.push_str(tag);
        if !node.classes.is_empty() {
            out.push_str(" class=\"");
            out.push_str(&escape_attr(&node.classes.join(" ")));
            out.push('"');
        }
        if let NodeKind::Link(link) = &node.kind {
            out.push_str(" href=\"");
            out.push_str(&escape_attr(&link.url));
            out.push('"');
            if let Some(target) = &link.target {
                out.push_str(" target=\"");
                out.push_str(&escape_attr(target));
                out.push('"');
            }
        }
        for (name, value) in &node.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape_attr(value));
            out.push('"');
        }
        out.push('>');
        if is_void(tag) {
            continue;
        }
        stack.push(Frame::Close(tag.to_string()));
        for &child in index.children(position).iter().rev() {
            stack.push(Frame::Enter(child));
        }
    }
    (out, descendants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::{Severity, has_severity};
    use weave_config::WeaveConfig;

    fn block(id: &str, children: &[&str]) -> GraphNode {
        let mut node = GraphNode::new(id.to_string(), NodeKind::Block, "div");
        node.children = children.iter().map(|c| c.to_string()).collect();
        node
    }

    fn style(id: &str, name: &str, style_less: &str) -> GraphStyle {
        GraphStyle {
            id: id.to_string(),
            name: name.to_string(),
            style_less: style_less.to_string(),
            variants: BTreeMap::new(),
        }
    }

    fn repair(graph: &Graph, profile: &TargetProfile) -> SanitizeOutcome {
        let mut ids = IdGenerator::seeded(99);
        sanitize(graph, profile, &mut ids)
    }

    #[test]
    fn duplicate_ids_are_split_across_references() {
        let graph = Graph {
            nodes: vec![
                block("root", &["dup", "dup"]),
                block("dup", &[]),
                GraphNode::text("dup".into(), "second"),
            ],
            ..Graph::default()
        };
        let outcome = repair(&graph, &TargetProfile::default());
        let nodes = &outcome.graph.nodes;
        assert_eq!(nodes[1].id, "dup");
        assert_ne!(nodes[2].id, "dup");
        assert_eq!(nodes[0].children, vec!["dup".to_string(), nodes[2].id.clone()]);
        assert!(outcome.fixes.iter().any(|f| f.code == IssueCode::DuplicateNodeId));
    }

    #[test]
    fn reserved_names_are_renamed_everywhere() {
        let mut node = block("n1", &[]);
        node.classes = vec!["w-button".into(), "plain".into()];
        let graph = Graph {
            nodes: vec![node],
            styles: vec![
                style("s1", "w-button", "color: red;"),
                style("s2", "w-button:hover", ""),
                style("s3", "plain", ""),
            ],
            ..Graph::default()
        };
        let outcome = repair(&graph, &TargetProfile::default());
        let names: Vec<&str> = outcome.graph.styles.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["u-w-button", "u-w-button:hover", "plain"]);
        assert_eq!(outcome.graph.nodes[0].classes, vec!["u-w-button", "plain"]);
        assert_eq!(outcome.renames.get("w-button").map(String::as_str), Some("u-w-button"));
        let issues = validate(&outcome.graph, &[], &TargetProfile::default());
        assert!(!has_severity(&issues, Severity::Error), "{issues:?}");
    }

    #[test]
    fn duplicate_names_merge_and_orphans_drop() {
        let mut node = block("n1", &["gone"]);
        node.classes = vec!["card".into(), "ghost".into()];
        let mut first = style("s1", "card", "color: red; margin: 0;");
        first.variants.insert("hover".into(), "color: blue;".into());
        first.variants.insert("sideways".into(), "color: green;".into());
        let graph = Graph {
            nodes: vec![node],
            styles: vec![first, style("s2", "card", "color: black;"), style("s3", "ghost:hover", "")],
            ..Graph::default()
        };
        let outcome = repair(&graph, &TargetProfile::default());
        assert_eq!(outcome.graph.styles.len(), 1);
        let card = &outcome.graph.styles[0];
        assert_eq!(card.style_less, "color: black; margin: 0;");
        assert_eq!(card.variants.keys().collect::<Vec<_>>(), vec!["hover"]);
        assert_eq!(outcome.graph.nodes[0].classes, vec!["card"]);
        assert!(outcome.graph.nodes[0].children.is_empty());
    }

    #[test]
    fn cycles_and_extra_parents_are_cut() {
        let graph = Graph {
            nodes: vec![block("a", &["b", "c"]), block("b", &["a", "c"]), block("c", &[])],
            ..Graph::default()
        };
        let outcome = repair(&graph, &TargetProfile::default());
        let issues = validate(&outcome.graph, &[], &TargetProfile::default());
        assert!(!has_severity(&issues, Severity::Error), "{issues:?}");
        assert_eq!(outcome.graph.nodes[0].children, vec!["b", "c"]);
        assert!(outcome.graph.nodes[1].children.is_empty());
    }

    #[test]
    fn deep_chains_collapse_into_embeds() {
        let mut config = WeaveConfig::default();
        config.limits.max_depth = 3;
        let profile = TargetProfile::from_config(&config);
        let mut nodes: Vec<GraphNode> = (0..6)
            .map(|i| {
                let child = format!("n{}", i + 1);
                block(&format!("n{i}"), &[child.as_str()])
            })
            .collect();
        nodes.push(GraphNode::text("n6".into(), "deep & low"));
        nodes[3].classes.push("inner".into());
        let graph = Graph {
            nodes,
            styles: vec![style("s1", "inner", "")],
            ..Graph::default()
        };
        let outcome = repair(&graph, &profile);
        assert_eq!(outcome.graph.nodes.len(), 3);
        assert_eq!(
            outcome.graph.nodes[2].kind.embed_html(),
            Some("<div><div class=\"inner\"><div><div>deep &amp; low</div></div></div></div>")
        );
        assert!(outcome.graph.nodes[2].children.is_empty());
        let issues = validate(&outcome.graph, &[], &profile);
        assert!(!issues.iter().any(|i| i.code == IssueCode::DepthExceeded));
    }

    #[test]
    fn embeds_are_cleaned_and_split() {
        let mut config = WeaveConfig::default();
        config.limits.embed_hard_limit = 30;
        config.limits.embed_soft_limit = 20;
        let profile = TargetProfile::from_config(&config);
        let big = "<p>aaaaaaaaaa</p><p>bbbbbbbbbb</p><p>cccccccccc</p>";
        let graph = Graph {
            nodes: vec![
                block("root", &["e1", "e2"]),
                GraphNode::new("e1".into(), NodeKind::HtmlEmbed { html: big.into() }, "div"),
                GraphNode::new(
                    "e2".into(),
                    NodeKind::HtmlEmbed {
                        html: "<span>Years<br>Experience</span>".into(),
                    },
                    "div",
                ),
            ],
            ..Graph::default()
        };
        let outcome = repair(&graph, &profile);
        let nodes = &outcome.graph.nodes;
        assert_eq!(nodes[0].children.len(), 4);
        assert_eq!(nodes[1].kind.embed_html(), Some("<p>aaaaaaaaaa</p>"));
        assert_eq!(nodes[0].children[1], nodes[2].id);
        assert_eq!(
            nodes.last().and_then(|n| n.kind.embed_html()),
            Some("<span>Years</span><br><span>Experience</span>")
        );
    }

    #[test]
    fn repair_is_idempotent() {
        let mut config = WeaveConfig::default();
        config.limits.max_depth = 2;
        let profile = TargetProfile::from_config(&config);
        let mut a = block("a", &["b", "missing", "b"]);
        a.classes = vec!["w-nav".into()];
        let graph = Graph {
            nodes: vec![
                a,
                block("b", &["c"]),
                block("c", &["a"]),
                GraphNode::new(
                    "e".into(),
                    NodeKind::HtmlEmbed {
                        html: "<body><i onclick=\"x\">a<br>b</i></body>".into(),
                    },
                    "div",
                ),
            ],
            styles: vec![style("s", "w-nav", ""), style("s", "orphan:hover", "")],
            ..Graph::default()
        };
        let once = repair(&graph, &profile);
        assert!(once.changed());
        let twice = repair(&once.graph, &profile);
        assert!(!twice.changed(), "{:?}", twice.fixes);
        assert_eq!(twice.graph, once.graph);
    }
}

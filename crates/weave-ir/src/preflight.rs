//! Read-only structural checks over a node/style graph.
//!
//! [`validate`] never mutates its input and always returns every finding it
//! can make, ordered by check. The sanitizer keys its repairs off the issue
//! codes produced here.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::graph::{Graph, GraphIndex, GraphNode, is_uuid_v4};
use crate::profile::TargetProfile;
use crate::sanitize::markup::needs_sanitizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCode {
    DuplicateNodeId,
    DuplicateStyleId,
    IdCollision,
    NonUuidId,
    OrphanChildRef,
    Cycle,
    MultipleParents,
    OrphanedState,
    IllegalVariant,
    DuplicateStyleName,
    DanglingClassRef,
    ReservedClassName,
    DepthExceeded,
    EmbedOverLimit,
    EmbedNearLimit,
    EmbedBudget,
    UnsafeEmbedMarkup,
    CssRecovered,
    UnresolvedVariable,
    SizeLimitExceeded,
    SchemaViolation,
}

impl IssueCode {
    pub fn code(self) -> &'static str {
        match self {
            IssueCode::DuplicateNodeId => "duplicate-node-id",
            IssueCode::DuplicateStyleId => "duplicate-style-id",
            IssueCode::IdCollision => "id-collision",
            IssueCode::NonUuidId => "non-uuid-id",
            IssueCode::OrphanChildRef => "orphan-child-ref",
            IssueCode::Cycle => "cycle",
            IssueCode::MultipleParents => "multiple-parents",
            IssueCode::OrphanedState => "orphaned-state",
            IssueCode::IllegalVariant => "illegal-variant",
            IssueCode::DuplicateStyleName => "duplicate-style-name",
            IssueCode::DanglingClassRef => "dangling-class-ref",
            IssueCode::ReservedClassName => "reserved-class-name",
            IssueCode::DepthExceeded => "depth-exceeded",
            IssueCode::EmbedOverLimit => "embed-over-limit",
            IssueCode::EmbedNearLimit => "embed-near-limit",
            IssueCode::EmbedBudget => "embed-budget",
            IssueCode::UnsafeEmbedMarkup => "unsafe-embed-markup",
            IssueCode::CssRecovered => "css-recovered",
            IssueCode::UnresolvedVariable => "unresolved-variable",
            IssueCode::SizeLimitExceeded => "size-limit-exceeded",
            IssueCode::SchemaViolation => "schema-violation",
        }
    }

    /// Severity this code is always reported with.
    pub fn severity(self) -> Severity {
        match self {
            IssueCode::DuplicateNodeId
            | IssueCode::DuplicateStyleId
            | IssueCode::IdCollision
            | IssueCode::OrphanChildRef
            | IssueCode::Cycle
            | IssueCode::EmbedOverLimit
            | IssueCode::SizeLimitExceeded
            | IssueCode::SchemaViolation => Severity::Fatal,
            IssueCode::MultipleParents
            | IssueCode::OrphanedState
            | IssueCode::IllegalVariant
            | IssueCode::DuplicateStyleName
            | IssueCode::DanglingClassRef
            | IssueCode::ReservedClassName
            | IssueCode::DepthExceeded
            | IssueCode::UnsafeEmbedMarkup => Severity::Error,
            IssueCode::NonUuidId
            | IssueCode::EmbedNearLimit
            | IssueCode::EmbedBudget
            | IssueCode::CssRecovered
            | IssueCode::UnresolvedVariable => Severity::Warning,
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    /// Node id, style id or artifact name the issue is about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: code.severity(),
            code,
            message: message.into(),
            subject: None,
        }
    }

    pub fn about(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)
    }
}

/// Side artifact size taken into account for the total embed budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSize {
    pub name: String,
    pub size: usize,
}

pub fn has_code(issues: &[ValidationIssue], code: IssueCode) -> bool {
    issues.iter().any(|issue| issue.code == code)
}

/// Whether any issue is at least `severity`.
pub fn has_severity(issues: &[ValidationIssue], severity: Severity) -> bool {
    issues.iter().any(|issue| issue.severity >= severity)
}

/// Run every structural check over `graph`.
pub fn validate(graph: &Graph, artifacts: &[ArtifactSize], profile: &TargetProfile) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_identifiers(graph, &mut issues);
    check_child_references(graph, &mut issues);
    let index = GraphIndex::new(&graph.nodes);
    check_cycles(graph, &index, &mut issues);
    check_styles(graph, profile, &mut issues);
    check_class_references(graph, &mut issues);
    check_depth(graph, &index, profile, &mut issues);
    check_embeds(graph, artifacts, profile, &mut issues);
    issues
}

fn check_identifiers(graph: &Graph, issues: &mut Vec<ValidationIssue>) {
    let mut node_counts: HashMap<&str, usize> = HashMap::new();
    for node in &graph.nodes {
        *node_counts.entry(node.id.as_str()).or_default() += 1;
    }
    let mut reported = HashSet::new();
    for node in &graph.nodes {
        let count = node_counts[node.id.as_str()];
        if count > 1 && reported.insert(node.id.as_str()) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::DuplicateNodeId,
                    format!("node id {} is used by {count} nodes", node.id),
                )
                .about(&node.id),
            );
        }
    }
    let mut style_counts: HashMap<&str, usize> = HashMap::new();
    for style in &graph.styles {
        *style_counts.entry(style.id.as_str()).or_default() += 1;
    }
    let mut duplicated = HashSet::new();
    let mut collided = HashSet::new();
    for style in &graph.styles {
        let count = style_counts[style.id.as_str()];
        if count > 1 && duplicated.insert(style.id.as_str()) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::DuplicateStyleId,
                    format!("style id {} is used by {count} styles", style.id),
                )
                .about(&style.id),
            );
        }
        if node_counts.contains_key(style.id.as_str()) && collided.insert(style.id.as_str()) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::IdCollision,
                    format!("style `{}` shares id {} with a node", style.name, style.id),
                )
                .about(&style.id),
            );
        }
    }
    let non_uuid: Vec<&str> = graph
        .nodes
        .iter()
        .map(|node| node.id.as_str())
        .chain(graph.styles.iter().map(|style| style.id.as_str()))
        .filter(|id| !is_uuid_v4(id))
        .collect();
    if let Some(first) = non_uuid.first() {
        issues.push(
            ValidationIssue::new(
                IssueCode::NonUuidId,
                format!("{} identifiers are not UUID v4 (first: {first})", non_uuid.len()),
            )
            .about(*first),
        );
    }
}

/// Class names referenced by at least one node.
pub(crate) fn used_classes(nodes: &[GraphNode]) -> HashSet<&str> {
    nodes
        .iter()
        .flat_map(|node| node.classes.iter().map(String::as_str))
        .collect()
}

/// Base class and variant key of a state style. Names that markup uses as
/// classes (`md:hover` on an element) are ordinary styles, not states.
pub(crate) fn state_base<'a>(
    name: &'a str,
    used: &HashSet<&str>,
    profile: &TargetProfile,
) -> Option<(&'a str, &'a str)> {
    if used.contains(name) {
        return None;
    }
    profile.split_state_style(name)
}

fn check_child_references(graph: &Graph, issues: &mut Vec<ValidationIssue>) {
    let ids: HashSet<&str> = graph.nodes.iter().map(|node| node.id.as_str()).collect();
    for node in &graph.nodes {
        for child in &node.children {
            if !ids.contains(child.as_str()) {
                issues.push(
                    ValidationIssue::new(
                        IssueCode::OrphanChildRef,
                        format!("node {} lists missing child {child}", node.id),
                    )
                    .about(child),
                );
            }
        }
    }
}

fn check_cycles(graph: &Graph, index: &GraphIndex, issues: &mut Vec<ValidationIssue>) {
    for (parent, child) in index.back_edges() {
        issues.push(
            ValidationIssue::new(
                IssueCode::Cycle,
                format!(
                    "child reference {} -> {} closes a cycle",
                    graph.nodes[parent].id, graph.nodes[child].id
                ),
            )
            .about(&graph.nodes[child].id),
        );
    }
    for (position, parents) in index.parents().iter().enumerate() {
        if parents.len() > 1 {
            issues.push(
                ValidationIssue::new(
                    IssueCode::MultipleParents,
                    format!(
                        "node {} is referenced {} times as a child",
                        graph.nodes[position].id,
                        parents.len()
                    ),
                )
                .about(&graph.nodes[position].id),
            );
        }
    }
}

fn check_styles(graph: &Graph, profile: &TargetProfile, issues: &mut Vec<ValidationIssue>) {
    let names: HashSet<&str> = graph.styles.iter().map(|style| style.name.as_str()).collect();
    let used = used_classes(&graph.nodes);
    let mut seen = HashSet::new();
    for style in &graph.styles {
        if !seen.insert(style.name.as_str()) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::DuplicateStyleName,
                    format!("class `{}` is defined by more than one style", style.name),
                )
                .about(&style.id),
            );
        }
        if let Some((base, suffix)) = state_base(&style.name, &used, profile) {
            if !names.contains(base) {
                issues.push(
                    ValidationIssue::new(
                        IssueCode::OrphanedState,
                        format!("state style `{}` has no base class `{base}` ({suffix})", style.name),
                    )
                    .about(&style.id),
                );
            }
        }
        for key in style.variants.keys() {
            if !profile.is_legal_variant(key) {
                issues.push(
                    ValidationIssue::new(
                        IssueCode::IllegalVariant,
                        format!("style `{}` has unknown variant `{key}`", style.name),
                    )
                    .about(&style.id),
                );
            }
        }
        if profile.is_reserved(&style.name) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::ReservedClassName,
                    format!("class `{}` uses a reserved prefix", style.name),
                )
                .about(&style.id),
            );
        }
    }
}

fn check_class_references(graph: &Graph, issues: &mut Vec<ValidationIssue>) {
    let names: HashSet<&str> = graph.styles.iter().map(|style| style.name.as_str()).collect();
    for node in &graph.nodes {
        for class in &node.classes {
            if !names.contains(class.as_str()) {
                issues.push(
                    ValidationIssue::new(
                        IssueCode::DanglingClassRef,
                        format!("node {} uses class `{class}` with no style", node.id),
                    )
                    .about(&node.id),
                );
            }
        }
    }
}

fn check_depth(graph: &Graph, index: &GraphIndex, profile: &TargetProfile, issues: &mut Vec<ValidationIssue>) {
    let depths = index.depths();
    let Some((deepest, &depth)) = depths.iter().enumerate().max_by_key(|(_, depth)| **depth) else {
        return;
    };
    if depth > profile.limits.max_depth {
        issues.push(
            ValidationIssue::new(
                IssueCode::DepthExceeded,
                format!(
                    "nesting depth {depth} exceeds the safe maximum of {}",
                    profile.limits.max_depth
                ),
            )
            .about(&graph.nodes[deepest].id),
        );
    }
}

fn check_embeds(graph: &Graph, artifacts: &[ArtifactSize], profile: &TargetProfile, issues: &mut Vec<ValidationIssue>) {
    let limits = &profile.limits;
    let mut total = 0usize;
    for (id, html) in graph.embeds() {
        let size = html.len();
        total += size;
        if size > limits.embed_hard_limit {
            issues.push(
                ValidationIssue::new(
                    IssueCode::EmbedOverLimit,
                    format!(
                        "embed node {id} is {size} bytes, over the {} byte ceiling",
                        limits.embed_hard_limit
                    ),
                )
                .about(id),
            );
        } else if size > limits.embed_soft_limit {
            issues.push(
                ValidationIssue::new(
                    IssueCode::EmbedNearLimit,
                    format!(
                        "embed node {id} is {size} bytes, over the {} byte soft limit",
                        limits.embed_soft_limit
                    ),
                )
                .about(id),
            );
        }
        if needs_sanitizing(html) {
            issues.push(
                ValidationIssue::new(
                    IssueCode::UnsafeEmbedMarkup,
                    format!("embed node {id} contains markup the builder rejects"),
                )
                .about(id),
            );
        }
    }
    for artifact in artifacts {
        total += artifact.size;
        if artifact.size > limits.embed_soft_limit && artifact.size <= limits.embed_hard_limit {
            issues.push(
                ValidationIssue::new(
                    IssueCode::EmbedNearLimit,
                    format!(
                        "{} is {} bytes, over the {} byte soft limit",
                        artifact.name, artifact.size, limits.embed_soft_limit
                    ),
                )
                .about(&artifact.name),
            );
        }
    }
    if total > limits.total_embed_budget {
        issues.push(ValidationIssue::new(
            IssueCode::EmbedBudget,
            format!(
                "embeds total {total} bytes, over the {} byte budget",
                limits.total_embed_budget
            ),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, GraphStyle, IdGenerator, NodeKind};

    fn codes(issues: &[ValidationIssue]) -> Vec<IssueCode> {
        issues.iter().map(|i| i.code).collect()
    }

    fn block(ids: &mut IdGenerator) -> GraphNode {
        GraphNode::new(ids.next_id(), NodeKind::Block, "div")
    }

    fn style(ids: &mut IdGenerator, name: &str) -> GraphStyle {
        GraphStyle {
            id: ids.next_id(),
            name: name.to_string(),
            style_less: String::new(),
            variants: Default::default(),
        }
    }

    #[test]
    fn clean_graph_has_no_issues() {
        let mut ids = IdGenerator::seeded(1);
        let mut root = block(&mut ids);
        let child = block(&mut ids);
        root.children.push(child.id.clone());
        root.classes.push("card".into());
        let graph = Graph {
            nodes: vec![root, child],
            styles: vec![style(&mut ids, "card")],
            ..Graph::default()
        };
        assert!(validate(&graph, &[], &TargetProfile::default()).is_empty());
    }

    #[test]
    fn duplicate_ids_and_orphans_are_fatal() {
        let mut ids = IdGenerator::seeded(2);
        let mut a = block(&mut ids);
        let mut b = block(&mut ids);
        b.id = a.id.clone();
        a.children.push("nowhere".into());
        let graph = Graph {
            nodes: vec![a, b],
            ..Graph::default()
        };
        let issues = validate(&graph, &[], &TargetProfile::default());
        assert_eq!(
            codes(&issues),
            vec![IssueCode::DuplicateNodeId, IssueCode::OrphanChildRef]
        );
        assert!(issues.iter().all(|i| i.severity == Severity::Fatal));
    }

    #[test]
    fn duplicated_style_id_that_also_names_a_node_reports_both() {
        let mut ids = IdGenerator::seeded(9);
        let node = block(&mut ids);
        let mut first = style(&mut ids, "card");
        let mut second = style(&mut ids, "lead");
        first.id = node.id.clone();
        second.id = node.id.clone();
        let graph = Graph {
            nodes: vec![node],
            styles: vec![first, second],
            ..Graph::default()
        };
        let found = codes(&validate(&graph, &[], &TargetProfile::default()));
        assert_eq!(
            found.iter().filter(|code| **code == IssueCode::DuplicateStyleId).count(),
            1
        );
        assert_eq!(found.iter().filter(|code| **code == IssueCode::IdCollision).count(), 1);
    }

    #[test]
    fn colon_classes_used_in_markup_are_not_states() {
        let mut ids = IdGenerator::seeded(10);
        let mut node = block(&mut ids);
        node.classes = vec!["md:flex".into(), "group:hover".into()];
        let graph = Graph {
            nodes: vec![node],
            styles: vec![
                style(&mut ids, "md:flex"),
                style(&mut ids, "group:hover"),
                style(&mut ids, "ghost:hover"),
            ],
            ..Graph::default()
        };
        let issues = validate(&graph, &[], &TargetProfile::default());
        let orphaned: Vec<&str> = issues
            .iter()
            .filter(|issue| issue.code == IssueCode::OrphanedState)
            .filter_map(|issue| issue.subject.as_deref())
            .collect();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(Some(orphaned[0]), graph.styles.get(2).map(|style| style.id.as_str()));
    }

    #[test]
    fn cycles_and_shared_children_are_reported() {
        let mut ids = IdGenerator::seeded(3);
        let mut a = block(&mut ids);
        let mut b = block(&mut ids);
        let c = block(&mut ids);
        a.children = vec![b.id.clone(), c.id.clone()];
        b.children = vec![a.id.clone(), c.id.clone()];
        let graph = Graph {
            nodes: vec![a, b, c],
            ..Graph::default()
        };
        let issues = validate(&graph, &[], &TargetProfile::default());
        let found = codes(&issues);
        assert!(found.contains(&IssueCode::Cycle));
        assert!(found.contains(&IssueCode::MultipleParents));
    }

    #[test]
    fn style_vocabulary_is_enforced() {
        let mut ids = IdGenerator::seeded(4);
        let mut bad_variant = style(&mut ids, "btn");
        bad_variant.variants.insert("wide".into(), "x: 1;".into());
        let orphan = style(&mut ids, "ghost:hover");
        let reserved = style(&mut ids, "w-button");
        let duplicate = style(&mut ids, "btn");
        let mut node = block(&mut ids);
        node.classes = vec!["missing".into()];
        let graph = Graph {
            nodes: vec![node],
            styles: vec![bad_variant, orphan, reserved, duplicate],
            ..Graph::default()
        };
        let found = codes(&validate(&graph, &[], &TargetProfile::default()));
        assert_eq!(
            found,
            vec![
                IssueCode::IllegalVariant,
                IssueCode::OrphanedState,
                IssueCode::ReservedClassName,
                IssueCode::DuplicateStyleName,
                IssueCode::DanglingClassRef,
            ]
        );
    }

    #[test]
    fn depth_and_embed_limits() {
        let mut config = weave_config::WeaveConfig::default();
        config.limits.max_depth = 2;
        config.limits.embed_hard_limit = 40;
        config.limits.embed_soft_limit = 20;
        config.limits.total_embed_budget = 50;
        let profile = TargetProfile::from_config(&config);
        let mut ids = IdGenerator::seeded(5);
        let mut a = block(&mut ids);
        let mut b = block(&mut ids);
        let c = block(&mut ids);
        a.children.push(b.id.clone());
        b.children.push(c.id.clone());
        let big = GraphNode::new(
            ids.next_id(),
            NodeKind::HtmlEmbed {
                html: format!("<div>{}</div>", "x".repeat(40)),
            },
            "div",
        );
        let graph = Graph {
            nodes: vec![a, b, c, big],
            ..Graph::default()
        };
        let artifacts = [ArtifactSize {
            name: "css-embed".into(),
            size: 30,
        }];
        let found = codes(&validate(&graph, &artifacts, &profile));
        assert_eq!(
            found,
            vec![
                IssueCode::DepthExceeded,
                IssueCode::EmbedOverLimit,
                IssueCode::EmbedNearLimit,
                IssueCode::EmbedBudget,
            ]
        );
    }

    #[test]
    fn unsafe_embed_markup_is_flagged() {
        let mut ids = IdGenerator::seeded(6);
        let embed = GraphNode::new(
            ids.next_id(),
            NodeKind::HtmlEmbed {
                html: "<img src=\"a.png\" onerror=\"x()\">".into(),
            },
            "div",
        );
        let graph = Graph {
            nodes: vec![embed],
            ..Graph::default()
        };
        let found = codes(&validate(&graph, &[], &TargetProfile::default()));
        assert_eq!(found, vec![IssueCode::UnsafeEmbedMarkup]);
    }
}

//! Structural guarantees checked over generated pages.

use std::collections::HashSet;

use anyhow::Result;
use weave_config::WeaveConfig;
use weave_ir::chunk::{ChunkKind, plan};
use weave_ir::graph::GraphIndex;
use weave_ir::{ConversionInput, Graph, IdGenerator, IssueCode, SafetyGate, TargetProfile, Verdict, sanitize};

const CLASSES: &[&str] = &[
    "card", "hero", "btn", "title", "w-nav", "w-row", "lead", "md:flex", "col-1/2", "sm:p-2.5",
];
const TAGS: &[&str] = &["div", "section", "p", "span", "h2", "a", "ul", "li", "img"];
/// Tags html5ever nests inside themselves without closing the parent.
const NESTING_TAGS: &[&str] = &["div", "section", "span", "article"];

/// Small deterministic generator so failures reproduce by case number.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[self.below(items.len())]
    }
}

fn element(rng: &mut Lcg, depth: usize, out: &mut String) {
    let tag = rng.pick(TAGS);
    let mut classes = Vec::new();
    for _ in 0..rng.below(3) {
        let class = rng.pick(CLASSES);
        if !classes.contains(&class) {
            classes.push(class);
        }
    }
    out.push('<');
    out.push_str(tag);
    if !classes.is_empty() {
        out.push_str(&format!(" class=\"{}\"", classes.join(" ")));
    }
    match tag {
        "a" => out.push_str(" href=\"https://example.com/page\""),
        "img" => {
            out.push_str(" src=\"photo.png\" alt=\"\">");
            return;
        }
        _ => {}
    }
    if rng.below(4) == 0 {
        out.push_str(" style=\"margin-top: 4px\"");
    }
    out.push('>');
    let children = if depth == 0 { 0 } else { rng.below(4) };
    for _ in 0..children {
        if rng.below(3) == 0 {
            out.push_str("text<br>more");
        } else {
            element(rng, depth - 1, out);
        }
    }
    if children == 0 {
        out.push_str("leaf");
    }
    out.push_str(&format!("</{tag}>"));
}

/// Class name as it must be written in a selector.
fn selector_class(class: &str) -> String {
    let mut out = String::with_capacity(class.len());
    for c in class.chars() {
        if matches!(c, ':' | '/' | '.') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn stylesheet(rng: &mut Lcg) -> String {
    let mut css = String::from(":root { --accent: #336699; }\n");
    for class in CLASSES {
        let class = selector_class(class);
        match rng.below(5) {
            0 => css.push_str(&format!(".{class} {{ color: var(--accent); padding: 4px; }}\n")),
            1 => css.push_str(&format!(".{class}:hover {{ color: #111; }}\n")),
            2 => css.push_str(&format!("@media (max-width: 767px) {{ .{class} {{ margin: 0; }} }}\n")),
            3 => css.push_str(&format!(".{class}::before {{ content: \"*\"; }}\n")),
            _ => css.push_str(&format!(".{class} .{class} {{ gap: 2px; }}\n")),
        }
    }
    css
}

/// A single chain `levels` elements deep with generated classes and inline styles.
fn deep_page(case: u64, levels: usize) -> String {
    let mut rng = Lcg(case.wrapping_mul(0xA24B_AED4_963E_E407) | 1);
    let mut tags = Vec::with_capacity(levels);
    let mut html = String::from("<body>");
    for _ in 0..levels {
        let tag = rng.pick(NESTING_TAGS);
        html.push('<');
        html.push_str(tag);
        if rng.below(2) == 0 {
            html.push_str(&format!(" class=\"{}\"", rng.pick(CLASSES)));
        }
        if rng.below(8) == 0 {
            html.push_str(" style=\"padding: 1px\"");
        }
        html.push('>');
        tags.push(tag);
    }
    html.push_str("bottom");
    for tag in tags.iter().rev() {
        html.push_str(&format!("</{tag}>"));
    }
    html.push_str("</body>");
    html
}

fn page(case: u64) -> (String, String) {
    let mut rng = Lcg(case.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1);
    let mut html = String::from("<html><head><title>t</title></head><body>");
    for _ in 0..1 + rng.below(3) {
        let depth = 2 + rng.below(6);
        element(&mut rng, depth, &mut html);
    }
    html.push_str("<script>window.ready = true;</script></body></html>");
    let css = stylesheet(&mut rng);
    (html, css)
}

fn gate(case: u64) -> SafetyGate {
    let mut config = WeaveConfig::default();
    config.limits.max_depth = 5;
    SafetyGate::from_config(&config).with_seed(Some(case))
}

fn assert_well_formed(graph: &Graph, max_depth: usize, case: u64) {
    let node_ids: HashSet<&str> = graph.nodes.iter().map(|node| node.id.as_str()).collect();
    assert_eq!(node_ids.len(), graph.nodes.len(), "case {case}: duplicate node id");
    let style_ids: HashSet<&str> = graph.styles.iter().map(|style| style.id.as_str()).collect();
    assert_eq!(style_ids.len(), graph.styles.len(), "case {case}: duplicate style id");
    assert!(node_ids.is_disjoint(&style_ids), "case {case}: node and style share an id");

    let style_names: HashSet<&str> = graph.styles.iter().map(|style| style.name.as_str()).collect();
    let used: HashSet<&str> = graph
        .nodes
        .iter()
        .flat_map(|node| node.classes.iter().map(String::as_str))
        .collect();
    let mut parents: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        for child in &node.children {
            assert!(node_ids.contains(child.as_str()), "case {case}: orphan child {child}");
            assert!(parents.insert(child.as_str()), "case {case}: {child} has two parents");
        }
        for class in &node.classes {
            assert!(style_names.contains(class.as_str()), "case {case}: dangling class {class}");
            assert!(!class.starts_with("w-"), "case {case}: reserved class {class}");
        }
    }
    let profile = TargetProfile::default();
    for style in &graph.styles {
        if used.contains(style.name.as_str()) {
            continue;
        }
        if let Some((base, _)) = profile.split_state_style(&style.name) {
            assert!(style_names.contains(base), "case {case}: orphaned state {}", style.name);
        }
    }

    let index = GraphIndex::new(&graph.nodes);
    assert!(index.back_edges().is_empty(), "case {case}: cycle");
    assert!(
        index.depths().into_iter().all(|depth| depth <= max_depth),
        "case {case}: too deep"
    );
}

#[test]
fn generated_pages_convert_to_well_formed_graphs() -> Result<()> {
    for case in 0..40 {
        let (html, css) = page(case);
        let conversion = gate(case).convert(&ConversionInput::new(&html).with_css(&css))?;
        assert_ne!(conversion.verdict(), Verdict::Block, "case {case}: {:?}", conversion.report.fatal);
        assert!(conversion.report.errors.is_empty(), "case {case}: {:?}", conversion.report.errors);
        assert_well_formed(&conversion.graph, 5, case);
        for (_, embed) in conversion.graph.embeds() {
            assert!(!weave_ir::sanitize::needs_sanitizing(embed), "case {case}: unsafe embed");
        }
    }
    Ok(())
}

#[test]
fn generated_pages_keep_escaped_class_names() -> Result<()> {
    let escaped = ["md:flex", "col-1/2", "sm:p-2.5"];
    let mut seen = 0;
    for case in 0..40 {
        let (html, css) = page(case);
        let conversion = gate(case).convert(&ConversionInput::new(&html).with_css(&css))?;
        for node in &conversion.graph.nodes {
            for class in node.classes.iter().filter(|class| escaped.contains(&class.as_str())) {
                seen += 1;
                assert!(conversion.graph.style_named(class).is_some(), "case {case}: no style for {class}");
            }
        }
        for fix in &conversion.report.fixes {
            assert_ne!(fix.code, IssueCode::OrphanedState, "case {case}: {}", fix.description);
            assert_ne!(fix.code, IssueCode::DanglingClassRef, "case {case}: {}", fix.description);
        }
    }
    assert!(seen > 0, "no generated node carried an escaped class");
    Ok(())
}

#[test]
fn deeply_nested_pages_are_bounded() -> Result<()> {
    for (case, levels) in [(1u64, 40usize), (2, 300), (3, 1_500), (4, 12_000)] {
        let html = deep_page(case, levels);
        let mut rng = Lcg(case);
        let css = stylesheet(&mut rng);
        let conversion = gate(case).convert(&ConversionInput::new(&html).with_css(&css))?;

        let index = GraphIndex::new(&conversion.graph.nodes);
        assert!(
            index.depths().into_iter().all(|depth| depth <= 5),
            "case {case}: too deep"
        );
        assert!(
            conversion.report.fixes.iter().any(|fix| fix.code == IssueCode::DepthExceeded),
            "case {case}: nothing collapsed"
        );
        if conversion.verdict() == Verdict::Block {
            for issue in &conversion.report.fatal {
                assert!(
                    matches!(issue.code, IssueCode::EmbedOverLimit | IssueCode::SizeLimitExceeded),
                    "case {case}: {issue}"
                );
            }
        } else {
            assert!(conversion.report.errors.is_empty(), "case {case}: {:?}", conversion.report.errors);
            assert_well_formed(&conversion.graph, 5, case);
        }
        for (_, embed) in conversion.graph.embeds() {
            assert!(!weave_ir::sanitize::needs_sanitizing(embed), "case {case}: unsafe embed");
        }
    }
    Ok(())
}

#[test]
fn sanitizing_a_clean_graph_changes_nothing() -> Result<()> {
    for case in 0..20 {
        let (html, css) = page(case);
        let gate = gate(case);
        let conversion = gate.convert(&ConversionInput::new(&html).with_css(&css))?;
        let mut ids = IdGenerator::seeded(case + 1000);
        let again = sanitize(&conversion.graph, gate.profile(), &mut ids);
        assert!(!again.changed(), "case {case}: {:?}", again.fixes);
        assert_eq!(again.graph, conversion.graph);
    }
    Ok(())
}

#[test]
fn conversions_are_deterministic_per_seed() -> Result<()> {
    for case in 0..10 {
        let (html, css) = page(case);
        let input = ConversionInput::new(&html).with_css(&css);
        let first = gate(case).convert(&input)?;
        let second = gate(case).convert(&input)?;
        assert_eq!(first.document, second.document, "case {case}");
        assert_eq!(first.artifacts, second.artifacts, "case {case}");
    }
    Ok(())
}

#[test]
fn chunks_reassemble_to_the_source() {
    for case in 0..30 {
        let (html, css) = page(case);
        let ceiling = 40 + (case as usize * 7) % 200;
        for (content, kind) in [(css.as_str(), ChunkKind::Css), (html.as_str(), ChunkKind::Html)] {
            let chunk_plan = plan("artifact", content, kind, ceiling);
            assert_eq!(chunk_plan.reassemble(), content, "case {case}");
            assert!(chunk_plan.verify(), "case {case}");
            assert_eq!(chunk_plan.source_size, content.len());
            let indices: Vec<usize> = chunk_plan.chunks.iter().map(|chunk| chunk.index).collect();
            assert_eq!(indices, (0..chunk_plan.chunks.len()).collect::<Vec<_>>());
        }
    }
}

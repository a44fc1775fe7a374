//! The safety gate: runs the whole pipeline and reduces every finding to
//! one verdict.
//!
//! `received -> routed -> built -> validated -> (sanitized -> revalidated)*
//! -> chunked -> reported`. The repair loop only runs while error or fatal
//! findings remain and the previous round changed something, and never more
//! than `limits.repair_iterations` times.

use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use weave_config::WeaveConfig;

use crate::chunk::{ChunkKind, ChunkPlan, enforce_ceiling, plan};
use crate::css::index::ClassIndex;
use crate::css::router::{CssRouter, rename_classes_in_css};
use crate::css::vars::{TokenManifest, VarResolver};
use crate::error::{InputKind, IrError, ParseError, Result};
use crate::graph::wire::XscpData;
use crate::graph::{Graph, GraphBuilder, IdGenerator};
use crate::html::normalize;
use crate::preflight::{ArtifactSize, IssueCode, Severity, ValidationIssue, has_severity, validate};
use crate::profile::TargetProfile;
use crate::report::{EmbedSize, GateState, SafetyReport, Verdict};
use crate::sanitize::{AppliedFix, Sanitizer, sanitize_markup};
use crate::schema::validate_document;

pub const CSS_EMBED: &str = "css-embed";
pub const JS_EMBED: &str = "js-embed";
pub const HTML_EMBED: &str = "html-embed";

/// Raw inputs of one conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionInput<'a> {
    pub html: &'a str,
    pub css: &'a str,
    pub tokens: Option<&'a TokenManifest>,
}

impl<'a> ConversionInput<'a> {
    pub fn new(html: &'a str) -> Self {
        Self {
            html,
            css: "",
            tokens: None,
        }
    }

    pub fn with_css(mut self, css: &'a str) -> Self {
        self.css = css;
        self
    }

    pub fn with_tokens(mut self, tokens: &'a TokenManifest) -> Self {
        self.tokens = Some(tokens);
        self
    }
}

/// Side-channel code the builder receives as separate embeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmbedArtifacts {
    pub css: String,
    pub js: String,
    pub html: String,
}

impl EmbedArtifacts {
    fn named(&self) -> [(&'static str, &str, ChunkKind); 3] {
        [
            (CSS_EMBED, self.css.as_str(), ChunkKind::Css),
            (JS_EMBED, self.js.as_str(), ChunkKind::Js),
            (HTML_EMBED, self.html.as_str(), ChunkKind::Html),
        ]
    }

    fn sizes(&self) -> Vec<ArtifactSize> {
        self.named()
            .into_iter()
            .filter(|(_, content, _)| !content.is_empty())
            .map(|(name, content, _)| ArtifactSize {
                name: name.to_string(),
                size: content.len(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Conversion {
    pub document: XscpData,
    pub graph: Graph,
    pub artifacts: EmbedArtifacts,
    pub report: SafetyReport,
}

impl Conversion {
    pub fn verdict(&self) -> Verdict {
        self.report.verdict
    }
}

#[derive(Debug, Clone, Default)]
pub struct SafetyGate {
    profile: TargetProfile,
    seed: Option<u64>,
}

struct Trace(Vec<GateState>);

impl Trace {
    fn enter(&mut self, state: GateState) {
        debug!(state = ?state, "gate state");
        self.0.push(state);
    }
}

impl SafetyGate {
    pub fn new(profile: TargetProfile) -> Self {
        Self {
            profile,
            seed: None,
        }
    }

    pub fn from_config(config: &WeaveConfig) -> Self {
        Self {
            profile: TargetProfile::from_config(config),
            seed: config.ids.seed,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    /// Convert one input with a fresh id generator.
    pub fn convert(&self, input: &ConversionInput<'_>) -> Result<Conversion> {
        let mut ids = IdGenerator::from_seed(self.seed);
        self.convert_with_ids(input, &mut ids)
    }

    /// Convert independent inputs in parallel; each run owns its id
    /// generator (seeded runs offset the seed by input position).
    pub fn convert_batch(&self, inputs: &[ConversionInput<'_>]) -> Vec<Result<Conversion>> {
        inputs
            .par_iter()
            .enumerate()
            .map(|(position, input)| {
                let seed = self.seed.map(|seed| seed.wrapping_add(position as u64));
                let mut ids = IdGenerator::from_seed(seed);
                self.convert_with_ids(input, &mut ids)
            })
            .collect()
    }

    pub fn convert_with_ids(&self, input: &ConversionInput<'_>, ids: &mut IdGenerator) -> Result<Conversion> {
        let profile = &self.profile;
        let limits = &profile.limits;
        let mut trace = Trace(Vec::new());
        trace.enter(GateState::Received);
        check_input_size(input.html, InputKind::Html, limits.max_input_bytes)?;
        check_input_size(input.css, InputKind::Css, limits.max_input_bytes)?;

        let markup = normalize(input.html, input.css, profile)?;
        let mut notes: Vec<ValidationIssue> = markup
            .stylesheet
            .warnings
            .iter()
            .map(|warning| ValidationIssue::new(IssueCode::CssRecovered, warning.clone()))
            .collect();
        let vars = VarResolver::new(&markup.stylesheet.root_vars, input.tokens);
        let routed = CssRouter::new(profile, &vars).route(&markup.stylesheet);
        notes.extend(
            routed
                .warnings
                .iter()
                .map(|warning| ValidationIssue::new(IssueCode::UnresolvedVariable, warning.clone())),
        );
        let routing = routed.summary();
        trace.enter(GateState::Routed);

        let index = ClassIndex::from_native(&routed.native);
        let built = GraphBuilder::new(ids).build(&markup.nodes, &index, routed.embed_css);
        let mut graph = built.graph;
        let mut fixes: Vec<AppliedFix> = Vec::new();
        let mut artifacts = EmbedArtifacts {
            css: built.embed_css,
            js: markup.js_embed,
            html: markup.html_embed,
        };
        let cleaned = sanitize_markup(&artifacts.html);
        if cleaned != artifacts.html {
            artifacts.html = cleaned;
            info!(target: "weave::repair", code = %IssueCode::UnsafeEmbedMarkup, "rewrote unsafe markup in the {HTML_EMBED}");
            fixes.push(AppliedFix {
                code: IssueCode::UnsafeEmbedMarkup,
                description: format!("rewrote unsafe markup in the {HTML_EMBED}"),
            });
        }
        trace.enter(GateState::Built);

        let mut issues = validate(&graph, &artifacts.sizes(), profile);
        trace.enter(GateState::Validated);
        let mut rounds = 0;
        while has_severity(&issues, Severity::Error) && rounds < limits.repair_iterations {
            rounds += 1;
            let outcome = Sanitizer::new(profile, ids).run(&graph, &issues);
            trace.enter(GateState::Sanitized);
            if !outcome.changed() {
                break;
            }
            if !outcome.renames.is_empty() {
                artifacts.css = rename_classes_in_css(&artifacts.css, &outcome.renames);
            }
            fixes.extend(outcome.fixes);
            graph = outcome.graph;
            issues = validate(&graph, &artifacts.sizes(), profile);
            trace.enter(GateState::Revalidated);
        }
        if has_severity(&issues, Severity::Error) {
            warn!(rounds, remaining = issues.len(), "repair loop ended with unresolved issues");
        }

        let mut chunking: Vec<ChunkPlan> = Vec::new();
        for (name, content, kind) in artifacts.named() {
            if content.len() <= limits.embed_hard_limit {
                continue;
            }
            let chunk_plan = plan(name, content, kind, profile.chunk_ceiling());
            if let Err(err) = enforce_ceiling(&chunk_plan, limits.embed_hard_limit) {
                issues.push(ValidationIssue::new(IssueCode::SizeLimitExceeded, err.to_string()).about(name));
            }
            chunking.push(chunk_plan);
        }
        trace.enter(GateState::Chunked);

        let document = XscpData::from_graph(&graph, &profile.document_type);
        match validate_document(&document) {
            Ok(()) => {}
            Err(IrError::Schema(message)) => {
                issues.push(ValidationIssue::new(IssueCode::SchemaViolation, message));
            }
            Err(err) => return Err(err),
        }

        let embed_sizes = embed_sizes(&graph, &artifacts, profile);
        notes.extend(issues);
        let mut report = SafetyReport::new(notes, fixes);
        report.embed_sizes = embed_sizes;
        report.chunking = chunking;
        report.promotions = markup.promotions;
        report.routing = routing;
        trace.enter(GateState::Reported);
        report.trace = trace.0;

        info!(
            verdict = %report.verdict,
            nodes = graph.nodes.len(),
            styles = graph.styles.len(),
            fixes = report.fixes.len(),
            fatal = report.fatal.len(),
            "conversion finished"
        );
        Ok(Conversion {
            document,
            graph,
            artifacts,
            report,
        })
    }

    /// Validate an existing document without repairing it.
    pub fn check_document(&self, value: Value) -> Result<SafetyReport> {
        let mut trace = Trace(Vec::new());
        trace.enter(GateState::Received);
        let mut issues = Vec::new();
        match crate::schema::validate_document_value(&value) {
            Ok(()) => {}
            Err(IrError::Schema(message)) => {
                issues.push(ValidationIssue::new(IssueCode::SchemaViolation, message));
            }
            Err(err) => return Err(err),
        }
        let graph = XscpData::from_value(value)?.into_graph();
        issues.extend(validate(&graph, &[], &self.profile));
        trace.enter(GateState::Validated);
        let mut report = SafetyReport::new(issues, Vec::new());
        report.embed_sizes = embed_sizes(&graph, &EmbedArtifacts::default(), &self.profile);
        trace.enter(GateState::Reported);
        report.trace = trace.0;
        info!(verdict = %report.verdict, nodes = graph.nodes.len(), "document checked");
        Ok(report)
    }
}

fn check_input_size(content: &str, input: InputKind, limit: usize) -> std::result::Result<(), ParseError> {
    if content.len() > limit {
        return Err(ParseError::new(
            input,
            limit,
            format!("input is {} bytes, over the {limit} byte limit", content.len()),
        ));
    }
    Ok(())
}

fn embed_sizes(graph: &Graph, artifacts: &EmbedArtifacts, profile: &TargetProfile) -> Vec<EmbedSize> {
    let limits = &profile.limits;
    let size = |artifact: String, size: usize| EmbedSize {
        artifact,
        size,
        over_soft_limit: size > limits.embed_soft_limit,
        over_hard_limit: size > limits.embed_hard_limit,
    };
    let mut sizes: Vec<EmbedSize> = graph
        .embeds()
        .map(|(id, html)| size(format!("node {id}"), html.len()))
        .collect();
    sizes.extend(
        artifacts
            .sizes()
            .into_iter()
            .map(|artifact| size(artifact.name, artifact.size)),
    );
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SafetyGate {
        SafetyGate::new(TargetProfile::default()).with_seed(Some(7))
    }

    #[test]
    fn simple_markup_passes() {
        let input = ConversionInput::new("<div class=\"card\"><p>Hello</p></div>")
            .with_css(".card { padding: 8px; } .card:hover { color: red; }");
        let conversion = gate().convert(&input).unwrap();
        assert_eq!(conversion.verdict(), Verdict::Pass, "{:?}", conversion.report);
        assert_eq!(
            conversion.report.trace,
            vec![
                GateState::Received,
                GateState::Routed,
                GateState::Built,
                GateState::Validated,
                GateState::Chunked,
                GateState::Reported,
            ]
        );
        let style = conversion.graph.style_named("card").unwrap();
        assert_eq!(style.variants.get("hover").map(String::as_str), Some("color: red;"));
    }

    #[test]
    fn oversized_input_is_a_parse_error() {
        let mut config = WeaveConfig::default();
        config.limits.max_input_bytes = 10;
        let gate = SafetyGate::from_config(&config);
        let err = gate
            .convert(&ConversionInput::new("<p>far too long for the limit</p>"))
            .unwrap_err();
        assert!(matches!(err, IrError::Parse(ParseError { input: InputKind::Html, .. })));
    }
}

//! The safety report handed back with every conversion.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::chunk::ChunkPlan;
use crate::html::Promotion;
use crate::preflight::{Severity, ValidationIssue};
use crate::sanitize::AppliedFix;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Warn,
    Block,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "pass",
            Verdict::Warn => "warn",
            Verdict::Block => "block",
        })
    }
}

/// States the safety gate moves through, in the order they were visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateState {
    Received,
    Routed,
    Built,
    Validated,
    Sanitized,
    Revalidated,
    Chunked,
    Reported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedSize {
    pub artifact: String,
    pub size: usize,
    pub over_soft_limit: bool,
    pub over_hard_limit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetyReport {
    pub verdict: Verdict,
    pub fatal: Vec<ValidationIssue>,
    /// Non-fatal issues the repair loop could not resolve.
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub fixes: Vec<AppliedFix>,
    pub embed_sizes: Vec<EmbedSize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chunking: Vec<ChunkPlan>,
    pub promotions: Vec<Promotion>,
    /// Route decisions per reason code.
    pub routing: BTreeMap<String, usize>,
    pub trace: Vec<GateState>,
}

impl SafetyReport {
    /// Sort `issues` by severity and derive the verdict.
    pub fn new(issues: Vec<ValidationIssue>, fixes: Vec<AppliedFix>) -> Self {
        let mut fatal = Vec::new();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for issue in issues {
            match issue.severity {
                Severity::Fatal => fatal.push(issue),
                Severity::Error => errors.push(issue),
                Severity::Warning => warnings.push(issue),
            }
        }
        let verdict = if !fatal.is_empty() {
            Verdict::Block
        } else if errors.is_empty() && warnings.is_empty() && fixes.is_empty() {
            Verdict::Pass
        } else {
            Verdict::Warn
        };
        Self {
            verdict,
            fatal,
            errors,
            warnings,
            fixes,
            embed_sizes: Vec::new(),
            chunking: Vec::new(),
            promotions: Vec::new(),
            routing: BTreeMap::new(),
            trace: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.verdict == Verdict::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::IssueCode;

    #[test]
    fn verdict_follows_the_worst_finding() {
        assert_eq!(SafetyReport::new(Vec::new(), Vec::new()).verdict, Verdict::Pass);

        let warning = ValidationIssue::new(IssueCode::EmbedNearLimit, "close");
        assert_eq!(SafetyReport::new(vec![warning.clone()], Vec::new()).verdict, Verdict::Warn);

        let fix = AppliedFix {
            code: IssueCode::ReservedClassName,
            description: "renamed".into(),
        };
        assert_eq!(SafetyReport::new(Vec::new(), vec![fix]).verdict, Verdict::Warn);

        let fatal = ValidationIssue::new(IssueCode::Cycle, "loop");
        let report = SafetyReport::new(vec![warning, fatal], Vec::new());
        assert_eq!(report.verdict, Verdict::Block);
        assert!(report.is_blocked());
        assert_eq!(report.fatal.len(), 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn serializes_lowercase_verdict_and_codes() {
        let report = SafetyReport::new(
            vec![ValidationIssue::new(IssueCode::DepthExceeded, "deep").about("n1")],
            Vec::new(),
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["verdict"], "warn");
        assert_eq!(value["errors"][0]["code"], "depth-exceeded");
        assert_eq!(value["errors"][0]["severity"], "error");
        assert_eq!(value["errors"][0]["subject"], "n1");
        assert!(value.get("chunking").is_none());
    }
}

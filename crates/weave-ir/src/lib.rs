//! HTML and CSS in, a validated visual-builder clipboard document out.

pub mod chunk;
pub mod css;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod graph;
pub mod html;
pub mod preflight;
pub mod profile;
pub mod report;
pub mod sanitize;
pub mod schema;

pub use chunk::{ChunkKind, ChunkPlan, EmbedChunk};
pub use css::TokenManifest;
pub use error::{InputKind, IrError, ParseError, Result};
pub use gate::{Conversion, ConversionInput, EmbedArtifacts, SafetyGate};
pub use graph::wire::XscpData;
pub use graph::{Graph, GraphNode, GraphStyle, IdGenerator, NodeKind};
pub use preflight::{IssueCode, Severity, ValidationIssue};
pub use profile::TargetProfile;
pub use report::{GateState, SafetyReport, Verdict};
pub use sanitize::{AppliedFix, SanitizeOutcome, sanitize};

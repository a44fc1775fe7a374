//! Stylesheet side of the pipeline: scanning, variable resolution, routing
//! and the per-class index the graph builder consumes.

pub mod index;
pub mod parser;
pub mod router;
pub mod selector;
pub mod vars;

pub use index::{ClassIndex, ClassIndexEntry};
pub use parser::{
    CssRule, Declaration, ParsedStylesheet, RuleKind, RuleSource, declarations_to_css,
    parse_declarations, parse_stylesheet,
};
pub use router::{
    CssRouter, Destination, NativeRule, RouteDecision, RouteReason, RoutedStylesheet,
    rename_classes_in_css,
};
pub use vars::{DesignToken, Resolved, TokenManifest, VarResolver};

//! Native-versus-embed routing of parsed rules.
//!
//! Checks run in a fixed order and the first selector-level reason decides
//! the whole rule. Rules with a natively representable selector are then
//! checked declaration by declaration, which may split them.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::parser::{CssRule, Declaration, ParsedStylesheet, RuleKind};
use super::selector::{parse_compound, split_compounds};
use super::vars::VarResolver;
use crate::diagnostics::diagnostics_enabled;
use crate::profile::TargetProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteReason {
    PseudoElement,
    ComplexPseudoClass,
    Combinator,
    IdSelector,
    AttributeSelector,
    TagSelector,
    UniversalSelector,
    EscapedClassName,
    NoClassAnchor,
    CompoundClass,
    UnsupportedPseudoClass,
    AtRule,
    NestedRule,
    RootScope,
    NonStandardBreakpoint,
    VendorPrefix,
    ModernColor,
    UnparseableColor,
    ViewportMath,
    Important,
    CustomProperty,
}

impl RouteReason {
    pub fn code(self) -> &'static str {
        match self {
            RouteReason::PseudoElement => "pseudo-element",
            RouteReason::ComplexPseudoClass => "complex-pseudo-class",
            RouteReason::Combinator => "combinator",
            RouteReason::IdSelector => "id-selector",
            RouteReason::AttributeSelector => "attribute-selector",
            RouteReason::TagSelector => "tag-selector",
            RouteReason::UniversalSelector => "universal-selector",
            RouteReason::EscapedClassName => "escaped-class-name",
            RouteReason::NoClassAnchor => "no-class-anchor",
            RouteReason::CompoundClass => "compound-class",
            RouteReason::UnsupportedPseudoClass => "unsupported-pseudo-class",
            RouteReason::AtRule => "at-rule",
            RouteReason::NestedRule => "nested-rule",
            RouteReason::RootScope => "root-scope",
            RouteReason::NonStandardBreakpoint => "non-standard-breakpoint",
            RouteReason::VendorPrefix => "vendor-prefix",
            RouteReason::ModernColor => "modern-color",
            RouteReason::UnparseableColor => "unparseable-color",
            RouteReason::ViewportMath => "viewport-math",
            RouteReason::Important => "important",
            RouteReason::CustomProperty => "custom-property",
        }
    }
}

impl fmt::Display for RouteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Native,
    Embed,
    Split,
}

/// Routing outcome for one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    pub destination: Destination,
    pub reasons: Vec<RouteReason>,
    pub order: usize,
}

/// Declarations that land on a class (or one of its variants).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NativeRule {
    pub class: String,
    pub variant: Option<String>,
    pub declarations: Vec<Declaration>,
    pub order: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutedStylesheet {
    pub native: Vec<NativeRule>,
    /// Aggregated CSS for everything that could not be expressed natively.
    pub embed_css: String,
    pub decisions: Vec<RouteDecision>,
    pub warnings: Vec<String>,
}

impl RoutedStylesheet {
    /// Number of decisions carrying each reason code.
    pub fn summary(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for decision in &self.decisions {
            for reason in &decision.reasons {
                *counts.entry(reason.code().to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

const COMPLEX_PSEUDO_CLASSES: &[&str] = &["has", "is", "where", "not", "matches", "-webkit-any"];
const MODERN_COLOR_FUNCTIONS: &[&str] = &["oklch", "oklab", "lab", "lch", "color-mix", "color"];
const MATH_FUNCTIONS: &[&str] = &["clamp", "calc", "min", "max"];
const VIEWPORT_UNITS: &[&str] = &[
    "vw", "vh", "vmin", "vmax", "vi", "vb", "dvw", "dvh", "svw", "svh", "lvw", "lvh",
];
const VENDOR_PREFIXES: &[&str] = &["-webkit-", "-moz-", "-ms-", "-o-"];
const COLOR_KEYWORDS: &[&str] = &[
    "transparent",
    "currentcolor",
    "inherit",
    "initial",
    "unset",
    "revert",
    "revert-layer",
    "none",
];

fn is_color_property(property: &str) -> bool {
    matches!(
        property,
        "color"
            | "background-color"
            | "border-color"
            | "outline-color"
            | "text-decoration-color"
            | "caret-color"
            | "accent-color"
            | "column-rule-color"
            | "fill"
            | "stroke"
    ) || (property.starts_with("border-") && property.ends_with("-color"))
}

/// Classifies rules against a [`TargetProfile`].
pub struct CssRouter<'a> {
    profile: &'a TargetProfile,
    vars: &'a VarResolver,
}

impl<'a> CssRouter<'a> {
    pub fn new(profile: &'a TargetProfile, vars: &'a VarResolver) -> Self {
        Self { profile, vars }
    }

    pub fn route(&self, sheet: &ParsedStylesheet) -> RoutedStylesheet {
        let mut routed = RoutedStylesheet::default();
        let mut pieces: Vec<(Option<String>, String)> = Vec::new();
        for rule in &sheet.rules {
            let decision = self.route_rule(rule, &mut routed, &mut pieces);
            if diagnostics_enabled("css") {
                debug!(
                    selector = %decision.selector,
                    destination = ?decision.destination,
                    reasons = ?decision.reasons,
                    "diagnostics: routed rule"
                );
            }
            routed.decisions.push(decision);
        }
        routed.embed_css = assemble_embed(&pieces);
        routed
    }

    fn route_rule(
        &self,
        rule: &CssRule,
        routed: &mut RoutedStylesheet,
        pieces: &mut Vec<(Option<String>, String)>,
    ) -> RouteDecision {
        let mut decision = RouteDecision {
            selector: rule.selector.clone(),
            media: rule.media.clone(),
            destination: Destination::Embed,
            reasons: Vec::new(),
            order: rule.order,
        };
        let breakpoint = match rule.media.as_deref() {
            Some(query) => match self.profile.breakpoint_for_query(query) {
                Some(bp) => Some(bp),
                None => {
                    decision.reasons.push(RouteReason::NonStandardBreakpoint);
                    pieces.push((rule.media.clone(), rule.to_css()));
                    return decision;
                }
            },
            None => None,
        };
        let rule_reason = match &rule.kind {
            RuleKind::AtRule { .. } => Some(RouteReason::AtRule),
            RuleKind::Nested => Some(RouteReason::NestedRule),
            RuleKind::Root => Some(RouteReason::RootScope),
            RuleKind::Style => None,
        };
        if let Some(reason) = rule_reason {
            decision.reasons.push(reason);
            pieces.push((rule.media.clone(), rule.to_css()));
            return decision;
        }
        let (class, state) = match self.classify_selector(&rule.selector) {
            Ok(anchor) => anchor,
            Err(reason) => {
                decision.reasons.push(reason);
                pieces.push((rule.media.clone(), rule.to_css()));
                return decision;
            }
        };

        let mut native = Vec::new();
        let mut embedded = Vec::new();
        for declaration in &rule.declarations {
            match self.route_declaration(declaration, &rule.selector, &mut routed.warnings) {
                Ok(resolved) => native.push(resolved),
                Err(reason) => {
                    if !decision.reasons.contains(&reason) {
                        decision.reasons.push(reason);
                    }
                    embedded.push(declaration.clone());
                }
            }
        }
        decision.destination = match (native.is_empty(), embedded.is_empty()) {
            (false, true) | (true, true) => Destination::Native,
            (true, false) => Destination::Embed,
            (false, false) => Destination::Split,
        };
        if !embedded.is_empty() {
            pieces.push((rule.media.clone(), rule.with_declarations(&embedded)));
        }
        if !native.is_empty() || embedded.is_empty() {
            routed.native.push(NativeRule {
                class,
                variant: TargetProfile::variant_key(breakpoint, state.as_deref()),
                declarations: native,
                order: rule.order,
            });
        }
        decision
    }

    /// Class anchor and optional state key of a natively representable selector.
    pub fn classify_selector(&self, selector: &str) -> Result<(String, Option<String>), RouteReason> {
        let (compounds, explicit) = split_compounds(selector);
        let parsed: Vec<_> = compounds.iter().map(|c| parse_compound(c)).collect();
        if parsed.iter().any(|c| c.pseudo_element) {
            return Err(RouteReason::PseudoElement);
        }
        if parsed.iter().any(|c| {
            c.functional
                .iter()
                .any(|f| COMPLEX_PSEUDO_CLASSES.contains(&f.as_str()))
        }) {
            return Err(RouteReason::ComplexPseudoClass);
        }
        if explicit || parsed.len() != 1 {
            return Err(RouteReason::Combinator);
        }
        let compound = &parsed[0];
        if compound.has_id {
            return Err(RouteReason::IdSelector);
        }
        if compound.has_attribute {
            return Err(RouteReason::AttributeSelector);
        }
        match compound.tag.as_deref() {
            Some("*") => return Err(RouteReason::UniversalSelector),
            Some(_) => return Err(RouteReason::TagSelector),
            None => {}
        }
        if compound.irregular {
            return Err(RouteReason::EscapedClassName);
        }
        let class = match compound.classes.as_slice() {
            [] => return Err(RouteReason::NoClassAnchor),
            [class] => class.clone(),
            _ => return Err(RouteReason::CompoundClass),
        };
        if !compound.functional.is_empty() || compound.pseudo_classes.len() > 1 {
            return Err(RouteReason::UnsupportedPseudoClass);
        }
        let state = match compound.pseudo_classes.first() {
            Some(pseudo) => Some(
                self.profile
                    .state_key(pseudo)
                    .ok_or(RouteReason::UnsupportedPseudoClass)?
                    .to_string(),
            ),
            None => None,
        };
        Ok((class, state))
    }

    /// Declaration with `var()` expanded, or the reason it must be embedded.
    fn route_declaration(
        &self,
        declaration: &Declaration,
        selector: &str,
        warnings: &mut Vec<String>,
    ) -> Result<Declaration, RouteReason> {
        let property = declaration.property.as_str();
        if property.starts_with("--") {
            return Err(RouteReason::CustomProperty);
        }
        let lower_value = declaration.value.to_ascii_lowercase();
        if property.starts_with('-') || VENDOR_PREFIXES.iter().any(|p| contains_word(&lower_value, p)) {
            return Err(RouteReason::VendorPrefix);
        }
        let resolved = self.vars.resolve(&declaration.value);
        let value = resolved.value.to_ascii_lowercase();
        if MODERN_COLOR_FUNCTIONS
            .iter()
            .any(|f| contains_function(&value, f))
        {
            return Err(RouteReason::ModernColor);
        }
        if is_color_property(property)
            && resolved.unresolved.is_empty()
            && !COLOR_KEYWORDS.contains(&value.trim())
            && csscolorparser::parse(value.trim()).is_err()
        {
            return Err(RouteReason::UnparseableColor);
        }
        if MATH_FUNCTIONS.iter().any(|f| contains_function(&value, f)) && has_viewport_unit(&value)
        {
            return Err(RouteReason::ViewportMath);
        }
        if declaration.important {
            return Err(RouteReason::Important);
        }
        for name in &resolved.unresolved {
            warnings.push(format!(
                "unresolved custom property {name} in `{selector}` kept verbatim"
            ));
        }
        Ok(Declaration {
            property: declaration.property.clone(),
            value: resolved.value,
            important: false,
        })
    }
}

/// Whether `value` calls CSS function `name` (word-bounded).
fn contains_function(value: &str, name: &str) -> bool {
    contains_word(value, &format!("{name}("))
}

/// Whether `needle` occurs in `value` without an identifier character before it.
fn contains_word(value: &str, needle: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = value[from..].find(&needle) {
        let at = from + pos;
        let bounded = value[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        if bounded {
            return true;
        }
        from = at + needle.len();
    }
    false
}

/// Whether a number in `value` carries a viewport-relative unit.
fn has_viewport_unit(value: &str) -> bool {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            if VIEWPORT_UNITS.contains(&&value[start..i]) {
                return true;
            }
        } else {
            i += 1;
        }
    }
    false
}

/// Join embed pieces, grouping consecutive pieces that share a media query.
fn assemble_embed(pieces: &[(Option<String>, String)]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < pieces.len() {
        let media = &pieces[i].0;
        let mut j = i;
        while j < pieces.len() && &pieces[j].0 == media {
            j += 1;
        }
        match media {
            Some(query) => {
                out.push_str(&format!("@media {query} {{\n"));
                for (_, css) in &pieces[i..j] {
                    out.push_str("  ");
                    out.push_str(css);
                    out.push('\n');
                }
                out.push_str("}\n");
            }
            None => {
                for (_, css) in &pieces[i..j] {
                    out.push_str(css);
                    out.push('\n');
                }
            }
        }
        i = j;
    }
    out
}

/// Rewrite `.old` class selectors to `.new` in embed CSS, outside strings.
pub fn rename_classes_in_css(css: &str, renames: &BTreeMap<String, String>) -> String {
    if renames.is_empty() {
        return css.to_string();
    }
    let mut out = String::with_capacity(css.len());
    let chars: Vec<char> = css.chars().collect();
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii();
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            out.push(c);
            i += 1;
            continue;
        }
        let after_number = i > 0 && chars[i - 1].is_ascii_digit();
        if c == '.' && !after_number {
            let mut end = i + 1;
            while end < chars.len() && is_ident(chars[end]) {
                end += 1;
            }
            let name: String = chars[i + 1..end].iter().collect();
            if let Some(new_name) = renames.get(&name) {
                out.push('.');
                out.push_str(new_name);
                i = end;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::parser::parse_stylesheet;

    fn route(css: &str) -> RoutedStylesheet {
        let profile = TargetProfile::default();
        let sheet = parse_stylesheet(css).unwrap();
        let vars = VarResolver::new(&sheet.root_vars, None);
        CssRouter::new(&profile, &vars).route(&sheet)
    }

    #[test]
    fn simple_class_rules_are_native() {
        let routed = route(".btn { color: red; padding: 4px } .btn:active { color: blue }");
        assert_eq!(routed.native.len(), 2);
        assert_eq!(routed.native[1].variant.as_deref(), Some("pressed"));
        assert!(routed.embed_css.is_empty());
        assert!(routed.decisions.iter().all(|d| d.destination == Destination::Native));
    }

    #[test]
    fn selector_shapes_route_to_embed_in_order() {
        let routed = route(
            ".a::before { content: '' } .b:has(.c) { color: red } .d > .e { color: red } #f { color: red } [g] { color: red } p { color: red } .h.i { color: red } .j:nth-child(2) { color: red }",
        );
        let reasons: Vec<_> = routed.decisions.iter().map(|d| d.reasons[0]).collect();
        assert_eq!(
            reasons,
            vec![
                RouteReason::PseudoElement,
                RouteReason::ComplexPseudoClass,
                RouteReason::Combinator,
                RouteReason::IdSelector,
                RouteReason::AttributeSelector,
                RouteReason::TagSelector,
                RouteReason::CompoundClass,
                RouteReason::UnsupportedPseudoClass,
            ]
        );
        assert!(routed.native.is_empty());
    }

    #[test]
    fn standard_breakpoints_become_variants() {
        let routed = route("@media (max-width: 767px) { .card { padding: 8px } .card:hover { color: red } }");
        assert_eq!(routed.native[0].variant.as_deref(), Some("small"));
        assert_eq!(routed.native[1].variant.as_deref(), Some("small_hover"));
    }

    #[test]
    fn non_standard_media_goes_to_embed_whole() {
        let routed = route("@media (max-width: 999px) { .a { color: red } .b { margin: 0 } }");
        assert!(routed.native.is_empty());
        assert!(
            routed
                .decisions
                .iter()
                .all(|d| d.reasons == vec![RouteReason::NonStandardBreakpoint])
        );
        assert_eq!(
            routed.embed_css,
            "@media (max-width: 999px) {\n  .a { color: red; }\n  .b { margin: 0; }\n}\n"
        );
    }

    #[test]
    fn declarations_split_property_by_property() {
        let routed = route(
            ".x { color: oklch(70% 0.1 200); margin: 0; width: clamp(1rem, 5vw, 3rem); -webkit-appearance: none; padding: 0 !important }",
        );
        let decision = &routed.decisions[0];
        assert_eq!(decision.destination, Destination::Split);
        assert_eq!(
            decision.reasons,
            vec![
                RouteReason::ModernColor,
                RouteReason::ViewportMath,
                RouteReason::VendorPrefix,
                RouteReason::Important,
            ]
        );
        assert_eq!(routed.native[0].declarations.len(), 1);
        assert_eq!(routed.native[0].declarations[0].property, "margin");
        assert!(routed.embed_css.starts_with(".x { color: oklch("));
    }

    #[test]
    fn variables_resolve_for_native_and_stay_in_embed() {
        let routed = route(":root { --brand: #336699 } .a { color: var(--brand); margin: var(--gap) }");
        assert_eq!(routed.native[0].declarations[0].value, "#336699");
        assert_eq!(routed.native[0].declarations[1].value, "var(--gap)");
        assert_eq!(routed.warnings.len(), 1);
        assert!(routed.embed_css.contains(":root { --brand: #336699; }"));
    }

    #[test]
    fn unparseable_colors_are_embedded() {
        let routed = route(".a { color: notacolor } .b { color: currentColor } .c { background-color: #abc }");
        assert_eq!(routed.decisions[0].reasons, vec![RouteReason::UnparseableColor]);
        assert_eq!(routed.decisions[1].destination, Destination::Native);
        assert_eq!(routed.decisions[2].destination, Destination::Native);
    }

    #[test]
    fn renames_class_selectors_outside_strings() {
        let mut renames = BTreeMap::new();
        renames.insert("w-nav".to_string(), "u-w-nav".to_string());
        let css = ".w-nav > a { content: '.w-nav' } .w-navbar { x: 1 } a.w-nav{}";
        assert_eq!(
            rename_classes_in_css(css, &renames),
            ".u-w-nav > a { content: '.w-nav' } .w-navbar { x: 1 } a.u-w-nav{}"
        );
    }
}

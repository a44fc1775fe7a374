//! The target builder's fixed vocabulary, derived from [`WeaveConfig`].
//!
//! Breakpoints, pseudo-states and reserved prefixes are external-system
//! tables; pipeline stages only ever consult them through this type.

use weave_config::{LimitsConfig, WeaveConfig};

/// Separator between a breakpoint and a state inside one variant key (`medium_hover`).
pub const VARIANT_JOINER: char = '_';

/// Separator between a class name and a variant suffix in a suffixed style name (`btn:hover`).
pub const STATE_SUFFIX: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidthFeature {
    Max(u32),
    Min(u32),
}

#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub id: String,
    pub label: Option<String>,
    pub feature: WidthFeature,
}

#[derive(Debug, Clone)]
struct PseudoState {
    pseudo: String,
    key: String,
}

/// Constraints of the builder a document is produced for.
#[derive(Debug, Clone)]
pub struct TargetProfile {
    pub document_type: String,
    pub reserved_prefixes: Vec<String>,
    pub rename_prefix: String,
    pub synthesized_prefix: String,
    pub limits: LimitsConfig,
    breakpoints: Vec<Breakpoint>,
    states: Vec<PseudoState>,
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::from_config(&WeaveConfig::default())
    }
}

impl TargetProfile {
    pub fn from_config(config: &WeaveConfig) -> Self {
        let breakpoints = config
            .breakpoints
            .iter()
            .filter_map(|bp| {
                let feature = match (bp.max_width, bp.min_width) {
                    (Some(max), None) => WidthFeature::Max(max),
                    (None, Some(min)) => WidthFeature::Min(min),
                    _ => return None,
                };
                Some(Breakpoint {
                    id: bp.id.clone(),
                    label: bp.label.clone(),
                    feature,
                })
            })
            .collect();
        let states = config
            .pseudo_states
            .iter()
            .map(|state| PseudoState {
                pseudo: state.pseudo.to_ascii_lowercase(),
                key: state.key.clone(),
            })
            .collect();
        Self {
            document_type: config.builder.document_type.clone(),
            reserved_prefixes: config
                .builder
                .reserved_prefixes
                .iter()
                .filter(|prefix| !prefix.is_empty())
                .cloned()
                .collect(),
            rename_prefix: config.builder.rename_prefix.clone(),
            synthesized_prefix: config.builder.synthesized_prefix.clone(),
            limits: config.limits.clone(),
            breakpoints,
            states,
        }
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Variant key for a pseudo-class name (without colon), if the builder supports it.
    pub fn state_key(&self, pseudo: &str) -> Option<&str> {
        let pseudo = pseudo.trim_start_matches(':').to_ascii_lowercase();
        self.states
            .iter()
            .find(|state| state.pseudo == pseudo)
            .map(|state| state.key.as_str())
    }

    pub fn is_state_key(&self, key: &str) -> bool {
        self.states.iter().any(|state| state.key == key)
    }

    pub fn is_breakpoint(&self, id: &str) -> bool {
        self.breakpoints.iter().any(|bp| bp.id == id)
    }

    /// Breakpoint id for a media query, or `None` when the query is not one
    /// of the builder's standard breakpoints.
    pub fn breakpoint_for_query(&self, query: &str) -> Option<&str> {
        let feature = parse_width_query(query)?;
        self.breakpoints
            .iter()
            .find(|bp| bp.feature == feature)
            .map(|bp| bp.id.as_str())
    }

    /// Compose a variant key from an optional breakpoint and an optional state.
    pub fn variant_key(breakpoint: Option<&str>, state: Option<&str>) -> Option<String> {
        match (breakpoint, state) {
            (None, None) => None,
            (Some(bp), None) => Some(bp.to_string()),
            (None, Some(state)) => Some(state.to_string()),
            (Some(bp), Some(state)) => Some(format!("{bp}{VARIANT_JOINER}{state}")),
        }
    }

    /// Whether `key` is `breakpoint`, `state` or `breakpoint_state` in this vocabulary.
    pub fn is_legal_variant(&self, key: &str) -> bool {
        if self.is_breakpoint(key) || self.is_state_key(key) {
            return true;
        }
        match key.split_once(VARIANT_JOINER) {
            Some((bp, state)) => self.is_breakpoint(bp) && self.is_state_key(state),
            None => false,
        }
    }

    /// Split a suffixed state style name (`btn:hover`) into base name and
    /// variant key. A suffix that is not a variant key of this vocabulary
    /// (`md:flex`, `w-1/2:x`) leaves the name an ordinary class.
    pub fn split_state_style<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        let (base, suffix) = name.split_once(STATE_SUFFIX)?;
        (!base.is_empty() && self.is_legal_variant(suffix)).then_some((base, suffix))
    }

    pub fn reserved_prefix_of(&self, class_name: &str) -> Option<&str> {
        self.reserved_prefixes
            .iter()
            .find(|prefix| class_name.starts_with(prefix.as_str()))
            .map(String::as_str)
    }

    pub fn is_reserved(&self, class_name: &str) -> bool {
        self.reserved_prefix_of(class_name).is_some()
    }

    pub fn chunk_ceiling(&self) -> usize {
        self.limits.effective_chunk_ceiling()
    }
}


/// Reduce a media query to a single width feature, if it has that shape.
///
/// Accepts `(max-width: 991px)`, `screen and (max-width:991px)`,
/// `only screen and (min-width: 1280px)` and the range form `(width <= 991px)`.
pub fn parse_width_query(query: &str) -> Option<WidthFeature> {
    let mut q = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    loop {
        let stripped = ["only ", "screen and ", "all and ", "screen", "all"]
            .iter()
            .find_map(|prefix| q.strip_prefix(prefix).map(str::trim_start));
        match stripped {
            Some(rest) if rest.len() < q.len() => q = rest.to_string(),
            _ => break,
        }
    }
    let inner = q.strip_prefix('(')?.strip_suffix(')')?.trim();
    if inner.contains('(') || inner.contains(')') {
        return None;
    }
    if let Some((name, value)) = inner.split_once(':') {
        let px = parse_px(value)?;
        return match name.trim() {
            "max-width" => Some(WidthFeature::Max(px)),
            "min-width" => Some(WidthFeature::Min(px)),
            _ => None,
        };
    }
    if let Some(value) = inner.strip_prefix("width") {
        let value = value.trim_start();
        if let Some(rest) = value.strip_prefix("<=") {
            return parse_px(rest).map(WidthFeature::Max);
        }
        if let Some(rest) = value.strip_prefix(">=") {
            return parse_px(rest).map(WidthFeature::Min);
        }
    }
    None
}

fn parse_px(value: &str) -> Option<u32> {
    value.trim().strip_suffix("px")?.trim().parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_queries_map_onto_breakpoints() {
        let profile = TargetProfile::default();
        assert_eq!(profile.breakpoint_for_query("(max-width: 991px)"), Some("medium"));
        assert_eq!(
            profile.breakpoint_for_query("screen and (max-width:767px)"),
            Some("small")
        );
        assert_eq!(
            profile.breakpoint_for_query("only screen and (max-width: 479px)"),
            Some("tiny")
        );
        assert_eq!(profile.breakpoint_for_query("(width <= 991px)"), Some("medium"));
    }

    #[test]
    fn non_standard_queries_are_rejected() {
        let profile = TargetProfile::default();
        assert_eq!(profile.breakpoint_for_query("(max-width: 999px)"), None);
        assert_eq!(profile.breakpoint_for_query("(max-width: 991.98px)"), None);
        assert_eq!(
            profile.breakpoint_for_query("(min-width: 480px) and (max-width: 767px)"),
            None
        );
        assert_eq!(profile.breakpoint_for_query("print"), None);
        assert_eq!(profile.breakpoint_for_query("(prefers-color-scheme: dark)"), None);
    }

    #[test]
    fn variant_keys_follow_vocabulary() {
        let profile = TargetProfile::default();
        assert!(profile.is_legal_variant("medium"));
        assert!(profile.is_legal_variant("hover"));
        assert!(profile.is_legal_variant("small_pressed"));
        assert!(!profile.is_legal_variant("active"));
        assert!(!profile.is_legal_variant("hover_medium"));
        assert!(!profile.is_legal_variant("huge"));
        assert_eq!(profile.state_key(":active"), Some("pressed"));
        assert_eq!(
            TargetProfile::variant_key(Some("tiny"), Some("hover")).as_deref(),
            Some("tiny_hover")
        );
    }

    #[test]
    fn only_variant_suffixes_mark_state_styles() {
        let profile = TargetProfile::default();
        assert_eq!(profile.split_state_style("btn:hover"), Some(("btn", "hover")));
        assert_eq!(profile.split_state_style("btn:medium_focused"), Some(("btn", "medium_focused")));
        assert_eq!(profile.split_state_style("md:flex"), None);
        assert_eq!(profile.split_state_style("hover:underline"), None);
        assert_eq!(profile.split_state_style(":hover"), None);
        assert_eq!(profile.split_state_style("card"), None);
    }

    #[test]
    fn reserved_prefixes_come_from_config() {
        let mut config = WeaveConfig::default();
        config.builder.reserved_prefixes = vec!["w-".into(), "wf-".into(), String::new()];
        let profile = TargetProfile::from_config(&config);
        assert!(profile.is_reserved("w-button"));
        assert!(profile.is_reserved("wf-grid"));
        assert!(!profile.is_reserved("button"));
        assert_eq!(profile.reserved_prefixes.len(), 2);
    }
}

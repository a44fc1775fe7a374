//! Weave configuration system
//!
//! This crate owns every table the conversion pipeline treats as
//! target-specific: the breakpoint and pseudo-state vocabulary, reserved
//! class prefixes, size ceilings and id seeding. Settings are loaded from
//! `weave.toml`, with environment variables taking precedence.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for Weave
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    /// Target builder naming rules
    pub builder: BuilderConfig,
    /// Size and depth ceilings
    pub limits: LimitsConfig,
    /// Identifier generation
    pub ids: IdConfig,
    /// Responsive breakpoints the builder understands, widest first
    pub breakpoints: Vec<BreakpointConfig>,
    /// Pseudo-classes the builder exposes as style states
    pub pseudo_states: Vec<PseudoStateConfig>,
    /// Comma-separated diagnostic categories (css, html, graph, repair, chunk, all)
    pub diagnostics: Option<String>,
}

/// Naming rules of the target builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Value of the top-level `type` field of the emitted document
    pub document_type: String,
    /// Class-name prefixes the builder reserves for its own components
    pub reserved_prefixes: Vec<String>,
    /// Prefix prepended to classes that collide with a reserved prefix
    pub rename_prefix: String,
    /// Prefix for classes synthesized from tag/descendant selectors and inline styles
    pub synthesized_prefix: String,
}

/// Size and depth ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Deepest node nesting the builder renders safely
    pub max_depth: usize,
    /// Hard ceiling for one embed payload, in bytes
    pub embed_hard_limit: usize,
    /// Soft ceiling for one embed payload, in bytes
    pub embed_soft_limit: usize,
    /// Budget for all embed payloads of one document, in bytes
    pub total_embed_budget: usize,
    /// Chunk size used when splitting oversized artifacts (defaults to the hard limit)
    pub chunk_ceiling: Option<usize>,
    /// Maximum number of sanitize/re-validate rounds
    pub repair_iterations: usize,
    /// Inputs larger than this are rejected before parsing
    pub max_input_bytes: usize,
}

/// Identifier generation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdConfig {
    /// Derive ids deterministically from this seed instead of the OS RNG
    pub seed: Option<u64>,
}

/// One responsive breakpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakpointConfig {
    /// Variant key used in the style graph (e.g. `medium`)
    pub id: String,
    /// Human label (e.g. `tablet`)
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub min_width: Option<u32>,
}

/// One pseudo-class mapped onto a builder state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PseudoStateConfig {
    /// Pseudo-class name without the colon (e.g. `active`)
    pub pseudo: String,
    /// Variant key used in the style graph (e.g. `pressed`)
    pub key: String,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            builder: BuilderConfig::default(),
            limits: LimitsConfig::default(),
            ids: IdConfig::default(),
            breakpoints: default_breakpoints(),
            pseudo_states: default_pseudo_states(),
            diagnostics: None,
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            document_type: "@webflow/XscpData".to_string(),
            reserved_prefixes: vec!["w-".to_string()],
            rename_prefix: "u-".to_string(),
            synthesized_prefix: "el-".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            embed_hard_limit: 50_000,
            embed_soft_limit: 40_000,
            total_embed_budget: 200_000,
            chunk_ceiling: None,
            repair_iterations: 4,
            max_input_bytes: 8 * 1024 * 1024,
        }
    }
}

impl LimitsConfig {
    /// Ceiling used by the embed chunker.
    pub fn effective_chunk_ceiling(&self) -> usize {
        self.chunk_ceiling
            .unwrap_or(self.embed_hard_limit)
            .min(self.embed_hard_limit)
            .max(1)
    }
}

fn default_breakpoints() -> Vec<BreakpointConfig> {
    [
        ("medium", "tablet", 991),
        ("small", "mobile-landscape", 767),
        ("tiny", "mobile-portrait", 479),
    ]
    .into_iter()
    .map(|(id, label, max)| BreakpointConfig {
        id: id.to_string(),
        label: Some(label.to_string()),
        max_width: Some(max),
        min_width: None,
    })
    .collect()
}

fn default_pseudo_states() -> Vec<PseudoStateConfig> {
    [
        ("hover", "hover"),
        ("active", "pressed"),
        ("focus", "focused"),
        ("focus-visible", "focus-visible"),
        ("focus-within", "focus-within"),
        ("visited", "visited"),
    ]
    .into_iter()
    .map(|(pseudo, key)| PseudoStateConfig {
        pseudo: pseudo.to_string(),
        key: key.to_string(),
    })
    .collect()
}

impl WeaveConfig {
    /// Load configuration from a TOML file
    ///
    /// # Returns
    /// * `Ok(WeaveConfig)` - Successfully loaded configuration
    /// * `Err(String)` - Error message if loading failed
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let config: Self =
            toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration from `weave.toml` in the current directory
    /// or return default configuration if the file doesn't exist
    pub fn load_or_default() -> Self {
        Self::load_from_file("weave.toml").unwrap_or_default()
    }

    /// Merge configuration with environment variables
    ///
    /// Environment variables take precedence over configuration file values.
    pub fn merge_with_env(&mut self) {
        if let Ok(val) = std::env::var("WEAVE_DOCUMENT_TYPE") {
            if !val.trim().is_empty() {
                self.builder.document_type = val.trim().to_string();
            }
        }
        if let Some(depth) = read_env_usize("WEAVE_MAX_DEPTH") {
            self.limits.max_depth = depth.max(1);
        }
        if let Some(limit) = read_env_usize("WEAVE_EMBED_LIMIT") {
            self.limits.embed_hard_limit = limit.max(1);
        }
        if let Some(limit) = read_env_usize("WEAVE_EMBED_SOFT_LIMIT") {
            self.limits.embed_soft_limit = limit;
        }
        if let Some(ceiling) = read_env_usize("WEAVE_CHUNK_CEILING") {
            self.limits.chunk_ceiling = Some(ceiling.max(1));
        }
        if let Ok(val) = std::env::var("WEAVE_ID_SEED") {
            if let Ok(seed) = val.trim().parse::<u64>() {
                self.ids.seed = Some(seed);
            }
        }
        if let Ok(diagnostics) = std::env::var("WEAVE_DIAGNOSTICS") {
            self.diagnostics = Some(diagnostics);
        }
    }

    /// Load configuration with environment variable overrides
    ///
    /// 1. Load from weave.toml (or use defaults if not found)
    /// 2. Override with environment variables if present
    pub fn load() -> Self {
        let mut config = Self::load_or_default();
        config.merge_with_env();
        config
    }

    /// Reject tables the pipeline cannot work with.
    pub fn check(&self) -> Result<(), String> {
        if self.limits.max_depth == 0 {
            return Err("limits.max_depth must be at least 1".to_string());
        }
        if self.limits.embed_hard_limit == 0 {
            return Err("limits.embed_hard_limit must be at least 1".to_string());
        }
        if self.limits.embed_soft_limit > self.limits.embed_hard_limit {
            return Err(format!(
                "limits.embed_soft_limit ({}) exceeds limits.embed_hard_limit ({})",
                self.limits.embed_soft_limit, self.limits.embed_hard_limit
            ));
        }
        for bp in &self.breakpoints {
            if bp.max_width.is_none() == bp.min_width.is_none() {
                return Err(format!(
                    "breakpoint '{}' needs exactly one of max_width / min_width",
                    bp.id
                ));
            }
            if bp.id.contains('_') || bp.id.is_empty() {
                return Err(format!("breakpoint id '{}' is not a valid variant key", bp.id));
            }
        }
        for state in &self.pseudo_states {
            if state.key.contains('_') || state.key.is_empty() {
                return Err(format!("pseudo-state key '{}' is not a valid variant key", state.key));
            }
        }
        if self
            .reserved_prefixes()
            .any(|prefix| self.builder.rename_prefix.starts_with(prefix))
        {
            return Err(format!(
                "builder.rename_prefix '{}' is itself reserved",
                self.builder.rename_prefix
            ));
        }
        Ok(())
    }

    fn reserved_prefixes(&self) -> impl Iterator<Item = &str> {
        self.builder
            .reserved_prefixes
            .iter()
            .map(String::as_str)
            .filter(|prefix| !prefix.is_empty())
    }
}

fn read_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

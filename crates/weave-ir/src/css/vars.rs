//! Custom-property resolution against `:root` declarations and a design-token manifest.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{InputKind, ParseError};

const MAX_VAR_DEPTH: usize = 8;

/// One entry of an extracted design-token manifest.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DesignToken {
    Full {
        #[serde(default)]
        path: Option<String>,
        #[serde(default, rename = "type")]
        kind: Option<String>,
        value: serde_json::Value,
    },
    Value(serde_json::Value),
}

impl DesignToken {
    fn css_value(&self) -> Option<String> {
        let value = match self {
            DesignToken::Full { value, .. } | DesignToken::Value(value) => value,
        };
        match value {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Custom property name to token.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct TokenManifest {
    pub tokens: BTreeMap<String, DesignToken>,
}

impl TokenManifest {
    pub fn from_json(source: &str) -> Result<Self, ParseError> {
        serde_json::from_str(source).map_err(|err| {
            let offset = offset_of(source, err.line(), err.column());
            ParseError::new(InputKind::Tokens, offset, err.to_string())
        })
    }
}

fn offset_of(source: &str, line: usize, column: usize) -> usize {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + column.saturating_sub(1)).min(source.len())
}

/// Result of expanding `var()` references in one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub value: String,
    /// Names that neither a custom property nor a fallback could satisfy.
    pub unresolved: Vec<String>,
}

/// Lookup table for `var()` expansion; stylesheet `:root` values shadow tokens.
#[derive(Debug, Clone, Default)]
pub struct VarResolver {
    vars: BTreeMap<String, String>,
}

impl VarResolver {
    pub fn new(root_vars: &BTreeMap<String, String>, tokens: Option<&TokenManifest>) -> Self {
        let mut vars = BTreeMap::new();
        if let Some(manifest) = tokens {
            for (name, token) in &manifest.tokens {
                let Some(value) = token.css_value() else {
                    continue;
                };
                let name = if name.starts_with("--") {
                    name.clone()
                } else {
                    format!("--{name}")
                };
                vars.insert(name, value);
            }
        }
        for (name, value) in root_vars {
            vars.insert(name.clone(), value.clone());
        }
        Self { vars }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn resolve(&self, value: &str) -> Resolved {
        let mut unresolved = Vec::new();
        let value = self.expand(value, 0, &mut unresolved);
        unresolved.dedup();
        Resolved { value, unresolved }
    }

    fn expand(&self, value: &str, depth: usize, unresolved: &mut Vec<String>) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = find_var(rest) {
            out.push_str(&rest[..start]);
            let args_start = start + 4;
            let Some(close) = matching_paren(rest, args_start) else {
                out.push_str(&rest[start..]);
                return out;
            };
            let call = &rest[start..=close];
            let args = &rest[args_start..close];
            let (name, fallback) = match args.find(',') {
                Some(comma) => (args[..comma].trim(), Some(args[comma + 1..].trim())),
                None => (args.trim(), None),
            };
            let replacement = if depth >= MAX_VAR_DEPTH {
                unresolved.push(name.to_string());
                None
            } else if let Some(found) = self.vars.get(name) {
                Some(self.expand(found, depth + 1, unresolved))
            } else {
                fallback.map(|fallback| self.expand(fallback, depth + 1, unresolved))
            };
            match replacement {
                Some(text) => out.push_str(&text),
                None => {
                    if depth < MAX_VAR_DEPTH {
                        unresolved.push(name.to_string());
                    }
                    out.push_str(call);
                }
            }
            rest = &rest[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

fn find_var(value: &str) -> Option<usize> {
    let lower = value.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("var(") {
        let at = from + pos;
        let preceded_by_ident = lower[..at]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !preceded_by_ident {
            return Some(at);
        }
        from = at + 4;
    }
    None
}

fn matching_paren(value: &str, from: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (offset, ch) in value[from..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(from + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(pairs: &[(&str, &str)]) -> VarResolver {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        VarResolver::new(&vars, None)
    }

    #[test]
    fn expands_nested_references_and_fallbacks() {
        let r = resolver(&[("--brand", "#f00"), ("--accent", "var(--brand)")]);
        assert_eq!(r.resolve("1px solid var(--accent)").value, "1px solid #f00");
        assert_eq!(r.resolve("var(--missing, var(--brand))").value, "#f00");
        assert_eq!(r.resolve("var(--gap, 8px) 4px").value, "8px 4px");
    }

    #[test]
    fn unresolved_reference_stays_verbatim() {
        let r = resolver(&[]);
        let resolved = r.resolve("var(--nope)");
        assert_eq!(resolved.value, "var(--nope)");
        assert_eq!(resolved.unresolved, vec!["--nope".to_string()]);
    }

    #[test]
    fn cyclic_references_terminate() {
        let r = resolver(&[("--a", "var(--b)"), ("--b", "var(--a)")]);
        let resolved = r.resolve("var(--a)");
        assert!(!resolved.unresolved.is_empty());
        assert!(resolved.value.contains("var("));
    }

    #[test]
    fn token_manifest_fills_gaps_and_root_wins() {
        let manifest = TokenManifest::from_json(
            r##"{ "--brand": { "path": "color.brand", "type": "color", "value": "#00f" },
                 "space-md": { "value": "16px" },
                 "--radius": "4px" }"##,
        )
        .unwrap();
        let mut root = BTreeMap::new();
        root.insert("--brand".to_string(), "#f00".to_string());
        let r = VarResolver::new(&root, Some(&manifest));
        assert_eq!(r.resolve("var(--brand)").value, "#f00");
        assert_eq!(r.resolve("var(--space-md)").value, "16px");
        assert_eq!(r.resolve("var(--radius)").value, "4px");
    }

    #[test]
    fn malformed_manifest_reports_offset() {
        let err = TokenManifest::from_json("{\n  \"--a\": }").unwrap_err();
        assert_eq!(err.input, InputKind::Tokens);
        assert!(err.offset > 0);
    }
}

//! Promotion of tag and descendant selectors into synthesized classes.
//!
//! The builder only styles classes, so every element matched by a
//! `section`, `a.link` or `.card p` rule receives a generated class and the
//! rule is rewritten to target that class instead.

use std::collections::{BTreeMap, HashMap, HashSet};

use ego_tree::NodeId;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::css::parser::{ParsedStylesheet, RuleKind};
use crate::css::selector::{parse_compound, split_compounds};
use crate::profile::TargetProfile;

/// Tags whose rules describe the page shell, not an element of the fragment.
const SHELL_TAGS: &[&str] = &["html", "body", "head"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    /// Selector as written, without its state pseudo-class.
    pub selector: String,
    pub class: String,
    pub matched: usize,
}

/// Selector shape eligible for promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Promotable {
    /// Selector to match elements with (state pseudo-class removed).
    pub match_selector: String,
    /// Trailing `:state` kept on the rewritten rule.
    pub state_suffix: String,
    pub slug: String,
}

pub(crate) fn promotable(selector: &str, profile: &TargetProfile) -> Option<Promotable> {
    let (compounds, explicit) = split_compounds(selector);
    if explicit || compounds.is_empty() {
        return None;
    }
    let last = compounds.len() - 1;
    let mut slug_parts = Vec::new();
    let mut match_parts = Vec::new();
    let mut state_suffix = String::new();
    for (index, text) in compounds.iter().enumerate() {
        let compound = parse_compound(text);
        if compound.has_id
            || compound.has_attribute
            || compound.pseudo_element
            || compound.irregular
            || !compound.functional.is_empty()
        {
            return None;
        }
        let tag = compound.tag.as_deref();
        if tag == Some("*") || tag.is_some_and(|t| SHELL_TAGS.contains(&t)) {
            return None;
        }
        if tag.is_none() && compound.classes.is_empty() {
            return None;
        }
        match compound.pseudo_classes.as_slice() {
            [] => match_parts.push(text.clone()),
            [pseudo] if index == last && profile.state_key(pseudo).is_some() => {
                let colon = text.find(':')?;
                match_parts.push(text[..colon].to_string());
                state_suffix = text[colon..].to_string();
            }
            _ => return None,
        }
        slug_parts.extend(compound.tag.iter().cloned());
        slug_parts.extend(compound.classes.iter().cloned());
    }
    if compounds.len() == 1 && parse_compound(&compounds[0]).tag.is_none() {
        return None;
    }
    let slug = slug_parts
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase();
    Some(Promotable {
        match_selector: match_parts.join(" "),
        state_suffix,
        slug,
    })
}

/// Picks class names that collide with nothing already in the document.
pub(crate) struct ClassNamer {
    taken: HashSet<String>,
}

impl ClassNamer {
    pub(crate) fn new(existing: impl IntoIterator<Item = String>) -> Self {
        Self {
            taken: existing.into_iter().collect(),
        }
    }

    pub(crate) fn claim(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 2;
        while self.taken.contains(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Rewrite promotable rules and return the classes each element gains.
pub(crate) fn promote_selectors(
    document: &Html,
    sheet: &mut ParsedStylesheet,
    profile: &TargetProfile,
    namer: &mut ClassNamer,
) -> (HashMap<NodeId, Vec<String>>, Vec<Promotion>) {
    let mut assigned: HashMap<NodeId, Vec<String>> = HashMap::new();
    let mut classes_by_selector: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut promotions = Vec::new();

    for rule in sheet.rules.iter_mut() {
        if rule.kind != RuleKind::Style {
            continue;
        }
        let Some(candidate) = promotable(&rule.selector, profile) else {
            continue;
        };
        let class = classes_by_selector
            .entry(candidate.match_selector.clone())
            .or_insert_with(|| {
                let selector = Selector::parse(&candidate.match_selector).ok()?;
                let matched: Vec<NodeId> = document.select(&selector).map(|el| el.id()).collect();
                if matched.is_empty() {
                    return None;
                }
                let class = namer.claim(&format!("{}{}", profile.synthesized_prefix, candidate.slug));
                for id in &matched {
                    let list = assigned.entry(*id).or_default();
                    if !list.contains(&class) {
                        list.push(class.clone());
                    }
                }
                promotions.push(Promotion {
                    selector: candidate.match_selector.clone(),
                    class: class.clone(),
                    matched: matched.len(),
                });
                Some(class)
            })
            .clone();
        if let Some(class) = class {
            rule.selector = format!(".{class}{}", candidate.state_suffix);
        }
    }
    (assigned, promotions)
}

use std::collections::BTreeMap;

use serde::Serialize;

use super::parser::Declaration;
use super::router::NativeRule;

/// Everything the builder knows about one class name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassIndexEntry {
    pub name: String,
    pub base: Vec<Declaration>,
    /// Variant key (breakpoint, state or `breakpoint_state`) to declarations.
    pub variants: BTreeMap<String, Vec<Declaration>>,
}

impl ClassIndexEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Class name to native declarations, in name order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassIndex {
    entries: BTreeMap<String, ClassIndexEntry>,
}

impl ClassIndex {
    /// Build the index from router output, applying rules in source order.
    pub fn from_native(rules: &[NativeRule]) -> Self {
        let mut ordered: Vec<&NativeRule> = rules.iter().collect();
        ordered.sort_by_key(|rule| rule.order);
        let mut index = Self::default();
        for rule in ordered {
            index.insert(&rule.class, rule.variant.as_deref(), &rule.declarations);
        }
        index
    }

    /// Merge declarations into a class; a later value for the same property wins.
    pub fn insert(&mut self, class: &str, variant: Option<&str>, declarations: &[Declaration]) {
        let entry = self
            .entries
            .entry(class.to_string())
            .or_insert_with(|| ClassIndexEntry::new(class));
        let target = match variant {
            Some(key) => entry.variants.entry(key.to_string()).or_default(),
            None => &mut entry.base,
        };
        for declaration in declarations {
            match target
                .iter_mut()
                .find(|existing| existing.property == declaration.property)
            {
                Some(existing) => *existing = declaration.clone(),
                None => target.push(declaration.clone()),
            }
        }
    }

    pub fn get(&self, class: &str) -> Option<&ClassIndexEntry> {
        self.entries.get(class)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.entries.contains_key(class)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ClassIndexEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

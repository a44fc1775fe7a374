//! Category switches for verbose `debug!` output.
//!
//! Categories: `css`, `html`, `graph`, `repair`, `chunk`, or `all`.

use std::collections::BTreeSet;
use std::sync::OnceLock;

static CATEGORIES: OnceLock<BTreeSet<String>> = OnceLock::new();

fn parse_categories(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Fix the enabled categories from configuration (`weave.toml` or
/// `WEAVE_DIAGNOSTICS` merged into it). Only the first call has an effect;
/// returns whether this call set them.
pub fn init_diagnostics(categories: Option<&str>) -> bool {
    CATEGORIES
        .set(parse_categories(categories.unwrap_or_default()))
        .is_ok()
}

/// Whether verbose diagnostics are enabled for `category`.
///
/// Without [`init_diagnostics`] the list is read from `WEAVE_DIAGNOSTICS`.
pub fn diagnostics_enabled(category: &str) -> bool {
    let set = CATEGORIES.get_or_init(|| {
        parse_categories(&std::env::var("WEAVE_DIAGNOSTICS").unwrap_or_default())
    });
    set.contains("all") || set.contains(&category.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_lists() {
        let set = parse_categories(" CSS, graph,,repair ");
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec!["css", "graph", "repair"]
        );
        assert!(parse_categories("").is_empty());
    }
}

//! Just enough selector parsing to classify selectors by shape.

/// One compound selector (`a.nav-link:hover`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    /// Lowercase type selector, `*` for the universal selector.
    pub tag: Option<String>,
    pub classes: Vec<String>,
    /// Argument-less pseudo-classes, lowercase, without the colon.
    pub pseudo_classes: Vec<String>,
    /// Functional pseudo-classes (`is`, `nth-child`, ...), lowercase.
    pub functional: Vec<String>,
    pub has_id: bool,
    pub has_attribute: bool,
    pub pseudo_element: bool,
    /// Escapes or characters outside the simple-selector grammar.
    pub irregular: bool,
}

const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["before", "after", "first-line", "first-letter"];

/// Split a selector into compound selectors.
///
/// Returns the compounds and whether any explicit combinator (`>`, `+`, `~`)
/// appeared; whitespace alone means descendant.
pub fn split_compounds(selector: &str) -> (Vec<String>, bool) {
    let mut compounds = Vec::new();
    let mut current = String::new();
    let mut explicit = false;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in selector.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' | '[' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '>' | '+' | '~' if depth == 0 => {
                explicit = true;
                flush(&mut current, &mut compounds);
            }
            c if c.is_whitespace() && depth == 0 => flush(&mut current, &mut compounds),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut compounds);
    (compounds, explicit)
}

fn flush(current: &mut String, compounds: &mut Vec<String>) {
    if !current.is_empty() {
        compounds.push(std::mem::take(current));
    }
}

pub fn parse_compound(text: &str) -> Compound {
    let chars: Vec<char> = text.chars().collect();
    let mut compound = Compound::default();
    let mut i = 0usize;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                let (ident, next, irregular) = read_ident(&chars, i + 1);
                compound.irregular |= irregular || ident.is_empty();
                compound.classes.push(ident);
                i = next;
            }
            '#' => {
                let (_, next, _) = read_ident(&chars, i + 1);
                compound.has_id = true;
                i = next;
            }
            '[' => {
                compound.has_attribute = true;
                i = skip_group(&chars, i, '[', ']');
            }
            ':' => {
                let element = chars.get(i + 1) == Some(&':');
                let start = if element { i + 2 } else { i + 1 };
                let (ident, next, _) = read_ident(&chars, start);
                let ident = ident.to_ascii_lowercase();
                let functional = chars.get(next) == Some(&'(');
                i = if functional {
                    skip_group(&chars, next, '(', ')')
                } else {
                    next
                };
                if element || LEGACY_PSEUDO_ELEMENTS.contains(&ident.as_str()) {
                    compound.pseudo_element = true;
                } else if functional {
                    compound.functional.push(ident);
                } else {
                    compound.pseudo_classes.push(ident);
                }
            }
            '*' if i == 0 => {
                compound.tag = Some("*".to_string());
                i += 1;
            }
            c if i == 0 && is_ident_start(c) => {
                let (ident, next, irregular) = read_ident(&chars, i);
                compound.irregular |= irregular;
                compound.tag = Some(ident.to_ascii_lowercase());
                i = next;
            }
            _ => {
                compound.irregular = true;
                i += 1;
            }
        }
    }
    compound
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '-' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || !c.is_ascii()
}

/// Read an identifier; the flag reports backslash escapes.
fn read_ident(chars: &[char], start: usize) -> (String, usize, bool) {
    let mut ident = String::new();
    let mut escaped = false;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            escaped = true;
            if let Some(&next) = chars.get(i + 1) {
                ident.push(next);
            }
            i += 2;
        } else if is_ident_char(c) {
            ident.push(c);
            i += 1;
        } else {
            break;
        }
    }
    (ident, i.min(chars.len()), escaped)
}

fn skip_group(chars: &[char], open_at: usize, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = open_at;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
        } else if c == '"' || c == '\'' {
            quote = Some(c);
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    chars.len()
}

/// Whether `name` is a valid class identifier as it would appear in `class=""`.
pub fn is_plain_class_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if is_ident_start(first) => chars.all(is_ident_char),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_descendant_and_explicit_combinators() {
        assert_eq!(
            split_compounds(".nav  a:hover"),
            (vec![".nav".to_string(), "a:hover".to_string()], false)
        );
        let (parts, explicit) = split_compounds("ul>li + li");
        assert_eq!(parts, vec!["ul", "li", "li"]);
        assert!(explicit);
        let (parts, explicit) = split_compounds(".a:not(.b > .c)");
        assert_eq!(parts.len(), 1);
        assert!(!explicit);
    }

    #[test]
    fn parses_compound_parts() {
        let c = parse_compound("a.link.active:hover");
        assert_eq!(c.tag.as_deref(), Some("a"));
        assert_eq!(c.classes, vec!["link", "active"]);
        assert_eq!(c.pseudo_classes, vec!["hover"]);

        let c = parse_compound(".x::before");
        assert!(c.pseudo_element);
        let c = parse_compound(".x:after");
        assert!(c.pseudo_element);
        let c = parse_compound(".x:nth-child(2n+1)");
        assert_eq!(c.functional, vec!["nth-child"]);
        let c = parse_compound("input[type=\"text\"]#q");
        assert!(c.has_attribute && c.has_id);
        let c = parse_compound(".md\\:flex");
        assert!(c.irregular);
        assert_eq!(c.classes, vec!["md:flex"]);
    }

    #[test]
    fn plain_class_names() {
        assert!(is_plain_class_name("hero-title_2"));
        assert!(!is_plain_class_name("2col"));
        assert!(!is_plain_class_name("md:flex"));
    }
}

//! Cleanup of raw markup carried by embed nodes.
//!
//! Markup is only re-serialized when something is actually removed or
//! split; untouched input comes back byte-for-byte. Fragments nested past
//! [`MAX_FRAGMENT_DEPTH`] are cleaned token by token and never built into a
//! tree; that path does not split inline elements.

use crate::html::fragment::{
    Attribute, FragmentElement, FragmentNode, MAX_FRAGMENT_DEPTH, Span, Token, nesting_depth, parse_spans,
    serialize, tokenize, write_start_tag,
};

/// Document shell elements that are unwrapped, keeping their children.
const SHELL_ELEMENTS: &[&str] = &["html", "head", "body"];

/// Inline elements that may not contain line breaks in the builder.
const INLINE_ELEMENTS: &[&str] = &[
    "span", "a", "strong", "em", "b", "i", "u", "small", "label", "code", "mark", "sub", "sup", "abbr",
    "cite", "q", "s",
];

const URL_ATTRIBUTES: &[&str] = &["href", "src", "action", "formaction", "xlink:href", "poster"];

/// Whether [`sanitize_markup`] would change `html`.
pub fn needs_sanitizing(html: &str) -> bool {
    let spans = tokenize(html);
    if nesting_depth(&spans) > MAX_FRAGMENT_DEPTH {
        return clean_flat(html, &spans).is_some();
    }
    let mut nodes = parse_spans(html, spans);
    clean(&mut nodes)
}

/// Strip document shells, event handlers and script URLs, and split inline
/// elements around `<br>`.
pub fn sanitize_markup(html: &str) -> String {
    let spans = tokenize(html);
    if nesting_depth(&spans) > MAX_FRAGMENT_DEPTH {
        return clean_flat(html, &spans).unwrap_or_else(|| html.to_string());
    }
    let mut nodes = parse_spans(html, spans);
    if clean(&mut nodes) {
        serialize(&nodes)
    } else {
        html.to_string()
    }
}

/// Clean `nodes` in place; returns whether anything changed.
fn clean(nodes: &mut Vec<FragmentNode>) -> bool {
    let mut changed = false;
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes.drain(..) {
        match node {
            FragmentNode::Doctype(_) => changed = true,
            FragmentNode::Element(mut element) if SHELL_ELEMENTS.contains(&element.name.as_str()) => {
                clean(&mut element.children);
                out.append(&mut element.children);
                changed = true;
            }
            FragmentNode::Element(mut element) => {
                let before = element.attrs.len();
                element.attrs.retain(|attr| !is_unsafe_attribute(attr));
                changed |= element.attrs.len() != before;
                changed |= clean(&mut element.children);
                if INLINE_ELEMENTS.contains(&element.name.as_str()) {
                    let pieces = split_on_breaks(element);
                    changed |= pieces.len() > 1;
                    out.extend(pieces);
                } else {
                    out.push(FragmentNode::Element(element));
                }
            }
            other => out.push(other),
        }
    }
    *nodes = out;
    changed
}

/// Token-level cleanup: drop doctypes and shell tags, rewrite start tags
/// that carry handlers or script URLs. `None` when nothing changed.
fn clean_flat(source: &str, spans: &[Span]) -> Option<String> {
    let mut out = String::with_capacity(source.len());
    let mut changed = false;
    for span in spans {
        match &span.token {
            Token::Doctype => changed = true,
            Token::StartTag { name, .. } | Token::EndTag { name } if SHELL_ELEMENTS.contains(&name.as_str()) => {
                changed = true;
            }
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } if attrs.iter().any(is_unsafe_attribute) => {
                let kept: Vec<Attribute> = attrs.iter().filter(|attr| !is_unsafe_attribute(attr)).cloned().collect();
                write_start_tag(&mut out, name, &kept, *self_closing);
                changed = true;
            }
            _ => out.push_str(&source[span.range.clone()]),
        }
    }
    changed.then_some(out)
}

fn is_unsafe_attribute(attr: &Attribute) -> bool {
    is_event_handler(&attr.name) || is_script_url(&attr.name, attr.value.as_deref())
}

fn is_event_handler(name: &str) -> bool {
    name.len() > 2 && name.starts_with("on")
}

fn is_script_url(name: &str, value: Option<&str>) -> bool {
    if !URL_ATTRIBUTES.contains(&name) {
        return false;
    }
    let Some(value) = value else { return false };
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}

fn is_break(node: &FragmentNode) -> bool {
    matches!(node, FragmentNode::Element(element) if element.name == "br")
}

fn has_content(nodes: &[FragmentNode]) -> bool {
    nodes.iter().any(|node| match node {
        FragmentNode::Text(text) => !text.trim().is_empty(),
        FragmentNode::Element(_) => true,
        FragmentNode::Comment(_) | FragmentNode::Doctype(_) => false,
    })
}

/// `<span>a<br>b</span>` becomes `<span>a</span><br><span>b</span>`.
/// Copies after the first drop the `id` attribute.
fn split_on_breaks(element: FragmentElement) -> Vec<FragmentNode> {
    let mut segments: Vec<Vec<FragmentNode>> = vec![Vec::new()];
    let mut breaks = Vec::new();
    for child in &element.children {
        if is_break(child) {
            breaks.push(child.clone());
            segments.push(Vec::new());
        } else if let Some(segment) = segments.last_mut() {
            segment.push(child.clone());
        }
    }
    if segments.iter().filter(|segment| has_content(segment)).count() < 2 {
        return vec![FragmentNode::Element(element)];
    }
    let mut out = Vec::new();
    let mut first = true;
    let mut breaks = breaks.into_iter();
    for segment in segments {
        if has_content(&segment) {
            let mut copy = FragmentElement {
                name: element.name.clone(),
                attrs: element.attrs.clone(),
                children: segment,
                self_closing: false,
            };
            if !first {
                copy.attrs.retain(|attr| attr.name != "id");
            }
            first = false;
            out.push(FragmentNode::Element(copy));
        }
        if let Some(br) = breaks.next() {
            out.push(br);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_markup_is_untouched() {
        let html = "<div class='a'><IMG SRC=x.png><p>Hi &amp; bye</p></div>";
        assert!(!needs_sanitizing(html));
        assert_eq!(sanitize_markup(html), html);
    }

    #[test]
    fn strips_shells_handlers_and_script_urls() {
        let html = "<!DOCTYPE html><html><head><title>t</title></head><body>\
                    <a href=\"javascript:go()\" class=\"x\">go</a>\
                    <img src=\"a.png\" onerror=\"steal()\"></body></html>";
        assert!(needs_sanitizing(html));
        assert_eq!(
            sanitize_markup(html),
            "<title>t</title><a class=\"x\">go</a><img src=\"a.png\">"
        );
    }

    #[test]
    fn splits_inline_elements_on_breaks() {
        assert_eq!(
            sanitize_markup("<span>Years<br>Experience</span>"),
            "<span>Years</span><br><span>Experience</span>"
        );
        assert_eq!(
            sanitize_markup("<p><b id=\"k\" class=\"c\">a<br/>b<br>c</b></p>"),
            "<p><b id=\"k\" class=\"c\">a</b><br><b class=\"c\">b</b><br><b class=\"c\">c</b></p>"
        );
    }

    #[test]
    fn single_segment_breaks_are_left_alone() {
        let html = "<span>only<br></span><div>a<br>b</div>";
        assert!(!needs_sanitizing(html));
    }

    #[test]
    fn deep_markup_is_cleaned_token_by_token() {
        let depth = MAX_FRAGMENT_DEPTH * 100;
        let html = format!(
            "<!doctype html><body>{}<a href=\"javascript:go()\" onclick=\"x()\" class=\"k\">a<br>b</a>{}</body>",
            "<div>".repeat(depth),
            "</div>".repeat(depth)
        );
        assert!(needs_sanitizing(&html));
        let cleaned = sanitize_markup(&html);
        assert_eq!(
            cleaned,
            format!(
                "{}<a class=\"k\">a<br>b</a>{}",
                "<div>".repeat(depth),
                "</div>".repeat(depth)
            )
        );
        assert!(!needs_sanitizing(&cleaned));
        assert_eq!(sanitize_markup(&cleaned), cleaned);
    }

    #[test]
    fn sanitizing_is_idempotent() {
        let html = "<body><span onclick=\"x()\">a<br>b</span></body>";
        let once = sanitize_markup(html);
        assert_eq!(sanitize_markup(&once), once);
        assert!(!needs_sanitizing(&once));
    }
}

//! Lossless tokenizer and tree for embedded HTML fragments.
//!
//! Embed payloads are re-emitted byte-for-byte where nothing changes, so
//! this works on the source text directly instead of going through an
//! html5ever parse, which would normalise (and reorder) the markup.

use std::ops::Range;

/// Elements that never have content or an end tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Elements whose content is raw text up to the matching end tag.
pub const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Nesting past which fragments are cleaned token by token instead of as a tree.
pub const MAX_FRAGMENT_DEPTH: usize = 256;

pub fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text,
    Comment,
    Doctype,
    StartTag {
        name: String,
        attrs: Vec<Attribute>,
        self_closing: bool,
    },
    EndTag {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub token: Token,
    pub range: Range<usize>,
}

/// Split `source` into contiguous token spans covering every byte.
pub fn tokenize(source: &str) -> Vec<Span> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0usize;
    let mut text_start = 0usize;
    let mut raw_text_of: Option<String> = None;

    let flush_text = |spans: &mut Vec<Span>, start: usize, end: usize| {
        if end > start {
            spans.push(Span {
                token: Token::Text,
                range: start..end,
            });
        }
    };

    while i < bytes.len() {
        if let Some(name) = raw_text_of.take() {
            let end = find_end_tag(source, i, &name).unwrap_or(bytes.len());
            flush_text(&mut spans, i, end);
            i = end;
            text_start = end;
            continue;
        }
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        let Some((token, end)) = read_markup(source, i) else {
            i += 1;
            continue;
        };
        flush_text(&mut spans, text_start, i);
        if let Token::StartTag {
            name, self_closing, ..
        } = &token
        {
            if !self_closing && RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                raw_text_of = Some(name.clone());
            }
        }
        spans.push(Span {
            token,
            range: i..end,
        });
        i = end;
        text_start = end;
    }
    flush_text(&mut spans, text_start, bytes.len());
    spans
}

fn find_end_tag(source: &str, from: usize, name: &str) -> Option<usize> {
    let lower = source[from..].to_ascii_lowercase();
    let needle = format!("</{name}");
    let mut search = 0;
    while let Some(pos) = lower[search..].find(&needle) {
        let at = search + pos;
        let after = lower.as_bytes().get(at + needle.len()).copied();
        if matches!(after, None | Some(b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')) {
            return Some(from + at);
        }
        search = at + needle.len();
    }
    None
}

/// Parse the markup construct starting at `start` (a `<`).
fn read_markup(source: &str, start: usize) -> Option<(Token, usize)> {
    let bytes = source.as_bytes();
    let rest = &source[start..];
    if rest.starts_with("<!--") {
        let end = rest[4..]
            .find("-->")
            .map(|pos| start + 4 + pos + 3)
            .unwrap_or(bytes.len());
        return Some((Token::Comment, end));
    }
    if rest.starts_with("<!") || rest.starts_with("<?") {
        let end = rest.find('>').map(|pos| start + pos + 1)?;
        return Some((Token::Doctype, end));
    }
    if rest.starts_with("</") {
        if !bytes.get(start + 2)?.is_ascii_alphabetic() {
            return None;
        }
        let name_end = scan_name(bytes, start + 2);
        let end = rest.find('>').map(|pos| start + pos + 1)?;
        let name = source[start + 2..name_end].to_ascii_lowercase();
        return Some((Token::EndTag { name }, end));
    }
    if !bytes.get(start + 1)?.is_ascii_alphabetic() {
        return None;
    }
    let name_end = scan_name(bytes, start + 1);
    let name = source[start + 1..name_end].to_ascii_lowercase();
    let mut attrs = Vec::new();
    let mut i = name_end;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i)? {
            b'>' => {
                return Some((
                    Token::StartTag {
                        name,
                        attrs,
                        self_closing: false,
                    },
                    i + 1,
                ));
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                return Some((
                    Token::StartTag {
                        name,
                        attrs,
                        self_closing: true,
                    },
                    i + 2,
                ));
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }
        let attr_start = i;
        while i < bytes.len() && !matches!(bytes[i], b'=' | b'>' | b'/') && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let attr_name = source[attr_start..i].to_ascii_lowercase();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = None;
        if bytes.get(i) == Some(&b'=') {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            match bytes.get(i)? {
                quote @ (b'"' | b'\'') => {
                    let close = source[i + 1..].find(*quote as char)? + i + 1;
                    value = Some(source[i + 1..close].to_string());
                    i = close + 1;
                }
                _ => {
                    let value_start = i;
                    while i < bytes.len() && bytes[i] != b'>' && !bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    value = Some(source[value_start..i].to_string());
                }
            }
        }
        if !attr_name.is_empty() {
            attrs.push(Attribute {
                name: attr_name,
                value,
            });
        }
    }
}

fn scan_name(bytes: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'>' | b'/') {
        i += 1;
    }
    i
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentNode {
    Element(FragmentElement),
    /// Text exactly as written (entities untouched).
    Text(String),
    Comment(String),
    Doctype(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentElement {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub children: Vec<FragmentNode>,
    pub self_closing: bool,
}

impl FragmentElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            self_closing: false,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name == name)
            .and_then(|attr| attr.value.as_deref())
    }
}

/// Build a forgiving tree: stray end tags are dropped, unclosed elements
/// are closed at the end of their parent.
pub fn parse_fragment(source: &str) -> Vec<FragmentNode> {
    parse_spans(source, tokenize(source))
}

/// [`parse_fragment`] over spans already produced by [`tokenize`].
pub fn parse_spans(source: &str, spans: Vec<Span>) -> Vec<FragmentNode> {
    let mut stack: Vec<FragmentElement> = Vec::new();
    let mut roots: Vec<FragmentNode> = Vec::new();

    fn push(stack: &mut [FragmentElement], roots: &mut Vec<FragmentNode>, node: FragmentNode) {
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => roots.push(node),
        }
    }

    for span in spans {
        let text = &source[span.range.clone()];
        match span.token {
            Token::Text => push(&mut stack, &mut roots, FragmentNode::Text(text.to_string())),
            Token::Comment => push(&mut stack, &mut roots, FragmentNode::Comment(text.to_string())),
            Token::Doctype => push(&mut stack, &mut roots, FragmentNode::Doctype(text.to_string())),
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } => {
                let element = FragmentElement {
                    attrs,
                    children: Vec::new(),
                    self_closing,
                    name,
                };
                if element.self_closing || is_void(&element.name) {
                    push(&mut stack, &mut roots, FragmentNode::Element(element));
                } else {
                    stack.push(element);
                }
            }
            Token::EndTag { name } => {
                let Some(position) = stack.iter().rposition(|open| open.name == name) else {
                    continue;
                };
                while stack.len() > position {
                    let Some(closed) = stack.pop() else { break };
                    push(&mut stack, &mut roots, FragmentNode::Element(closed));
                }
            }
        }
    }
    while let Some(closed) = stack.pop() {
        push(&mut stack, &mut roots, FragmentNode::Element(closed));
    }
    roots
}

/// Deepest element nesting [`parse_spans`] would build from `spans`.
pub fn nesting_depth(spans: &[Span]) -> usize {
    let mut open: Vec<&str> = Vec::new();
    let mut deepest = 0;
    for span in spans {
        match &span.token {
            Token::StartTag {
                name, self_closing, ..
            } => {
                let depth = open.len() + 1;
                deepest = deepest.max(depth);
                if !self_closing && !is_void(name) {
                    open.push(name.as_str());
                }
            }
            Token::EndTag { name } => {
                if let Some(position) = open.iter().rposition(|tag| *tag == name.as_str()) {
                    open.truncate(position);
                }
            }
            _ => {}
        }
    }
    deepest
}

enum Step<'a> {
    Node(&'a FragmentNode),
    Close(&'a str),
}

pub fn serialize(nodes: &[FragmentNode]) -> String {
    let mut out = String::new();
    let mut stack: Vec<Step<'_>> = nodes.iter().rev().map(Step::Node).collect();
    while let Some(step) = stack.pop() {
        match step {
            Step::Close(name) => {
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            Step::Node(
                FragmentNode::Text(text) | FragmentNode::Comment(text) | FragmentNode::Doctype(text),
            ) => out.push_str(text),
            Step::Node(FragmentNode::Element(element)) => {
                write_start_tag(&mut out, &element.name, &element.attrs, element.self_closing);
                if !is_void(&element.name) && !element.self_closing {
                    stack.push(Step::Close(&element.name));
                    stack.extend(element.children.iter().rev().map(Step::Node));
                }
            }
        }
    }
    out
}

/// Write `<name attrs>`, `<name attrs />` when self-closing, with values double-quoted.
pub fn write_start_tag(out: &mut String, name: &str, attrs: &[Attribute], self_closing: bool) {
    out.push('<');
    out.push_str(name);
    for attr in attrs {
        out.push(' ');
        out.push_str(&attr.name);
        if let Some(value) = &attr.value {
            out.push_str("=\"");
            out.push_str(&value.replace('"', "&quot;"));
            out.push('"');
        }
    }
    if self_closing && !is_void(name) {
        out.push_str(" />");
    } else {
        out.push('>');
    }
}

/// Escape text content for serialization.
pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Escape an attribute value for a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

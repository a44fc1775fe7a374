//! Brace- and string-aware stylesheet scanner.
//!
//! The scanner never gives up on a whole stylesheet because one rule is
//! broken: unterminated blocks are dropped (or, for `@media`, mined for the
//! complete rules they contain) and reported as warnings. The only hard
//! failure is a quoted string that runs to the end of the input after
//! swallowing a closing brace, because no rule boundary after it can be
//! trusted.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{InputKind, ParseError};

/// One `property: value` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

impl Declaration {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
            important: false,
        }
    }

    pub fn is_custom_property(&self) -> bool {
        self.property.starts_with("--")
    }

    pub fn to_css(&self) -> String {
        if self.important {
            format!("{}: {} !important;", self.property, self.value)
        } else {
            format!("{}: {};", self.property, self.value)
        }
    }
}

/// Render declarations the way the builder stores them (`a: b; c: d;`).
pub fn declarations_to_css(declarations: &[Declaration]) -> String {
    declarations
        .iter()
        .map(Declaration::to_css)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// Ordinary `selector { declarations }`.
    Style,
    /// A `:root` scoped block of custom properties.
    Root,
    /// Any at-rule other than `@media` (kept verbatim).
    AtRule { name: String, prelude: String },
    /// A style rule whose body contains nested rules (kept verbatim).
    Nested,
}

/// Coarse origin of a rule, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Base,
    Media,
    AtRule,
    Root,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CssRule {
    /// One selector of the original selector list, or `@name prelude` for at-rules.
    pub selector: String,
    pub declarations: Vec<Declaration>,
    pub kind: RuleKind,
    /// Query of the enclosing `@media` block.
    pub media: Option<String>,
    /// Verbatim source for at-rules and nested rules.
    pub raw: Option<String>,
    pub order: usize,
}

impl CssRule {
    pub fn source(&self) -> RuleSource {
        match (&self.kind, &self.media) {
            (RuleKind::Root, _) => RuleSource::Root,
            (RuleKind::AtRule { .. }, _) | (RuleKind::Nested, _) => RuleSource::AtRule,
            (RuleKind::Style, Some(_)) => RuleSource::Media,
            (RuleKind::Style, None) => RuleSource::Base,
        }
    }

    /// CSS text of this rule alone, without its enclosing media block.
    pub fn to_css(&self) -> String {
        match &self.raw {
            Some(raw) => raw.trim().to_string(),
            None => self.with_declarations(&self.declarations),
        }
    }

    /// CSS text of this rule's selector with a subset of declarations.
    pub fn with_declarations(&self, declarations: &[Declaration]) -> String {
        format!(
            "{} {{ {} }}",
            self.selector,
            declarations_to_css(declarations)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedStylesheet {
    pub rules: Vec<CssRule>,
    /// Custom properties declared in top-level `:root` blocks, last one wins.
    pub root_vars: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Parse stylesheet text into rules.
pub fn parse_stylesheet(source: &str) -> Result<ParsedStylesheet, ParseError> {
    let text = blank_comments(source);
    let mut scanner = Scanner {
        text: &text,
        bytes: text.as_bytes(),
        sheet: ParsedStylesheet::default(),
        order: 0,
    };
    scanner.parse_block(0, text.len(), None)?;
    Ok(scanner.sheet)
}

/// Parse the body of a declaration block (also used for `style=""` attributes).
pub fn parse_declarations(body: &str) -> Vec<Declaration> {
    split_top_level(body, b';')
        .into_iter()
        .filter_map(|segment| {
            let (name, value) = segment.split_once(':')?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return None;
            }
            let property = if name.starts_with("--") {
                name.to_string()
            } else {
                name.to_ascii_lowercase()
            };
            let (value, important) = strip_important(value.trim());
            if value.is_empty() {
                return None;
            }
            Some(Declaration {
                property,
                value,
                important,
            })
        })
        .collect()
}

/// Split a selector list on top-level commas.
pub fn split_selector_list(selector: &str) -> Vec<String> {
    split_top_level(selector, b',')
        .into_iter()
        .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|part| !part.is_empty())
        .collect()
}

fn strip_important(value: &str) -> (String, bool) {
    if let Some(pos) = value.rfind('!') {
        if value[pos + 1..].trim().eq_ignore_ascii_case("important") {
            return (value[..pos].trim_end().to_string(), true);
        }
    }
    (value.to_string(), false)
}

/// Split on `separator` outside strings, parentheses and brackets.
fn split_top_level(input: &str, separator: u8) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i, bytes.len()).unwrap_or(bytes.len());
                continue;
            }
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b if b == separator && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

/// Replace comments with spaces so byte offsets still point into the source.
fn blank_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_string(bytes, i, bytes.len()).unwrap_or(bytes.len());
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = source[i + 2..]
                    .find("*/")
                    .map(|pos| i + 2 + pos + 2)
                    .unwrap_or(bytes.len());
                out[i..end].fill(b' ');
                i = end;
            }
            _ => i += 1,
        }
    }
    String::from_utf8(out).unwrap_or_else(|_| source.to_string())
}

/// Index just past the quoted string opening at `start`, or `Err(start)` if
/// the string is still open at `end`. A raw newline terminates a string.
fn skip_string(bytes: &[u8], start: usize, end: usize) -> Result<usize, usize> {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < end {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return Ok(i),
            b if b == quote => return Ok(i + 1),
            _ => i += 1,
        }
    }
    Err(start)
}

enum Scan {
    Found(usize),
    Eof,
    Runaway(usize),
}

struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    sheet: ParsedStylesheet,
    order: usize,
}

impl<'a> Scanner<'a> {
    fn runaway_or_eof(&self, string_start: usize, end: usize) -> Scan {
        if self.bytes[string_start..end].contains(&b'}') {
            Scan::Runaway(string_start)
        } else {
            Scan::Eof
        }
    }

    /// First byte of `stops` outside strings and parenthesised groups.
    fn scan_until(&self, from: usize, end: usize, stops: &[u8]) -> Scan {
        let mut depth = 0usize;
        let mut i = from;
        while i < end {
            match self.bytes[i] {
                b'"' | b'\'' => match skip_string(self.bytes, i, end) {
                    Ok(next) => {
                        i = next;
                        continue;
                    }
                    Err(start) => return self.runaway_or_eof(start, end),
                },
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                b if depth == 0 && stops.contains(&b) => return Scan::Found(i),
                _ => {}
            }
            i += 1;
        }
        Scan::Eof
    }

    /// Index of the `}` closing the block opened at `open`.
    fn matching_brace(&self, open: usize, end: usize) -> Scan {
        let mut depth = 0usize;
        let mut i = open;
        while i < end {
            match self.bytes[i] {
                b'"' | b'\'' => match skip_string(self.bytes, i, end) {
                    Ok(next) => {
                        i = next;
                        continue;
                    }
                    Err(start) => return self.runaway_or_eof(start, end),
                },
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Scan::Found(i);
                    }
                }
                _ => {}
            }
            i += 1;
        }
        Scan::Eof
    }

    fn runaway(offset: usize) -> ParseError {
        ParseError::new(
            InputKind::Css,
            offset,
            "unterminated string swallows the rest of the stylesheet",
        )
    }

    fn warn(&mut self, message: String) {
        tracing::warn!(target: "weave::css", "{message}");
        self.sheet.warnings.push(message);
    }

    fn next_order(&mut self) -> usize {
        let order = self.order;
        self.order += 1;
        order
    }

    fn parse_block(&mut self, start: usize, end: usize, media: Option<&str>) -> Result<(), ParseError> {
        let mut i = start;
        while i < end {
            let byte = self.bytes[i];
            if byte.is_ascii_whitespace() || byte == b';' {
                i += 1;
                continue;
            }
            if byte == b'}' {
                self.warn(format!("stray '}}' at byte {i} ignored"));
                i += 1;
                continue;
            }
            i = if byte == b'@' {
                self.parse_at_rule(i, end, media)?
            } else {
                self.parse_style_rule(i, end, media)?
            };
        }
        Ok(())
    }

    fn parse_at_rule(&mut self, start: usize, end: usize, media: Option<&str>) -> Result<usize, ParseError> {
        let mut name_end = start + 1;
        while name_end < end
            && (self.bytes[name_end].is_ascii_alphanumeric() || self.bytes[name_end] == b'-')
        {
            name_end += 1;
        }
        let name = self.text[start + 1..name_end].to_ascii_lowercase();
        match self.scan_until(name_end, end, b"{;}") {
            Scan::Found(stop) if self.bytes[stop] == b'{' => {
                let prelude = self.text[name_end..stop].trim().to_string();
                match self.matching_brace(stop, end) {
                    Scan::Found(close) => {
                        if name == "media" && media.is_none() {
                            self.parse_block(stop + 1, close, Some(&prelude))?;
                        } else {
                            let raw = self.text[start..=close].to_string();
                            self.push_at_rule(name, prelude, raw, media);
                        }
                        Ok(close + 1)
                    }
                    Scan::Eof => {
                        if name == "media" && media.is_none() {
                            self.warn(format!(
                                "unterminated @media {prelude} block; recovered its complete rules"
                            ));
                            self.parse_block(stop + 1, end, Some(&prelude))?;
                        } else {
                            self.warn(format!("unterminated @{name} block dropped"));
                        }
                        Ok(end)
                    }
                    Scan::Runaway(offset) => Err(Self::runaway(offset)),
                }
            }
            Scan::Found(stop) => {
                let prelude = self.text[name_end..stop].trim().to_string();
                let raw = format!("{};", self.text[start..stop].trim_end());
                self.push_at_rule(name, prelude, raw, media);
                Ok(if self.bytes[stop] == b';' { stop + 1 } else { stop })
            }
            Scan::Eof => {
                self.warn(format!("incomplete @{name} at end of stylesheet dropped"));
                Ok(end)
            }
            Scan::Runaway(offset) => Err(Self::runaway(offset)),
        }
    }

    fn parse_style_rule(&mut self, start: usize, end: usize, media: Option<&str>) -> Result<usize, ParseError> {
        match self.scan_until(start, end, b"{;}") {
            Scan::Found(open) if self.bytes[open] == b'{' => {
                let selector = self.text[start..open].trim().to_string();
                match self.matching_brace(open, end) {
                    Scan::Found(close) => {
                        let text = self.text;
                        let body = &text[open + 1..close];
                        let raw = &text[start..=close];
                        self.push_style_rule(selector, body, raw, media);
                        Ok(close + 1)
                    }
                    Scan::Eof => {
                        self.warn(format!("unterminated rule `{selector}` dropped"));
                        Ok(end)
                    }
                    Scan::Runaway(offset) => Err(Self::runaway(offset)),
                }
            }
            Scan::Found(stop) => {
                let garbage = self.text[start..stop].trim().to_string();
                self.warn(format!("text without a block `{garbage}` skipped"));
                Ok(if self.bytes[stop] == b';' { stop + 1 } else { stop })
            }
            Scan::Eof => {
                let garbage = self.text[start..end].trim().to_string();
                if !garbage.is_empty() {
                    self.warn(format!("trailing text `{garbage}` skipped"));
                }
                Ok(end)
            }
            Scan::Runaway(offset) => Err(Self::runaway(offset)),
        }
    }

    fn push_at_rule(&mut self, name: String, prelude: String, raw: String, media: Option<&str>) {
        let order = self.next_order();
        self.sheet.rules.push(CssRule {
            selector: format!("@{name} {prelude}").trim_end().to_string(),
            declarations: Vec::new(),
            kind: RuleKind::AtRule { name, prelude },
            media: media.map(str::to_string),
            raw: Some(raw),
            order,
        });
    }

    fn push_style_rule(&mut self, selector: String, body: &str, raw: &str, media: Option<&str>) {
        if selector.is_empty() {
            self.warn("rule without a selector dropped".to_string());
            return;
        }
        let nested = matches!(self.scan_nested(body), Some(true));
        if nested {
            let order = self.next_order();
            self.sheet.rules.push(CssRule {
                selector,
                declarations: Vec::new(),
                kind: RuleKind::Nested,
                media: media.map(str::to_string),
                raw: Some(raw.to_string()),
                order,
            });
            return;
        }
        let declarations = parse_declarations(body);
        for selector in split_selector_list(&selector) {
            let kind = if selector.starts_with(":root") {
                RuleKind::Root
            } else {
                RuleKind::Style
            };
            if kind == RuleKind::Root && media.is_none() {
                for declaration in declarations.iter().filter(|d| d.is_custom_property()) {
                    self.sheet
                        .root_vars
                        .insert(declaration.property.clone(), declaration.value.clone());
                }
            }
            let order = self.next_order();
            self.sheet.rules.push(CssRule {
                selector,
                declarations: declarations.clone(),
                kind,
                media: media.map(str::to_string),
                raw: None,
                order,
            });
        }
    }

    /// Whether a rule body contains a nested block outside strings.
    fn scan_nested(&self, body: &str) -> Option<bool> {
        let bytes = body.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'"' | b'\'' => {
                    i = skip_string(bytes, i, bytes.len()).ok()?;
                    continue;
                }
                b'{' => return Some(true),
                _ => {}
            }
            i += 1;
        }
        Some(false)
    }
}

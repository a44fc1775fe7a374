//! Splitting of oversized CSS, JS and HTML embeds into ordered chunks.
//!
//! Content is first cut into syntactic units (a CSS rule, a JS statement,
//! a top-level HTML element), which are then packed greedily up to the
//! ceiling. Units are contiguous and cover every byte, so the chunks of one
//! source always concatenate back to it.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::diagnostics::diagnostics_enabled;
use crate::error::{IrError, Result};
use crate::html::fragment::{Token, is_void, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Css,
    Js,
    Html,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChunkKind::Css => "css",
            ChunkKind::Js => "js",
            ChunkKind::Html => "html",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedChunk {
    pub index: usize,
    pub content: String,
    pub size: usize,
    pub kind: ChunkKind,
}

/// Chunks of one artifact plus what a person needs to paste them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlan {
    pub artifact: String,
    pub kind: ChunkKind,
    pub ceiling: usize,
    pub source_size: usize,
    pub source_sha256: String,
    pub chunks: Vec<EmbedChunk>,
    pub instructions: Vec<String>,
}

impl ChunkPlan {
    pub fn reassemble(&self) -> String {
        self.chunks.iter().map(|chunk| chunk.content.as_str()).collect()
    }

    /// Whether the chunks hash back to the recorded source digest.
    pub fn verify(&self) -> bool {
        sha256_hex(self.reassemble().as_bytes()) == self.source_sha256
    }

    pub fn over_limit(&self) -> impl Iterator<Item = &EmbedChunk> {
        self.chunks.iter().filter(move |chunk| chunk.size > self.ceiling)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Split `content` into chunks no larger than `ceiling` bytes, except where
/// a single unit is larger on its own.
pub fn chunk(content: &str, kind: ChunkKind, ceiling: usize) -> Vec<EmbedChunk> {
    let ceiling = ceiling.max(1);
    let mut units = match kind {
        ChunkKind::Css => css_units(content),
        ChunkKind::Js => js_units(content),
        ChunkKind::Html => html_units(content),
    };
    if kind == ChunkKind::Js {
        units = units
            .into_iter()
            .flat_map(|unit| {
                if unit.len() > ceiling {
                    line_units(unit)
                } else {
                    vec![unit]
                }
            })
            .collect();
    }

    let mut chunks: Vec<EmbedChunk> = Vec::new();
    let mut current = String::new();
    let flush = |current: &mut String, chunks: &mut Vec<EmbedChunk>| {
        if !current.is_empty() {
            let content = std::mem::take(current);
            chunks.push(EmbedChunk {
                index: chunks.len(),
                size: content.len(),
                content,
                kind,
            });
        }
    };
    for unit in units {
        if !current.is_empty() && current.len() + unit.len() > ceiling {
            flush(&mut current, &mut chunks);
        }
        current.push_str(unit);
    }
    flush(&mut current, &mut chunks);

    if diagnostics_enabled("chunk") {
        debug!(
            kind = %kind,
            source = content.len(),
            ceiling,
            chunks = chunks.len(),
            "diagnostics: chunked embed"
        );
    }
    chunks
}

/// Chunk `content` and attach reassembly instructions.
pub fn plan(artifact: &str, content: &str, kind: ChunkKind, ceiling: usize) -> ChunkPlan {
    let ceiling = ceiling.max(1);
    let chunks = chunk(content, kind, ceiling);
    let source_sha256 = sha256_hex(content.as_bytes());
    let total = chunks.len();
    let mut instructions = vec![format!(
        "Paste the {total} parts of {artifact} in order; together they reproduce the original \
         {} bytes (sha256 {source_sha256}).",
        content.len()
    )];
    for chunk in &chunks {
        let place = match kind {
            ChunkKind::Css => "inside a <style> tag in its own code embed",
            ChunkKind::Js => "inside a <script> tag in its own code embed",
            ChunkKind::Html => "into its own code embed",
        };
        instructions.push(format!(
            "Part {} of {total} ({} bytes): paste {place}.",
            chunk.index + 1,
            chunk.size
        ));
    }
    ChunkPlan {
        artifact: artifact.to_string(),
        kind,
        ceiling,
        source_size: content.len(),
        source_sha256,
        chunks,
        instructions,
    }
}

/// Fail with [`IrError::SizeLimitExceeded`] when any chunk is still over `hard_limit`.
pub fn enforce_ceiling(plan: &ChunkPlan, hard_limit: usize) -> Result<()> {
    match plan.chunks.iter().find(|chunk| chunk.size > hard_limit) {
        Some(chunk) => Err(IrError::SizeLimitExceeded {
            artifact: format!("{} part {}", plan.artifact, chunk.index + 1),
            size: chunk.size,
            limit: hard_limit,
        }),
        None => Ok(()),
    }
}

/// Cut `content` at the given end offsets (plus the remainder).
fn cut(content: &str, ends: Vec<usize>) -> Vec<&str> {
    let mut units = Vec::with_capacity(ends.len() + 1);
    let mut start = 0;
    for end in ends {
        if end > start {
            units.push(&content[start..end]);
            start = end;
        }
    }
    if start < content.len() {
        units.push(&content[start..]);
    }
    units
}

/// Rules end at the `}` closing their outermost block; statements such as
/// `@import` end at a top-level `;`.
fn css_units(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut ends = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    ends.push(i + 1);
                }
            }
            b';' if depth == 0 => ends.push(i + 1),
            _ => {}
        }
        i += 1;
    }
    cut(content, ends)
}

/// Statements end at a top-level `;` or at the `}` closing a top-level block.
fn js_units(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut ends = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' | b'`' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i + 1 < bytes.len() && bytes[i + 1] != b'\n' {
                    i += 1;
                }
            }
            b'{' | b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    ends.push(i + 1);
                }
            }
            b';' if depth == 0 => ends.push(i + 1),
            _ => {}
        }
        i += 1;
    }
    cut(content, ends)
}

fn line_units(unit: &str) -> Vec<&str> {
    unit.split_inclusive('\n').collect()
}

/// Top-level elements, text runs and comments.
fn html_units(content: &str) -> Vec<&str> {
    let mut ends = Vec::new();
    let mut open: Vec<String> = Vec::new();
    for span in tokenize(content) {
        match span.token {
            Token::StartTag {
                name, self_closing, ..
            } if !self_closing && !is_void(&name) => open.push(name),
            Token::EndTag { name } => {
                if let Some(position) = open.iter().rposition(|tag| *tag == name) {
                    open.truncate(position);
                }
            }
            _ => {}
        }
        if open.is_empty() {
            ends.push(span.range.end);
        }
    }
    cut(content, ends)
}

/// Index of the closing quote of the string starting at `start`.
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b if b == quote => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Index of the `/` ending the comment starting at `start`.
fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

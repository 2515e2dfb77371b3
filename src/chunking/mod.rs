//! Split file text into overlapping passages
//!
//! Top-level declarations are the preferred split points when a grammar is
//! available. Anything larger than `chunk_size` (and files without a
//! grammar) falls back to sliding windows that prefer to end on a newline.
//! Spans are byte offsets snapped to UTF-8 boundaries; their union always
//! covers the whole file.

use crate::config::ChunkingConfig;
use crate::parsing;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// How far into a file binary detection looks for a NUL byte
const BINARY_SNIFF_BYTES: usize = 8192;

/// A contiguous passage of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// BLAKE3 of (source path, start, end)
    pub id: String,
    pub source_path: String,
    pub language: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    /// Filled in when the chunk is indexed
    #[serde(default)]
    pub vector: Vec<f32>,
}

impl Chunk {
    fn new(
        source_path: &str,
        language: &str,
        text: &str,
        newlines: &[usize],
        span: (usize, usize),
    ) -> Self {
        let (start, end) = span;
        let id = blake3::hash(format!("{}:{}:{}", source_path, start, end).as_bytes());
        let body = &text[start..end];
        let line_of = |offset: usize| newlines.partition_point(|&n| n < offset) + 1;
        let content_len = body.trim_end_matches('\n').len();
        let start_line = line_of(start);
        let end_line = if content_len == 0 {
            start_line
        } else {
            line_of(start + content_len - 1)
        };
        Self {
            id: id.to_hex()[..16].to_string(),
            source_path: source_path.to_string(),
            language: language.to_string(),
            start_offset: start,
            end_offset: end,
            start_line,
            end_line,
            text: body.to_string(),
            vector: Vec::new(),
        }
    }
}

/// A file that cannot be chunked as text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("{path} looks like a binary file")]
    Binary { path: String },

    #[error("{path} is not valid UTF-8 (first invalid byte at {valid_up_to})")]
    InvalidUtf8 { path: String, valid_up_to: usize },
}

/// Chunk raw file bytes, rejecting binary and non-UTF-8 content
pub fn chunk_bytes(
    source_path: &str,
    bytes: &[u8],
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, ChunkError> {
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err(ChunkError::Binary {
            path: source_path.to_string(),
        });
    }
    let text = std::str::from_utf8(bytes).map_err(|e| ChunkError::InvalidUtf8 {
        path: source_path.to_string(),
        valid_up_to: e.valid_up_to(),
    })?;
    Ok(chunk(source_path, text, config))
}

/// Chunk file text; the returned chunks have empty vectors
pub fn chunk(source_path: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let language = parsing::language_tag(Path::new(source_path));
    let spans = if config.structural {
        structural_spans(source_path, text, config)
    } else {
        None
    }
    .unwrap_or_else(|| window_spans(text, 0, text.len(), config));

    let newlines: Vec<usize> = text.match_indices('\n').map(|(i, _)| i).collect();
    spans
        .into_iter()
        .map(|span| Chunk::new(source_path, language, text, &newlines, span))
        .collect()
}

/// Segment at top-level declarations, merge greedily, then add leading context
fn structural_spans(
    source_path: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Option<Vec<(usize, usize)>> {
    let outcome = parsing::parse_file(Path::new(source_path), text);
    let starts = outcome.top_level_starts();
    if starts.is_empty() {
        return None;
    }

    let mut bounds = vec![0];
    bounds.extend(starts.into_iter().filter(|&s| s > 0 && s < text.len()));
    bounds.push(text.len());
    bounds.dedup();

    let mut merged: Vec<(usize, usize)> = Vec::new();
    for pair in bounds.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        match merged.last_mut() {
            Some(last) if end - last.0 <= config.chunk_size => last.1 = end,
            _ => merged.push((start, end)),
        }
    }

    let mut spans = Vec::new();
    let mut prev_start: Option<usize> = None;
    for (start, end) in merged {
        let len = end - start;
        if len <= config.chunk_size {
            let budget = config.overlap.min(config.chunk_size - len);
            let with_context = match prev_start {
                Some(floor) => leading_context(text, floor, start, budget),
                None => start,
            };
            spans.push((with_context, end));
            prev_start = Some(with_context);
        } else {
            let window_start = match prev_start {
                Some(floor) => leading_context(text, floor, start, config.overlap),
                None => start,
            };
            let windows = window_spans(text, window_start, end, config);
            prev_start = windows.last().map(|w| w.0);
            spans.extend(windows);
        }
    }
    Some(spans)
}

/// Start of up to `budget` bytes before `start`, never before `floor`,
/// beginning on a line when one fits
fn leading_context(text: &str, floor: usize, start: usize, budget: usize) -> usize {
    if budget == 0 || start <= floor {
        return start;
    }
    let candidate = ceil_boundary(text, start.saturating_sub(budget).max(floor + 1));
    if candidate >= start {
        return start;
    }
    match text[candidate..start].find('\n') {
        Some(pos) if candidate + pos + 1 < start => candidate + pos + 1,
        Some(_) => start,
        None => candidate,
    }
}

/// Sliding windows over `text[from..to]`
fn window_spans(
    text: &str,
    from: usize,
    to: usize,
    config: &ChunkingConfig,
) -> Vec<(usize, usize)> {
    let size = config.chunk_size;
    let mut spans = Vec::new();
    let mut start = from;

    while start < to {
        if to - start <= size {
            spans.push((start, to));
            break;
        }

        let mut end = floor_boundary(text, start + size);
        let half = floor_boundary(text, start + size / 2);
        if half > start {
            if let Some(pos) = text[half..end].rfind('\n') {
                end = half + pos + 1;
            }
        }
        spans.push((start, end));

        let next = end.saturating_sub(config.overlap).max(start + 1);
        start = ceil_boundary(text, next);
    }
    spans
}

fn floor_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

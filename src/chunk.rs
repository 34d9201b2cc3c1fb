//! Boundary-aware text chunker.
//!
//! Splits a document's full text into [`Chunk`]s that respect a character
//! budget derived from `max_tokens`. Near the budget edge the chunker looks
//! back a bounded window for the safest boundary: paragraph break, line
//! break, sentence end, then any whitespace. With none available it cuts
//! at the budget and flags the chunk as a hard split.
//!
//! Chunks are lossless. Text is never trimmed, and the only repetition is
//! the configured overlap, recorded per chunk in `overlap_len`, so
//! [`reassemble`] reproduces the input exactly.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ExtractionResult, SEGMENT_SEPARATOR};

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ChunkSettings {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub lookback_chars: usize,
}

impl ChunkSettings {
    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self {
            max_chars: config.max_tokens * CHARS_PER_TOKEN,
            overlap_chars: config.overlap_tokens * CHARS_PER_TOKEN,
            lookback_chars: config.lookback_chars,
        }
    }

    /// The same settings with chunks no longer than `max_chars`.
    pub fn capped(self, max_chars: usize) -> Self {
        let max_chars = self.max_chars.min(max_chars).max(1);
        Self {
            max_chars,
            overlap_chars: self.overlap_chars.min(max_chars / 2),
            lookback_chars: self.lookback_chars,
        }
    }
}

/// Chunk an extraction result. Degenerate results yield no chunks.
pub fn chunk_extraction(result: &ExtractionResult, settings: ChunkSettings) -> Vec<Chunk> {
    if result.degenerate {
        return Vec::new();
    }
    let mut starts = Vec::with_capacity(result.segments.len());
    let mut offset = 0usize;
    for (i, segment) in result.segments.iter().enumerate() {
        if i > 0 {
            offset += SEGMENT_SEPARATOR.len();
        }
        starts.push(offset);
        offset += segment.text.len();
    }
    chunk_text(&result.document_id, &result.full_text(), &starts, settings)
}

/// Split `text` into chunks. `segment_starts` holds the byte offset at
/// which each segment begins (ascending, first is 0).
pub fn chunk_text(
    document_id: &str,
    text: &str,
    segment_starts: &[usize],
    settings: ChunkSettings,
) -> Vec<Chunk> {
    let max_chars = settings.max_chars.max(1);
    let overlap_chars = settings.overlap_chars.min(max_chars - 1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut fresh_start = 0usize;

    while fresh_start < text.len() {
        let limit = advance_chars(text, start, max_chars);
        let (end, hard_split) = if limit >= text.len() {
            (text.len(), false)
        } else {
            let window_start = retreat_chars(text, limit, settings.lookback_chars).max(fresh_start);
            match find_boundary(&text[window_start..limit]) {
                Some(rel) if window_start + rel > fresh_start => (window_start + rel, false),
                _ => (limit, true),
            }
        };

        chunks.push(make_chunk(
            document_id,
            chunks.len(),
            text,
            start..end,
            fresh_start - start,
            hard_split,
            segment_starts,
        ));

        fresh_start = end;
        start = retreat_chars(text, end, overlap_chars);
    }

    chunks
}

/// Concatenate chunks, dropping each chunk's overlap prefix.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}

/// Byte offset just past the best boundary in `window`, if any.
fn find_boundary(window: &str) -> Option<usize> {
    if let Some(p) = window.rfind("\n\n") {
        return Some(p + 2);
    }
    if let Some(p) = window.rfind('\n') {
        return Some(p + 1);
    }

    let mut sentence_end = None;
    let mut any_space = None;
    let mut prev: Option<char> = None;
    for (i, c) in window.char_indices() {
        if c.is_whitespace() {
            let after = i + c.len_utf8();
            any_space = Some(after);
            if matches!(prev, Some('.') | Some('!') | Some('?')) {
                sentence_end = Some(after);
            }
        }
        prev = Some(c);
    }
    sentence_end.or(any_space)
}

fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .take(n)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(from)
}

fn segment_at(segment_starts: &[usize], pos: usize) -> usize {
    segment_starts
        .partition_point(|&s| s <= pos)
        .saturating_sub(1)
}

fn make_chunk(
    document_id: &str,
    index: usize,
    text: &str,
    span: std::ops::Range<usize>,
    overlap_len: usize,
    hard_split: bool,
    segment_starts: &[usize],
) -> Chunk {
    let body = &text[span.clone()];
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let first = segment_at(segment_starts, span.start);
    let last = segment_at(segment_starts, span.end.saturating_sub(1).max(span.start));

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        index,
        text: body.to_string(),
        start: span.start,
        end: span.end,
        segment_range: first..last + 1,
        overlap_len,
        hard_split,
        hash,
    }
}

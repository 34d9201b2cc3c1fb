//! Core data models used throughout docintel.
//!
//! These types represent the documents, extraction results, chunks, and
//! analysis results that flow through the pipeline. Everything downstream
//! of ingestion is passed by value or behind an `Arc`; nothing mutates an
//! upstream stage's output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::ModelError;

/// Separator placed between segments when a document's full text is built.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Document kind as declared by the format detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
    Unknown,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Docx => "docx",
            DocumentKind::PlainText => "text",
            DocumentKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ingested document. The payload is immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    /// Hex SHA-256 of the payload; with the kind, the extraction cache key.
    pub id: String,
    #[serde(skip)]
    pub payload: Arc<[u8]>,
    pub kind: DocumentKind,
    pub size: usize,
    pub filename: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }
}

/// Which method produced a segment's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Direct,
    Ocr,
}

/// Overall extraction method for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Direct,
    Ocr,
    Hybrid,
}

/// One page (PDF, form-feed delimited text) or section (DOCX) of text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub index: usize,
    pub text: String,
    pub provenance: Provenance,
    /// Non-whitespace characters the direct extractor found on this segment.
    pub direct_chars: usize,
    pub ocr_confidence: Option<f32>,
}

impl Segment {
    pub fn direct(index: usize, text: String) -> Self {
        let direct_chars = count_visible(&text);
        Self {
            index,
            text,
            provenance: Provenance::Direct,
            direct_chars,
            ocr_confidence: None,
        }
    }

    pub fn visible_chars(&self) -> usize {
        count_visible(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.visible_chars() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Direct extraction produced too little or garbled text.
    SparseText,
    /// Bytes were replaced while decoding (below the error tolerance).
    LossyDecode,
    /// The direct extractor failed; every page was sent through OCR.
    DirectFailed,
    OcrUnavailable,
    OcrFailed,
    OcrLowConfidence,
    /// OCR ran but recognized nothing; the direct text was kept.
    OcrEmpty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionWarning {
    pub segment: Option<usize>,
    pub kind: WarningKind,
    pub message: String,
}

impl ExtractionWarning {
    pub fn new(segment: Option<usize>, kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            segment,
            kind,
            message: message.into(),
        }
    }
}

/// Text extracted from a [`Document`], one segment per page or section.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub document_id: String,
    pub kind: DocumentKind,
    pub segments: Vec<Segment>,
    pub method: ExtractionMethod,
    /// Share of extracted characters that look like real text, in `[0, 1]`.
    pub confidence: f32,
    pub warnings: Vec<ExtractionWarning>,
    pub degenerate: bool,
}

impl ExtractionResult {
    /// Build a direct-extraction result, computing confidence and degeneracy.
    pub fn direct(document_id: &str, kind: DocumentKind, segments: Vec<Segment>) -> Self {
        let mut result = Self {
            document_id: document_id.to_string(),
            kind,
            segments,
            method: ExtractionMethod::Direct,
            confidence: 0.0,
            warnings: Vec::new(),
            degenerate: false,
        };
        result.refresh();
        result
    }

    /// Recompute method, confidence and the degenerate flag from the segments.
    pub fn refresh(&mut self) {
        let ocr = self
            .segments
            .iter()
            .filter(|s| s.provenance == Provenance::Ocr)
            .count();
        self.method = if ocr == 0 {
            ExtractionMethod::Direct
        } else if ocr == self.segments.len() {
            ExtractionMethod::Ocr
        } else {
            ExtractionMethod::Hybrid
        };
        self.degenerate = self.segments.iter().all(Segment::is_empty);

        let mut visible = 0usize;
        let mut clean = 0usize;
        for segment in &self.segments {
            for c in segment.text.chars().filter(|c| !c.is_whitespace()) {
                visible += 1;
                if !is_garbage_char(c) {
                    clean += 1;
                }
            }
        }
        self.confidence = if visible == 0 {
            0.0
        } else {
            clean as f32 / visible as f32
        };
    }

    /// The document's text: segments in order joined by [`SEGMENT_SEPARATOR`].
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    pub fn provenance(&self) -> Vec<Provenance> {
        self.segments.iter().map(|s| s.provenance).collect()
    }

    pub fn stats(&self) -> TextStats {
        let text = self.full_text();
        TextStats {
            segments: self.segments.len(),
            chars: text.chars().count(),
            words: text.split_whitespace().count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextStats {
    pub segments: usize,
    pub chars: usize,
    pub words: usize,
}

/// A bounded slice of a document's full text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub index: usize,
    pub text: String,
    /// Byte offsets of `text` within the document's full text.
    pub start: usize,
    pub end: usize,
    /// Segments this chunk touches (inclusive start, exclusive end).
    pub segment_range: Range<usize>,
    /// Leading bytes repeated from the previous chunk.
    pub overlap_len: usize,
    /// No safe boundary was found in the lookback window.
    pub hard_split: bool,
    pub hash: String,
}

impl Chunk {
    /// The part of this chunk not shared with its predecessor.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }
}

/// Chunks of one document, handed to the orchestrator by value.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkedDocument {
    pub document_id: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisIntent {
    Summarize,
    ExtractEntities,
    Qa,
    Compare,
    KeyElements,
    Skills,
    Experience,
}

impl AnalysisIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisIntent::Summarize => "summarize",
            AnalysisIntent::ExtractEntities => "extract-entities",
            AnalysisIntent::Qa => "qa",
            AnalysisIntent::Compare => "compare",
            AnalysisIntent::KeyElements => "key-elements",
            AnalysisIntent::Skills => "skills",
            AnalysisIntent::Experience => "experience",
        }
    }

    /// Number of documents the intent operates on.
    pub fn arity(&self) -> usize {
        match self {
            AnalysisIntent::Compare => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for AnalysisIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single user action against one or two documents.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub intent: AnalysisIntent,
    pub documents: Vec<ChunkedDocument>,
    pub question: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Complete,
    Partial,
    Failed,
    Cancelled,
}

/// Orchestrator states, recorded in order in [`AnalysisDiagnostics::states`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "calls", rename_all = "snake_case")]
pub enum AnalysisState {
    Pending,
    Chunking,
    AwaitingModel(usize),
    Merging,
    Complete,
    Partial,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Map,
    Reduce,
}

/// Audit record for one logical model call (including its retries).
#[derive(Debug, Clone, Serialize)]
pub struct ModelCallRecord {
    pub phase: CallPhase,
    pub document_id: String,
    pub chunk_index: Option<usize>,
    pub attempts: u32,
    /// Whether the stricter prompt was used after an unusable response.
    pub strict_retry: bool,
    pub error: Option<ModelError>,
    pub elapsed_ms: u64,
}

impl ModelCallRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A chunk whose map call exhausted its retries.
#[derive(Debug, Clone, Serialize)]
pub struct FailedChunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub char_range: Range<usize>,
    pub segment_range: Range<usize>,
    pub error: ModelError,
}

/// How a segment was extracted, repeated in analysis diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionDiagnostics {
    pub document_id: String,
    pub method: ExtractionMethod,
    pub provenance: Vec<Provenance>,
    pub warnings: Vec<ExtractionWarning>,
}

impl From<&ExtractionResult> for ExtractionDiagnostics {
    fn from(result: &ExtractionResult) -> Self {
        Self {
            document_id: result.document_id.clone(),
            method: result.method,
            provenance: result.provenance(),
            warnings: result.warnings.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisDiagnostics {
    pub chunk_count: usize,
    /// Attempts beyond the first, summed over every model call.
    pub retry_count: u32,
    pub hard_splits: usize,
    pub calls: Vec<ModelCallRecord>,
    pub failed_chunks: Vec<FailedChunk>,
    pub states: Vec<AnalysisState>,
    pub extraction: Vec<ExtractionDiagnostics>,
}

/// One type assigned to an entity, with the chunks that reported it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityTypeSighting {
    pub entity_type: String,
    pub chunks: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    /// Surface form as first seen.
    pub entity: String,
    pub normalized: String,
    /// More than one entry means the chunks disagreed.
    pub types: Vec<EntityTypeSighting>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub document_a: String,
    pub document_b: String,
    pub matched: Vec<String>,
    /// In A, absent from B.
    pub missing: Vec<String>,
    /// In B, absent from A.
    pub extra: Vec<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnalysisContent {
    Text(String),
    Entities(Vec<EntityRecord>),
    Comparison(ComparisonReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub intent: AnalysisIntent,
    pub status: AnalysisStatus,
    pub content: Option<AnalysisContent>,
    pub diagnostics: AnalysisDiagnostics,
}

impl AnalysisResult {
    /// The content, only if every chunk succeeded.
    pub fn into_complete(self) -> Result<AnalysisContent, crate::error::PipelineError> {
        use crate::error::PipelineError;
        match self.status {
            AnalysisStatus::Complete => self.content.ok_or_else(|| {
                PipelineError::InvalidRequest("complete result without content".into())
            }),
            AnalysisStatus::Cancelled => Err(PipelineError::Cancelled),
            AnalysisStatus::Partial | AnalysisStatus::Failed => {
                let failed = self.diagnostics.failed_chunks.len();
                Err(PipelineError::PartialResult {
                    failed,
                    total: self.diagnostics.chunk_count,
                })
            }
        }
    }
}

pub(crate) fn count_visible(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Characters that indicate a broken text layer (bad ToUnicode maps,
/// mis-decoded bytes, private-use glyph codes).
pub(crate) fn is_garbage_char(c: char) -> bool {
    c == char::REPLACEMENT_CHARACTER
        || (c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
        || ('\u{E000}'..='\u{F8FF}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: usize, text: &str, provenance: Provenance) -> Segment {
        Segment {
            provenance,
            ..Segment::direct(index, text.to_string())
        }
    }

    #[test]
    fn all_empty_segments_are_degenerate() {
        let result = ExtractionResult::direct(
            "doc",
            DocumentKind::Pdf,
            vec![segment(0, "  \n", Provenance::Direct), segment(1, "", Provenance::Direct)],
        );
        assert!(result.degenerate);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn method_reflects_provenance_mix() {
        let mut result = ExtractionResult::direct(
            "doc",
            DocumentKind::Pdf,
            vec![
                segment(0, "page one", Provenance::Direct),
                segment(1, "page two", Provenance::Ocr),
            ],
        );
        assert_eq!(result.method, ExtractionMethod::Hybrid);
        for s in &mut result.segments {
            s.provenance = Provenance::Ocr;
        }
        result.refresh();
        assert_eq!(result.method, ExtractionMethod::Ocr);
        assert!(!result.degenerate);
    }

    #[test]
    fn confidence_penalizes_garbage() {
        let result = ExtractionResult::direct(
            "doc",
            DocumentKind::Pdf,
            vec![segment(0, "ab\u{FFFD}\u{FFFD}", Provenance::Direct)],
        );
        assert!((result.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn full_text_joins_segments_in_order() {
        let result = ExtractionResult::direct(
            "doc",
            DocumentKind::PlainText,
            vec![
                segment(0, "first", Provenance::Direct),
                segment(1, "second", Provenance::Direct),
            ],
        );
        assert_eq!(result.full_text(), "first\n\nsecond");
        let stats = result.stats();
        assert_eq!(stats.words, 2);
        assert_eq!(stats.segments, 2);
    }
}

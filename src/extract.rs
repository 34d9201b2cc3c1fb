//! Direct text extraction, one extractor per document kind.
//!
//! Extractors are pure: bytes in, ordered segments out. They never call
//! OCR; the [`crate::fallback`] coordinator decides what to do with sparse
//! segments. [`ExtractorRegistry`] selects the extractor for a detected
//! kind and caps how many extractions of each kind run at once.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::ExtractionConfig;
use crate::models::{
    DocumentKind, ExtractionResult, ExtractionWarning, Segment, WarningKind,
};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{invalid_bytes} of {total_bytes} bytes are not valid text")]
    Encoding {
        invalid_bytes: usize,
        total_bytes: usize,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("no extractor registered for {0}")]
    NoExtractor(DocumentKind),
    #[error("{kind} extractor crashed: {message}")]
    Crashed { kind: DocumentKind, message: String },
}

/// Capability shared by every per-kind extractor.
pub trait Extractor: Send + Sync {
    fn kind(&self) -> DocumentKind;

    /// Extract ordered segments from `bytes`. Must be deterministic.
    fn extract(&self, document_id: &str, bytes: &[u8]) -> Result<ExtractionResult, ExtractError>;
}

// ============ Plain text ============

/// BOM-aware text decoder. Form feeds separate pages.
pub struct PlainTextExtractor {
    /// Share of undecodable bytes tolerated before failing.
    tolerance: f32,
}

impl PlainTextExtractor {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    fn decode(&self, bytes: &[u8]) -> Result<(String, usize), ExtractError> {
        let (text, invalid) = if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
            decode_utf16(rest, u16::from_le_bytes)
        } else if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
            decode_utf16(rest, u16::from_be_bytes)
        } else {
            let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
            decode_utf8_lossy(body)
        };

        if !bytes.is_empty() && invalid as f32 / bytes.len() as f32 > self.tolerance {
            return Err(ExtractError::Encoding {
                invalid_bytes: invalid,
                total_bytes: bytes.len(),
            });
        }
        Ok((text, invalid))
    }
}

impl Extractor for PlainTextExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::PlainText
    }

    fn extract(&self, document_id: &str, bytes: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let (text, invalid) = self.decode(bytes)?;
        let text = text.replace("\r\n", "\n");
        let segments = text
            .split('\u{c}')
            .enumerate()
            .map(|(i, page)| Segment::direct(i, page.trim().to_string()))
            .collect();

        let mut result = ExtractionResult::direct(document_id, DocumentKind::PlainText, segments);
        if invalid > 0 {
            result.warnings.push(ExtractionWarning::new(
                None,
                WarningKind::LossyDecode,
                format!("{} undecodable bytes replaced", invalid),
            ));
        }
        Ok(result)
    }
}

fn decode_utf8_lossy(bytes: &[u8]) -> (String, usize) {
    let mut out = String::with_capacity(bytes.len());
    let mut invalid = 0usize;
    for chunk in bytes.utf8_chunks() {
        out.push_str(chunk.valid());
        if !chunk.invalid().is_empty() {
            invalid += chunk.invalid().len();
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
    (out, invalid)
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> (String, usize) {
    let mut invalid = bytes.len() % 2;
    let units = bytes.chunks_exact(2).map(|pair| unit([pair[0], pair[1]]));
    let text = char::decode_utf16(units)
        .map(|r| {
            r.unwrap_or_else(|_| {
                invalid += 2;
                char::REPLACEMENT_CHARACTER
            })
        })
        .collect();
    (text, invalid)
}

// ============ DOCX ============

/// Walks `word/document.xml` in document order.
///
/// Paragraphs end with a newline; table cells are tab-separated and rows
/// newline-terminated. Explicit page breaks and section breaks start a new
/// segment.
pub struct DocxExtractor;

impl Extractor for DocxExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Docx
    }

    fn extract(&self, document_id: &str, bytes: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractError::Docx(e.to_string()))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let sections = walk_document_xml(&xml)?;
        let segments = sections
            .into_iter()
            .enumerate()
            .map(|(i, text)| Segment::direct(i, text))
            .collect();
        Ok(ExtractionResult::direct(
            document_id,
            DocumentKind::Docx,
            segments,
        ))
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Docx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Docx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

#[derive(Default)]
struct DocxWalker {
    sections: Vec<String>,
    current: String,
    in_text: bool,
    cell_depth: usize,
    /// Inside `w:tabs` (tab-stop definitions, not tab characters).
    in_tab_stops: bool,
    pending_break: bool,
}

impl DocxWalker {
    fn start(&mut self, e: &BytesStart<'_>, empty: bool) {
        match e.local_name().as_ref() {
            b"t" if !empty => self.in_text = true,
            b"tabs" if !empty => self.in_tab_stops = true,
            b"tab" if !self.in_tab_stops => self.current.push('\t'),
            b"cr" => self.current.push('\n'),
            b"br" => {
                if attr_is(e, b"type", b"page") {
                    self.pending_break = true;
                } else {
                    self.current.push('\n');
                }
            }
            b"tc" if !empty => self.cell_depth += 1,
            b"sectPr" => self.pending_break = true,
            _ => {}
        }
    }

    fn end(&mut self, local: &[u8]) {
        match local {
            b"t" => self.in_text = false,
            b"tabs" => self.in_tab_stops = false,
            b"p" => {
                if self.cell_depth > 0 {
                    self.current.push(' ');
                } else {
                    self.current.push('\n');
                }
                if self.pending_break {
                    self.break_section();
                }
            }
            b"tc" => {
                self.cell_depth = self.cell_depth.saturating_sub(1);
                trim_end_in_place(&mut self.current, ' ');
                self.current.push('\t');
            }
            b"tr" => {
                trim_end_in_place(&mut self.current, '\t');
                self.current.push('\n');
            }
            _ => {}
        }
    }

    fn break_section(&mut self) {
        self.pending_break = false;
        let text = std::mem::take(&mut self.current);
        self.sections.push(text.trim().to_string());
    }

    fn finish(mut self) -> Vec<String> {
        let tail = self.current.trim().to_string();
        // A trailing body-level sectPr leaves nothing behind; don't emit an
        // empty final section for it.
        if !tail.is_empty() || self.sections.is_empty() {
            self.sections.push(tail);
        }
        self.sections
    }
}

fn walk_document_xml(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut walker = DocxWalker::default();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => walker.start(&e, false),
            Ok(Event::Empty(e)) => walker.start(&e, true),
            Ok(Event::End(e)) => walker.end(e.local_name().as_ref()),
            Ok(Event::Text(te)) if walker.in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                walker.current.push_str(&text);
            }
            Ok(Event::CData(cd)) if walker.in_text => {
                walker
                    .current
                    .push_str(&String::from_utf8_lossy(&cd.into_inner()));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(walker.finish())
}

fn attr_is(e: &BytesStart<'_>, key: &[u8], value: &[u8]) -> bool {
    e.attributes().flatten().any(|a| {
        a.key.local_name().as_ref() == key && a.value.as_ref() == value
    })
}

fn trim_end_in_place(s: &mut String, c: char) {
    while s.ends_with(c) {
        s.pop();
    }
}

// ============ PDF ============

/// Extracts the text layer page by page.
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn extract(&self, document_id: &str, bytes: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let segments = pages
            .into_iter()
            .enumerate()
            .map(|(i, page)| Segment::direct(i, page.trim().to_string()))
            .collect();
        Ok(ExtractionResult::direct(
            document_id,
            DocumentKind::Pdf,
            segments,
        ))
    }
}

// ============ Registry ============

struct Slot {
    extractor: Arc<dyn Extractor>,
    workers: Arc<Semaphore>,
}

/// Kind-keyed extractor lookup with a bounded worker pool per kind.
#[derive(Clone)]
pub struct ExtractorRegistry {
    slots: Arc<HashMap<DocumentKind, Slot>>,
}

impl ExtractorRegistry {
    /// Registry with the built-in PDF, DOCX and plain-text extractors.
    pub fn with_defaults(config: &ExtractionConfig) -> Self {
        Self::from_extractors(
            vec![
                Arc::new(PdfExtractor),
                Arc::new(DocxExtractor),
                Arc::new(PlainTextExtractor::new(config.encoding_error_tolerance)),
            ],
            config.workers_per_kind,
        )
    }

    /// Registry from explicit extractors; later entries replace earlier
    /// ones of the same kind.
    pub fn from_extractors(extractors: Vec<Arc<dyn Extractor>>, workers_per_kind: usize) -> Self {
        let mut slots = HashMap::new();
        for extractor in extractors {
            slots.insert(
                extractor.kind(),
                Slot {
                    extractor,
                    workers: Arc::new(Semaphore::new(workers_per_kind.max(1))),
                },
            );
        }
        Self {
            slots: Arc::new(slots),
        }
    }

    pub fn supports(&self, kind: DocumentKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Run the kind's extractor on a blocking thread, holding one of that
    /// kind's worker permits.
    pub async fn extract(
        &self,
        kind: DocumentKind,
        document_id: &str,
        payload: Arc<[u8]>,
    ) -> Result<ExtractionResult, ExtractError> {
        let slot = self
            .slots
            .get(&kind)
            .ok_or(ExtractError::NoExtractor(kind))?;
        let _permit = slot
            .workers
            .acquire()
            .await
            .map_err(|_| ExtractError::NoExtractor(kind))?;

        let extractor = slot.extractor.clone();
        let document_id = document_id.to_string();
        tokio::task::spawn_blocking(move || extractor.extract(&document_id, &payload))
            .await
            .unwrap_or_else(|join_err| {
                Err(ExtractError::Crashed {
                    kind,
                    message: join_err.to_string(),
                })
            })
    }
}

//! Content-based document kind detection.
//!
//! Magic bytes decide first (`infer`, plus a look inside ZIP containers for
//! `word/document.xml`). Only when the content carries no signature and
//! does not clearly read as text does a filename extension or declared
//! content-type settle the kind.

use std::io::Cursor;
use tracing::debug;

use crate::error::PipelineError;
use crate::models::DocumentKind;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

const PDF_MAGIC: &[u8] = b"%PDF-";
/// Bytes inspected by the text heuristic.
const SNIFF_LEN: usize = 8192;
/// Share of suspicious bytes above which content is not treated as text.
const BINARY_RATIO: f32 = 0.10;

/// Upload metadata used only to break ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectHint<'a> {
    pub filename: Option<&'a str>,
    /// Declared kind label or content-type, e.g. `"application/pdf"` or `"docx"`.
    pub declared: Option<&'a str>,
}

/// Declare the kind of `bytes`, or [`DocumentKind::Unknown`].
pub fn detect_kind(bytes: &[u8], hint: DetectHint<'_>) -> DocumentKind {
    if let Some(kind) = detect_by_signature(bytes) {
        debug!(kind = %kind, "detected by signature");
        return kind;
    }

    match text_verdict(bytes) {
        TextVerdict::Text => DocumentKind::PlainText,
        TextVerdict::Binary => DocumentKind::Unknown,
        TextVerdict::Inconclusive => {
            let kind = kind_from_hint(hint);
            debug!(kind = %kind, "detected by hint");
            kind
        }
    }
}

/// Like [`detect_kind`] but reports `Unknown` as [`PipelineError::UnsupportedFormat`].
pub fn require_kind(bytes: &[u8], hint: DetectHint<'_>) -> Result<DocumentKind, PipelineError> {
    match detect_kind(bytes, hint) {
        DocumentKind::Unknown => Err(PipelineError::UnsupportedFormat {
            hint: hint.filename.or(hint.declared).map(str::to_string),
        }),
        kind => Ok(kind),
    }
}

fn detect_by_signature(bytes: &[u8]) -> Option<DocumentKind> {
    if has_pdf_header(bytes) {
        return Some(DocumentKind::Pdf);
    }

    let detected = infer::get(bytes)?;
    match detected.mime_type() {
        MIME_PDF => Some(DocumentKind::Pdf),
        MIME_DOCX => Some(DocumentKind::Docx),
        "application/zip" if zip_has_word_document(bytes) => Some(DocumentKind::Docx),
        _ if detected.matcher_type() == infer::MatcherType::Text => None,
        // Images, archives, media: a signature we can name but not extract.
        _ => Some(DocumentKind::Unknown),
    }
}

/// PDF readers tolerate junk before the header, so a header that starts a
/// line within the first KiB counts when the trailer marker is present too.
fn has_pdf_header(bytes: &[u8]) -> bool {
    if bytes.starts_with(PDF_MAGIC) {
        return true;
    }
    let head = &bytes[..bytes.len().min(1024)];
    let Some(at) = find(head, PDF_MAGIC) else {
        return false;
    };
    let line_start = matches!(head[at - 1], b'\n' | b'\r');
    let tail = &bytes[bytes.len().saturating_sub(1024)..];
    line_start && find(tail, b"%%EOF").is_some()
}

fn zip_has_word_document(bytes: &[u8]) -> bool {
    match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(mut archive) => archive.by_name("word/document.xml").is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, PartialEq, Eq)]
enum TextVerdict {
    Text,
    Binary,
    Inconclusive,
}

fn text_verdict(bytes: &[u8]) -> TextVerdict {
    if bytes.is_empty() {
        return TextVerdict::Inconclusive;
    }
    if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        return TextVerdict::Text;
    }

    let sample = &bytes[..bytes.len().min(SNIFF_LEN)];
    if sample.contains(&0) {
        return TextVerdict::Binary;
    }

    let mut suspicious = 0usize;
    for chunk in sample.utf8_chunks() {
        suspicious += chunk.invalid().len();
        suspicious += chunk
            .valid()
            .chars()
            .filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\u{c}'))
            .count();
    }
    // A truncated multi-byte sequence at the sample edge is not evidence.
    if sample.len() < bytes.len() {
        suspicious = suspicious.saturating_sub(3);
    }

    let ratio = suspicious as f32 / sample.len() as f32;
    if suspicious == 0 {
        TextVerdict::Text
    } else if ratio > BINARY_RATIO {
        TextVerdict::Binary
    } else {
        TextVerdict::Inconclusive
    }
}

fn kind_from_hint(hint: DetectHint<'_>) -> DocumentKind {
    if let Some(declared) = hint.declared {
        let kind = kind_from_label(declared);
        if kind != DocumentKind::Unknown {
            return kind;
        }
    }
    hint.filename
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| kind_from_label(ext))
        .unwrap_or(DocumentKind::Unknown)
}

/// Map a kind label, MIME type, or extension to a kind.
pub fn kind_from_label(label: &str) -> DocumentKind {
    match label.trim().to_ascii_lowercase().as_str() {
        MIME_PDF | "pdf" => DocumentKind::Pdf,
        MIME_DOCX | "docx" => DocumentKind::Docx,
        MIME_TEXT | "text" | "txt" | "md" | "markdown" => DocumentKind::PlainText,
        _ => DocumentKind::Unknown,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entry: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            zip.start_file(entry, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<w:document/>").unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn pdf_magic_wins_over_extension() {
        let hint = DetectHint {
            filename: Some("notes.txt"),
            declared: None,
        };
        assert_eq!(detect_kind(b"%PDF-1.7\n...", hint), DocumentKind::Pdf);
    }

    #[test]
    fn pdf_header_after_junk_line() {
        let bytes = b"\x00\x01mail gateway stamp\r\n%PDF-1.4\n1 0 obj\nendobj\n%%EOF\n";
        assert_eq!(detect_kind(bytes, DetectHint::default()), DocumentKind::Pdf);
    }

    #[test]
    fn pdf_magic_quoted_in_text_is_not_pdf() {
        let note = b"Every file starts with the header %PDF-1.7 followed by objects.\n";
        assert_eq!(
            detect_kind(note, DetectHint::default()),
            DocumentKind::PlainText
        );

        let listing = b"Header bytes to look for:\n%PDF-1.7\nand nothing else.\n";
        assert_eq!(
            detect_kind(listing, DetectHint::default()),
            DocumentKind::PlainText
        );
    }

    #[test]
    fn zip_with_word_document_is_docx() {
        let bytes = zip_with("word/document.xml");
        assert_eq!(
            detect_kind(&bytes, DetectHint::default()),
            DocumentKind::Docx
        );
    }

    #[test]
    fn plain_zip_is_unknown() {
        let bytes = zip_with("readme.txt");
        let hint = DetectHint {
            filename: Some("resume.docx"),
            declared: None,
        };
        assert_eq!(detect_kind(&bytes, hint), DocumentKind::Unknown);
    }

    #[test]
    fn utf8_text_is_plain_text() {
        let text = "Jane Doe\nSenior Engineer — Zürich\n".as_bytes();
        assert_eq!(
            detect_kind(text, DetectHint::default()),
            DocumentKind::PlainText
        );
    }

    #[test]
    fn binary_noise_is_unknown() {
        let noise: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();
        let hint = DetectHint {
            filename: Some("file.txt"),
            declared: None,
        };
        assert_eq!(detect_kind(&noise, hint), DocumentKind::Unknown);
    }

    #[test]
    fn mostly_text_uses_extension_as_tiebreak() {
        let mut bytes = b"Latin-1 caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b" menu with many more readable words in it");
        let hint = DetectHint {
            filename: Some("menu.txt"),
            declared: None,
        };
        assert_eq!(detect_kind(&bytes, hint), DocumentKind::PlainText);
        assert_eq!(
            detect_kind(&bytes, DetectHint::default()),
            DocumentKind::Unknown
        );
    }

    #[test]
    fn png_is_unsupported() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        let err = require_kind(
            &png,
            DetectHint {
                filename: Some("scan.png"),
                declared: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat { .. }));
    }

    #[test]
    fn labels_map_to_kinds() {
        assert_eq!(kind_from_label("application/pdf"), DocumentKind::Pdf);
        assert_eq!(kind_from_label("DOCX"), DocumentKind::Docx);
        assert_eq!(kind_from_label("txt"), DocumentKind::PlainText);
        assert_eq!(kind_from_label("image/png"), DocumentKind::Unknown);
    }
}

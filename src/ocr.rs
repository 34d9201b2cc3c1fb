//! OCR collaborator: page rendering plus text recognition.
//!
//! Both halves are traits so the fallback coordinator can run without
//! either being installed. The bundled implementations shell out:
//! - [`PdftoppmRenderer`] renders one PDF page to PNG with `pdftoppm`.
//! - [`TesseractBackend`] recognizes a PNG with `tesseract` and derives a
//!   confidence from its TSV word confidences.
//!
//! Child processes are spawned with `kill_on_drop`, so dropping an OCR
//! future (timeout, cancellation) also stops the process.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;
use crate::models::DocumentKind;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR backend not available: {0}")]
    Unavailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("page rendering failed: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rendered page ready for recognition.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// Zero-based page index.
    pub page: usize,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Renders a single page of a document to an image.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    fn supports(&self, kind: DocumentKind) -> bool;

    async fn render(&self, payload: &[u8], page: usize) -> Result<PageImage, OcrError>;

    /// Number of pages, read without extracting any text. Used when direct
    /// extraction failed outright and every page must go through OCR.
    async fn page_count(&self, payload: &[u8]) -> Result<usize, OcrError>;
}

#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn recognize(&self, image: &PageImage) -> Result<OcrOutput, OcrError>;
}

// ============ Disabled ============

/// Stand-in used when OCR is switched off; always unavailable.
pub struct DisabledOcr;

#[async_trait]
impl OcrBackend for DisabledOcr {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn recognize(&self, _image: &PageImage) -> Result<OcrOutput, OcrError> {
        Err(OcrError::Unavailable("OCR is disabled".to_string()))
    }
}

// ============ pdftoppm ============

pub struct PdftoppmRenderer {
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    fn supports(&self, kind: DocumentKind) -> bool {
        kind == DocumentKind::Pdf
    }

    async fn render(&self, payload: &[u8], page: usize) -> Result<PageImage, OcrError> {
        let temp = TempDir::new()?;
        let pdf_path = temp.path().join("input.pdf");
        tokio::fs::write(&pdf_path, payload).await?;

        // pdftoppm pages are 1-based.
        let page_arg = (page + 1).to_string();
        let prefix = temp.path().join("page");
        let output = Command::new("pdftoppm")
            .args(["-png", "-singlefile", "-r", &self.dpi.to_string()])
            .args(["-f", &page_arg, "-l", &page_arg])
            .arg(&pdf_path)
            .arg(&prefix)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| not_found_as_unavailable(e, "pdftoppm not found (install poppler-utils)"))?;

        if !output.status.success() {
            return Err(OcrError::Render(format!(
                "pdftoppm failed on page {}: {}",
                page + 1,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let png = tokio::fs::read(temp.path().join("page.png")).await?;
        debug!(page, bytes = png.len(), "rendered page");
        Ok(PageImage { page, png })
    }

    async fn page_count(&self, payload: &[u8]) -> Result<usize, OcrError> {
        let temp = TempDir::new()?;
        let pdf_path = temp.path().join("input.pdf");
        tokio::fs::write(&pdf_path, payload).await?;

        let output = Command::new("pdfinfo")
            .arg(&pdf_path)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| not_found_as_unavailable(e, "pdfinfo not found (install poppler-utils)"))?;

        if !output.status.success() {
            return Err(OcrError::Render(format!(
                "pdfinfo failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_page_count(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| OcrError::Render("pdfinfo reported no pages".to_string()))
    }
}

/// Read the `Pages:` line of `pdfinfo` output.
fn parse_page_count(info: &str) -> Option<usize> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse::<usize>().ok())
        .filter(|&count| count > 0)
}

// ============ Tesseract ============

pub struct TesseractBackend {
    language: String,
}

impl TesseractBackend {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn is_available(&self) -> bool {
        binary_responds("tesseract").await
    }

    async fn recognize(&self, image: &PageImage) -> Result<OcrOutput, OcrError> {
        let temp = TempDir::new()?;
        let image_path = temp.path().join("page.png");
        tokio::fs::write(&image_path, &image.png).await?;

        let output = Command::new("tesseract")
            .arg(&image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .arg("tsv")
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| not_found_as_unavailable(e, "tesseract not found (install tesseract-ocr)"))?;

        if !output.status.success() {
            return Err(OcrError::Failed(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_tesseract_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Rebuild text from Tesseract TSV rows and average the word confidences.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num, left,
/// top, width, height, conf, text. Non-word rows carry `conf = -1`.
pub fn parse_tesseract_tsv(tsv: &str) -> OcrOutput {
    let mut text = String::new();
    let mut last_line: Option<(u32, u32, u32)> = None;
    let mut last_block: Option<u32> = None;
    let mut conf_sum = 0.0f32;
    let mut words = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }
        let num = |i: usize| cols[i].trim().parse::<u32>().unwrap_or(0);
        let block = num(2);
        let line = (block, num(3), num(4));

        match last_line {
            Some(prev) if prev == line => text.push(' '),
            Some(_) if last_block != Some(block) => text.push_str("\n\n"),
            Some(_) => text.push('\n'),
            None => {}
        }
        text.push_str(word);
        last_line = Some(line);
        last_block = Some(block);

        conf_sum += conf;
        words += 1;
    }

    let confidence = if words == 0 {
        0.0
    } else {
        (conf_sum / words as f32 / 100.0).clamp(0.0, 1.0)
    };
    OcrOutput { text, confidence }
}

fn not_found_as_unavailable(err: std::io::Error, hint: &str) -> OcrError {
    if err.kind() == std::io::ErrorKind::NotFound {
        OcrError::Unavailable(hint.to_string())
    } else {
        OcrError::Io(err)
    }
}

async fn binary_responds(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Whether `pdftoppm` can be spawned. Used by the `check` command.
pub async fn renderer_available() -> bool {
    // pdftoppm prints its version to stderr and exits 0 for -v.
    Command::new("pdftoppm")
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Build the configured OCR backend.
pub fn create_backend(config: &OcrConfig) -> Arc<dyn OcrBackend> {
    if config.enabled {
        Arc::new(TesseractBackend::new(&config.language))
    } else {
        Arc::new(DisabledOcr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn tsv_rebuilds_lines_and_blocks() {
        let tsv = format!(
            "{}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
             5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\tInvoice\n\
             5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t80\t#42\n\
             5\t1\t1\t1\t2\t1\t0\t0\t10\t10\t70\tTotal\n\
             5\t1\t2\t1\t1\t1\t0\t0\t10\t10\t60\tThanks\n",
            HEADER
        );
        let out = parse_tesseract_tsv(&tsv);
        assert_eq!(out.text, "Invoice #42\nTotal\n\nThanks");
        assert!((out.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn empty_tsv_has_zero_confidence() {
        let out = parse_tesseract_tsv(HEADER);
        assert_eq!(out.text, "");
        assert_eq!(out.confidence, 0.0);
    }

    #[tokio::test]
    async fn disabled_backend_is_unavailable() {
        let backend = DisabledOcr;
        assert!(!backend.is_available().await);
        let err = backend
            .recognize(&PageImage {
                page: 0,
                png: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
    }

    #[test]
    fn page_count_read_from_pdfinfo() {
        let info = "Producer:       scanner 2.1\nPages:          14\nEncrypted:      no\n";
        assert_eq!(parse_page_count(info), Some(14));
        assert_eq!(parse_page_count("Pages:          0\n"), None);
        assert_eq!(parse_page_count("Title: Pages: 3\n"), None);
    }

    #[test]
    fn renderer_only_handles_pdf() {
        let renderer = PdftoppmRenderer::new(300);
        assert!(renderer.supports(DocumentKind::Pdf));
        assert!(!renderer.supports(DocumentKind::Docx));
    }
}

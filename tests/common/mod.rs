//! Scripted in-process collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use docintel::config::Config;
use docintel::error::ModelError;
use docintel::extract::{ExtractError, Extractor, ExtractorRegistry};
use docintel::llm::{GenerationParams, ModelProvider};
use docintel::models::{DocumentKind, ExtractionResult, Segment};
use docintel::ocr::{OcrBackend, OcrError, OcrOutput, PageImage, PageRenderer};
use docintel::pipeline::Pipeline;

// ============ Extraction ============

/// Returns fixed page texts for every PDF, ignoring the payload.
pub struct ScriptedExtractor {
    pub pages: Vec<String>,
    /// Index given to the first page, like extractors that count from 1.
    pub first_index: usize,
}

impl ScriptedExtractor {
    pub fn new(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            first_index: 0,
        }
    }

    pub fn numbered_from(mut self, first_index: usize) -> Self {
        self.first_index = first_index;
        self
    }
}

impl Extractor for ScriptedExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn extract(&self, document_id: &str, _bytes: &[u8]) -> Result<ExtractionResult, ExtractError> {
        let segments = self
            .pages
            .iter()
            .enumerate()
            .map(|(i, p)| Segment::direct(self.first_index + i, p.clone()))
            .collect();
        Ok(ExtractionResult::direct(
            document_id,
            DocumentKind::Pdf,
            segments,
        ))
    }
}

/// Fails every PDF the way a corrupt cross-reference table does.
pub struct BrokenExtractor;

impl Extractor for BrokenExtractor {
    fn kind(&self) -> DocumentKind {
        DocumentKind::Pdf
    }

    fn extract(&self, _document_id: &str, _bytes: &[u8]) -> Result<ExtractionResult, ExtractError> {
        Err(ExtractError::Pdf("invalid cross-reference table".to_string()))
    }
}

/// Renders any PDF page into a one-byte "image" carrying the page index.
#[derive(Default)]
pub struct ScriptedRenderer {
    pub rendered: Mutex<Vec<usize>>,
    /// Page count reported to callers; `None` fails like a missing `pdfinfo`.
    pub pages: Option<usize>,
}

impl ScriptedRenderer {
    pub fn with_pages(pages: usize) -> Self {
        Self {
            pages: Some(pages),
            ..Self::default()
        }
    }
}

#[async_trait]
impl PageRenderer for ScriptedRenderer {
    fn supports(&self, kind: DocumentKind) -> bool {
        kind == DocumentKind::Pdf
    }

    async fn render(&self, _payload: &[u8], page: usize) -> Result<PageImage, OcrError> {
        self.rendered.lock().unwrap().push(page);
        Ok(PageImage {
            page,
            png: vec![page as u8],
        })
    }

    async fn page_count(&self, _payload: &[u8]) -> Result<usize, OcrError> {
        self.pages
            .ok_or_else(|| OcrError::Unavailable("no page count scripted".to_string()))
    }
}

/// OCR double answering per page index.
pub struct ScriptedOcr {
    pub available: bool,
    pub pages: HashMap<usize, OcrOutput>,
    pub delay: Option<Duration>,
    /// How long the availability check takes to answer.
    pub check_delay: Option<Duration>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new(pages: &[(usize, &str, f32)]) -> Self {
        Self {
            available: true,
            pages: pages
                .iter()
                .map(|(page, text, confidence)| {
                    (
                        *page,
                        OcrOutput {
                            text: text.to_string(),
                            confidence: *confidence,
                        },
                    )
                })
                .collect(),
            delay: None,
            check_delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(&[])
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn slow_to_answer(mut self, delay: Duration) -> Self {
        self.check_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrBackend for ScriptedOcr {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        if let Some(delay) = self.check_delay {
            tokio::time::sleep(delay).await;
        }
        self.available
    }

    async fn recognize(&self, image: &PageImage) -> Result<OcrOutput, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.pages
            .get(&image.page)
            .cloned()
            .ok_or_else(|| OcrError::Failed(format!("no script for page {}", image.page)))
    }
}

// ============ Model ============

type Responder = dyn Fn(&str, u32) -> Result<String, ModelError> + Send + Sync;

/// Model double. The responder receives the prompt and how many times that
/// exact prompt has been sent (1-based).
pub struct ScriptedModel {
    responder: Box<Responder>,
    attempts: Mutex<HashMap<String, u32>>,
    pub prompts: Mutex<Vec<String>>,
    pub delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(
        responder: impl Fn(&str, u32) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            attempts: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(prompt.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(prompt, attempt)
    }
}

pub fn is_reduce(prompt: &str) -> bool {
    prompt.starts_with("The document was analyzed in")
}

// ============ Wiring ============

/// Defaults tuned for fast tests: millisecond backoff, small chunks.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.model.backoff_base_ms = 1;
    config.model.timeout_secs = 5;
    config.model.max_retries = 2;
    config.chunking.max_tokens = 10;
    config.chunking.lookback_chars = 40;
    config.extraction.min_chars_per_segment = 16;
    config
}

pub fn pipeline(
    config: &Config,
    pages: &[&str],
    ocr: Arc<ScriptedOcr>,
    model: Arc<ScriptedModel>,
) -> Pipeline {
    pipeline_with(
        config,
        vec![Arc::new(ScriptedExtractor::new(pages))],
        ScriptedRenderer::default(),
        ocr,
        model,
    )
}

pub fn pipeline_with(
    config: &Config,
    extractors: Vec<Arc<dyn Extractor>>,
    renderer: ScriptedRenderer,
    ocr: Arc<ScriptedOcr>,
    model: Arc<ScriptedModel>,
) -> Pipeline {
    let registry =
        ExtractorRegistry::from_extractors(extractors, config.extraction.workers_per_kind);
    Pipeline::with_components(config, registry, Arc::new(renderer), ocr, model)
}

/// A payload that detects as PDF; `tag` keeps content hashes distinct.
pub fn pdf_payload(tag: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {}\n%%EOF\n", tag).into_bytes()
}

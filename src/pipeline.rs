//! End-to-end pipeline: ingest → extract (with OCR fallback) → chunk → analyze.
//!
//! [`Pipeline`] owns the long-lived collaborators and is cheap to clone.
//! Extraction results are cached by content hash and kind, so the same
//! payload is extracted once no matter how many requests reference it.
//! The cache holds a bounded number of results and drops the oldest first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::chunk::{chunk_extraction, ChunkSettings};
use crate::config::Config;
use crate::detect::{require_kind, DetectHint};
use crate::error::PipelineError;
use crate::extract::ExtractorRegistry;
use crate::fallback::{ExtractionCoordinator, FallbackSettings};
use crate::llm::{create_provider, ModelProvider};
use crate::models::{
    AnalysisDiagnostics, AnalysisIntent, AnalysisRequest, AnalysisResult, AnalysisState,
    AnalysisStatus, ChunkedDocument, Document, DocumentKind, ExtractionDiagnostics,
    ExtractionResult,
};
use crate::ocr::{self, OcrBackend, PageRenderer, PdftoppmRenderer};
use crate::orchestrator::{Analyzer, AnalyzerSettings};
use crate::prompts;

/// Availability of the external collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub model_provider: String,
    pub model_available: bool,
    pub ocr_backend: String,
    pub ocr_available: bool,
    pub renderer_available: bool,
}

#[derive(Clone)]
pub struct Pipeline {
    max_payload_bytes: usize,
    chunking: ChunkSettings,
    coordinator: ExtractionCoordinator,
    analyzer: Analyzer,
    ocr: Arc<dyn OcrBackend>,
    cache: Arc<Mutex<ExtractionCache>>,
}

type CacheKey = (String, DocumentKind);

/// Insertion-ordered cache of extraction results.
struct ExtractionCache {
    capacity: usize,
    entries: HashMap<CacheKey, Arc<ExtractionResult>>,
    order: VecDeque<CacheKey>,
}

impl ExtractionCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<ExtractionResult>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: CacheKey, result: Arc<ExtractionResult>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), result).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

impl Pipeline {
    /// Build a pipeline with the built-in extractors, `pdftoppm` +
    /// `tesseract` OCR, and the configured model provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::with_components(
            config,
            ExtractorRegistry::with_defaults(&config.extraction),
            Arc::new(PdftoppmRenderer::new(config.ocr.dpi)),
            ocr::create_backend(&config.ocr),
            create_provider(&config.model)?,
        ))
    }

    pub fn with_components(
        config: &Config,
        registry: ExtractorRegistry,
        renderer: Arc<dyn PageRenderer>,
        ocr: Arc<dyn OcrBackend>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        let coordinator = ExtractionCoordinator::new(
            registry,
            renderer,
            ocr.clone(),
            config.ocr.workers,
            FallbackSettings::from_config(&config.extraction, &config.ocr),
        );
        let analyzer = Analyzer::new(
            provider,
            AnalyzerSettings::from_config(&config.model),
        );
        Self {
            max_payload_bytes: config.ingest.max_payload_bytes,
            chunking: ChunkSettings::from_config(&config.chunking),
            coordinator,
            analyzer,
            ocr,
            cache: Arc::new(Mutex::new(ExtractionCache::new(
                config.extraction.cache_entries,
            ))),
        }
    }

    /// Validate and identify an uploaded payload.
    pub fn ingest(
        &self,
        payload: Vec<u8>,
        filename: Option<&str>,
        declared: Option<&str>,
    ) -> Result<Document, PipelineError> {
        if payload.len() > self.max_payload_bytes {
            return Err(PipelineError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload_bytes,
            });
        }
        let kind = require_kind(&payload, DetectHint { filename, declared })?;
        let id = hex::encode(Sha256::digest(&payload));
        info!(document = %id, kind = %kind, bytes = payload.len(), "document ingested");

        Ok(Document {
            id,
            size: payload.len(),
            payload: Arc::from(payload),
            kind,
            filename: filename.map(str::to_string),
            ingested_at: Utc::now(),
        })
    }

    /// Extract text, reusing a cached result for identical content.
    pub async fn extract(
        &self,
        document: &Document,
        cancel: &CancelToken,
    ) -> Result<Arc<ExtractionResult>, PipelineError> {
        let key = (document.id.clone(), document.kind);
        if let Some(hit) = self.cached(&key) {
            debug!(document = %document.id, "extraction cache hit");
            return Ok(hit);
        }

        let result = Arc::new(self.coordinator.extract(document, cancel).await?);
        info!(
            document = %document.id,
            method = ?result.method,
            segments = result.segments.len(),
            warnings = result.warnings.len(),
            degenerate = result.degenerate,
            "extraction finished"
        );
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result.clone());
        }
        Ok(result)
    }

    fn cached(&self, key: &CacheKey) -> Option<Arc<ExtractionResult>> {
        self.cache.lock().ok().and_then(|c| c.get(key))
    }

    /// Extract several documents in parallel. Results keep input order.
    pub async fn extract_all(
        &self,
        documents: &[Document],
        cancel: &CancelToken,
    ) -> Vec<Result<Arc<ExtractionResult>, PipelineError>> {
        let mut tasks = JoinSet::new();
        for (i, document) in documents.iter().enumerate() {
            let pipeline = self.clone();
            let document = document.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { (i, pipeline.extract(&document, &cancel).await) });
        }

        let mut results: Vec<Option<Result<Arc<ExtractionResult>, PipelineError>>> =
            (0..documents.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((i, result)) = joined {
                results[i] = Some(result);
            }
        }
        results
            .into_iter()
            .zip(documents)
            .map(|(r, d)| {
                r.unwrap_or_else(|| {
                    Err(PipelineError::Malformed {
                        kind: d.kind,
                        message: "extraction task crashed".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Chunk an extraction result. Degenerate results are refused.
    pub fn chunk(&self, extraction: &ExtractionResult) -> Result<ChunkedDocument, PipelineError> {
        self.chunk_with(extraction, self.chunking)
    }

    fn chunk_with(
        &self,
        extraction: &ExtractionResult,
        settings: ChunkSettings,
    ) -> Result<ChunkedDocument, PipelineError> {
        if extraction.degenerate {
            return Err(PipelineError::ExtractionDegenerate {
                document_id: extraction.document_id.clone(),
            });
        }
        let chunks = chunk_extraction(extraction, settings);
        debug!(
            document = %extraction.document_id,
            chunks = chunks.len(),
            hard_splits = chunks.iter().filter(|c| c.hard_split).count(),
            "chunked"
        );
        Ok(ChunkedDocument {
            document_id: extraction.document_id.clone(),
            chunks,
        })
    }

    /// Extract, chunk and analyze `documents` for `intent`.
    pub async fn analyze(
        &self,
        intent: AnalysisIntent,
        documents: &[Document],
        question: Option<String>,
        cancel: &CancelToken,
    ) -> Result<AnalysisResult, PipelineError> {
        if documents.len() != intent.arity() {
            return Err(PipelineError::InvalidRequest(format!(
                "{} takes {} document(s), got {}",
                intent,
                intent.arity(),
                documents.len()
            )));
        }

        // Chunks shrink when the configured size would overflow a map prompt.
        let budget = self.analyzer.settings().prompt_budget_chars;
        let room = budget.saturating_sub(prompts::map_overhead(intent, question.as_deref()));
        if room == 0 {
            return Err(PipelineError::InvalidRequest(format!(
                "{} instructions alone exceed the {} character prompt budget",
                intent, budget
            )));
        }
        let chunking = self.chunking.capped(room);

        let mut extractions = Vec::with_capacity(documents.len());
        for result in self.extract_all(documents, cancel).await {
            match result {
                Ok(extraction) => extractions.push(extraction),
                Err(PipelineError::Cancelled) => return Ok(cancelled(intent)),
                Err(e) => return Err(e),
            }
        }

        let chunked = extractions
            .iter()
            .map(|e| self.chunk_with(e, chunking))
            .collect::<Result<Vec<_>, _>>()?;

        let request = AnalysisRequest {
            intent,
            documents: chunked,
            question,
        };
        let mut result = self.analyzer.analyze(request, cancel).await?;
        result.diagnostics.extraction = extractions
            .iter()
            .map(|e| ExtractionDiagnostics::from(e.as_ref()))
            .collect();
        Ok(result)
    }

    pub async fn health(&self) -> HealthReport {
        let provider = self.analyzer.provider();
        HealthReport {
            model_provider: provider.name().to_string(),
            model_available: provider.is_available().await,
            ocr_backend: self.ocr.name().to_string(),
            ocr_available: self.ocr.is_available().await,
            renderer_available: ocr::renderer_available().await,
        }
    }

    /// Fail unless the OCR backend answers. The page renderer is only
    /// checked when the backend is up.
    pub async fn ensure_ocr(&self) -> Result<(), PipelineError> {
        if !self.ocr.is_available().await {
            return Err(PipelineError::OcrUnavailable(format!(
                "backend '{}' is not available",
                self.ocr.name()
            )));
        }
        if !ocr::renderer_available().await {
            return Err(PipelineError::OcrUnavailable(
                "pdftoppm is not installed".to_string(),
            ));
        }
        Ok(())
    }
}

fn cancelled(intent: AnalysisIntent) -> AnalysisResult {
    AnalysisResult {
        intent,
        status: AnalysisStatus::Cancelled,
        content: None,
        diagnostics: AnalysisDiagnostics {
            states: vec![AnalysisState::Pending, AnalysisState::Cancelled],
            ..AnalysisDiagnostics::default()
        },
    }
}

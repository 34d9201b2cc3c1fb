//! Extraction fallback coordinator.
//!
//! Runs the direct extractor for a document's kind, grades each segment,
//! and sends only the sparse or garbled segments through OCR. Each
//! flagged segment gets at most one OCR attempt; the outcome is inspected
//! explicitly and merged back in place with its provenance.
//!
//! A direct extractor that fails outright on a renderable document is
//! replaced by OCR of every page.
//!
//! ```text
//! direct extract ─▶ grade segments ─▶ none flagged ─▶ done
//!                                  └▶ flagged ─▶ render+OCR (bounded, once each)
//!                                                 └▶ merge / warn ─▶ done
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::{ExtractionConfig, OcrConfig};
use crate::error::PipelineError;
use crate::extract::{ExtractError, ExtractorRegistry};
use crate::models::{
    count_visible, is_garbage_char, Document, ExtractionResult, ExtractionWarning, Provenance,
    Segment, WarningKind,
};
use crate::ocr::{OcrBackend, OcrError, OcrOutput, PageRenderer};

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Thresholds that decide when a segment needs OCR.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub min_chars_per_segment: usize,
    pub max_garbage_ratio: f32,
    pub min_ocr_confidence: f32,
    pub ocr_timeout: Duration,
}

impl FallbackSettings {
    pub fn from_config(extraction: &ExtractionConfig, ocr: &OcrConfig) -> Self {
        Self {
            min_chars_per_segment: extraction.min_chars_per_segment,
            max_garbage_ratio: extraction.max_garbage_ratio,
            min_ocr_confidence: ocr.min_confidence,
            ocr_timeout: Duration::from_secs(ocr.timeout_secs),
        }
    }
}

/// Quality grade of one segment's direct text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentGrade {
    pub visible_chars: usize,
    pub garbage_ratio: f32,
}

impl SegmentGrade {
    pub fn of(text: &str) -> Self {
        let mut visible = 0usize;
        let mut garbage = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            visible += 1;
            if is_garbage_char(c) {
                garbage += 1;
            }
        }
        Self {
            visible_chars: visible,
            garbage_ratio: if visible == 0 {
                0.0
            } else {
                garbage as f32 / visible as f32
            },
        }
    }

    pub fn is_degenerate(&self, settings: &FallbackSettings) -> bool {
        self.visible_chars < settings.min_chars_per_segment
            || self.garbage_ratio > settings.max_garbage_ratio
    }
}

#[derive(Debug)]
enum OcrAttempt {
    Recognized(OcrOutput),
    Failed(OcrError),
    TimedOut,
}

#[derive(Clone)]
pub struct ExtractionCoordinator {
    registry: ExtractorRegistry,
    renderer: Arc<dyn PageRenderer>,
    ocr: Arc<dyn OcrBackend>,
    /// Shared across all documents to cap simultaneous OCR jobs.
    ocr_slots: Arc<Semaphore>,
    settings: FallbackSettings,
}

impl ExtractionCoordinator {
    pub fn new(
        registry: ExtractorRegistry,
        renderer: Arc<dyn PageRenderer>,
        ocr: Arc<dyn OcrBackend>,
        ocr_workers: usize,
        settings: FallbackSettings,
    ) -> Self {
        Self {
            registry,
            renderer,
            ocr,
            ocr_slots: Arc::new(Semaphore::new(ocr_workers.max(1))),
            settings,
        }
    }

    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    /// Extract `document`, escalating degenerate segments to OCR.
    ///
    /// Returns `Ok` with `degenerate = true` when nothing usable survived;
    /// callers decide whether that is an error. When the direct extractor
    /// fails on a renderable document, every page is OCRed instead.
    pub async fn extract(
        &self,
        document: &Document,
        cancel: &CancelToken,
    ) -> Result<ExtractionResult, PipelineError> {
        let extraction = self
            .registry
            .extract(document.kind, &document.id, document.payload.clone());
        let direct = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            r = extraction => r,
        };

        let (mut result, flagged) = match direct {
            Ok(mut result) => {
                renumber(&mut result);
                let flagged = self.grade(&mut result);
                debug!(
                    document = %document.id,
                    segments = result.segments.len(),
                    flagged = flagged.len(),
                    "direct extraction graded"
                );
                if flagged.is_empty() {
                    return Ok(result);
                }
                (result, flagged)
            }
            Err(e @ (ExtractError::Pdf(_) | ExtractError::Crashed { .. }))
                if self.renderer.supports(document.kind) =>
            {
                warn!(document = %document.id, error = %e, "direct extraction failed, trying OCR on every page");
                let Some(result) = self.ocr_only(document, &e, cancel).await? else {
                    return Err(e.into());
                };
                let flagged = (0..result.segments.len()).collect();
                (result, flagged)
            }
            Err(e) => return Err(e.into()),
        };

        if !self.renderer.supports(document.kind) {
            warn_all(
                &mut result,
                &flagged,
                WarningKind::OcrUnavailable,
                &format!("no page renderer for {} documents", document.kind),
            );
            result.refresh();
            return Ok(result);
        }

        if !self.ocr_ready(cancel).await? {
            warn!(document = %document.id, backend = self.ocr.name(), "OCR unavailable, keeping direct text");
            warn_all(
                &mut result,
                &flagged,
                WarningKind::OcrUnavailable,
                &format!("OCR backend '{}' is not available", self.ocr.name()),
            );
            result.refresh();
            return Ok(result);
        }

        info!(
            document = %document.id,
            pages = flagged.len(),
            "escalating sparse segments to OCR"
        );
        let attempts = self.run_ocr(document, &flagged, cancel).await?;
        for (index, attempt) in attempts {
            self.merge(&mut result.segments[index], attempt, &mut result.warnings);
        }

        result.refresh();
        Ok(result)
    }

    /// Flag degenerate segments and record why.
    fn grade(&self, result: &mut ExtractionResult) -> Vec<usize> {
        let mut flagged = Vec::new();
        for segment in &result.segments {
            let grade = SegmentGrade::of(&segment.text);
            if !grade.is_degenerate(&self.settings) {
                continue;
            }
            flagged.push(segment.index);
            result.warnings.push(ExtractionWarning::new(
                Some(segment.index),
                WarningKind::SparseText,
                format!(
                    "direct extraction found {} characters ({:.0}% garbled)",
                    grade.visible_chars,
                    grade.garbage_ratio * 100.0
                ),
            ));
        }
        flagged
    }

    /// Blank pages standing in for a failed direct extraction, or `None`
    /// when OCR cannot run or the page count is unknown.
    async fn ocr_only(
        &self,
        document: &Document,
        failure: &ExtractError,
        cancel: &CancelToken,
    ) -> Result<Option<ExtractionResult>, PipelineError> {
        if !self.ocr_ready(cancel).await? {
            return Ok(None);
        }
        let pages = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            r = self.renderer.page_count(&document.payload) => r,
        };
        let pages = match pages {
            Ok(pages) => pages,
            Err(e) => {
                warn!(document = %document.id, error = %e, "page count unavailable");
                return Ok(None);
            }
        };

        let segments = (0..pages).map(|i| Segment::direct(i, String::new())).collect();
        let mut result = ExtractionResult::direct(&document.id, document.kind, segments);
        result.warnings.push(ExtractionWarning::new(
            None,
            WarningKind::DirectFailed,
            failure.to_string(),
        ));
        Ok(Some(result))
    }

    /// Ask the backend whether it can run, giving up on a hung check.
    async fn ocr_ready(&self, cancel: &CancelToken) -> Result<bool, PipelineError> {
        let check = tokio::time::timeout(AVAILABILITY_TIMEOUT, self.ocr.is_available());
        tokio::select! {
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            r = check => Ok(r.unwrap_or_else(|_| {
                warn!(backend = self.ocr.name(), "OCR availability check timed out");
                false
            })),
        }
    }

    /// OCR each flagged page once, bounded by the shared worker pool.
    async fn run_ocr(
        &self,
        document: &Document,
        flagged: &[usize],
        cancel: &CancelToken,
    ) -> Result<Vec<(usize, OcrAttempt)>, PipelineError> {
        let mut tasks = JoinSet::new();
        for &index in flagged {
            let renderer = self.renderer.clone();
            let ocr = self.ocr.clone();
            let slots = self.ocr_slots.clone();
            let payload = document.payload.clone();
            let timeout = self.settings.ocr_timeout;

            tasks.spawn(async move {
                let _permit = match slots.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            OcrAttempt::Failed(OcrError::Unavailable("OCR pool closed".into())),
                        )
                    }
                };
                let job = async {
                    let image = renderer.render(&payload, index).await?;
                    ocr.recognize(&image).await
                };
                let attempt = match tokio::time::timeout(timeout, job).await {
                    Ok(Ok(output)) => OcrAttempt::Recognized(output),
                    Ok(Err(e)) => OcrAttempt::Failed(e),
                    Err(_) => OcrAttempt::TimedOut,
                };
                (index, attempt)
            });
        }

        let mut attempts = Vec::with_capacity(flagged.len());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(PipelineError::Cancelled);
                }
                next = tasks.join_next() => match next {
                    Some(Ok(outcome)) => attempts.push(outcome),
                    Some(Err(e)) => warn!(document = %document.id, error = %e, "OCR task crashed"),
                    None => break,
                },
            }
        }
        attempts.sort_by_key(|(index, _)| *index);
        Ok(attempts)
    }

    fn merge(
        &self,
        segment: &mut Segment,
        attempt: OcrAttempt,
        warnings: &mut Vec<ExtractionWarning>,
    ) {
        let index = segment.index;
        match attempt {
            OcrAttempt::Recognized(output) => {
                let ocr_chars = count_visible(&output.text);
                if ocr_chars == 0 {
                    warnings.push(ExtractionWarning::new(
                        Some(index),
                        WarningKind::OcrEmpty,
                        "OCR recognized no text; keeping direct text",
                    ));
                    return;
                }

                let direct = SegmentGrade::of(&segment.text);
                let direct_garbled = direct.garbage_ratio > self.settings.max_garbage_ratio;
                if !direct_garbled && ocr_chars <= direct.visible_chars {
                    debug!(page = index, "direct text kept over shorter OCR output");
                    return;
                }

                if output.confidence < self.settings.min_ocr_confidence {
                    warnings.push(ExtractionWarning::new(
                        Some(index),
                        WarningKind::OcrLowConfidence,
                        format!(
                            "OCR confidence {:.2} below {:.2}; text is best effort",
                            output.confidence, self.settings.min_ocr_confidence
                        ),
                    ));
                }
                segment.text = output.text;
                segment.provenance = Provenance::Ocr;
                segment.ocr_confidence = Some(output.confidence);
            }
            OcrAttempt::Failed(OcrError::Unavailable(message)) => {
                warnings.push(ExtractionWarning::new(
                    Some(index),
                    WarningKind::OcrUnavailable,
                    message,
                ));
            }
            OcrAttempt::Failed(e) => {
                warn!(page = index, error = %e, "OCR failed");
                warnings.push(ExtractionWarning::new(
                    Some(index),
                    WarningKind::OcrFailed,
                    e.to_string(),
                ));
            }
            OcrAttempt::TimedOut => {
                warnings.push(ExtractionWarning::new(
                    Some(index),
                    WarningKind::OcrFailed,
                    format!(
                        "OCR timed out after {}s",
                        self.settings.ocr_timeout.as_secs()
                    ),
                ));
            }
        }
    }
}

/// Make segment indices match positions; extractors may number from 1 or
/// skip pages. Warnings follow their segment.
fn renumber(result: &mut ExtractionResult) {
    let original: Vec<usize> = result.segments.iter().map(|s| s.index).collect();
    for (position, segment) in result.segments.iter_mut().enumerate() {
        segment.index = position;
    }
    for warning in &mut result.warnings {
        if let Some(index) = warning.segment {
            warning.segment = original.iter().position(|&i| i == index);
        }
    }
}

fn warn_all(result: &mut ExtractionResult, indices: &[usize], kind: WarningKind, message: &str) {
    for &index in indices {
        result
            .warnings
            .push(ExtractionWarning::new(Some(index), kind, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FallbackSettings {
        FallbackSettings {
            min_chars_per_segment: 10,
            max_garbage_ratio: 0.3,
            min_ocr_confidence: 0.6,
            ocr_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn sparse_segment_is_degenerate() {
        assert!(SegmentGrade::of("  12 ").is_degenerate(&settings()));
        assert!(!SegmentGrade::of("a full sentence of text").is_degenerate(&settings()));
    }

    #[test]
    fn garbled_segment_is_degenerate() {
        let garbled = "\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}\u{E001}\u{E002} abcdefgh";
        let grade = SegmentGrade::of(garbled);
        assert_eq!(grade.visible_chars, 14);
        assert!(grade.is_degenerate(&settings()));
    }

    #[test]
    fn empty_text_has_zero_garbage_ratio() {
        let grade = SegmentGrade::of("");
        assert_eq!(grade.visible_chars, 0);
        assert_eq!(grade.garbage_ratio, 0.0);
    }
}

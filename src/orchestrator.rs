//! Analysis orchestrator: chunked documents in, [`AnalysisResult`] out.
//!
//! ```text
//! Pending ─▶ Chunking ─▶ AwaitingModel(n) ─▶ Merging ─▶ Complete | Partial | Failed
//!                              │                 ▲
//!                              └─ reduce rounds ─┘          (any state) ─▶ Cancelled
//! ```
//!
//! A single-chunk document gets one model call. Larger documents go through
//! a map phase (one call per chunk, bounded by `model.concurrency`) and,
//! for free-text intents, reduce calls over the successful partial answers.
//! Every map outcome is collected before merging starts.
//!
//! # Retry Strategy
//!
//! Each logical call is retried inside its own task:
//! - timeout, rate limit, provider error → retry up to `max_retries` times
//! - backoff: `backoff_base_ms * 2^(n-1)`, capped at 32x, never shorter than `Retry-After`
//! - invalid response → one retry with a stricter prompt
//! - invalid request → fail immediately
//!
//! A chunk that still fails is reported in
//! [`AnalysisDiagnostics::failed_chunks`] and the result becomes `Partial`.
//!
//! # Prompt Budget
//!
//! No prompt may exceed `prompt_budget_chars`. Map prompts that would are
//! rejected as invalid requests before any call. Reduce rounds clip each
//! partial answer so that any two of them fit in one prompt.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::chunk::CHARS_PER_TOKEN;
use crate::compare;
use crate::config::ModelConfig;
use crate::error::{ModelError, PipelineError};
use crate::llm::{GenerationParams, ModelProvider};
use crate::models::{
    AnalysisContent, AnalysisDiagnostics, AnalysisIntent, AnalysisRequest, AnalysisResult,
    AnalysisState, AnalysisStatus, CallPhase, ChunkedDocument, EntityRecord, EntityTypeSighting,
    Chunk, FailedChunk, ModelCallRecord,
};
use crate::prompts::{self, RawEntity};

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerSettings {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
    pub concurrency: usize,
    /// Upper bound for any prompt, in characters.
    pub prompt_budget_chars: usize,
    pub params: GenerationParams,
}

impl AnalyzerSettings {
    pub fn from_config(model: &ModelConfig) -> Self {
        Self {
            max_retries: model.max_retries,
            backoff_base: Duration::from_millis(model.backoff_base_ms),
            call_timeout: Duration::from_secs(model.timeout_secs),
            concurrency: model.concurrency,
            prompt_budget_chars: model.max_input_tokens * CHARS_PER_TOKEN,
            params: GenerationParams::from_config(model),
        }
    }
}

/// Parsed output of one map call.
#[derive(Debug, Clone)]
pub(crate) enum Partial {
    Text(String),
    Entities(Vec<RawEntity>),
    Items(Vec<String>),
}

type ReplyParser<T> = fn(&str) -> Result<T, ModelError>;

fn parse_text_partial(reply: &str) -> Result<Partial, ModelError> {
    prompts::parse_text(reply).map(Partial::Text)
}

fn parse_entities_partial(reply: &str) -> Result<Partial, ModelError> {
    prompts::parse_entities(reply).map(Partial::Entities)
}

fn parse_items_partial(reply: &str) -> Result<Partial, ModelError> {
    prompts::parse_items(reply).map(Partial::Items)
}

fn map_parser(intent: AnalysisIntent) -> ReplyParser<Partial> {
    match intent {
        AnalysisIntent::ExtractEntities => parse_entities_partial,
        AnalysisIntent::Compare => parse_items_partial,
        _ => parse_text_partial,
    }
}

pub(crate) struct MapOutcome {
    pub document: usize,
    pub chunk: usize,
    pub result: Result<Partial, ModelError>,
}

/// Accumulates diagnostics and the state trace for one request.
pub(crate) struct Trace {
    diagnostics: AnalysisDiagnostics,
}

impl Trace {
    fn new() -> Self {
        let mut trace = Self {
            diagnostics: AnalysisDiagnostics::default(),
        };
        trace.enter(AnalysisState::Pending);
        trace
    }

    pub(crate) fn enter(&mut self, state: AnalysisState) {
        debug!(?state, "analysis state");
        self.diagnostics.states.push(state);
    }

    fn record_call(&mut self, record: ModelCallRecord) {
        self.diagnostics.retry_count += record.attempts.saturating_sub(1);
        self.diagnostics.calls.push(record);
    }

    fn finish(
        mut self,
        intent: AnalysisIntent,
        status: AnalysisStatus,
        content: Option<AnalysisContent>,
    ) -> AnalysisResult {
        self.enter(match status {
            AnalysisStatus::Complete => AnalysisState::Complete,
            AnalysisStatus::Partial => AnalysisState::Partial,
            AnalysisStatus::Failed => AnalysisState::Failed,
            AnalysisStatus::Cancelled => AnalysisState::Cancelled,
        });
        info!(
            intent = %intent,
            status = ?status,
            chunks = self.diagnostics.chunk_count,
            calls = self.diagnostics.calls.len(),
            retries = self.diagnostics.retry_count,
            failed = self.diagnostics.failed_chunks.len(),
            "analysis finished"
        );
        AnalysisResult {
            intent,
            status,
            content,
            diagnostics: self.diagnostics,
        }
    }
}

struct CallSpec {
    phase: CallPhase,
    document_id: String,
    chunk_index: Option<usize>,
    prompt: String,
    strict_prompt: String,
}

/// Runs analysis requests against a [`ModelProvider`].
#[derive(Clone)]
pub struct Analyzer {
    provider: Arc<dyn ModelProvider>,
    settings: AnalyzerSettings,
}

impl Analyzer {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: AnalyzerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Execute `request`.
    ///
    /// Malformed requests fail with [`PipelineError::InvalidRequest`]
    /// before any model call. Everything after that, including model
    /// failures and cancellation, is reported through the result status.
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
        cancel: &CancelToken,
    ) -> Result<AnalysisResult, PipelineError> {
        validate(&request)?;
        self.check_budget(&request)?;

        let mut trace = Trace::new();
        trace.enter(AnalysisState::Chunking);
        trace.diagnostics.chunk_count = request.documents.iter().map(|d| d.chunks.len()).sum();
        trace.diagnostics.hard_splits = request
            .documents
            .iter()
            .flat_map(|d| d.chunks.iter())
            .filter(|c| c.hard_split)
            .count();
        info!(
            intent = %request.intent,
            documents = request.documents.len(),
            chunks = trace.diagnostics.chunk_count,
            "analysis started"
        );

        if cancel.is_cancelled() {
            return Ok(trace.finish(request.intent, AnalysisStatus::Cancelled, None));
        }

        let (status, content) = match request.intent {
            AnalysisIntent::Compare => compare::run(self, &request, &mut trace, cancel).await,
            _ => self.analyze_single(&request, &mut trace, cancel).await,
        };

        let status = if cancel.is_cancelled() {
            AnalysisStatus::Cancelled
        } else {
            status
        };
        let content = match status {
            AnalysisStatus::Cancelled => None,
            _ => content,
        };
        Ok(trace.finish(request.intent, status, content))
    }

    async fn analyze_single(
        &self,
        request: &AnalysisRequest,
        trace: &mut Trace,
        cancel: &CancelToken,
    ) -> (AnalysisStatus, Option<AnalysisContent>) {
        let intent = request.intent;
        let question = request.question.as_deref();
        let document = &request.documents[0];

        let Some(outcomes) = self
            .map_phase(intent, question, &request.documents, trace, cancel)
            .await
        else {
            return (AnalysisStatus::Cancelled, None);
        };
        trace.enter(AnalysisState::Merging);

        let total = outcomes.len();
        let mut failed = 0usize;
        let mut texts = Vec::new();
        let mut entities = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(Partial::Text(text)) => texts.push(text),
                Ok(Partial::Entities(found)) => entities.push((outcome.chunk, found)),
                Ok(Partial::Items(_)) => {}
                Err(_) => failed += 1,
            }
        }
        if failed == total {
            return (AnalysisStatus::Failed, None);
        }
        let map_status = if failed > 0 {
            AnalysisStatus::Partial
        } else {
            AnalysisStatus::Complete
        };

        if intent == AnalysisIntent::ExtractEntities {
            let merged = merge_entities(&entities);
            return (map_status, Some(AnalysisContent::Entities(merged)));
        }

        if texts.len() == 1 {
            let text = texts.remove(0);
            return (map_status, Some(AnalysisContent::Text(text)));
        }

        match self
            .reduce_text(intent, question, &document.document_id, texts.clone(), trace, cancel)
            .await
        {
            None => (AnalysisStatus::Cancelled, None),
            Some(Ok(text)) => (map_status, Some(AnalysisContent::Text(text))),
            Some(Err(e)) => {
                warn!(error = %e, "reduce failed; returning concatenated partial answers");
                (
                    AnalysisStatus::Partial,
                    Some(AnalysisContent::Text(texts.join("\n\n"))),
                )
            }
        }
    }

    /// Run one map call per chunk across `documents` and wait for all of
    /// them. Returns `None` when cancelled.
    pub(crate) async fn map_phase(
        &self,
        intent: AnalysisIntent,
        question: Option<&str>,
        documents: &[ChunkedDocument],
        trace: &mut Trace,
        cancel: &CancelToken,
    ) -> Option<Vec<MapOutcome>> {
        let total: usize = documents.iter().map(|d| live_chunks(d).count()).sum();
        trace.enter(AnalysisState::AwaitingModel(total));

        let slots = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let parse = map_parser(intent);
        let mut tasks = JoinSet::new();
        for (d, document) in documents.iter().enumerate() {
            let parts = live_chunks(document).count();
            for (position, chunk) in live_chunks(document).enumerate() {
                let part = (parts > 1).then_some((position, parts));
                let spec = CallSpec {
                    phase: CallPhase::Map,
                    document_id: document.document_id.clone(),
                    chunk_index: Some(chunk.index),
                    prompt: prompts::map_prompt(intent, question, &chunk.text, part, false),
                    strict_prompt: prompts::map_prompt(intent, question, &chunk.text, part, true),
                };
                let provider = self.provider.clone();
                let settings = self.settings;
                let slots = slots.clone();
                let chunk_index = chunk.index;
                tasks.spawn(async move {
                    let _permit = slots.acquire_owned().await.ok();
                    let (result, record) = call_model(provider, settings, spec, parse).await;
                    (d, chunk_index, result, record)
                });
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    info!("analysis cancelled during map phase");
                    return None;
                }
                next = tasks.join_next() => match next {
                    Some(Ok((document, chunk, result, record))) => {
                        trace.record_call(record);
                        outcomes.push(MapOutcome { document, chunk, result });
                    }
                    Some(Err(e)) => warn!(error = %e, "map task crashed"),
                    None => break,
                },
            }
        }

        for (d, document) in documents.iter().enumerate() {
            for chunk in live_chunks(document) {
                if !outcomes
                    .iter()
                    .any(|o| o.document == d && o.chunk == chunk.index)
                {
                    outcomes.push(MapOutcome {
                        document: d,
                        chunk: chunk.index,
                        result: Err(ModelError::Provider("map task crashed".to_string())),
                    });
                }
            }
        }
        outcomes.sort_by_key(|o| (o.document, o.chunk));

        for outcome in &outcomes {
            let Err(error) = &outcome.result else {
                continue;
            };
            let document = &documents[outcome.document];
            if let Some(chunk) = document.chunks.iter().find(|c| c.index == outcome.chunk) {
                warn!(
                    document = %document.document_id,
                    chunk = chunk.index,
                    error = %error,
                    "chunk failed after retries"
                );
                trace.diagnostics.failed_chunks.push(FailedChunk {
                    document_id: document.document_id.clone(),
                    chunk_index: chunk.index,
                    char_range: chunk.start..chunk.end,
                    segment_range: chunk.segment_range.clone(),
                    error: error.clone(),
                });
            }
        }

        Some(outcomes)
    }

    /// Reduce partial answers until one remains. Returns `None` when cancelled.
    async fn reduce_text(
        &self,
        intent: AnalysisIntent,
        question: Option<&str>,
        document_id: &str,
        mut partials: Vec<String>,
        trace: &mut Trace,
        cancel: &CancelToken,
    ) -> Option<Result<String, ModelError>> {
        let budget = self.settings.prompt_budget_chars;
        let clip = budget.saturating_sub(prompts::reduce_overhead(intent, question, 2)) / 2;
        if clip == 0 {
            return Some(Err(ModelError::InvalidRequest(format!(
                "a {} character prompt cannot hold two partial answers",
                budget
            ))));
        }

        while partials.len() > 1 {
            for partial in &mut partials {
                if clip_chars(partial, clip) {
                    warn!(document = %document_id, limit = clip, "partial answer clipped to fit reduce prompt");
                }
            }
            let groups = self.batch(intent, question, &partials);
            let calls = groups.iter().filter(|g| g.len() > 1).count();
            debug!(partials = partials.len(), groups = groups.len(), "reduce round");
            trace.enter(AnalysisState::AwaitingModel(calls));

            let mut next: Vec<Option<String>> = vec![None; groups.len()];
            let mut tasks = JoinSet::new();
            for (g, range) in groups.into_iter().enumerate() {
                if range.len() == 1 {
                    next[g] = Some(partials[range.start].clone());
                    continue;
                }
                let parts: Vec<&str> = partials[range].iter().map(String::as_str).collect();
                let spec = CallSpec {
                    phase: CallPhase::Reduce,
                    document_id: document_id.to_string(),
                    chunk_index: None,
                    prompt: prompts::reduce_prompt(intent, question, &parts, false),
                    strict_prompt: prompts::reduce_prompt(intent, question, &parts, true),
                };
                let provider = self.provider.clone();
                let settings = self.settings;
                tasks.spawn(async move {
                    let parse: ReplyParser<String> = prompts::parse_text;
                    (g, call_model(provider, settings, spec, parse).await)
                });
            }

            let mut failure = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tasks.abort_all();
                        info!("analysis cancelled during reduce phase");
                        return None;
                    }
                    joined = tasks.join_next() => match joined {
                        Some(Ok((g, (result, record)))) => {
                            trace.record_call(record);
                            match result {
                                Ok(text) => next[g] = Some(text),
                                Err(e) => failure = Some(e),
                            }
                        }
                        Some(Err(e)) => {
                            failure = Some(ModelError::Provider(format!("reduce task crashed: {}", e)));
                        }
                        None => break,
                    },
                }
            }
            if let Some(e) = failure {
                return Some(Err(e));
            }
            trace.enter(AnalysisState::Merging);
            partials = next.into_iter().flatten().collect();
        }

        Some(partials.pop().ok_or_else(|| {
            ModelError::InvalidResponse("no partial answers to reduce".to_string())
        }))
    }

    /// Group consecutive partials so each reduce prompt fits the budget.
    /// Partials must already be clipped so that any two fit together; every
    /// group but possibly the last then holds at least two.
    fn batch(
        &self,
        intent: AnalysisIntent,
        question: Option<&str>,
        partials: &[String],
    ) -> Vec<Range<usize>> {
        let budget = self.settings.prompt_budget_chars;
        let mut groups = Vec::new();
        let mut start = 0usize;
        while start < partials.len() {
            let mut end = start + 1;
            let mut size = partials[start].chars().count();
            while end < partials.len() {
                let grown = size + partials[end].chars().count();
                let overhead = prompts::reduce_overhead(intent, question, end + 1 - start);
                if grown + overhead > budget {
                    break;
                }
                size = grown;
                end += 1;
            }
            groups.push(start..end);
            start = end;
        }
        groups
    }

    /// Reject chunks whose map prompt, strict form included, would exceed
    /// the prompt budget.
    fn check_budget(&self, request: &AnalysisRequest) -> Result<(), PipelineError> {
        let budget = self.settings.prompt_budget_chars;
        let question = request.question.as_deref();
        for document in &request.documents {
            let parts = live_chunks(document).count();
            for (position, chunk) in live_chunks(document).enumerate() {
                let part = (parts > 1).then_some((position, parts));
                let size = prompts::map_prompt(request.intent, question, &chunk.text, part, true)
                    .chars()
                    .count();
                if size > budget {
                    return Err(PipelineError::InvalidRequest(format!(
                        "chunk {} of document {} needs a {} character prompt; the model accepts {}",
                        chunk.index, document.document_id, size, budget
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Chunks with text worth a model call. Chunks holding only separators
/// are skipped.
fn live_chunks(document: &ChunkedDocument) -> impl Iterator<Item = &Chunk> {
    document
        .chunks
        .iter()
        .filter(|c| !c.fresh_text().trim().is_empty())
}

/// Shorten `text` to at most `limit` chars. Returns whether it was cut.
fn clip_chars(text: &mut String, limit: usize) -> bool {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => {
            text.truncate(cut);
            true
        }
        None => false,
    }
}

fn validate(request: &AnalysisRequest) -> Result<(), PipelineError> {
    let expected = request.intent.arity();
    if request.documents.len() != expected {
        return Err(PipelineError::InvalidRequest(format!(
            "{} takes {} document(s), got {}",
            request.intent,
            expected,
            request.documents.len()
        )));
    }
    if request.intent == AnalysisIntent::Qa
        && request
            .question
            .as_deref()
            .map_or(true, |q| q.trim().is_empty())
    {
        return Err(PipelineError::InvalidRequest(
            "qa requires a question".to_string(),
        ));
    }
    if let Some(empty) = request
        .documents
        .iter()
        .find(|d| live_chunks(d).next().is_none())
    {
        return Err(PipelineError::InvalidRequest(format!(
            "document {} has no text to analyze",
            empty.document_id
        )));
    }
    Ok(())
}

/// One logical model call with bounded retries.
async fn call_model<T>(
    provider: Arc<dyn ModelProvider>,
    settings: AnalyzerSettings,
    spec: CallSpec,
    parse: ReplyParser<T>,
) -> (Result<T, ModelError>, ModelCallRecord) {
    let started = Instant::now();
    let mut attempts = 0u32;
    let mut retries = 0u32;
    let mut strict = false;

    let result = loop {
        attempts += 1;
        let prompt = if strict {
            &spec.strict_prompt
        } else {
            &spec.prompt
        };
        let outcome =
            match tokio::time::timeout(settings.call_timeout, provider.generate(prompt, &settings.params))
                .await
            {
                Ok(Ok(reply)) => parse(&reply),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ModelError::Timeout),
            };

        match outcome {
            Ok(value) => break Ok(value),
            Err(ModelError::InvalidResponse(reason)) if !strict => {
                debug!(chunk = ?spec.chunk_index, %reason, "unusable reply, retrying with strict prompt");
                strict = true;
            }
            Err(e) if e.is_transient() && retries < settings.max_retries => {
                retries += 1;
                let delay = backoff_delay(settings.backoff_base, retries, &e);
                warn!(
                    phase = ?spec.phase,
                    chunk = ?spec.chunk_index,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    let record = ModelCallRecord {
        phase: spec.phase,
        document_id: spec.document_id,
        chunk_index: spec.chunk_index,
        attempts,
        strict_retry: strict,
        error: result.as_ref().err().cloned(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    (result, record)
}

/// Delay before retry number `retry` (1-based).
pub(crate) fn backoff_delay(base: Duration, retry: u32, error: &ModelError) -> Duration {
    let exponential = base.saturating_mul(1 << (retry.saturating_sub(1)).min(5));
    match error {
        ModelError::RateLimited {
            retry_after_secs: Some(secs),
        } => exponential.max(Duration::from_secs(*secs)),
        _ => exponential,
    }
}

fn canonical_entity_type(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    match upper.as_str() {
        "ORGANIZATION" | "ORGANISATION" | "COMPANY" | "INSTITUTION" => "ORG".to_string(),
        "LOCATION" | "LOC" | "GPE" | "PLACE" | "GEOGRAPHICAL LOCATION" => "GEO".to_string(),
        "PER" | "PEOPLE" => "PERSON".to_string(),
        _ => upper.clone(),
    }
}

/// Merge per-chunk entity lists by normalized surface form.
///
/// Output order follows first appearance. An entity reported with
/// different types keeps every type with the chunks that reported it.
pub fn merge_entities(per_chunk: &[(usize, Vec<RawEntity>)]) -> Vec<EntityRecord> {
    let mut records: Vec<EntityRecord> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for (chunk, entities) in per_chunk {
        for raw in entities {
            let normalized = compare::normalize_item(&raw.entity);
            if normalized.is_empty() {
                continue;
            }
            let entity_type = canonical_entity_type(&raw.entity_type);
            let slot = *by_key.entry(normalized.clone()).or_insert_with(|| {
                records.push(EntityRecord {
                    entity: raw.entity.trim().to_string(),
                    normalized,
                    types: Vec::new(),
                });
                records.len() - 1
            });

            let types = &mut records[slot].types;
            match types.iter_mut().find(|t| t.entity_type == entity_type) {
                Some(sighting) => {
                    if !sighting.chunks.contains(chunk) {
                        sighting.chunks.push(*chunk);
                    }
                }
                None => types.push(EntityTypeSighting {
                    entity_type,
                    chunks: vec![*chunk],
                }),
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entity: &str, entity_type: &str) -> RawEntity {
        RawEntity {
            entity: entity.to_string(),
            entity_type: entity_type.to_string(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1, &ModelError::Timeout), base);
        assert_eq!(
            backoff_delay(base, 3, &ModelError::Timeout),
            Duration::from_millis(400)
        );
        assert_eq!(
            backoff_delay(base, 20, &ModelError::Timeout),
            Duration::from_millis(3200)
        );
    }

    #[test]
    fn backoff_honors_retry_after() {
        let err = ModelError::RateLimited {
            retry_after_secs: Some(5),
        };
        assert_eq!(
            backoff_delay(Duration::from_millis(10), 1, &err),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn entities_deduplicated_by_normalized_form() {
        let merged = merge_entities(&[
            (0, vec![raw("Acme Corp", "ORG"), raw("Jane  Doe", "PERSON")]),
            (1, vec![raw("acme corp", "Organization"), raw("jane doe", "person")]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].entity, "Acme Corp");
        assert_eq!(
            merged[0].types,
            vec![EntityTypeSighting {
                entity_type: "ORG".into(),
                chunks: vec![0, 1]
            }]
        );
        assert_eq!(merged[1].normalized, "jane doe");
    }

    #[test]
    fn conflicting_types_retained_with_chunks() {
        let merged = merge_entities(&[
            (0, vec![raw("Jordan", "PERSON")]),
            (2, vec![raw("Jordan", "GPE")]),
        ]);
        assert_eq!(merged.len(), 1);
        let types = &merged[0].types;
        assert_eq!(types.len(), 2);
        assert_eq!(types[0].entity_type, "PERSON");
        assert_eq!(types[0].chunks, vec![0]);
        assert_eq!(types[1].entity_type, "GEO");
        assert_eq!(types[1].chunks, vec![2]);
    }

    #[test]
    fn clipping_respects_char_boundaries() {
        let mut text = "naïve café".to_string();
        assert!(clip_chars(&mut text, 4));
        assert_eq!(text, "naïv");
        assert!(!clip_chars(&mut text, 4));
        assert!(!clip_chars(&mut text, 10));
    }

    #[test]
    fn blank_entities_skipped() {
        assert!(merge_entities(&[(0, vec![raw("  ", "PERSON")])]).is_empty());
    }
}

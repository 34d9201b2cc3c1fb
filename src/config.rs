use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_max_payload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Segments with fewer non-whitespace characters are degenerate.
    #[serde(default = "default_min_chars_per_segment")]
    pub min_chars_per_segment: usize,
    /// Segments with a larger share of garbage characters are degenerate.
    #[serde(default = "default_max_garbage_ratio")]
    pub max_garbage_ratio: f32,
    /// Share of undecodable bytes tolerated in plain text before failing.
    #[serde(default = "default_encoding_error_tolerance")]
    pub encoding_error_tolerance: f32,
    #[serde(default = "default_workers_per_kind")]
    pub workers_per_kind: usize,
    /// Extraction results kept in memory; 0 disables the cache.
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_chars_per_segment: default_min_chars_per_segment(),
            max_garbage_ratio: default_max_garbage_ratio(),
            encoding_error_tolerance: default_encoding_error_tolerance(),
            workers_per_kind: default_workers_per_kind(),
            cache_entries: default_cache_entries(),
        }
    }
}

fn default_min_chars_per_segment() -> usize {
    16
}
fn default_max_garbage_ratio() -> f32 {
    0.3
}
fn default_encoding_error_tolerance() -> f32 {
    0.01
}
fn default_workers_per_kind() -> usize {
    4
}
fn default_cache_entries() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_ocr_workers")]
    pub workers: usize,
    #[serde(default = "default_ocr_timeout_secs")]
    pub timeout_secs: u64,
    /// OCR text below this mean word confidence is kept with a warning.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: default_language(),
            dpi: default_dpi(),
            workers: default_ocr_workers(),
            timeout_secs: default_ocr_timeout_secs(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_language() -> String {
    "eng".to_string()
}
fn default_dpi() -> u32 {
    300
}
fn default_ocr_workers() -> usize {
    2
}
fn default_ocr_timeout_secs() -> u64 {
    120
}
fn default_min_confidence() -> f32 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    /// How far back from the budget edge to look for a safe boundary.
    #[serde(default = "default_lookback_chars")]
    pub lookback_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 6000,
            overlap_tokens: default_overlap(),
            lookback_chars: default_lookback_chars(),
        }
    }
}

fn default_overlap() -> usize {
    0
}
fn default_lookback_chars() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Context window budget for a single prompt.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Concurrent map-phase calls per request.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Minimum spacing between requests on one API key; 0 disables pacing.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_input_tokens: default_max_input_tokens(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            concurrency: default_concurrency(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_endpoint() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_model() -> String {
    "meta-llama/llama-3.3-70b-instruct:free".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_max_input_tokens() -> usize {
    8192
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.2
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_concurrency() -> usize {
    4
}
fn default_requests_per_minute() -> u32 {
    0
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.ingest.max_payload_bytes == 0 {
        anyhow::bail!("ingest.max_payload_bytes must be > 0");
    }

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    // Validate extraction thresholds
    if !(0.0..=1.0).contains(&config.extraction.max_garbage_ratio) {
        anyhow::bail!("extraction.max_garbage_ratio must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.extraction.encoding_error_tolerance) {
        anyhow::bail!("extraction.encoding_error_tolerance must be in [0.0, 1.0]");
    }
    if config.extraction.workers_per_kind == 0 {
        anyhow::bail!("extraction.workers_per_kind must be >= 1");
    }

    // Validate OCR
    if config.ocr.workers == 0 {
        anyhow::bail!("ocr.workers must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.ocr.min_confidence) {
        anyhow::bail!("ocr.min_confidence must be in [0.0, 1.0]");
    }

    // Validate model
    if config.model.concurrency == 0 {
        anyhow::bail!("model.concurrency must be >= 1");
    }
    if config.model.timeout_secs == 0 {
        anyhow::bail!("model.timeout_secs must be > 0");
    }
    if config.model.max_input_tokens == 0 {
        anyhow::bail!("model.max_input_tokens must be > 0");
    }
    match config.model.provider.as_str() {
        "disabled" | "openrouter" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, openrouter, or openai.",
            other
        ),
    }

    Ok(())
}

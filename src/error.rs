//! Error taxonomy shared by the extraction and analysis layers.
//!
//! Library code returns these typed errors; the `docintel` binary wraps
//! them in `anyhow` at the command boundary.
//!
//! | Variant | Raised by | Terminal? |
//! |---------|-----------|-----------|
//! | [`PipelineError::UnsupportedFormat`] | [`crate::detect`] | yes, for that document |
//! | [`PipelineError::Encoding`] | plain-text extractor | yes, for that document |
//! | [`PipelineError::PayloadTooLarge`] | ingestion boundary | yes, for that document |
//! | [`PipelineError::ExtractionDegenerate`] | after OCR fallback is exhausted | yes |
//! | [`PipelineError::OcrUnavailable`] | `check --require-ocr` | no, degrades to a warning |
//! | [`PipelineError::Model`] | model collaborator | folded into `Partial` results |
//! | [`PipelineError::PartialResult`] | strict callers of a partial result | caller's choice |

use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::models::DocumentKind;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported format{}", hint.as_ref().map(|h| format!(" (hint: {})", h)).unwrap_or_default())]
    UnsupportedFormat { hint: Option<String> },

    #[error("encoding error: {invalid_bytes} of {total_bytes} bytes could not be decoded")]
    Encoding {
        invalid_bytes: usize,
        total_bytes: usize,
    },

    #[error("malformed {kind} document: {message}")]
    Malformed { kind: DocumentKind, message: String },

    #[error("document {document_id} produced no usable text after fallback")]
    ExtractionDegenerate { document_id: String },

    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),

    #[error("payload too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid analysis request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("partial result: {failed} of {total} chunks failed")]
    PartialResult { failed: usize, total: usize },

    #[error("request cancelled")]
    Cancelled,
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Encoding {
                invalid_bytes,
                total_bytes,
            } => PipelineError::Encoding {
                invalid_bytes,
                total_bytes,
            },
            ExtractError::Pdf(message) => PipelineError::Malformed {
                kind: DocumentKind::Pdf,
                message,
            },
            ExtractError::Docx(message) => PipelineError::Malformed {
                kind: DocumentKind::Docx,
                message,
            },
            ExtractError::NoExtractor(kind) => PipelineError::UnsupportedFormat {
                hint: Some(kind.to_string()),
            },
            ExtractError::Crashed { kind, message } => PipelineError::Malformed { kind, message },
        }
    }
}

/// Typed failure from the language-model collaborator.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("model provider rate limited the request")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("model rejected the request: {0}")]
    InvalidRequest(String),

    #[error("model returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("model provider error: {0}")]
    Provider(String),
}

impl ModelError {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Provider errors cover HTTP 5xx and connection failures.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout | ModelError::RateLimited { .. } | ModelError::Provider(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ModelError::Timeout.is_transient());
        assert!(ModelError::RateLimited {
            retry_after_secs: Some(3)
        }
        .is_transient());
        assert!(ModelError::Provider("502".into()).is_transient());
        assert!(!ModelError::InvalidRequest("empty prompt".into()).is_transient());
        assert!(!ModelError::InvalidResponse("no json".into()).is_transient());
    }

    #[test]
    fn extract_errors_map_to_taxonomy() {
        let err: PipelineError = ExtractError::Encoding {
            invalid_bytes: 40,
            total_bytes: 100,
        }
        .into();
        assert!(matches!(err, PipelineError::Encoding { .. }));

        let err: PipelineError = ExtractError::Docx("bad zip".into()).into();
        assert!(matches!(
            err,
            PipelineError::Malformed {
                kind: DocumentKind::Docx,
                ..
            }
        ));
    }

    #[test]
    fn unsupported_format_message_includes_hint() {
        let err = PipelineError::UnsupportedFormat {
            hint: Some("image.png".into()),
        };
        assert_eq!(err.to_string(), "unsupported format (hint: image.png)");
        let err = PipelineError::UnsupportedFormat { hint: None };
        assert_eq!(err.to_string(), "unsupported format");
    }
}

//! # docintel
//!
//! Document ingestion, layered text extraction, and LLM-backed analysis.
//!
//! Uploaded PDF, DOCX and plain-text payloads are identified by content,
//! extracted page by page, and any page whose direct text is sparse or
//! garbled is re-read with OCR. The recovered text is chunked on safe
//! boundaries and analyzed by a language model with bounded concurrency,
//! retries, and explicit partial results.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────────────┐   ┌─────────┐   ┌──────────────┐
//! │  detect  │──▶│  extract  │──▶│   fallback    │──▶│  chunk  │──▶│ orchestrator │
//! │ (magic)  │   │ PDF/DOCX/ │   │ grade + OCR   │   │ budget  │   │  map/reduce  │
//! └──────────┘   │   text    │   │ (pdftoppm +   │   │ + safe  │   │  + compare   │
//!                └───────────┘   │  tesseract)   │   │ bounds  │   └──────┬───────┘
//!                                └───────────────┘   └─────────┘          ▼
//!                                                                     ┌───────┐
//!                                                                     │  llm  │
//!                                                                     └───────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docintel detect resume.pdf
//! docintel extract scan.pdf
//! docintel analyze summarize resume.pdf
//! docintel analyze qa resume.pdf --question "Where did they study?"
//! docintel compare resume.pdf job.docx
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`detect`] | Content-based kind detection |
//! | [`extract`] | Direct extractors and the per-kind registry |
//! | [`ocr`] | Page rendering and OCR backends |
//! | [`fallback`] | Direct-then-OCR extraction coordinator |
//! | [`chunk`] | Boundary-aware chunking |
//! | [`llm`] | Model provider abstraction |
//! | [`prompts`] | Prompt templates and reply parsing |
//! | [`orchestrator`] | Map/reduce analysis with retries |
//! | [`compare`] | Set-based document comparison |
//! | [`cancel`] | Request cancellation |
//! | [`pipeline`] | End-to-end entry point |

pub mod cancel;
pub mod chunk;
pub mod compare;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod fallback;
pub mod llm;
pub mod models;
pub mod ocr;
pub mod orchestrator;
pub mod pipeline;
pub mod prompts;

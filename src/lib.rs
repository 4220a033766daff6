//! # edgequake-pdf2fields
//!
//! Extract structured fields from PDF documents, page by page, using Vision
//! Language Models (VLMs), with a live progress stream per request.
//!
//! Scanned invoices, delivery notes and receipts rarely carry a usable text
//! layer. This crate rasterises each page into a PNG and asks a VLM to read
//! it, returning supplier name, totals and line items for every page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Intake    media type + size checks, request id assigned
//!  ├─ 2. Render    rasterise pages via pdfium (spawn_blocking); page count is final
//!  ├─ 3. Extract   up to `concurrency` VLM calls in flight, one task per page
//!  ├─ 4. Report    one progress snapshot per settled page, in settle order
//!  ├─ 5. Aggregate results re-ordered by page index
//!  └─ 6. Settle    Success / PartialSuccess / Failure / Cancelled + one terminal event
//! ```
//!
//! A failing page never takes its siblings down: it is stored as an error
//! marker at its index and the request settles as a partial success.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2fields::{Pipeline, PipelineConfig, PipelineEvent};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let pipeline = Pipeline::from_config(PipelineConfig::default())?;
//!     let run = pipeline.process(std::fs::read("invoice.pdf")?, "application/pdf")?;
//!
//!     let mut events = pipeline.subscribe(&run.id()).expect("not yet subscribed");
//!     while let Some(event) = events.next().await {
//!         if let PipelineEvent::Progress(p) = event {
//!             eprintln!("{}/{}", p.current_page, p.total_pages.unwrap_or(0));
//!         }
//!     }
//!
//!     let result = run.wait().await?.into_result()?;
//!     println!("{}", result.to_table());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2fields` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2fields = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod output;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::ResultAggregator;
pub use config::{PageSelection, PipelineConfig, PipelineConfigBuilder};
pub use convert::{convert, convert_from_bytes, convert_sync, convert_to_file, inspect, write_atomic};
pub use coordinator::{CoordinatorState, PipelineCoordinator};
pub use document::{Document, DocumentId, PDF_MEDIA_TYPE};
pub use error::{ExtractionError, PageError, PipelineError, RejectReason, RenderError};
pub use output::{DocumentMetadata, ExtractionResult, ExtractionStats, Failure, Outcome};
pub use page::{Fields, LineItem, PageImage, PageOutcome, PageResult, PageStatus, PageUnit};
pub use pipeline::extract::{ExtractionStage, FieldExtractor};
pub use pipeline::llm::VlmExtractor;
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{OutcomeKind, PipelineEvent, ProgressReporter, ProgressSnapshot, TerminalEvent};
pub use session::{EventStream, Pipeline, ProgressChannels, RunHandle};

//! Error types for the edgequake-pdf2fields library.
//!
//! Failures fall into three tiers:
//!
//! * [`RenderError`]: the document itself cannot be turned into pages
//!   (not a PDF, corrupt, empty, too many pages). Fatal for the whole request;
//!   no progress is ever reported for it.
//!
//! * [`PageError`]: one page's recognition failed. Contained: it is stored
//!   in that page's [`crate::page::PageResult`] and never aborts sibling
//!   pages.
//!
//! * [`PipelineError`]: everything a caller can get back as `Err`: render
//!   failures, intake rejections, and usage errors such as starting a
//!   coordinator twice or collecting results before they are complete.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned as `Err` by the edgequake-pdf2fields library.
///
/// Page-level failures use [`PageError`] and are stored in the aggregated
/// result rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Document errors ───────────────────────────────────────────────────
    /// The document could not be rendered into pages.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Document intake refused the upload.
    #[error("Upload rejected: {0}")]
    Rejected(RejectReason),

    // ── Usage errors ──────────────────────────────────────────────────────
    /// `start` was called on a coordinator that is not idle.
    #[error("Pipeline already started (state: {state})")]
    AlreadyRunning { state: String },

    /// Results were collected before every page settled.
    #[error("Results not ready: {recorded}/{total} pages settled")]
    NotReady { recorded: usize, total: usize },

    // ── Outcome errors (see `Outcome::into_result`) ───────────────────────
    /// The request was cancelled before every page settled.
    #[error("Processing was cancelled after {completed} pages")]
    Cancelled { completed: usize },

    /// Every page failed extraction.
    #[error("All {total} pages failed extraction.\nFirst error: {first_error}")]
    AllPagesFailed { total: usize, first_error: String },

    /// Some pages succeeded but at least one failed.
    #[error("{failed}/{total} pages failed extraction")]
    PartialFailure {
        success: usize,
        failed: usize,
        total: usize,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// True for intake rejections (wrong media type, empty or oversize upload).
    pub fn is_rejection(&self) -> bool {
        matches!(self, PipelineError::Rejected(_))
    }
}

/// Why document intake refused an upload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("unsupported media type '{media_type}' (expected application/pdf)")]
    UnsupportedMediaType { media_type: String },

    #[error("payload is empty")]
    EmptyPayload,

    #[error("payload is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// The document cannot be turned into page images.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The bytes do not start with the PDF magic number.
    #[error("Document is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF")]
    WrongPassword,

    /// The document has zero pages.
    #[error("PDF has no pages")]
    EmptyDocument,

    /// The page selection matched none of the document's pages.
    #[error("Page selection matches no pages (document has {total} pages)")]
    NoPagesSelected { total: usize },

    /// More pages than the configured ceiling.
    #[error("PDF has {pages} pages to process, limit is {limit}\nRaise --max-pages or select fewer pages.")]
    TooManyPages { pages: usize, limit: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the working\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    /// The render task panicked or was lost.
    #[error("Render task failed: {0}")]
    Internal(String),
}

/// Failure signalled by a [`crate::pipeline::extract::FieldExtractor`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The recognition service returned an error.
    #[error("recognition service error: {0}")]
    Service(String),

    /// The service answered, but not with usable fields.
    #[error("unparseable recognition output: {0}")]
    Unparseable(String),
}

/// A non-fatal error for a single page.
///
/// Stored as the page's error marker in the aggregated result. The other
/// pages of the request are unaffected.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// The recognition service reported a failure.
    #[error("Page {page}: recognition failed: {detail}")]
    ServiceFailed { page: usize, detail: String },

    /// The recognition output could not be parsed into fields.
    #[error("Page {page}: unparseable recognition output: {detail}")]
    Unparseable { page: usize, detail: String },

    /// The recognition call exceeded the per-call timeout.
    #[error("Page {page}: recognition timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },

    /// The worker processing the page panicked or was aborted.
    #[error("Page {page}: worker aborted: {detail}")]
    Aborted { page: usize, detail: String },
}

impl PageError {
    /// Attach a page number to a collaborator-level failure.
    pub fn from_extraction(page: usize, err: ExtractionError) -> Self {
        match err {
            ExtractionError::Service(detail) => PageError::ServiceFailed { page, detail },
            ExtractionError::Unparseable(detail) => PageError::Unparseable { page, detail },
        }
    }

    /// 1-indexed page number the error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::ServiceFailed { page, .. }
            | PageError::Unparseable { page, .. }
            | PageError::Timeout { page, .. }
            | PageError::Aborted { page, .. } => *page,
        }
    }
}

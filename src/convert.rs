//! One-shot entry points: process a single document and wait for it.
//!
//! These wrap a throwaway [`Pipeline`] for callers that have one document
//! and no interest in live progress. Services handling many uploads should
//! hold a [`Pipeline`] and use [`Pipeline::process`] with
//! [`Pipeline::subscribe`] instead.

use crate::config::PipelineConfig;
use crate::document::{Document, PDF_MEDIA_TYPE};
use crate::error::{PipelineError, RenderError};
use crate::output::{DocumentMetadata, Outcome};
use crate::pipeline::input;
use crate::pipeline::render::PdfiumRenderer;
use crate::session::Pipeline;
use std::path::Path;
use tracing::info;

/// Extract fields from every selected page of a PDF file or URL.
///
/// # Returns
/// The request's [`Outcome`]. Page failures and an unrenderable document
/// are reported there, not as `Err`.
///
/// # Errors
/// Input errors (file not found, download failed), intake rejections, and
/// provider configuration errors.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2fields::{convert, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let outcome = convert("invoice.pdf", &PipelineConfig::default()).await?;
/// let result = outcome.into_result()?;
/// println!("{}", result.to_table());
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<Outcome, PipelineError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);

    let loaded = input::load_input(input_str, config.download_timeout_secs).await?;
    let document = Document::submit(loaded.bytes, &loaded.media_type, config.max_upload_bytes)?;
    let pipeline = Pipeline::from_config(config.clone())?;
    pipeline.start(document).wait().await
}

/// Extract fields from PDF bytes already in memory.
pub async fn convert_from_bytes(
    bytes: Vec<u8>,
    config: &PipelineConfig,
) -> Result<Outcome, PipelineError> {
    let document = Document::submit(bytes, PDF_MEDIA_TYPE, config.max_upload_bytes)?;
    let pipeline = Pipeline::from_config(config.clone())?;
    pipeline.start(document).wait().await
}

/// Run [`convert`] and write the page results to `output_path` as JSON.
///
/// Uses an atomic write (temp file + rename) so a crash never leaves a
/// partial file. Nothing is written when the document could not be
/// rendered.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<Outcome, PipelineError> {
    let outcome = convert(input_str, config).await?;
    let Some(result) = outcome.result() else {
        return Ok(outcome);
    };
    let path = output_path.as_ref();
    let json = serde_json::to_vec_pretty(result)
        .map_err(|e| PipelineError::Internal(format!("Failed to serialise result: {e}")))?;
    write_atomic(path, &json).await?;
    Ok(outcome)
}

/// Write `contents` to `path` via a temp file and rename, creating parent
/// directories as needed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PipelineError> {
    let write_err = |source| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<Outcome, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(input_str, config))
}

/// Read PDF metadata without rendering pages.
///
/// Does not require an LLM provider or API key.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, PipelineError> {
    let config = PipelineConfig::default();
    let loaded = input::load_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let document = Document::submit(loaded.bytes, &loaded.media_type, config.max_upload_bytes)?;
    let renderer = PdfiumRenderer::new(config.dpi, config.max_rendered_pixels, None);

    tokio::task::spawn_blocking(move || renderer.metadata(&document))
        .await
        .map_err(|e| RenderError::Internal(format!("Metadata task panicked: {e}")))?
        .map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");
        write_atomic(&path, b"{}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn empty_bytes_are_rejected_before_provider_lookup() {
        let err = convert_from_bytes(Vec::new(), &PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn inspect_missing_file() {
        let err = inspect("/no/such/file.pdf").await.unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}

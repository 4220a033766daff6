//! Input loading: read a user-supplied path or URL into memory.
//!
//! pdfium opens documents from a byte slice, so nothing is staged on disk.
//! The media type handed to intake is sniffed from the bytes first (PDF
//! servers often answer with `application/octet-stream`), then taken from
//! the response header or the file extension.

use crate::document::PDF_MEDIA_TYPE;
use crate::error::PipelineError;
use std::path::Path;
use tracing::{debug, info};

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// A loaded input, ready for [`crate::document::Document::submit`].
#[derive(Debug)]
pub struct LoadedInput {
    pub bytes: Vec<u8>,
    pub media_type: String,
    /// File name or URL the bytes came from, for logs and reports.
    pub source: String,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load `input` from disk or over HTTP(S).
pub async fn load_input(input: &str, timeout_secs: u64) -> Result<LoadedInput, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<LoadedInput, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let by_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.eq_ignore_ascii_case("pdf"))
        .map(|_| PDF_MEDIA_TYPE);
    let media_type = sniff_media_type(&bytes, by_extension);

    debug!("Read {} ({} bytes, {})", path.display(), bytes.len(), media_type);
    Ok(LoadedInput {
        bytes,
        media_type,
        source: path.display().to_string(),
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<LoadedInput, PipelineError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let timeout_or_failure = |e: reqwest::Error| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PipelineError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(timeout_or_failure)?;

    if !response.status().is_success() {
        return Err(PipelineError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response.bytes().await.map_err(timeout_or_failure)?.to_vec();
    let media_type = sniff_media_type(&bytes, header_type.as_deref());

    info!("Downloaded {} bytes ({})", bytes.len(), media_type);
    Ok(LoadedInput {
        bytes,
        media_type,
        source: url.to_string(),
    })
}

/// `application/pdf` when the bytes carry the PDF magic number, otherwise
/// the declared type, otherwise `application/octet-stream`.
fn sniff_media_type(bytes: &[u8], declared: Option<&str>) -> String {
    if bytes.starts_with(b"%PDF") {
        PDF_MEDIA_TYPE.to_string()
    } else {
        declared.unwrap_or(FALLBACK_MEDIA_TYPE).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn magic_number_beats_declared_type() {
        assert_eq!(
            sniff_media_type(b"%PDF-1.7", Some("application/octet-stream")),
            PDF_MEDIA_TYPE
        );
        assert_eq!(sniff_media_type(b"\x89PNG", Some("image/png")), "image/png");
        assert_eq!(sniff_media_type(b"????", None), FALLBACK_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn reads_local_file() {
        let mut file = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.4\n%%EOF").unwrap();

        let loaded = load_input(file.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(loaded.media_type, PDF_MEDIA_TYPE);
        assert_eq!(loaded.bytes, b"%PDF-1.4\n%%EOF");
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let err = load_input("/definitely/not/here.pdf", 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }
}

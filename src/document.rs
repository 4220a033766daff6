//! Submitted documents and intake validation.

use crate::error::{PipelineError, RejectReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The only media type the pipeline accepts.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Identity assigned to a document at submission time. Also keys the
/// request's progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An uploaded document. Owned by the single coordinator processing it and
/// dropped once its pages are rendered.
pub struct Document {
    id: DocumentId,
    media_type: String,
    bytes: Vec<u8>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

impl Document {
    /// Validate an upload and assign it an identity.
    ///
    /// Rejects a media type other than `application/pdf` (parameters and
    /// letter case are ignored), an empty payload, or one larger than
    /// `max_bytes`. Whether the bytes really are a PDF is decided by the
    /// render stage.
    pub fn submit(
        bytes: Vec<u8>,
        media_type: &str,
        max_bytes: usize,
    ) -> Result<Self, PipelineError> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if essence != PDF_MEDIA_TYPE {
            return Err(PipelineError::Rejected(
                RejectReason::UnsupportedMediaType {
                    media_type: media_type.to_string(),
                },
            ));
        }
        if bytes.is_empty() {
            return Err(PipelineError::Rejected(RejectReason::EmptyPayload));
        }
        if bytes.len() > max_bytes {
            return Err(PipelineError::Rejected(RejectReason::PayloadTooLarge {
                size: bytes.len(),
                limit: max_bytes,
            }));
        }
        Ok(Self {
            id: DocumentId::new(),
            media_type: essence,
            bytes,
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

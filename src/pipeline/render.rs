//! Render stage: turn a submitted document into ordered [`PageUnit`]s.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! runtime's worker threads keep serving other requests' extraction calls.
//!
//! The stage runs to completion before extraction starts: the page count
//! it reports is final, never an estimate.

use crate::config::PageSelection;
use crate::document::Document;
use crate::error::RenderError;
use crate::output::DocumentMetadata;
use crate::page::{PageImage, PageUnit};
use crate::pipeline::encode;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// The render collaborator. Implementations block; the stage calls them
/// from the blocking pool.
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, document: &Document) -> Result<usize, RenderError>;

    /// Render the given 0-indexed pages, returning one image per index in
    /// the same order.
    fn render_pages(
        &self,
        document: &Document,
        indices: &[usize],
    ) -> Result<Vec<PageImage>, RenderError>;
}

/// Render `document` into units ready for extraction.
///
/// Consumes the document: once its pages are rasterised the source bytes
/// are no longer needed.
///
/// # Errors
/// [`RenderError`] if the bytes are not a PDF, the PDF cannot be opened,
/// it has no pages, the selection matches none of them, or more than
/// `max_pages` pages are selected.
pub async fn render_document(
    renderer: Arc<dyn PageRenderer>,
    document: Document,
    selection: &PageSelection,
    max_pages: usize,
) -> Result<Vec<PageUnit>, RenderError> {
    let selection = selection.clone();
    tokio::task::spawn_blocking(move || {
        render_blocking(renderer.as_ref(), document, &selection, max_pages)
    })
    .await
    .map_err(|e| RenderError::Internal(format!("Render task panicked: {e}")))?
}

fn render_blocking(
    renderer: &dyn PageRenderer,
    document: Document,
    selection: &PageSelection,
    max_pages: usize,
) -> Result<Vec<PageUnit>, RenderError> {
    check_magic(document.bytes())?;

    let total = renderer.page_count(&document)?;
    if total == 0 {
        return Err(RenderError::EmptyDocument);
    }

    let indices = selection.to_indices(total);
    if indices.is_empty() {
        return Err(RenderError::NoPagesSelected { total });
    }
    if indices.len() > max_pages {
        return Err(RenderError::TooManyPages {
            pages: indices.len(),
            limit: max_pages,
        });
    }
    info!(
        "Document {}: rendering {} of {} pages",
        document.id(),
        indices.len(),
        total
    );

    let mut units: Vec<PageUnit> = indices
        .iter()
        .enumerate()
        .map(|(slot, &page_idx)| {
            let mut unit = PageUnit::new(slot, page_idx + 1);
            unit.begin_render();
            unit
        })
        .collect();

    let images = renderer.render_pages(&document, &indices)?;
    if images.len() != units.len() {
        return Err(RenderError::Internal(format!(
            "renderer returned {} images for {} pages",
            images.len(),
            units.len()
        )));
    }
    for (unit, image) in units.iter_mut().zip(images) {
        unit.attach_image(image);
    }

    Ok(units)
}

fn check_magic(bytes: &[u8]) -> Result<(), RenderError> {
    if bytes.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(RenderError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        })
    }
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`PageRenderer`] backed by pdfium.
///
/// The library is bound on each call: from `library_path` when set (the CLI
/// fills it from `PDFIUM_LIB_PATH`), otherwise from the working directory,
/// then the system library path.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
    pub library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(dpi: u32, max_rendered_pixels: u32, password: Option<String>) -> Self {
        Self {
            dpi,
            max_rendered_pixels,
            password,
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    fn bind(&self) -> Result<Pdfium, RenderError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| RenderError::PdfiumBindingFailed(format!("{e:?}")))?;
        Ok(Pdfium::new(bindings))
    }

    fn load<'a>(
        &self,
        pdfium: &'a Pdfium,
        document: &'a Document,
    ) -> Result<PdfDocument<'a>, RenderError> {
        pdfium
            .load_pdf_from_byte_slice(document.bytes(), self.password.as_deref())
            .map_err(|e| {
                let err_str = format!("{e:?}");
                if err_str.contains("Password") || err_str.contains("password") {
                    if self.password.is_some() {
                        RenderError::WrongPassword
                    } else {
                        RenderError::PasswordRequired
                    }
                } else {
                    RenderError::CorruptPdf { detail: err_str }
                }
            })
    }

    /// Target width in pixels for a page `width_pt` points wide.
    fn target_width(&self, width_pt: f32) -> i32 {
        let px = (width_pt * self.dpi as f32 / 72.0).round() as i32;
        px.clamp(1, self.max_rendered_pixels as i32)
    }

    /// Read document metadata without rendering any page.
    pub fn metadata(&self, document: &Document) -> Result<DocumentMetadata, RenderError> {
        check_magic(document.bytes())?;
        let pdfium = self.bind()?;
        let pdf = self.load(&pdfium, document)?;
        let metadata = pdf.metadata();

        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata.get(tag).and_then(|t| {
                let v = t.value().to_string();
                if v.is_empty() {
                    None
                } else {
                    Some(v)
                }
            })
        };

        Ok(DocumentMetadata {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            page_count: pdf.pages().len() as usize,
            pdf_version: format!("{:?}", pdf.version()),
        })
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, document: &Document) -> Result<usize, RenderError> {
        let pdfium = self.bind()?;
        let pdf = self.load(&pdfium, document)?;
        Ok(pdf.pages().len() as usize)
    }

    fn render_pages(
        &self,
        document: &Document,
        indices: &[usize],
    ) -> Result<Vec<PageImage>, RenderError> {
        let pdfium = self.bind()?;
        let pdf = self.load(&pdfium, document)?;
        let pages = pdf.pages();

        let mut images = Vec::with_capacity(indices.len());
        for &idx in indices {
            let page = pages
                .get(idx as u16)
                .map_err(|e| RenderError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                })?;

            let render_config = PdfRenderConfig::new()
                .set_target_width(self.target_width(page.width().value))
                .set_maximum_height(self.max_rendered_pixels as i32);

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                RenderError::RasterisationFailed {
                    page: idx + 1,
                    detail: format!("{e:?}"),
                }
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );

            let png = encode::encode_png(&image).map_err(|e| RenderError::RasterisationFailed {
                page: idx + 1,
                detail: format!("PNG encoding failed: {e}"),
            })?;
            images.push(png);
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PDF_MEDIA_TYPE;
    use crate::page::PageStatus;

    struct FixedRenderer {
        pages: usize,
    }

    impl PageRenderer for FixedRenderer {
        fn page_count(&self, _document: &Document) -> Result<usize, RenderError> {
            Ok(self.pages)
        }

        fn render_pages(
            &self,
            _document: &Document,
            indices: &[usize],
        ) -> Result<Vec<PageImage>, RenderError> {
            Ok(indices
                .iter()
                .map(|&i| PageImage {
                    png: vec![i as u8],
                    width: 1,
                    height: 1,
                })
                .collect())
        }
    }

    fn doc(bytes: &[u8]) -> Document {
        Document::submit(bytes.to_vec(), PDF_MEDIA_TYPE, 1 << 20).unwrap()
    }

    #[tokio::test]
    async fn renders_selected_pages_in_order() {
        let renderer: Arc<dyn PageRenderer> = Arc::new(FixedRenderer { pages: 5 });
        let units = render_document(renderer, doc(b"%PDF-1.4"), &PageSelection::Set(vec![4, 2]), 10)
            .await
            .unwrap();

        assert_eq!(units.len(), 2);
        assert_eq!((units[0].index(), units[0].source_page()), (0, 2));
        assert_eq!((units[1].index(), units[1].source_page()), (1, 4));
        assert!(units.iter().all(|u| u.status() == PageStatus::Rendering));
        assert_eq!(units[1].image().unwrap().png, vec![3]);
    }

    #[tokio::test]
    async fn rejects_non_pdf_bytes() {
        let renderer: Arc<dyn PageRenderer> = Arc::new(FixedRenderer { pages: 1 });
        let err = render_document(renderer, doc(b"GIF89a"), &PageSelection::All, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::NotAPdf { ref magic } if magic == b"GIF8"));
    }

    #[tokio::test]
    async fn empty_document_is_an_error() {
        let renderer: Arc<dyn PageRenderer> = Arc::new(FixedRenderer { pages: 0 });
        let err = render_document(renderer, doc(b"%PDF-1.4"), &PageSelection::All, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::EmptyDocument));
    }

    #[tokio::test]
    async fn page_ceiling_is_enforced() {
        let renderer: Arc<dyn PageRenderer> = Arc::new(FixedRenderer { pages: 11 });
        let err = render_document(renderer, doc(b"%PDF-1.4"), &PageSelection::All, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::TooManyPages { pages: 11, limit: 10 }));
    }

    #[tokio::test]
    async fn selection_outside_document_is_an_error() {
        let renderer: Arc<dyn PageRenderer> = Arc::new(FixedRenderer { pages: 3 });
        let err = render_document(renderer, doc(b"%PDF-1.4"), &PageSelection::Single(9), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::NoPagesSelected { total: 3 }));
    }

    #[test]
    fn target_width_follows_dpi_and_cap() {
        let r = PdfiumRenderer {
            dpi: 144,
            max_rendered_pixels: 2000,
            password: None,
            library_path: None,
        };
        // A4 is 595pt wide.
        assert_eq!(r.target_width(595.0), 1190);
        assert_eq!(r.target_width(5000.0), 2000);
    }
}

//! Image encoding: rendered bitmaps → PNG bytes → base64 `ImageData`.
//!
//! Pages are stored as PNG between the render and extraction stages. PNG is
//! lossless, and small printed digits on invoices are exactly what JPEG
//! artefacts destroy.

use crate::page::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<PageImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );

    Ok(PageImage {
        png: buf,
        width: img.width(),
        height: img.height(),
    })
}

/// Wrap a page PNG for a multimodal chat request.
///
/// `detail: "high"` lets GPT-4-class models tile the image at full
/// resolution; with `low` small table cells become unreadable.
pub fn to_image_data(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(&page.png);
    ImageData::new(b64, "image/png").with_detail("high")
}

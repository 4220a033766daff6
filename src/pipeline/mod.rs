//! Pipeline stages for PDF-to-fields extraction.
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ llm ──▶ parse
//! (bytes)   (pdfium)   (PNG)     (fan-out)   (VLM)   (JSON → Fields)
//! ```
//!
//! 1. [`input`]: load a path or URL into bytes plus a media type
//! 2. [`render`]: rasterise the selected pages on the blocking pool
//! 3. [`encode`]: PNG-encode page bitmaps and wrap them for the chat API
//! 4. [`extract`]: the [`extract::FieldExtractor`] seam and the
//!    bounded-concurrency stage that drives it
//! 5. [`llm`]: the VLM-backed extractor, the only stage with network I/O
//! 6. [`parse`]: turn a model reply into [`crate::page::Fields`]

pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;

//! Per-page data: the [`PageUnit`] work item and the values it settles into.
//!
//! A `PageUnit` is created by the render stage, moved into exactly one
//! extraction worker, and handed back once it reaches a terminal status.
//! Because the worker owns the unit by value there is never more than one
//! writer, and once terminal the unit is only read.

use crate::error::PageError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Lifecycle of a page within one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Rendering,
    Extracting,
    Done,
    Failed,
}

impl PageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PageStatus::Done | PageStatus::Failed)
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PageStatus::Pending => "pending",
            PageStatus::Rendering => "rendering",
            PageStatus::Extracting => "extracting",
            PageStatus::Done => "done",
            PageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A rendered page, PNG-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("png", &format_args!("<{} bytes>", self.png.len()))
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Structured data extracted from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fields {
    #[serde(default)]
    pub supplier_name: Option<String>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub total_quantity: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub total_payment: Option<f64>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub line_items: Vec<LineItem>,

    /// Any further keys the recognition service returned.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One row of a page's line-item table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,

    #[serde(default, deserialize_with = "lenient_number")]
    pub total: Option<f64>,
}

/// Accept a JSON number or a numeric string such as `"1,234.50"` or `"₪ 120"`.
///
/// `null`, `""`, `"-"` and `"n/a"` become `None`; any other string is an error.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => parse_amount(&s)
            .map_err(|_| D::Error::custom(format!("not a number: {s:?}"))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<LineItem>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<LineItem>>::deserialize(deserializer)?.unwrap_or_default())
}

static AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d[\d,]*(?:\.\d+)?").unwrap());

/// Parse a human-formatted amount such as `"Rs. 1,200"` or `"12 pcs"`.
///
/// The first number in the text is taken; labels, units and currency around
/// it are ignored and thousands separators are dropped. Text without a
/// number is an error.
pub(crate) fn parse_amount(s: &str) -> Result<Option<f64>, std::num::ParseFloatError> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || trimmed == "-"
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return Ok(None);
    }
    let digits = AMOUNT
        .find(trimmed)
        .map(|m| m.as_str().replace(',', ""))
        .unwrap_or_default();
    digits.parse::<f64>().map(Some)
}

/// Terminal outcome of one page: the fields, or the error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    Done { fields: Fields },
    Failed { error: PageError },
}

/// One page's entry in the aggregated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    /// 0-based position within the request (ordering key).
    pub index: usize,
    /// 1-based page number in the source PDF.
    pub page: usize,
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

impl PageResult {
    pub fn fields(&self) -> Option<&Fields> {
        match &self.outcome {
            PageOutcome::Done { fields } => Some(fields),
            PageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.outcome {
            PageOutcome::Done { .. } => None,
            PageOutcome::Failed { error } => Some(error),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, PageOutcome::Done { .. })
    }
}

/// One page tracked through render → extract → terminal status.
#[derive(Debug)]
pub struct PageUnit {
    index: usize,
    source_page: usize,
    status: PageStatus,
    image: Option<PageImage>,
    outcome: Option<PageOutcome>,
}

impl PageUnit {
    /// A fresh unit for slot `index`, backed by 1-indexed `source_page`.
    pub fn new(index: usize, source_page: usize) -> Self {
        Self {
            index,
            source_page,
            status: PageStatus::Pending,
            image: None,
            outcome: None,
        }
    }

    /// A unit that failed without reaching a worker result, e.g. because
    /// the task running it panicked and took the original unit with it.
    pub(crate) fn aborted(index: usize, source_page: usize, error: PageError) -> Self {
        Self {
            index,
            source_page,
            status: PageStatus::Failed,
            image: None,
            outcome: Some(PageOutcome::Failed { error }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn source_page(&self) -> usize {
        self.source_page
    }

    pub fn status(&self) -> PageStatus {
        self.status
    }

    pub fn image(&self) -> Option<&PageImage> {
        self.image.as_ref()
    }

    pub fn fields(&self) -> Option<&Fields> {
        match &self.outcome {
            Some(PageOutcome::Done { fields }) => Some(fields),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.outcome {
            Some(PageOutcome::Failed { error }) => Some(error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn begin_render(&mut self) {
        debug_assert_eq!(self.status, PageStatus::Pending);
        self.status = PageStatus::Rendering;
    }

    /// Attach the rendered image. The image is set once.
    pub(crate) fn attach_image(&mut self, image: PageImage) {
        debug_assert!(self.image.is_none(), "page image set twice");
        if self.image.is_none() {
            self.image = Some(image);
        }
    }

    pub(crate) fn begin_extraction(&mut self) {
        debug_assert_eq!(self.status, PageStatus::Rendering);
        self.status = PageStatus::Extracting;
    }

    /// Move to Done or Failed. A unit settles once; later calls are ignored.
    pub(crate) fn settle(&mut self, result: Result<Fields, PageError>) {
        debug_assert!(!self.status.is_terminal(), "page settled twice");
        if self.status.is_terminal() {
            return;
        }
        match result {
            Ok(fields) => {
                self.status = PageStatus::Done;
                self.outcome = Some(PageOutcome::Done { fields });
            }
            Err(error) => {
                self.status = PageStatus::Failed;
                self.outcome = Some(PageOutcome::Failed { error });
            }
        }
    }

    /// Drop the image and keep the outcome. `None` unless terminal.
    pub fn into_result(self) -> Option<PageResult> {
        let outcome = self.outcome?;
        Some(PageResult {
            index: self.index,
            page: self.source_page,
            outcome,
        })
    }
}

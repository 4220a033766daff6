//! Result types handed back to callers.

use crate::error::{PageError, PipelineError, RenderError};
use crate::page::PageResult;
use crate::progress::OutcomeKind;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Per-page results of one request, in page order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub pages: Vec<PageResult>,
}

/// Summary counts for an [`ExtractionResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ExtractionResult {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn stats(&self) -> ExtractionStats {
        let succeeded = self.pages.iter().filter(|p| p.is_done()).count();
        ExtractionStats {
            total: self.pages.len(),
            succeeded,
            failed: self.pages.len() - succeeded,
        }
    }

    /// The error of the lowest-indexed failed page.
    pub fn first_error(&self) -> Option<&PageError> {
        self.pages.iter().find_map(|p| p.error())
    }

    /// Tab-separated table with a header row.
    ///
    /// Each page gets a summary row carrying its supplier, totals and error,
    /// followed by one row per line item. Item rows repeat the page number
    /// and supplier and leave the page totals empty, so summing a totals
    /// column never double counts. Pastes straight into a spreadsheet; tabs
    /// and line breaks inside values are flattened to spaces.
    pub fn to_table(&self) -> String {
        let mut out = String::from(
            "page\tsupplier\tdescription\tquantity\tunit_price\tline_total\t\
             total_quantity\ttotal_payment\terror\n",
        );
        for page in &self.pages {
            let error = page.error().map(|e| cell(&e.to_string())).unwrap_or_default();
            let Some(f) = page.fields() else {
                let _ = writeln!(out, "{}\t\t\t\t\t\t\t\t{}", page.page, error);
                continue;
            };
            let supplier = f.supplier_name.as_deref().map(cell).unwrap_or_default();
            let _ = writeln!(
                out,
                "{}\t{}\t\t\t\t\t{}\t{}\t",
                page.page,
                supplier,
                number(f.total_quantity),
                number(f.total_payment),
            );
            for item in &f.line_items {
                let _ = writeln!(
                    out,
                    "{}\t{}\t{}\t{}\t{}\t{}\t\t\t",
                    page.page,
                    supplier,
                    item.description.as_deref().map(cell).unwrap_or_default(),
                    number(item.quantity),
                    number(item.unit_price),
                    number(item.total),
                );
            }
        }
        out
    }
}

fn cell(s: &str) -> String {
    s.replace(['\t', '\r', '\n'], " ")
}

fn number(n: Option<f64>) -> String {
    n.map(|n| n.to_string()).unwrap_or_default()
}

/// How a request settled.
///
/// Per-page failures are data, not errors: a request with some failed pages
/// is a [`Outcome::PartialSuccess`] whose result carries an error marker at
/// each failed index.
#[derive(Debug)]
pub enum Outcome {
    /// Every page succeeded.
    Success(ExtractionResult),
    /// At least one page succeeded and at least one failed.
    PartialSuccess(ExtractionResult),
    Failure(Failure),
    /// Cancelled before every page settled. Holds the pages that did.
    Cancelled(ExtractionResult),
}

#[derive(Debug)]
pub enum Failure {
    /// The document never produced pages.
    Render(RenderError),
    /// Every page failed extraction.
    AllPagesFailed(ExtractionResult),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::PartialSuccess(_) => OutcomeKind::PartialSuccess,
            Outcome::Failure(_) => OutcomeKind::Failure,
            Outcome::Cancelled(_) => OutcomeKind::Cancelled,
        }
    }

    /// The page results, if any pages were processed.
    pub fn result(&self) -> Option<&ExtractionResult> {
        match self {
            Outcome::Success(r)
            | Outcome::PartialSuccess(r)
            | Outcome::Cancelled(r)
            | Outcome::Failure(Failure::AllPagesFailed(r)) => Some(r),
            Outcome::Failure(Failure::Render(_)) => None,
        }
    }

    pub fn into_extraction(self) -> Option<ExtractionResult> {
        match self {
            Outcome::Success(r)
            | Outcome::PartialSuccess(r)
            | Outcome::Cancelled(r)
            | Outcome::Failure(Failure::AllPagesFailed(r)) => Some(r),
            Outcome::Failure(Failure::Render(_)) => None,
        }
    }

    /// Strict view: `Ok` only when every page succeeded.
    pub fn into_result(self) -> Result<ExtractionResult, PipelineError> {
        match self {
            Outcome::Success(r) => Ok(r),
            Outcome::PartialSuccess(r) => {
                let stats = r.stats();
                Err(PipelineError::PartialFailure {
                    success: stats.succeeded,
                    failed: stats.failed,
                    total: stats.total,
                })
            }
            Outcome::Cancelled(r) => Err(PipelineError::Cancelled { completed: r.len() }),
            Outcome::Failure(Failure::Render(e)) => Err(PipelineError::Render(e)),
            Outcome::Failure(Failure::AllPagesFailed(r)) => Err(PipelineError::AllPagesFailed {
                total: r.len(),
                first_error: r
                    .first_error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".into()),
            }),
        }
    }
}

/// Document-level metadata read without rendering any page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Fields, LineItem, PageOutcome};

    fn done(index: usize, supplier: &str, payment: f64) -> PageResult {
        PageResult {
            index,
            page: index + 1,
            outcome: PageOutcome::Done {
                fields: Fields {
                    supplier_name: Some(supplier.into()),
                    total_payment: Some(payment),
                    ..Fields::default()
                },
            },
        }
    }

    fn failed(index: usize) -> PageResult {
        PageResult {
            index,
            page: index + 1,
            outcome: PageOutcome::Failed {
                error: PageError::ServiceFailed {
                    page: index + 1,
                    detail: "HTTP 500".into(),
                },
            },
        }
    }

    #[test]
    fn stats_count_pages() {
        let r = ExtractionResult {
            pages: vec![done(0, "A", 1.0), failed(1), done(2, "B", 2.0)],
        };
        assert_eq!(
            r.stats(),
            ExtractionStats {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(r.first_error().map(|e| e.page()), Some(2));
    }

    #[test]
    fn table_has_summary_and_item_rows() {
        let mut first = done(0, "Acme\tLtd", 120.5);
        if let PageOutcome::Done { fields } = &mut first.outcome {
            fields.line_items = vec![
                LineItem {
                    description: Some("bolts".into()),
                    quantity: Some(10.0),
                    unit_price: Some(2.5),
                    total: Some(25.0),
                },
                LineItem {
                    description: Some("nuts".into()),
                    ..LineItem::default()
                },
            ];
        }
        let r = ExtractionResult {
            pages: vec![first, failed(1)],
        };
        let table = r.to_table();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].split('\t').count(), 9);
        assert!(lines.iter().all(|l| l.split('\t').count() == 9));
        assert_eq!(lines[1], "1\tAcme Ltd\t\t\t\t\t\t120.5\t");
        assert_eq!(lines[2], "1\tAcme Ltd\tbolts\t10\t2.5\t25\t\t\t");
        assert_eq!(lines[3], "1\tAcme Ltd\tnuts\t\t\t\t\t\t");
        assert!(lines[4].starts_with("2\t\t\t\t\t\t\t\t"));
        assert!(lines[4].contains("HTTP 500"));
    }

    #[test]
    fn strict_view_of_outcomes() {
        let ok = Outcome::Success(ExtractionResult {
            pages: vec![done(0, "A", 1.0)],
        });
        assert_eq!(ok.kind(), OutcomeKind::Success);
        assert!(ok.into_result().is_ok());

        let partial = Outcome::PartialSuccess(ExtractionResult {
            pages: vec![done(0, "A", 1.0), failed(1)],
        });
        assert!(matches!(
            partial.into_result(),
            Err(PipelineError::PartialFailure { failed: 1, .. })
        ));

        let render = Outcome::Failure(Failure::Render(RenderError::EmptyDocument));
        assert!(render.result().is_none());
        assert!(matches!(
            render.into_result(),
            Err(PipelineError::Render(RenderError::EmptyDocument))
        ));
    }
}

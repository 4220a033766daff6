//! Re-ordering of settled pages into page order.

use crate::error::PipelineError;
use crate::output::ExtractionResult;
use crate::page::{PageResult, PageUnit};

/// Collects settled units into pre-sized slots keyed by index.
///
/// Units arrive in completion order; the slot layout restores index order.
/// The request is complete when every slot is filled, so no counter has to
/// agree with the page count.
#[derive(Debug)]
pub struct ResultAggregator {
    slots: Vec<Option<PageResult>>,
    recorded: usize,
}

impl ResultAggregator {
    pub fn new(total: usize) -> Self {
        Self {
            slots: vec![None; total],
            recorded: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn recorded(&self) -> usize {
        self.recorded
    }

    /// Store a settled unit's outcome at its index.
    ///
    /// A unit that is not terminal, whose index is out of range, or whose
    /// slot is already filled is an internal error; the unit is discarded.
    pub fn record(&mut self, unit: PageUnit) -> Result<(), PipelineError> {
        let index = unit.index();
        let status = unit.status();
        let result = unit.into_result().ok_or_else(|| {
            PipelineError::Internal(format!("page index {index} recorded while {status}"))
        })?;

        let total = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            PipelineError::Internal(format!("page index {index} out of range for {total} pages"))
        })?;
        if slot.is_some() {
            return Err(PipelineError::Internal(format!(
                "page index {index} recorded twice"
            )));
        }

        *slot = Some(result);
        self.recorded += 1;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.recorded == self.slots.len()
    }

    /// The full, ordered result. Fails unless every page has been recorded.
    pub fn collect(&mut self) -> Result<ExtractionResult, PipelineError> {
        if !self.is_complete() {
            return Err(PipelineError::NotReady {
                recorded: self.recorded,
                total: self.slots.len(),
            });
        }
        let pages = std::mem::take(&mut self.slots).into_iter().flatten().collect();
        self.recorded = 0;
        Ok(ExtractionResult { pages })
    }

    /// Whatever has been recorded, in index order. Used when a request ends
    /// before every page settled.
    pub fn into_recorded(self) -> ExtractionResult {
        ExtractionResult {
            pages: self.slots.into_iter().flatten().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::page::{Fields, PageImage};

    fn settled(index: usize, fail: bool) -> PageUnit {
        let mut unit = PageUnit::new(index, index + 1);
        unit.begin_render();
        unit.attach_image(PageImage {
            png: vec![],
            width: 1,
            height: 1,
        });
        unit.begin_extraction();
        unit.settle(if fail {
            Err(PageError::ServiceFailed {
                page: index + 1,
                detail: "boom".into(),
            })
        } else {
            Ok(Fields {
                supplier_name: Some(format!("supplier {index}")),
                ..Fields::default()
            })
        });
        unit
    }

    #[test]
    fn restores_index_order() {
        let mut agg = ResultAggregator::new(3);
        for index in [2, 0, 1] {
            agg.record(settled(index, index == 1)).unwrap();
        }
        assert!(agg.is_complete());

        let result = agg.collect().unwrap();
        let indices: Vec<usize> = result.pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(result.pages[0].is_done());
        assert!(result.pages[1].error().is_some());
        assert_eq!(
            result.pages[2].fields().and_then(|f| f.supplier_name.as_deref()),
            Some("supplier 2")
        );
    }

    #[test]
    fn collect_before_complete_is_not_ready() {
        let mut agg = ResultAggregator::new(3);
        agg.record(settled(1, false)).unwrap();
        let err = agg.collect().unwrap_err();
        assert!(matches!(err, PipelineError::NotReady { recorded: 1, total: 3 }));
    }

    #[test]
    fn rejects_bad_records() {
        let mut agg = ResultAggregator::new(2);
        agg.record(settled(0, false)).unwrap();

        assert!(matches!(
            agg.record(settled(0, false)),
            Err(PipelineError::Internal(_))
        ));
        assert!(matches!(
            agg.record(settled(5, false)),
            Err(PipelineError::Internal(_))
        ));
        assert!(matches!(
            agg.record(PageUnit::new(1, 2)),
            Err(PipelineError::Internal(_))
        ));
        assert_eq!(agg.recorded(), 1);
    }

    #[test]
    fn into_recorded_keeps_only_filled_slots() {
        let mut agg = ResultAggregator::new(3);
        agg.record(settled(2, false)).unwrap();
        agg.record(settled(0, false)).unwrap();
        let partial = agg.into_recorded();
        let indices: Vec<usize> = partial.pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn zero_pages_is_trivially_complete() {
        let mut agg = ResultAggregator::new(0);
        assert!(agg.is_complete());
        assert!(agg.collect().unwrap().is_empty());
    }
}

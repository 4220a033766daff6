//! Extraction stage: run the recognition call for every page, at most
//! `concurrency` at a time.
//!
//! Each page is extracted on its own tokio task, so a slow or panicking call
//! never holds up its siblings. The stage yields units in completion order;
//! it neither assumes nor enforces page order. Restoring index order is the
//! aggregator's job.
//!
//! There is no retry here. A page whose call fails, times out, or returns
//! unparseable output settles as Failed and stays that way.

use crate::error::{ExtractionError, PageError};
use crate::page::{Fields, PageImage, PageUnit};
use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

/// The recognition collaborator: structured fields from one page image.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, image: &PageImage) -> Result<Fields, ExtractionError>;
}

/// Bounded-concurrency fan-out over a document's pages.
#[derive(Clone)]
pub struct ExtractionStage {
    extractor: Arc<dyn FieldExtractor>,
    concurrency: usize,
    call_timeout: Option<Duration>,
}

impl ExtractionStage {
    pub fn new(
        extractor: Arc<dyn FieldExtractor>,
        concurrency: usize,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            extractor,
            concurrency: concurrency.max(1),
            call_timeout,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Extract every unit, yielding each one as it reaches a terminal status.
    ///
    /// Once `cancel` fires no further unit is dispatched. Dropping the
    /// returned stream aborts the calls still in flight.
    pub fn run(
        &self,
        units: Vec<PageUnit>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, PageUnit> {
        let extractor = Arc::clone(&self.extractor);
        let timeout = self.call_timeout;

        stream::iter(units)
            .take_while(move |_| future::ready(!cancel.is_cancelled()))
            .map(move |unit| dispatch(Arc::clone(&extractor), unit, timeout))
            .buffer_unordered(self.concurrency)
            .boxed()
    }
}

/// Run one unit on its own task and hand it back settled.
async fn dispatch(
    extractor: Arc<dyn FieldExtractor>,
    mut unit: PageUnit,
    timeout: Option<Duration>,
) -> PageUnit {
    let index = unit.index();
    let page = unit.source_page();
    unit.begin_extraction();
    debug!("Page {}: extraction started", page);

    let worker = AbortOnDropHandle::new(tokio::spawn(async move {
        let result = extract_one(extractor.as_ref(), &unit, timeout).await;
        unit.settle(result);
        unit
    }));

    match worker.await {
        Ok(unit) => {
            match unit.error() {
                None => debug!("Page {}: extraction done", page),
                Some(e) => warn!("{}", e),
            }
            unit
        }
        Err(e) => {
            let error = PageError::Aborted {
                page,
                detail: e.to_string(),
            };
            warn!("{}", error);
            PageUnit::aborted(index, page, error)
        }
    }
}

async fn extract_one(
    extractor: &dyn FieldExtractor,
    unit: &PageUnit,
    timeout: Option<Duration>,
) -> Result<Fields, PageError> {
    let page = unit.source_page();
    let image = unit.image().ok_or_else(|| PageError::Aborted {
        page,
        detail: "page has no rendered image".into(),
    })?;

    let call = extractor.extract(image);
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| PageError::Timeout {
                page,
                secs: limit.as_secs(),
            })?,
        None => call.await,
    };
    result.map_err(|e| PageError::from_extraction(page, e))
}

//! Per-request orchestration: render, extract, aggregate, report.
//!
//! A [`PipelineCoordinator`] processes exactly one document. It is the only
//! writer of that request's progress events and the only owner of its
//! aggregator, so the order in which it consumes settled pages is the order
//! a subscriber sees them:
//!
//! ```text
//! Idle ──start──▶ Rendering ──units──▶ Extracting ──all settled──▶ Settled
//!                     │                     │
//!                     └── render error ─────┴── cancelled ───────▶ Settled
//! ```
//!
//! Every path into Settled emits exactly one terminal event, and nothing is
//! emitted after it.

use crate::aggregate::ResultAggregator;
use crate::config::PipelineConfig;
use crate::document::{Document, DocumentId};
use crate::error::PipelineError;
use crate::output::{ExtractionResult, Failure, Outcome};
use crate::pipeline::extract::{ExtractionStage, FieldExtractor};
use crate::pipeline::render::{render_document, PageRenderer};
use crate::progress::{EventSink, OutcomeKind, ProgressReporter, TerminalEvent};
use futures::StreamExt;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Rendering,
    Extracting,
    Settled,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoordinatorState::Idle => "idle",
            CoordinatorState::Rendering => "rendering",
            CoordinatorState::Extracting => "extracting",
            CoordinatorState::Settled => "settled",
        };
        f.write_str(s)
    }
}

/// Drives one document through the pipeline.
pub struct PipelineCoordinator {
    config: Arc<PipelineConfig>,
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn FieldExtractor>,
    state: Mutex<CoordinatorState>,
    sink: Mutex<Option<EventSink>>,
    cancel: CancellationToken,
}

impl PipelineCoordinator {
    pub fn new(
        config: Arc<PipelineConfig>,
        renderer: Arc<dyn PageRenderer>,
        extractor: Arc<dyn FieldExtractor>,
        sink: EventSink,
    ) -> Self {
        Self {
            config,
            renderer,
            extractor,
            state: Mutex::new(CoordinatorState::Idle),
            sink: Mutex::new(Some(sink)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop dispatching pages and settle as cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process `document` to completion.
    ///
    /// Page failures and render failures are reported through the returned
    /// [`Outcome`], not as `Err`.
    ///
    /// # Errors
    /// [`PipelineError::AlreadyRunning`] if this coordinator has already
    /// been started; the run in progress is unaffected.
    /// [`PipelineError::Internal`] if a settled page could not be recorded.
    pub async fn start(&self, document: Document) -> Result<Outcome, PipelineError> {
        self.begin()?;
        let sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(EventSink::detached);
        let mut reporter = ProgressReporter::new(sink);
        let request_id = document.id();
        info!("Document {}: processing {} bytes", request_id, document.len());

        // ── Render ───────────────────────────────────────────────────────
        let selection = self.config.pages.clone();
        let rendered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            r = render_document(
                Arc::clone(&self.renderer),
                document,
                &selection,
                self.config.max_pages,
            ) => Some(r),
        };

        let units = match rendered {
            None => {
                info!("Document {}: cancelled while rendering", request_id);
                let outcome = Outcome::Cancelled(ExtractionResult::default());
                return Ok(self.settle(&mut reporter, request_id, outcome));
            }
            Some(Err(e)) => {
                warn!("Document {}: {}", request_id, e);
                let outcome = Outcome::Failure(Failure::Render(e));
                return Ok(self.settle(&mut reporter, request_id, outcome));
            }
            Some(Ok(units)) => units,
        };

        // ── Extract ──────────────────────────────────────────────────────
        let total = units.len();
        self.set_state(CoordinatorState::Extracting);
        reporter.set_total(total);
        let mut aggregator = ResultAggregator::new(total);

        let stage = ExtractionStage::new(
            Arc::clone(&self.extractor),
            self.config.concurrency,
            self.config.api_timeout(),
        );
        info!(
            "Document {}: extracting {} pages, {} at a time",
            request_id,
            total,
            stage.concurrency()
        );
        let mut settled = stage.run(units, self.cancel.clone());

        let mut failure = None;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = settled.next() => {
                    let Some(unit) = next else { break };
                    reporter.on_unit_terminal(&unit);
                    if let Err(e) = aggregator.record(unit) {
                        error!("Document {}: {}", request_id, e);
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        // Aborts whatever is still in flight.
        drop(settled);

        if let Some(e) = failure {
            self.set_state(CoordinatorState::Settled);
            reporter.finish(TerminalEvent {
                request_id,
                outcome: OutcomeKind::Failure,
                total_pages: Some(total),
                succeeded: 0,
                failed: 0,
                message: Some(e.to_string()),
            });
            return Err(e);
        }

        let outcome = decide(aggregator)?;
        Ok(self.settle(&mut reporter, request_id, outcome))
    }

    fn begin(&self) -> Result<(), PipelineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != CoordinatorState::Idle {
            return Err(PipelineError::AlreadyRunning {
                state: state.to_string(),
            });
        }
        *state = CoordinatorState::Rendering;
        Ok(())
    }

    fn set_state(&self, next: CoordinatorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn settle(
        &self,
        reporter: &mut ProgressReporter,
        request_id: DocumentId,
        outcome: Outcome,
    ) -> Outcome {
        self.set_state(CoordinatorState::Settled);

        let stats = outcome.result().map(|r| r.stats()).unwrap_or_default();
        let message = match &outcome {
            Outcome::Failure(Failure::Render(e)) => Some(e.to_string()),
            Outcome::Failure(Failure::AllPagesFailed(r)) => r.first_error().map(|e| e.to_string()),
            Outcome::Cancelled(r) => Some(format!("cancelled after {} pages", r.len())),
            Outcome::Success(_) | Outcome::PartialSuccess(_) => None,
        };
        info!(
            "Document {}: {:?} ({} succeeded, {} failed)",
            request_id,
            outcome.kind(),
            stats.succeeded,
            stats.failed
        );

        reporter.finish(TerminalEvent {
            request_id,
            outcome: outcome.kind(),
            total_pages: reporter.total(),
            succeeded: stats.succeeded,
            failed: stats.failed,
            message,
        });
        outcome
    }
}

/// A run that recorded every page settles on its page results, even if a
/// cancel arrived after the last page. Anything short of that was cancelled.
fn decide(mut aggregator: ResultAggregator) -> Result<Outcome, PipelineError> {
    if !aggregator.is_complete() {
        return Ok(Outcome::Cancelled(aggregator.into_recorded()));
    }
    let result = aggregator.collect()?;
    let stats = result.stats();
    Ok(if stats.failed == 0 {
        Outcome::Success(result)
    } else if stats.succeeded == 0 {
        Outcome::Failure(Failure::AllPagesFailed(result))
    } else {
        Outcome::PartialSuccess(result)
    })
}

//! Progress events for one request.
//!
//! Every request gets its own ordered event stream: zero or more
//! [`ProgressSnapshot`]s, one per page reaching a terminal status, followed by
//! exactly one [`TerminalEvent`]. The stream is written only by the
//! coordinator that owns the request, through a [`ProgressReporter`], so the
//! order a subscriber sees is the order the coordinator observed.
//!
//! Events serialise as JSON with a `type` tag, so a transport (WebSocket,
//! SSE, the CLI's `--events` mode) can forward them verbatim:
//!
//! ```json
//! {"type":"progress","currentPage":2,"totalPages":5,"percent":40.0,"pageIndex":3,"pageStatus":"done"}
//! {"type":"terminal","requestId":"…","outcome":"partial_success","totalPages":5,"succeeded":4,"failed":1,"message":null}
//! ```

use crate::document::DocumentId;
use crate::page::{PageStatus, PageUnit};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Progress after one more page settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Pages settled so far, counting this one. A completion count, not a
    /// page number.
    pub current_page: usize,
    /// Pages in the request. Always known by the time a snapshot is emitted.
    pub total_pages: Option<usize>,
    pub percent: Option<f64>,
    /// Index of the page whose transition produced this snapshot.
    pub page_index: usize,
    pub page_status: PageStatus,
}

/// Overall disposition of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    PartialSuccess,
    Failure,
    Cancelled,
}

/// The final event of a request's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalEvent {
    pub request_id: DocumentId,
    pub outcome: OutcomeKind,
    /// `None` when the document never finished rendering.
    pub total_pages: Option<usize>,
    pub succeeded: usize,
    pub failed: usize,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress(ProgressSnapshot),
    Terminal(TerminalEvent),
}

impl PipelineEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Terminal(_))
    }
}

/// Open a request's event channel.
pub fn channel() -> (EventSink, UnboundedReceiver<PipelineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx: Some(tx) }, rx)
}

/// Write end of a request's event channel.
///
/// Delivery is best effort: if the subscriber has gone away the event is
/// dropped and processing carries on.
#[derive(Debug)]
pub struct EventSink {
    tx: Option<UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    /// A sink nobody listens to.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, event: PipelineEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            debug!("Progress receiver gone, dropping {:?} event", kind(&e.0));
        }
    }

    /// Close the channel. Subscribers see the end of the stream after the
    /// events already sent.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

fn kind(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::Progress(_) => "progress",
        PipelineEvent::Terminal(_) => "terminal",
    }
}

/// Turns terminal page transitions into snapshots.
///
/// Owned by the coordinator's consumer loop; `&mut self` on every method
/// keeps emission totally ordered without a lock.
#[derive(Debug)]
pub struct ProgressReporter {
    sink: EventSink,
    total: Option<usize>,
    completed: usize,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(sink: EventSink) -> Self {
        Self {
            sink,
            total: None,
            completed: 0,
            finished: false,
        }
    }

    /// Record the page count once rendering has produced it. Nothing is
    /// emitted before this is called.
    pub fn set_total(&mut self, total: usize) {
        debug_assert!(self.total.is_none(), "total set twice");
        self.total = Some(total);
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Emit the snapshot for a unit that just settled.
    ///
    /// Returns `None`, emitting nothing, for a unit that is not terminal, or
    /// when the total is unknown or the stream already finished.
    pub fn on_unit_terminal(&mut self, unit: &PageUnit) -> Option<ProgressSnapshot> {
        let total = self.total?;
        if self.finished || !unit.is_terminal() || self.completed >= total {
            return None;
        }

        self.completed += 1;
        let snapshot = ProgressSnapshot {
            current_page: self.completed,
            total_pages: Some(total),
            percent: Some(self.completed as f64 / total as f64 * 100.0),
            page_index: unit.index(),
            page_status: unit.status(),
        };
        debug!(
            "Progress {}/{} (page {} {})",
            self.completed,
            total,
            unit.source_page(),
            unit.status()
        );
        self.sink.send(PipelineEvent::Progress(snapshot.clone()));
        Some(snapshot)
    }

    /// Emit the terminal event and close the stream. Only the first call
    /// has any effect; it returns whether the event was emitted.
    pub fn finish(&mut self, event: TerminalEvent) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.sink.send(PipelineEvent::Terminal(event));
        self.sink.close();
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

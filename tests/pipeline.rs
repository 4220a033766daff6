//! Pipeline behaviour against scripted collaborators.
//!
//! No pdfium and no network: the renderer fabricates one-pixel pages whose
//! PNG payload is the page index, and the extractors decide per index when
//! and how a page settles.

use async_trait::async_trait;
use edgequake_pdf2fields::{
    CoordinatorState, Document, EventStream, ExtractionError, Failure, FieldExtractor, Fields,
    Outcome, OutcomeKind, PageImage, PageRenderer, PageStatus, Pipeline, PipelineConfig,
    PipelineCoordinator, PipelineError, PipelineEvent, ProgressSnapshot, RenderError,
    TerminalEvent, PDF_MEDIA_TYPE,
};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

const PDF: &[u8] = b"%PDF-1.7\n%%EOF";

// ── Collaborators ────────────────────────────────────────────────────────────

struct Pages(usize);

impl PageRenderer for Pages {
    fn page_count(&self, _document: &Document) -> Result<usize, RenderError> {
        Ok(self.0)
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

fn index_of(image: &PageImage) -> usize {
    image.png[0] as usize
}

fn fields_for(index: usize) -> Fields {
    Fields {
        supplier_name: Some(format!("Supplier {index}")),
        total_payment: Some(100.0 * (index + 1) as f64),
        ..Fields::default()
    }
}

/// Settles pages after an index-dependent delay so completion order is
/// shuffled, failing the indices in `fail`.
struct Staggered {
    pages: usize,
    fail: HashSet<usize>,
}

#[async_trait]
impl FieldExtractor for Staggered {
    async fn extract(&self, image: &PageImage) -> Result<Fields, ExtractionError> {
        let index = index_of(image);
        let delay = ((self.pages - index) * 7 + (index % 3) * 5) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if self.fail.contains(&index) {
            Err(ExtractionError::Service(format!("HTTP 500 for page {index}")))
        } else {
            Ok(fields_for(index))
        }
    }
}

/// Holds every page until the test opens its gate.
struct Gated {
    gates: Vec<Arc<Notify>>,
}

impl Gated {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            gates: (0..pages).map(|_| Arc::new(Notify::new())).collect(),
        })
    }

    fn open(&self, index: usize) {
        self.gates[index].notify_one();
    }
}

#[async_trait]
impl FieldExtractor for Gated {
    async fn extract(&self, image: &PageImage) -> Result<Fields, ExtractionError> {
        let index = index_of(image);
        self.gates[index].notified().await;
        Ok(fields_for(index))
    }
}

fn config(concurrency: usize) -> PipelineConfig {
    assert_ok!(PipelineConfig::builder().concurrency(concurrency).build())
}

fn staggered(pages: usize, fail: &[usize], concurrency: usize) -> Pipeline {
    Pipeline::new(
        config(concurrency),
        Arc::new(Pages(pages)),
        Arc::new(Staggered {
            pages,
            fail: fail.iter().copied().collect(),
        }),
    )
}

/// Run one document to completion, collecting every event.
async fn run_to_end(pipeline: &Pipeline) -> (Vec<PipelineEvent>, Outcome) {
    let run = assert_ok!(pipeline.process(PDF.to_vec(), PDF_MEDIA_TYPE));
    let events: Vec<PipelineEvent> = pipeline
        .subscribe(&run.id())
        .expect("first subscriber")
        .collect()
        .await;
    let outcome = assert_ok!(run.wait().await);
    (events, outcome)
}

fn split(events: &[PipelineEvent]) -> (Vec<&ProgressSnapshot>, Vec<&TerminalEvent>) {
    let mut snapshots = Vec::new();
    let mut terminals = Vec::new();
    for event in events {
        match event {
            PipelineEvent::Progress(s) => snapshots.push(s),
            PipelineEvent::Terminal(t) => terminals.push(t),
        }
    }
    (snapshots, terminals)
}

async fn next_snapshot(events: &mut EventStream) -> ProgressSnapshot {
    match events.next().await {
        Some(PipelineEvent::Progress(s)) => s,
        other => panic!("expected a progress snapshot, got {other:?}"),
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_page_succeeds() {
    let (events, outcome) = run_to_end(&staggered(5, &[], 2)).await;

    assert_eq!(outcome.kind(), OutcomeKind::Success);
    let result = assert_ok!(outcome.into_result());
    assert_eq!(result.len(), 5);
    for (i, page) in result.pages.iter().enumerate() {
        assert_eq!(page.index, i);
        assert_eq!(page.page, i + 1);
        assert_eq!(page.fields(), Some(&fields_for(i)));
    }

    let (snapshots, terminals) = split(&events);
    assert_eq!(snapshots.len(), 5);
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].succeeded, 5);
    assert_eq!(terminals[0].failed, 0);
}

#[tokio::test]
async fn one_failed_page_is_partial_success() {
    let (events, outcome) = run_to_end(&staggered(4, &[2], 4)).await;

    assert_eq!(outcome.kind(), OutcomeKind::PartialSuccess);
    let result = outcome.result().expect("page results");
    assert_eq!(result.stats().succeeded, 3);
    assert!(result.pages[2].error().is_some());
    assert!(result.pages[3].is_done());

    let failed: Vec<usize> = split(&events)
        .0
        .iter()
        .filter(|s| s.page_status == PageStatus::Failed)
        .map(|s| s.page_index)
        .collect();
    assert_eq!(failed, vec![2]);

    // Strict access refuses anything short of full success.
    assert_err!(outcome.into_result());
}

#[tokio::test]
async fn every_page_failing_is_failure() {
    let (events, outcome) = run_to_end(&staggered(3, &[0, 1, 2], 2)).await;

    assert!(matches!(
        outcome,
        Outcome::Failure(Failure::AllPagesFailed(ref r)) if r.len() == 3
    ));
    let (_, terminals) = split(&events);
    assert_eq!(terminals[0].outcome, OutcomeKind::Failure);
    assert!(terminals[0]
        .message
        .as_deref()
        .is_some_and(|m| m.contains("HTTP 500")));
}

#[tokio::test]
async fn zero_page_document_fails_without_snapshots() {
    let (events, outcome) = run_to_end(&staggered(0, &[], 4)).await;

    assert!(matches!(
        outcome,
        Outcome::Failure(Failure::Render(RenderError::EmptyDocument))
    ));
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        PipelineEvent::Terminal(t) if t.outcome == OutcomeKind::Failure && t.total_pages.is_none()
    ));
}

#[tokio::test]
async fn rejected_upload_never_starts() {
    let pipeline = staggered(1, &[], 1);
    for (bytes, media_type) in [(PDF.to_vec(), "image/png"), (Vec::new(), PDF_MEDIA_TYPE)] {
        match pipeline.process(bytes, media_type) {
            Err(e) => assert!(e.is_rejection(), "got {e:?}"),
            Ok(run) => panic!("upload {} should be rejected", run.id()),
        }
    }
    assert!(pipeline.channels().is_empty());
}

// ── Progress stream ──────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_counts_up_to_total() {
    for concurrency in [1, 4] {
        let (events, _) = run_to_end(&staggered(6, &[4], concurrency)).await;
        let (snapshots, terminals) = split(&events);

        let counts: Vec<usize> = snapshots.iter().map(|s| s.current_page).collect();
        assert_eq!(counts, (1..=6).collect::<Vec<_>>(), "concurrency {concurrency}");
        assert!(snapshots.iter().all(|s| s.total_pages == Some(6)));
        assert_eq!(snapshots.last().and_then(|s| s.percent), Some(100.0));

        let mut seen: Vec<usize> = snapshots.iter().map(|s| s.page_index).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..6).collect::<Vec<_>>());

        assert_eq!(terminals.len(), 1);
        assert!(events.last().is_some_and(PipelineEvent::is_terminal));
    }
}

#[tokio::test]
async fn completion_order_does_not_change_result_order() {
    let gated = Gated::new(3);
    let pipeline = Pipeline::new(config(3), Arc::new(Pages(3)), gated.clone());
    let run = assert_ok!(pipeline.process(PDF.to_vec(), PDF_MEDIA_TYPE));
    let mut events = pipeline.subscribe(&run.id()).expect("first subscriber");

    for (expected_count, index) in [2, 0, 1].into_iter().enumerate() {
        gated.open(index);
        let s = next_snapshot(&mut events).await;
        assert_eq!(s.page_index, index);
        assert_eq!(s.current_page, expected_count + 1);
        assert_eq!(s.page_status, PageStatus::Done);
    }
    assert!(events.next().await.is_some_and(|e| e.is_terminal()));
    assert!(events.next().await.is_none());

    let result = assert_ok!(assert_ok!(run.wait().await).into_result());
    let suppliers: Vec<&str> = result
        .pages
        .iter()
        .filter_map(|p| p.fields()?.supplier_name.as_deref())
        .collect();
    assert_eq!(suppliers, vec!["Supplier 0", "Supplier 1", "Supplier 2"]);
}

#[tokio::test]
async fn late_subscriber_gets_nothing() {
    let pipeline = staggered(2, &[], 2);
    let run = assert_ok!(pipeline.process(PDF.to_vec(), PDF_MEDIA_TYPE));
    let id = run.id();
    assert_ok!(run.wait().await);
    assert!(pipeline.subscribe(&id).is_none());
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_keeps_settled_pages_only() {
    let gated = Gated::new(3);
    let pipeline = Pipeline::new(config(4), Arc::new(Pages(3)), gated.clone());
    let run = assert_ok!(pipeline.process(PDF.to_vec(), PDF_MEDIA_TYPE));
    let mut events = pipeline.subscribe(&run.id()).expect("first subscriber");

    gated.open(0);
    let s = next_snapshot(&mut events).await;
    assert_eq!(s.page_index, 0);

    run.cancel();
    match events.next().await {
        Some(PipelineEvent::Terminal(t)) => {
            assert_eq!(t.outcome, OutcomeKind::Cancelled);
            assert_eq!(t.succeeded, 1);
        }
        other => panic!("expected the terminal event, got {other:?}"),
    }
    assert!(events.next().await.is_none());

    let outcome = assert_ok!(run.wait().await);
    assert_eq!(outcome.kind(), OutcomeKind::Cancelled);
    let kept: Vec<usize> = outcome
        .result()
        .expect("partial result")
        .pages
        .iter()
        .map(|p| p.index)
        .collect();
    assert_eq!(kept, vec![0]);
}

// ── Coordinator reuse ────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_start_is_refused_and_first_run_continues() {
    let gated = Gated::new(2);
    let (sink, mut rx) = edgequake_pdf2fields::progress::channel();
    let coordinator = Arc::new(PipelineCoordinator::new(
        Arc::new(config(2)),
        Arc::new(Pages(2)),
        gated.clone(),
        sink,
    ));
    let document = || assert_ok!(Document::submit(PDF.to_vec(), PDF_MEDIA_TYPE, 1 << 20));

    let first = {
        let c = Arc::clone(&coordinator);
        let doc = document();
        tokio::spawn(async move { c.start(doc).await })
    };
    while coordinator.state() != CoordinatorState::Extracting {
        tokio::task::yield_now().await;
    }

    let err = assert_err!(coordinator.start(document()).await);
    assert!(matches!(err, PipelineError::AlreadyRunning { ref state } if state == "extracting"));

    gated.open(0);
    gated.open(1);
    let outcome = assert_ok!(assert_ok!(first.await));
    assert_eq!(outcome.kind(), OutcomeKind::Success);

    let mut terminals = 0;
    while let Some(event) = rx.recv().await {
        if event.is_terminal() {
            terminals += 1;
        }
    }
    assert_eq!(terminals, 1);
}

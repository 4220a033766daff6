//! The long-lived service: accept uploads, run them, hand out their progress.
//!
//! A [`Pipeline`] is cheap to clone and shared by every request. Each
//! [`Pipeline::start`] spawns one [`PipelineCoordinator`] and opens one
//! progress channel, registered under the document id until a subscriber
//! takes it. Requests never share state, so a client only ever sees events
//! for the document it submitted.

use crate::config::PipelineConfig;
use crate::coordinator::{CoordinatorState, PipelineCoordinator};
use crate::document::{Document, DocumentId};
use crate::error::PipelineError;
use crate::output::Outcome;
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::llm::VlmExtractor;
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::progress::{self, PipelineEvent};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info_span, Instrument};

/// Progress receivers waiting for their subscriber, keyed by request.
#[derive(Debug, Default)]
pub struct ProgressChannels {
    pending: Mutex<HashMap<DocumentId, UnboundedReceiver<PipelineEvent>>>,
}

impl ProgressChannels {
    fn register(&self, id: DocumentId, rx: UnboundedReceiver<PipelineEvent>) {
        self.lock().insert(id, rx);
    }

    /// Hand out the receiver. Each request has a single reader.
    fn take(&self, id: &DocumentId) -> Option<UnboundedReceiver<PipelineEvent>> {
        self.lock().remove(id)
    }

    fn evict(&self, id: &DocumentId) {
        if self.lock().remove(id).is_some() {
            debug!("Document {}: unclaimed progress channel evicted", id);
        }
    }

    /// Requests whose progress has not been claimed yet.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<DocumentId, UnboundedReceiver<PipelineEvent>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A request's progress events, from the first snapshot through the
/// terminal event. Ends after the terminal event.
#[derive(Debug)]
pub struct EventStream {
    inner: UnboundedReceiverStream<PipelineEvent>,
}

impl Stream for EventStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Document-processing service.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2fields::{Pipeline, PipelineConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::from_config(PipelineConfig::default())?;
/// let bytes = std::fs::read("invoice.pdf")?;
/// let run = pipeline.process(bytes, "application/pdf")?;
///
/// let mut events = pipeline.subscribe(&run.id()).expect("first subscriber");
/// while let Some(event) = events.next().await {
///     println!("{}", serde_json::to_string(&event)?);
/// }
/// let outcome = run.wait().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    renderer: Arc<dyn PageRenderer>,
    extractor: Arc<dyn FieldExtractor>,
    channels: Arc<ProgressChannels>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        renderer: Arc<dyn PageRenderer>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            renderer,
            extractor,
            channels: Arc::new(ProgressChannels::default()),
        }
    }

    /// pdfium rendering and a VLM extractor resolved from `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let renderer = PdfiumRenderer::new(
            config.dpi,
            config.max_rendered_pixels,
            config.password.clone(),
        );
        let extractor = VlmExtractor::from_config(&config)?;
        Ok(Self::new(config, Arc::new(renderer), Arc::new(extractor)))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn channels(&self) -> &ProgressChannels {
        &self.channels
    }

    /// Validate an upload. See [`Document::submit`].
    pub fn submit(&self, bytes: Vec<u8>, media_type: &str) -> Result<Document, PipelineError> {
        Document::submit(bytes, media_type, self.config.max_upload_bytes)
    }

    /// Spawn a coordinator for `document`. Must be called within a tokio
    /// runtime.
    pub fn start(&self, document: Document) -> RunHandle {
        let id = document.id();
        let (sink, rx) = progress::channel();
        self.channels.register(id, rx);

        let coordinator = Arc::new(PipelineCoordinator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.renderer),
            Arc::clone(&self.extractor),
            sink,
        ));
        let runner = Arc::clone(&coordinator);
        let task = tokio::spawn(
            async move { runner.start(document).await }
                .instrument(info_span!("request", id = %id)),
        );

        RunHandle {
            id,
            coordinator,
            task: Some(task),
            channels: Arc::clone(&self.channels),
        }
    }

    /// [`submit`](Self::submit) then [`start`](Self::start).
    pub fn process(&self, bytes: Vec<u8>, media_type: &str) -> Result<RunHandle, PipelineError> {
        let document = self.submit(bytes, media_type)?;
        Ok(self.start(document))
    }

    /// Take the progress stream of a running request.
    ///
    /// Returns `None` for an unknown id, once the stream has been taken, or
    /// after the request's [`RunHandle`] was awaited or dropped.
    pub fn subscribe(&self, id: &DocumentId) -> Option<EventStream> {
        self.channels.take(id).map(|rx| EventStream {
            inner: UnboundedReceiverStream::new(rx),
        })
    }
}

/// Handle to a spawned request.
///
/// Dropping the handle detaches the run; it keeps going, but its progress
/// channel is discarded if nobody has subscribed yet.
pub struct RunHandle {
    id: DocumentId,
    coordinator: Arc<PipelineCoordinator>,
    task: Option<JoinHandle<Result<Outcome, PipelineError>>>,
    channels: Arc<ProgressChannels>,
}

impl RunHandle {
    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn cancel(&self) {
        self.coordinator.cancel();
    }

    /// Wait for the request to settle.
    pub async fn wait(mut self) -> Result<Outcome, PipelineError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| PipelineError::Internal("run already awaited".into()))?;
        task.await
            .map_err(|e| PipelineError::Internal(format!("coordinator task failed: {e}")))?
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.channels.evict(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PDF_MEDIA_TYPE;
    use crate::error::{ExtractionError, RenderError};
    use crate::page::{Fields, PageImage};
    use crate::progress::OutcomeKind;
    use async_trait::async_trait;
    use futures::StreamExt;

    struct OnePage;

    impl PageRenderer for OnePage {
        fn page_count(&self, _document: &Document) -> Result<usize, RenderError> {
            Ok(1)
        }

        fn render_pages(
            &self,
            _document: &Document,
            indices: &[usize],
        ) -> Result<Vec<PageImage>, RenderError> {
            Ok(indices
                .iter()
                .map(|_| PageImage {
                    png: vec![0],
                    width: 1,
                    height: 1,
                })
                .collect())
        }
    }

    struct Empty;

    #[async_trait]
    impl FieldExtractor for Empty {
        async fn extract(&self, _image: &PageImage) -> Result<Fields, ExtractionError> {
            Ok(Fields::default())
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(PipelineConfig::default(), Arc::new(OnePage), Arc::new(Empty))
    }

    #[tokio::test]
    async fn single_subscriber_sees_whole_stream() {
        let pipeline = pipeline();
        let run = pipeline.process(b"%PDF-1.7".to_vec(), PDF_MEDIA_TYPE).unwrap();

        let events: Vec<PipelineEvent> = pipeline.subscribe(&run.id()).unwrap().collect().await;
        assert!(pipeline.subscribe(&run.id()).is_none());
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());

        let outcome = run.wait().await.unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Success);
    }

    #[tokio::test]
    async fn unclaimed_channel_is_evicted() {
        let pipeline = pipeline();
        let run = pipeline.process(b"%PDF-1.7".to_vec(), PDF_MEDIA_TYPE).unwrap();
        let id = run.id();
        assert_eq!(pipeline.channels().len(), 1);

        run.wait().await.unwrap();
        assert!(pipeline.channels().is_empty());
        assert!(pipeline.subscribe(&id).is_none());
    }

    #[tokio::test]
    async fn rejected_upload_opens_no_channel() {
        let pipeline = pipeline();
        let err = pipeline.process(Vec::new(), PDF_MEDIA_TYPE).err().unwrap();
        assert!(err.is_rejection());
        assert!(pipeline.channels().is_empty());
    }
}

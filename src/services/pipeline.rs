//! Takeoff orchestration pipeline.
//!
//! Drives fetch -> render -> scale resolution -> extraction. The streaming
//! entry point narrates progress over a channel of [`TakeoffEvent`]s and
//! guarantees exactly one terminal event (`complete` or `error`); the
//! synchronous entry point runs the identical sequence with emission
//! suppressed.

use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::domain::{
    BlueprintSource, MediaKind, RenderedPage, ScaleDetection, TakeoffItem, TakeoffRequest,
    TakeoffResult,
};
use crate::error::TakeoffError;
use crate::services::fetch::BlueprintFetcher;
use crate::services::render::PageRenderer;
use crate::services::scale_detector::detect_scale;
use crate::services::takeoff_agent;
use crate::services::vision::VisionModel;

/// Discrete events emitted over the streaming channel.
#[derive(Debug, Clone)]
pub enum TakeoffEvent {
    Progress {
        current: u32,
        total: u32,
        percentage: u32,
        message: String,
    },
    Info(Value),
    Scale(Value),
    Chunk {
        text: String,
    },
    Item(TakeoffItem),
    Complete(Value),
    Error {
        code: String,
        message: String,
    },
}

impl TakeoffEvent {
    fn progress(current: u32, message: impl Into<String>) -> Self {
        Self::Progress {
            current,
            total: 100,
            percentage: current,
            message: message.into(),
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Info(_) => "info",
            Self::Scale(_) => "scale",
            Self::Chunk { .. } => "chunk",
            Self::Item(_) => "item",
            Self::Complete(_) => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// JSON payload for the SSE data field.
    pub fn data(&self) -> String {
        let value = match self {
            Self::Progress {
                current,
                total,
                percentage,
                message,
            } => json!({
                "current": current,
                "total": total,
                "percentage": percentage,
                "message": message,
            }),
            Self::Info(value) | Self::Scale(value) | Self::Complete(value) => value.clone(),
            Self::Chunk { text } => json!({"text": text}),
            Self::Item(item) => serde_json::to_value(item).unwrap_or_default(),
            Self::Error { code, message } => json!({"code": code, "message": message}),
        };
        value.to_string()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error { .. })
    }
}

/// Why streaming stopped early.
enum StreamAbort {
    /// Receiver dropped; nobody is listening, stop quietly.
    Disconnected,
    Failed(TakeoffError),
}

impl From<TakeoffError> for StreamAbort {
    fn from(e: TakeoffError) -> Self {
        Self::Failed(e)
    }
}

/// Orchestrates one takeoff request end to end. Collaborators are injected
/// so tests can run the full sequence deterministically.
pub struct TakeoffPipeline {
    fetcher: Arc<dyn BlueprintFetcher>,
    renderer: Arc<dyn PageRenderer>,
    vision: Arc<dyn VisionModel>,
    analysis_dpi: f32,
    scale_detection_dpi: f32,
}

impl TakeoffPipeline {
    pub fn new(
        fetcher: Arc<dyn BlueprintFetcher>,
        renderer: Arc<dyn PageRenderer>,
        vision: Arc<dyn VisionModel>,
        settings: &Settings,
    ) -> Self {
        Self {
            fetcher,
            renderer,
            vision,
            analysis_dpi: settings.analysis_dpi,
            scale_detection_dpi: settings.scale_detection_dpi,
        }
    }

    /// Synchronous path: run the full stage sequence, return only the final
    /// result.
    pub async fn run(&self, request: &TakeoffRequest) -> Result<TakeoffResult, TakeoffError> {
        request.validate()?;

        let source = self.fetcher.fetch(&request.blueprint_url).await?;
        let (pages, media_type) = self.prepare_pages(&source, self.analysis_dpi).await?;
        let (scale, _detection) = self.resolve_scale(request, &pages, media_type).await;

        takeoff_agent::extract(
            self.vision.as_ref(),
            &pages,
            media_type,
            scale,
            request.focus_areas.clone(),
            None,
        )
        .await
    }

    /// Streaming path: identical stage sequence, narrated over `tx`. Always
    /// terminates the stream with exactly one `complete` or `error` event.
    /// A disconnected receiver stops emission without failing anything.
    pub async fn run_streaming(&self, request: TakeoffRequest, tx: UnboundedSender<TakeoffEvent>) {
        match self.stream_inner(&request, &tx).await {
            Ok(()) => {}
            Err(StreamAbort::Disconnected) => {
                debug!("Client disconnected, stopping event emission");
            }
            Err(StreamAbort::Failed(e)) => {
                warn!(error = %e, "Streaming takeoff failed");
                // Diagnostic clients get the raw failure text here
                tx.unbounded_send(TakeoffEvent::Error {
                    code: "ERROR".to_string(),
                    message: e.to_string(),
                })
                .ok();
            }
        }
    }

    async fn stream_inner(
        &self,
        request: &TakeoffRequest,
        tx: &UnboundedSender<TakeoffEvent>,
    ) -> Result<(), StreamAbort> {
        request.validate()?;

        emit(tx, TakeoffEvent::progress(0, "Fetching blueprint..."))?;
        let source = self.fetcher.fetch(&request.blueprint_url).await?;
        emit(tx, TakeoffEvent::progress(10, "Blueprint loaded"))?;

        if source.kind.is_pdf() {
            let info = {
                let renderer = Arc::clone(&self.renderer);
                let bytes = source.bytes.clone();
                tokio::task::spawn_blocking(move || renderer.info(&bytes))
                    .await
                    .map_err(|e| TakeoffError::Decode(format!("render task failed: {e}")))??
            };
            emit(
                tx,
                TakeoffEvent::Info(json!({"type": "pdf", "page_count": info.page_count})),
            )?;
            emit(tx, TakeoffEvent::progress(15, "Converting pages to images..."))?;
        } else {
            let info = match source.kind {
                MediaKind::Png | MediaKind::Jpeg => json!({"type": "image", "page_count": 1}),
                _ => json!({"type": "unknown", "size": source.size()}),
            };
            emit(tx, TakeoffEvent::Info(info))?;
        }

        let (pages, media_type) = self.prepare_pages(&source, self.analysis_dpi).await?;
        emit(
            tx,
            TakeoffEvent::progress(25, format!("Processing {} page(s)", pages.len())),
        )?;

        // Scale resolution: explicit scale short-circuits, inference failure
        // degrades to "no scale"
        let scale = if let Some(explicit) = &request.scale {
            Some(explicit.clone())
        } else if request.auto_detect_scale && !pages.is_empty() {
            emit(tx, TakeoffEvent::progress(30, "Detecting scale..."))?;
            let (scale, detection) = self.resolve_scale(request, &pages, media_type).await;
            if let Some(detection) = detection {
                let payload = match (&detection.scale_info, detection.detected) {
                    (Some(info), true) => json!({
                        "detected": true,
                        "scale": info.scale_string,
                        "confidence": info.confidence,
                        "reasoning": detection.reasoning,
                    }),
                    _ => json!({
                        "detected": false,
                        "reasoning": detection.reasoning,
                    }),
                };
                emit(tx, TakeoffEvent::Scale(payload))?;
            }
            scale
        } else {
            None
        };

        emit(tx, TakeoffEvent::progress(40, "Analyzing blueprint..."))?;
        emit(tx, TakeoffEvent::progress(50, "AI analyzing..."))?;

        // Forward partial model text as chunk events while extraction runs
        let (chunk_tx, mut chunk_rx) = futures::channel::mpsc::unbounded::<String>();
        let forward_tx = tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(text) = chunk_rx.next().await {
                if forward_tx
                    .unbounded_send(TakeoffEvent::Chunk { text })
                    .is_err()
                {
                    break;
                }
            }
        });

        let extraction = takeoff_agent::extract(
            self.vision.as_ref(),
            &pages,
            media_type,
            scale,
            request.focus_areas.clone(),
            Some(chunk_tx),
        )
        .await;
        forwarder.await.ok();
        let result = extraction?;

        emit(tx, TakeoffEvent::progress(90, "Finalizing results..."))?;

        // Re-emit every item so item-only clients reconstruct the full set
        for item in &result.items {
            emit(tx, TakeoffEvent::Item(item.clone()))?;
        }

        emit(tx, TakeoffEvent::progress(100, "Complete"))?;
        emit(
            tx,
            TakeoffEvent::Complete(json!({
                "total_items": result.items.len(),
                "summary": result.summary,
                "notes": result.notes,
                "scale_used": result.scale_used,
            })),
        )?;

        Ok(())
    }

    /// Standalone scale detection for `/takeoff/detect-scale`.
    pub async fn detect_scale_from_url(&self, url: &str) -> Result<ScaleDetection, TakeoffError> {
        if url.trim().is_empty() {
            return Err(TakeoffError::Validation(
                "blueprint_url is required".to_string(),
            ));
        }

        let source = self.fetcher.fetch(url).await?;
        // Higher density helps reading small title-block text
        let (pages, media_type) = self.prepare_pages(&source, self.scale_detection_dpi).await?;
        let first = pages
            .first()
            .ok_or_else(|| TakeoffError::Decode("blueprint has no pages".to_string()))?;

        detect_scale(self.vision.as_ref(), &first.png, media_type).await
    }

    /// Normalize the source into page images: PDFs are rasterised off the
    /// async runtime, anything else passes through as a single page.
    async fn prepare_pages(
        &self,
        source: &BlueprintSource,
        dpi: f32,
    ) -> Result<(Vec<RenderedPage>, &'static str), TakeoffError> {
        if source.kind.is_pdf() {
            let renderer = Arc::clone(&self.renderer);
            let bytes = source.bytes.clone();
            let pages = tokio::task::spawn_blocking(move || renderer.render(&bytes, dpi))
                .await
                .map_err(|e| TakeoffError::Decode(format!("render task failed: {e}")))??;
            Ok((pages, "image/png"))
        } else {
            let page = RenderedPage {
                png: source.bytes.clone(),
                number: 1,
                width_px: None,
                height_px: None,
            };
            Ok((vec![page], source.kind.mime()))
        }
    }

    /// Resolve the scale to use. Explicit scale wins and skips inference
    /// entirely; inference failure degrades to no scale.
    async fn resolve_scale(
        &self,
        request: &TakeoffRequest,
        pages: &[RenderedPage],
        media_type: &'static str,
    ) -> (Option<String>, Option<ScaleDetection>) {
        if let Some(explicit) = &request.scale {
            return (Some(explicit.clone()), None);
        }
        if !request.auto_detect_scale || pages.is_empty() {
            return (None, None);
        }

        match detect_scale(self.vision.as_ref(), &pages[0].png, media_type).await {
            Ok(detection) => {
                let scale = detection
                    .detected
                    .then(|| detection.scale_info.as_ref().map(|i| i.scale_string.clone()))
                    .flatten();
                (scale, Some(detection))
            }
            Err(e) => {
                warn!(error = %e, "Scale detection failed, continuing without scale");
                (
                    None,
                    Some(ScaleDetection {
                        detected: false,
                        scale_info: None,
                        reasoning: "Scale detection was inconclusive".to_string(),
                    }),
                )
            }
        }
    }
}

fn emit(tx: &UnboundedSender<TakeoffEvent>, event: TakeoffEvent) -> Result<(), StreamAbort> {
    tx.unbounded_send(event)
        .map_err(|_| StreamAbort::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PdfInfo;
    use crate::services::tools::ToolRegistry;
    use crate::services::vision::{VisionModel, VisionPrompt};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    // Deterministic collaborators

    struct StubFetcher {
        bytes: Vec<u8>,
    }

    #[async_trait]
    impl BlueprintFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> Result<BlueprintSource, TakeoffError> {
            Ok(BlueprintSource::new(self.bytes.clone()))
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl BlueprintFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> Result<BlueprintSource, TakeoffError> {
            Err(TakeoffError::Fetch("connection refused".into()))
        }
    }

    /// Renders a fixed page count, recording the DPI it was asked for.
    struct StubRenderer {
        page_count: usize,
        fail: bool,
        dpi_seen: Mutex<Vec<u32>>,
        render_calls: AtomicUsize,
    }

    impl StubRenderer {
        fn pages(page_count: usize) -> Self {
            Self {
                page_count,
                fail: false,
                dpi_seen: Mutex::new(Vec::new()),
                render_calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                page_count: 0,
                fail: true,
                dpi_seen: Mutex::new(Vec::new()),
                render_calls: AtomicUsize::new(0),
            }
        }
    }

    impl PageRenderer for StubRenderer {
        fn render(&self, _pdf: &[u8], dpi: f32) -> Result<Vec<RenderedPage>, TakeoffError> {
            self.render_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TakeoffError::Decode("failed to open PDF".into()));
            }
            self.dpi_seen.lock().unwrap().push(dpi as u32);
            Ok((1..=self.page_count)
                .map(|number| RenderedPage {
                    png: format!("page-{number}").into_bytes(),
                    number,
                    width_px: Some(800),
                    height_px: Some(600),
                })
                .collect())
        }

        fn info(&self, _pdf: &[u8]) -> Result<PdfInfo, TakeoffError> {
            if self.fail {
                return Err(TakeoffError::Decode("failed to open PDF".into()));
            }
            Ok(PdfInfo {
                page_count: self.page_count,
                width: 612,
                height: 792,
            })
        }
    }

    /// Answers by output schema: scale detections and takeoff results are
    /// distinguished by the prompt's schema name.
    struct StubVision {
        scale_output: Value,
        takeoff_output: Value,
        fail_extraction: bool,
        fail_scale: bool,
        scale_calls: AtomicUsize,
        extract_calls: AtomicUsize,
    }

    impl StubVision {
        fn new() -> Self {
            Self {
                scale_output: json!({
                    "detected": true,
                    "scale_info": {
                        "scale_string": "1/8\" = 1'-0\"",
                        "confidence": 0.85,
                        "source": "auto"
                    },
                    "reasoning": "notation in title block"
                }),
                takeoff_output: json!({
                    "items": [
                        {"name": "Interior Door", "category": "count", "quantity": 12.0, "unit": "ea", "confidence": 0.95},
                        {"name": "Exterior Wall", "category": "linear", "quantity": 850.0, "unit": "LF", "confidence": 0.8}
                    ],
                    "summary": {"total_doors": 12.0, "total_wall_lf": 850.0},
                    "notes": ["clear drawing"],
                    "scale_used": null,
                    "page_count": 1
                }),
                fail_extraction: false,
                fail_scale: false,
                scale_calls: AtomicUsize::new(0),
                extract_calls: AtomicUsize::new(0),
            }
        }

        fn answer(&self, prompt: &VisionPrompt) -> Result<Value, TakeoffError> {
            match prompt.schema_name {
                "scale_detection" => {
                    self.scale_calls.fetch_add(1, Ordering::SeqCst);
                    if self.fail_scale {
                        Err(TakeoffError::Inference("model unreachable".into()))
                    } else {
                        Ok(self.scale_output.clone())
                    }
                }
                "takeoff_result" => {
                    self.extract_calls.fetch_add(1, Ordering::SeqCst);
                    if self.fail_extraction {
                        Err(TakeoffError::Inference("model unreachable".into()))
                    } else {
                        Ok(self.takeoff_output.clone())
                    }
                }
                other => panic!("unexpected schema {other}"),
            }
        }
    }

    #[async_trait]
    impl VisionModel for StubVision {
        async fn submit(
            &self,
            prompt: VisionPrompt,
            _tools: &ToolRegistry,
        ) -> Result<Value, TakeoffError> {
            self.answer(&prompt)
        }

        async fn submit_stream(
            &self,
            prompt: VisionPrompt,
            _tools: &ToolRegistry,
            chunks: UnboundedSender<String>,
        ) -> Result<Value, TakeoffError> {
            chunks.unbounded_send("Counting doors...".to_string()).ok();
            self.answer(&prompt)
        }
    }

    fn settings() -> Settings {
        Settings {
            env: crate::config::Environment::Dev,
            server_addr: "127.0.0.1:0".into(),
            cors_allow_origins: vec![],
            ai_base_url: "https://example.invalid/v1".into(),
            ai_api_key: Some("test".into()),
            ai_model: "gpt-4o".into(),
            ai_timeout_seconds: 5,
            fetch_timeout_seconds: 5,
            analysis_dpi: 150.0,
            scale_detection_dpi: 200.0,
        }
    }

    fn pipeline_with(
        fetcher: Arc<dyn BlueprintFetcher>,
        renderer: Arc<StubRenderer>,
        vision: Arc<StubVision>,
    ) -> TakeoffPipeline {
        TakeoffPipeline::new(fetcher, renderer, vision, &settings())
    }

    fn pdf_request(scale: Option<&str>, auto: bool) -> TakeoffRequest {
        TakeoffRequest {
            blueprint_url: "https://example.com/plan.pdf".into(),
            scale: scale.map(String::from),
            auto_detect_scale: auto,
            focus_areas: None,
        }
    }

    async fn collect_events(
        pipeline: &TakeoffPipeline,
        request: TakeoffRequest,
    ) -> Vec<TakeoffEvent> {
        let (tx, mut rx) = futures::channel::mpsc::unbounded();
        pipeline.run_streaming(request, tx).await;
        let mut events = Vec::new();
        while let Ok(Some(event)) = rx.try_next() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn explicit_scale_skips_inference_and_is_used_verbatim() {
        // Scenario A: 3-page PDF with a manual scale override
        let vision = Arc::new(StubVision::new());
        let renderer = Arc::new(StubRenderer::pages(3));
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7 three pages".to_vec(),
            }),
            Arc::clone(&renderer),
            Arc::clone(&vision),
        );

        let result = pipeline
            .run(&pdf_request(Some("1/4\" = 1'-0\""), true))
            .await
            .unwrap();

        assert_eq!(vision.scale_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.page_count, 3);
        assert_eq!(result.scale_used.as_deref(), Some("1/4\" = 1'-0\""));
        assert_eq!(*renderer.dpi_seen.lock().unwrap(), vec![150]);
    }

    #[tokio::test]
    async fn auto_detect_disabled_yields_no_scale() {
        let vision = Arc::new(StubVision::new());
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(1)),
            Arc::clone(&vision),
        );

        let result = pipeline.run(&pdf_request(None, false)).await.unwrap();

        assert_eq!(vision.scale_calls.load(Ordering::SeqCst), 0);
        assert!(result.scale_used.is_none());
    }

    #[tokio::test]
    async fn auto_detect_resolves_scale_from_the_first_page() {
        let vision = Arc::new(StubVision::new());
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(2)),
            Arc::clone(&vision),
        );

        let result = pipeline.run(&pdf_request(None, true)).await.unwrap();

        assert_eq!(vision.scale_calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.scale_used.as_deref(), Some("1/8\" = 1'-0\""));
    }

    #[tokio::test]
    async fn scale_inference_failure_degrades_to_no_scale() {
        let mut vision = StubVision::new();
        vision.fail_scale = true;
        let vision = Arc::new(vision);
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(1)),
            Arc::clone(&vision),
        );

        let result = pipeline.run(&pdf_request(None, true)).await.unwrap();

        assert_eq!(vision.scale_calls.load(Ordering::SeqCst), 1);
        assert_eq!(vision.extract_calls.load(Ordering::SeqCst), 1);
        assert!(result.scale_used.is_none());
    }

    #[tokio::test]
    async fn raster_input_passes_through_without_rendering() {
        let vision = Arc::new(StubVision::new());
        let renderer = Arc::new(StubRenderer::pages(5));
        let mut png = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(b"raster payload");

        let pipeline = pipeline_with(
            Arc::new(StubFetcher { bytes: png }),
            Arc::clone(&renderer),
            Arc::clone(&vision),
        );

        let result = pipeline.run(&pdf_request(None, false)).await.unwrap();

        assert_eq!(renderer.render_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.page_count, 1);
    }

    #[tokio::test]
    async fn malformed_pdf_is_a_fatal_decode_error() {
        // Scenario B: fetch succeeds, decoding fails
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-corrupted".to_vec(),
            }),
            Arc::new(StubRenderer::failing()),
            Arc::new(StubVision::new()),
        );

        let err = pipeline.run(&pdf_request(None, true)).await.unwrap_err();
        assert!(matches!(err, TakeoffError::Decode(_)));
    }

    #[tokio::test]
    async fn fetch_failure_propagates_as_fetch_error() {
        let pipeline = pipeline_with(
            Arc::new(FailingFetcher),
            Arc::new(StubRenderer::pages(1)),
            Arc::new(StubVision::new()),
        );

        let err = pipeline.run(&pdf_request(None, true)).await.unwrap_err();
        assert!(matches!(err, TakeoffError::Fetch(_)));
    }

    #[tokio::test]
    async fn identical_requests_yield_byte_identical_results() {
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(2)),
            Arc::new(StubVision::new()),
        );

        let request = pdf_request(None, true);
        let a = pipeline.run(&request).await.unwrap();
        let b = pipeline.run(&request).await.unwrap();

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn streaming_narrates_stages_and_terminates_with_complete() {
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(2)),
            Arc::new(StubVision::new()),
        );

        let events = collect_events(&pipeline, pdf_request(None, true)).await;

        // Starts with progress 0
        match &events[0] {
            TakeoffEvent::Progress { percentage, .. } => assert_eq!(*percentage, 0),
            other => panic!("expected initial progress, got {other:?}"),
        }

        // Progress percentages never decrease
        let percentages: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TakeoffEvent::Progress { percentage, .. } => Some(*percentage),
                _ => None,
            })
            .collect();
        assert!(percentages.windows(2).all(|w| w[0] <= w[1]));

        // Exactly one terminal event, and it is complete
        let terminals: Vec<&TakeoffEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].name(), "complete");
        assert!(events.last().unwrap().is_terminal());

        // Every item is re-emitted before the completion event
        let item_count = events.iter().filter(|e| e.name() == "item").count();
        assert_eq!(item_count, 2);
        let last_item = events.iter().rposition(|e| e.name() == "item").unwrap();
        let complete = events.iter().position(|e| e.name() == "complete").unwrap();
        assert!(last_item < complete);

        // Stage events arrived in order
        let scale_pos = events.iter().position(|e| e.name() == "scale").unwrap();
        let info_pos = events.iter().position(|e| e.name() == "info").unwrap();
        assert!(info_pos < scale_pos && scale_pos < last_item);

        // Best-effort chunk made it through
        assert!(events.iter().any(|e| e.name() == "chunk"));

        // Complete payload carries the summary
        match terminals[0] {
            TakeoffEvent::Complete(value) => {
                assert_eq!(value["total_items"], json!(2));
                assert_eq!(value["summary"]["total_doors"], json!(12.0));
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn streaming_failure_emits_exactly_one_error_event() {
        let mut vision = StubVision::new();
        vision.fail_extraction = true;
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(1)),
            Arc::new(vision),
        );

        let events = collect_events(&pipeline, pdf_request(None, false)).await;

        let terminals: Vec<&TakeoffEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].name(), "error");
        assert!(events.last().unwrap().is_terminal());
        assert!(!events.iter().any(|e| e.name() == "item"));
    }

    #[tokio::test]
    async fn streaming_fetch_failure_still_terminates_once() {
        let pipeline = pipeline_with(
            Arc::new(FailingFetcher),
            Arc::new(StubRenderer::pages(1)),
            Arc::new(StubVision::new()),
        );

        let events = collect_events(&pipeline, pdf_request(None, true)).await;

        // First progress already went out, then exactly one terminal error
        assert_eq!(events[0].name(), "progress");
        let terminals: Vec<&TakeoffEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].name(), "error");
    }

    #[tokio::test]
    async fn streaming_stops_quietly_when_client_disconnects() {
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::new(StubRenderer::pages(1)),
            Arc::new(StubVision::new()),
        );

        let (tx, rx) = futures::channel::mpsc::unbounded();
        drop(rx);
        // Must not panic or hang
        pipeline.run_streaming(pdf_request(None, true), tx).await;
    }

    #[tokio::test]
    async fn detect_scale_renders_pdfs_at_the_hotter_density() {
        let vision = Arc::new(StubVision::new());
        let renderer = Arc::new(StubRenderer::pages(2));
        let pipeline = pipeline_with(
            Arc::new(StubFetcher {
                bytes: b"%PDF-1.7".to_vec(),
            }),
            Arc::clone(&renderer),
            Arc::clone(&vision),
        );

        let detection = pipeline
            .detect_scale_from_url("https://example.com/plan.pdf")
            .await
            .unwrap();

        assert!(detection.detected);
        assert_eq!(*renderer.dpi_seen.lock().unwrap(), vec![200]);
        assert_eq!(vision.scale_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_request_fails_before_any_stage_runs() {
        let vision = Arc::new(StubVision::new());
        let pipeline = pipeline_with(
            Arc::new(FailingFetcher),
            Arc::new(StubRenderer::pages(1)),
            Arc::clone(&vision),
        );

        let request = TakeoffRequest {
            blueprint_url: "".into(),
            scale: None,
            auto_detect_scale: true,
            focus_areas: None,
        };
        let err = pipeline.run(&request).await.unwrap_err();
        assert!(matches!(err, TakeoffError::Validation(_)));
        assert_eq!(vision.scale_calls.load(Ordering::SeqCst), 0);
    }
}

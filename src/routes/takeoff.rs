use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::domain::{ScaleInfo, TakeoffRequest, TakeoffResult};
use crate::error::TakeoffError;

/// Run a full takeoff and return the complete result.
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TakeoffRequest>,
) -> Result<Json<TakeoffResult>, TakeoffError> {
    info!(url = %request.blueprint_url, "Takeoff analysis requested");
    let result = state.pipeline.run(&request).await?;
    Ok(Json(result))
}

/// Run a takeoff with progress streamed as server-sent events.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TakeoffRequest>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    info!(url = %request.blueprint_url, "Streaming takeoff requested");

    let (tx, rx) = futures::channel::mpsc::unbounded();
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        pipeline.run_streaming(request, tx).await;
    });

    let events = rx.map(|event| {
        Ok(Event::default()
            .event(event.name())
            .data(event.data()))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
pub struct DetectScaleParams {
    pub blueprint_url: String,
}

#[derive(Serialize)]
pub struct DetectScaleResponse {
    pub detected: bool,
    pub scale: Option<ScaleInfo>,
    pub reasoning: String,
}

/// Detect the drawing scale without running a full takeoff.
pub async fn detect_scale(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DetectScaleParams>,
) -> Result<Json<DetectScaleResponse>, TakeoffError> {
    info!(url = %params.blueprint_url, "Scale detection requested");
    let detection = state
        .pipeline
        .detect_scale_from_url(&params.blueprint_url)
        .await?;

    Ok(Json(DetectScaleResponse {
        detected: detection.detected,
        scale: detection.scale_info,
        reasoning: detection.reasoning,
    }))
}

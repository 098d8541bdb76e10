pub mod health;
pub mod takeoff;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        // Takeoff
        .route("/takeoff/analyze", post(takeoff::analyze))
        .route("/takeoff/stream", post(takeoff::stream))
        .route("/takeoff/detect-scale", post(takeoff::detect_scale))
}

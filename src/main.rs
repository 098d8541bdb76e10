mod app;
mod config;
mod domain;
mod error;
mod logging;
mod middleware;
mod routes;
mod services;

use anyhow::Result;
use std::sync::Arc;

use services::{HttpBlueprintFetcher, OpenAiVisionClient, PdfiumRenderer, TakeoffPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        "Starting Layerwise backend"
    );

    if !settings.ai_configured() {
        tracing::warn!("No AI API key found. Set AI_API_KEY to enable blueprint analysis");
    }

    // Vision model client (OpenAI-compatible chat completions)
    let vision = OpenAiVisionClient::new(
        &settings.ai_base_url,
        settings.ai_api_key.as_deref(),
        &settings.ai_model,
        settings.ai_timeout_seconds,
    )?;

    // Takeoff pipeline: fetch -> render -> scale -> extract
    let pipeline = TakeoffPipeline::new(
        Arc::new(HttpBlueprintFetcher::new(settings.fetch_timeout_seconds)?),
        Arc::new(PdfiumRenderer),
        Arc::new(vision),
        &settings,
    );

    // Create application state
    let state = app::AppState::new(settings.clone(), pipeline);

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

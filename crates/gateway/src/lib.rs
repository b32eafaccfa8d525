//! HTTP gateway for CABM.
//!
//! Exposes the chat turn over HTTP:
//! - `GET  /health`            liveness and the active model
//! - `POST /api/chat/stream`   one turn as an SSE stream ending in `[DONE]`
//! - `POST /api/chat`          one turn, events collected into a JSON body
//! - `POST /api/clear`         wipe the chat history
//!
//! Built on Axum.

pub mod chat;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use cabm_agent::{CompletionOptionGenerator, Orchestrator, TurnSettings};
use cabm_config::AppConfig;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with every route.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat::chat_handler))
        .route("/api/chat/stream", post(chat::chat_stream_handler))
        .route("/api/clear", post(chat::clear_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Wire provider, tools, history and option generator from configuration.
pub fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let selection = cabm_providers::build_from_config(config)?;
    let history = cabm_history::open_from_config(&config.history)?;
    let tools = Arc::new(cabm_tools::default_registry());

    let mut orchestrator = Orchestrator::new(
        selection.provider.clone(),
        tools,
        history,
        selection.model.clone(),
    )
    .with_character(config.character.to_character())
    .with_settings(TurnSettings::from(&config.agent))
    .with_temperature(config.default_temperature)
    .with_max_tokens(config.default_max_tokens);

    if config.agent.suggest_options {
        orchestrator = orchestrator.with_options(Arc::new(CompletionOptionGenerator::new(
            selection.provider,
            selection.model,
        )));
    }

    Ok(orchestrator)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let orchestrator = build_orchestrator(&config)?;
    info!(
        addr = %addr,
        provider = orchestrator.provider_name(),
        model = orchestrator.model(),
        "Gateway starting"
    );
    let app = build_router(Arc::new(GatewayState { orchestrator }));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    model: String,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.orchestrator.provider_name().to_string(),
        model: state.orchestrator.model().to_string(),
    })
}

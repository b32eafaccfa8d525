//! Chat routes.
//!
//! The streaming route writes one SSE `data:` line per turn event, in the
//! order the orchestrator produced them. A client that disconnects drops
//! the event receiver, which cancels the turn.

use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        Json,
        sse::{Event as SseEvent, Sse},
    },
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use cabm_agent::{TurnEvent, TurnOutcome};

use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Overrides `agent.tools_enabled_by_default` for this turn.
    #[serde(default, alias = "mcp_enabled")]
    pub tools_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub events: Vec<TurnEvent>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            error: error.to_string(),
        }),
    )
}

fn validate(payload: &ChatRequest) -> Result<(), ApiError> {
    if payload.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    Ok(())
}

/// `POST /api/chat/stream`
pub async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    validate(&payload)?;
    info!(tools = ?payload.tools_enabled, "Chat stream request");

    let turn = state
        .orchestrator
        .turn(payload.message, payload.tools_enabled);
    let rx = state.orchestrator.run_stream(turn);

    let stream = ReceiverStream::new(rx).map(|event| Ok(SseEvent::default().data(event.sse_data())));

    Ok(Sse::new(stream))
}

/// `POST /api/chat`: the same turn, collected.
pub async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), ApiError> {
    validate(&payload)?;
    info!(tools = ?payload.tools_enabled, "Chat request");

    let turn = state
        .orchestrator
        .turn(payload.message, payload.tools_enabled);
    let transcript = state.orchestrator.run_collect(turn).await;

    let (status, success, message, error) = match transcript.report.outcome {
        TurnOutcome::Finalized { content } => (StatusCode::OK, true, Some(content), None),
        TurnOutcome::LimitReached => (StatusCode::OK, true, None, None),
        TurnOutcome::Failed(e) => (StatusCode::BAD_GATEWAY, false, None, Some(e)),
        TurnOutcome::Cancelled => (
            StatusCode::INTERNAL_SERVER_ERROR,
            false,
            None,
            Some("turn cancelled".to_string()),
        ),
    };

    Ok((
        status,
        Json(ChatResponse {
            success,
            message,
            error,
            events: transcript.events,
        }),
    ))
}

/// `POST /api/clear`
pub async fn clear_handler(
    State(state): State<SharedState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.orchestrator.history().clear().await {
        Ok(()) => {
            info!("Chat history cleared");
            Ok(Json(serde_json::json!({
                "success": true,
                "message": "History cleared",
            })))
        }
        Err(e) => {
            warn!(error = %e, "Failed to clear history");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    success: false,
                    error: e.to_string(),
                }),
            ))
        }
    }
}

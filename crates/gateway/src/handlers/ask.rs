//! Ask handlers
//!
//! One-shot answering and the SSE streaming variant. Both run the same
//! pipeline; the streaming handler forwards the producer task's chunks as
//! SSE data events.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use validator::Validate;

use crate::AppState;
use answerforge_common::{
    errors::{AppError, Result},
    metrics,
};
use tokio_stream::StreamExt;

/// Ask request
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000))]
    pub query: String,

    /// Session scope; omitted requests share the default thread
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// Ask response
#[derive(Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub route: String,
    pub strategy: String,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_rate: Option<f64>,
    pub processing_time_ms: u64,
}

/// Answer a question in one shot
pub async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let request_metrics = metrics::RequestMetrics::start("POST", "/v2/ask");

    let outcome = state
        .pipeline
        .ask(&request.query, request.thread_id.as_deref())
        .await;

    tracing::info!(
        query = %request.query,
        strategy = %outcome.strategy,
        route = outcome.route.as_str(),
        cached = outcome.cached,
        latency_ms = outcome.processing_time_ms,
        "Ask completed"
    );
    request_metrics.finish(200);

    Ok(Json(AskResponse {
        answer: outcome.answer,
        route: outcome.route.as_str().to_string(),
        strategy: outcome.strategy.as_str().to_string(),
        cached: outcome.cached,
        match_rate: outcome.match_rate,
        processing_time_ms: outcome.processing_time_ms,
    }))
}

/// Answer a question as a server-sent event stream
pub async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    tracing::info!(query = %request.query, "Ask stream started");

    let chunks = state
        .pipeline
        .ask_stream(request.query, request.thread_id);
    let events = chunks.map(|chunk| Ok(Event::default().data(chunk)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

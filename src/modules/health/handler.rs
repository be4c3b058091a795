use axum::{extract::State, http::StatusCode, response::Response};
use serde::Serialize;

use crate::common::response::Envelope;
use crate::infrastructure::queue::QueueDepth;
use crate::orchestrator::LifecycleState;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub lifecycle: LifecycleState,
    pub queue: QueueDepth,
}

/// Liveness check
pub async fn health() -> &'static str {
    "ok"
}

/// Lifecycle state and queue depth
pub async fn status(State(state): State<AppState>) -> Response {
    let lifecycle = state.lifecycle();
    match state.queue.depth().await {
        Ok(queue) => Envelope::ok(StatusReport { lifecycle, queue }, "Status retrieved successfully")
            .into_response_with(StatusCode::OK),
        Err(e) => Envelope::error(e.to_string()).into_response_with(StatusCode::SERVICE_UNAVAILABLE),
    }
}

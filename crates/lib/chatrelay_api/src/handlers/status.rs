//! Status endpoint — service liveness for widget embedders.

use axum::Json;
use axum::extract::State;
use chatrelay_core::pipeline::StatusReport;

use crate::AppState;

/// `GET /api/chat` — reports service name, version and whether a key is required.
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.pipeline.status())
}

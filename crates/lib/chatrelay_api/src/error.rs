//! Response mapping for pipeline outcomes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chatrelay_core::pipeline::ChatOutcome;

/// A finished chat request, rendered as its HTTP response.
#[derive(Debug)]
pub struct ChatResponse(pub ChatOutcome);

impl IntoResponse for ChatResponse {
    fn into_response(self) -> Response {
        match self.0 {
            ChatOutcome::Success(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
            ChatOutcome::Failure {
                http_status,
                envelope,
            } => {
                let status =
                    StatusCode::from_u16(http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(envelope)).into_response()
            }
        }
    }
}

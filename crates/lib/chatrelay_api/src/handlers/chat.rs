//! Chat endpoint — frames HTTP requests for the pipeline.
//!
//! The body is buffered by the extractor, bounded by the router's
//! [`DefaultBodyLimit`](axum::extract::DefaultBodyLimit); every validation
//! step happens inside the pipeline so each outcome gets an envelope.

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::rejection::{BytesRejection, FailedToBufferBody};
use axum::http::{HeaderMap, StatusCode, header};
use chatrelay_core::pipeline::{BodyError, InboundChat, MAX_BODY_BYTES};
use tracing::debug;

use crate::error::ChatResponse;
use crate::{API_KEY_HEADER, AppState};

/// `POST /api/chat` — validates the request and relays it to the model.
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ChatResponse {
    let body = match &body {
        Ok(bytes) => Ok(bytes.as_ref()),
        Err(rejection) => Err(body_error(rejection)),
    };

    let inbound = InboundChat {
        content_type: header_str(&headers, header::CONTENT_TYPE.as_str()),
        api_key: header_str(&headers, API_KEY_HEADER),
        body,
    };
    ChatResponse(state.pipeline.handle(inbound).await)
}

/// `OPTIONS /api/chat` — preflight acknowledgement without a body.
pub async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn body_error(rejection: &BytesRejection) -> BodyError {
    match rejection {
        BytesRejection::FailedToBufferBody(FailedToBufferBody::LengthLimitError(_)) => {
            debug!(limit = MAX_BODY_BYTES, "request body over limit");
            BodyError::TooLarge
        }
        other => {
            debug!(error = %other, "request body unreadable");
            BodyError::Unreadable
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

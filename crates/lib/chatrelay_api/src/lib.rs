//! # chatrelay_api
//!
//! HTTP API library for Chatrelay.

pub mod error;
pub mod handlers;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use chatrelay_core::pipeline::{ChatPipeline, MAX_BODY_BYTES};
use http::{HeaderValue, Method, header};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::handlers::{chat, status};

/// Route serving chat, status and preflight.
pub const CHAT_ROUTE: &str = "/api/chat";

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Request pipeline holding the loaded settings and provider.
    pub pipeline: ChatPipeline,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route(
            CHAT_ROUTE,
            get(status::status_handler)
                .post(chat::chat_handler)
                .options(chat::preflight_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

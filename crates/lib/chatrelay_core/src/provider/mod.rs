//! Model providers — the external generative-text capability.
//!
//! # Providers
//!
//! - `"google"` — Google generative language API (`generateContent`)
//! - `"openai"` — OpenAI-compatible chat completions API

pub mod google;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::config::{ProviderConfig, ProviderKind};
use crate::prompt::ChatMessage;

pub use google::GoogleProvider;
pub use openai::OpenAiProvider;

/// Errors reported by a provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider credential not configured")]
    NotConfigured,

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Provider rejected credential: {0}")]
    Unauthorized(String),

    #[error("Provider returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Provider request failed: {0}")]
    Network(String),

    #[error("Provider response malformed: {0}")]
    Malformed(String),

    #[error("Provider call cancelled")]
    Cancelled,

    #[error("Provider call ran past its deadline")]
    DeadlineExceeded,
}

impl ProviderError {
    /// Maps a non-success HTTP status and body to an error.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => ProviderError::RateLimited(body),
            401 | 403 => ProviderError::Unauthorized(body),
            404 | 503 => ProviderError::ModelUnavailable(body),
            400 if mentions_model(&body) => ProviderError::ModelUnavailable(body),
            code => ProviderError::Upstream { status: code, body },
        }
    }
}

fn mentions_model(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("model") && (lower.contains("not found") || lower.contains("does not exist"))
}

/// Generation parameters shared by every provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Token counts reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A successful provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Deadline and cancellation handle for one provider call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// An external generative-text capability.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short provider name for logs, e.g. `"google"`.
    fn name(&self) -> &'static str;

    /// Whether the provider credential is present.
    fn is_configured(&self) -> bool;

    /// Generates a reply for `messages`.
    ///
    /// Implementations stop waiting when `ctx.cancel` fires and report
    /// [`ProviderError::DeadlineExceeded`] once `ctx.deadline` passes.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &ModelParams,
        ctx: &CallContext,
    ) -> Result<Generation, ProviderError>;
}

/// Builds the provider selected by configuration.
pub fn build_provider(config: &ProviderConfig) -> Arc<dyn ModelProvider> {
    let client = reqwest::Client::new();
    match config.kind {
        ProviderKind::Google => Arc::new(GoogleProvider::new(
            client,
            config.base_url.clone(),
            config.api_key.clone(),
        )),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            client,
            config.base_url.clone(),
            config.api_key.clone(),
        )),
    }
}

/// Sends `request`, honouring the context deadline and cancellation.
///
/// The deadline belongs to the context; no client-side timeout is set on the
/// request itself.
pub(crate) async fn send_within(
    request: reqwest::RequestBuilder,
    ctx: &CallContext,
) -> Result<reqwest::Response, ProviderError> {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ProviderError::Cancelled),
        result = timeout_at(ctx.deadline, request.send()) => match result {
            Ok(sent) => sent.map_err(transport_error),
            Err(_) => Err(ProviderError::DeadlineExceeded),
        },
    }
}

/// Reads a response body, mapping non-success statuses to errors.
pub(crate) async fn read_success_body(
    response: reqwest::Response,
    ctx: &CallContext,
) -> Result<String, ProviderError> {
    let status = response.status();
    let body = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(ProviderError::Cancelled),
        result = timeout_at(ctx.deadline, response.text()) => match result {
            Ok(read) => read.map_err(transport_error)?,
            Err(_) => return Err(ProviderError::DeadlineExceeded),
        },
    };
    if status.is_success() {
        Ok(body)
    } else {
        Err(ProviderError::from_status(status, body))
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::DeadlineExceeded
    } else {
        ProviderError::Network(e.to_string())
    }
}

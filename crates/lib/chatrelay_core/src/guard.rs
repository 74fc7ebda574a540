//! Model invocation guard — bounds a provider call by a wall-clock timeout.
//!
//! The guard stops waiting when the deadline passes and cancels the token it
//! handed to the provider. Whether the upstream request actually stops is up
//! to the provider. A provider that notices the deadline first and reports
//! [`ProviderError::DeadlineExceeded`] gets the same timeout outcome.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::prompt::ChatMessage;
use crate::provider::{CallContext, Generation, ModelParams, ModelProvider, ProviderError};

/// Failure of a guarded model call.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("Model call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Calls `provider` with a deadline of `timeout`.
///
/// `parent` is linked to the call's own token, so cancelling it (e.g. on
/// shutdown) also abandons the call.
pub async fn invoke(
    provider: &dyn ModelProvider,
    messages: &[ChatMessage],
    params: &ModelParams,
    timeout: Duration,
    parent: &CancellationToken,
) -> Result<Generation, InvocationError> {
    let token = parent.child_token();
    let ctx = CallContext::new(timeout, token.clone());
    // Every exit path, including the caller dropping this future, cancels.
    let _abandon = token.drop_guard();

    let outcome = tokio::select! {
        biased;
        _ = sleep_until(ctx.deadline) => Err(ProviderError::DeadlineExceeded),
        result = provider.generate(messages, params, &ctx) => result,
    };
    match outcome {
        Err(ProviderError::DeadlineExceeded) => {
            debug!(
                provider = provider.name(),
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "model call abandoned"
            );
            Err(InvocationError::Timeout(timeout))
        }
        other => other.map_err(InvocationError::from),
    }
}

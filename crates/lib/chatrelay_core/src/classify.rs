//! Error classifier — maps pipeline failures to a fixed set of error kinds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guard::InvocationError;
use crate::provider::ProviderError;

/// Error kinds reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "AUTH_ERROR")]
    Auth,
    #[serde(rename = "RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "MODEL_ERROR")]
    Model,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT",
            ErrorKind::Model => "MODEL_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

/// Everything that can end a chat request early.
#[derive(Debug, Error)]
pub enum ChatFailure {
    #[error("Provider credential is not configured")]
    ProviderNotConfigured,

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Request body is not valid JSON: {0}")]
    MalformedBody(String),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Request body could not be read")]
    UnreadableBody,

    #[error("Invalid request body: {0}")]
    InvalidShape(String),

    #[error("Message field is missing")]
    MissingMessage,

    #[error("API key rejected")]
    Unauthorized,

    #[error("Destination URL rejected")]
    InvalidDestination,

    #[error("Message is empty after sanitizing")]
    EmptyMessage,

    #[error(transparent)]
    Invocation(#[from] InvocationError),
}

/// Result of classifying a [`ChatFailure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub http_status: u16,
    pub retryable: bool,
    pub user_message: &'static str,
}

const fn classification(
    kind: ErrorKind,
    http_status: u16,
    retryable: bool,
    user_message: &'static str,
) -> Classification {
    Classification {
        kind,
        http_status,
        retryable,
        user_message,
    }
}

const RATE_LIMITED: Classification = classification(
    ErrorKind::RateLimit,
    429,
    true,
    "The assistant is receiving too many requests. Please wait a moment and try again.",
);
const MODEL_UNAVAILABLE: Classification = classification(
    ErrorKind::Model,
    503,
    true,
    "The assistant is temporarily unavailable. Please try again shortly.",
);
const MODEL_MISCONFIGURED: Classification = classification(
    ErrorKind::Model,
    503,
    false,
    "The assistant is not configured correctly. Please contact the site owner.",
);
const TIMED_OUT: Classification = classification(
    ErrorKind::Timeout,
    504,
    true,
    "The assistant took too long to respond. Please try again.",
);
const UNKNOWN: Classification = classification(
    ErrorKind::Unknown,
    500,
    true,
    "Something went wrong. Please try again.",
);

/// Maps a failure to its kind, HTTP status, retryability and a user-safe
/// message. Messages never include upstream error text.
pub fn classify(failure: &ChatFailure) -> Classification {
    match failure {
        ChatFailure::ProviderNotConfigured => MODEL_MISCONFIGURED,
        ChatFailure::UnsupportedContentType(_) => classification(
            ErrorKind::Validation,
            400,
            false,
            "Content-Type must be application/json.",
        ),
        ChatFailure::MalformedBody(_) => classification(
            ErrorKind::Validation,
            400,
            false,
            "Request body must be valid JSON.",
        ),
        ChatFailure::BodyTooLarge(_) => classification(
            ErrorKind::Validation,
            400,
            false,
            "Request body is too large.",
        ),
        ChatFailure::UnreadableBody => classification(
            ErrorKind::Validation,
            400,
            true,
            "Request body could not be read.",
        ),
        ChatFailure::InvalidShape(_) => classification(
            ErrorKind::Validation,
            400,
            false,
            "Request body has missing or mistyped fields.",
        ),
        ChatFailure::MissingMessage | ChatFailure::EmptyMessage => classification(
            ErrorKind::Validation,
            400,
            false,
            "Message is required.",
        ),
        ChatFailure::Unauthorized => classification(
            ErrorKind::Auth,
            401,
            false,
            "A valid API key is required.",
        ),
        ChatFailure::InvalidDestination => classification(
            ErrorKind::Validation,
            400,
            false,
            "The site URL is not allowed.",
        ),
        ChatFailure::Invocation(InvocationError::Timeout(_)) => TIMED_OUT,
        ChatFailure::Invocation(InvocationError::Provider(e)) => classify_provider(e),
    }
}

fn classify_provider(error: &ProviderError) -> Classification {
    match error {
        ProviderError::RateLimited(_) => RATE_LIMITED,
        ProviderError::ModelUnavailable(_) => MODEL_UNAVAILABLE,
        ProviderError::NotConfigured | ProviderError::Unauthorized(_) => MODEL_MISCONFIGURED,
        ProviderError::DeadlineExceeded => TIMED_OUT,
        ProviderError::Upstream { .. }
        | ProviderError::Network(_)
        | ProviderError::Malformed(_)
        | ProviderError::Cancelled => UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn provider(e: ProviderError) -> ChatFailure {
        ChatFailure::Invocation(InvocationError::Provider(e))
    }

    #[test]
    fn caller_faults_are_not_retryable() {
        for failure in [
            ChatFailure::UnsupportedContentType("text/plain".into()),
            ChatFailure::MalformedBody("eof".into()),
            ChatFailure::BodyTooLarge(65_536),
            ChatFailure::InvalidShape("messages: expected a sequence".into()),
            ChatFailure::MissingMessage,
            ChatFailure::InvalidDestination,
            ChatFailure::EmptyMessage,
        ] {
            let c = classify(&failure);
            assert_eq!(c.kind, ErrorKind::Validation, "{failure}");
            assert_eq!(c.http_status, 400);
            assert!(!c.retryable);
        }

        let auth = classify(&ChatFailure::Unauthorized);
        assert_eq!(
            (auth.kind, auth.http_status, auth.retryable),
            (ErrorKind::Auth, 401, false)
        );
    }

    #[test]
    fn unreadable_body_differs_from_oversize() {
        let large = classify(&ChatFailure::BodyTooLarge(65_536));
        let broken = classify(&ChatFailure::UnreadableBody);
        assert_eq!(broken.kind, ErrorKind::Validation);
        assert_eq!(broken.http_status, 400);
        assert!(broken.retryable);
        assert_ne!(broken.user_message, large.user_message);
    }

    #[test]
    fn upstream_faults() {
        let timeout = classify(&ChatFailure::Invocation(InvocationError::Timeout(
            Duration::from_secs(25),
        )));
        assert_eq!(
            (timeout.kind, timeout.http_status, timeout.retryable),
            (ErrorKind::Timeout, 504, true)
        );

        let deadline = classify(&provider(ProviderError::DeadlineExceeded));
        assert_eq!(
            (deadline.kind, deadline.http_status, deadline.retryable),
            (ErrorKind::Timeout, 504, true)
        );

        let rate = classify(&provider(ProviderError::RateLimited("quota exceeded".into())));
        assert_eq!(
            (rate.kind, rate.http_status, rate.retryable),
            (ErrorKind::RateLimit, 429, true)
        );

        let model = classify(&provider(ProviderError::ModelUnavailable("overloaded".into())));
        assert_eq!(
            (model.kind, model.http_status, model.retryable),
            (ErrorKind::Model, 503, true)
        );

        let unknown = classify(&provider(ProviderError::Upstream {
            status: 500,
            body: "stack trace".into(),
        }));
        assert_eq!(
            (unknown.kind, unknown.http_status, unknown.retryable),
            (ErrorKind::Unknown, 500, true)
        );
    }

    #[test]
    fn configuration_faults_are_not_retryable() {
        for failure in [
            ChatFailure::ProviderNotConfigured,
            provider(ProviderError::NotConfigured),
            provider(ProviderError::Unauthorized("bad key".into())),
        ] {
            let c = classify(&failure);
            assert_eq!(c.kind, ErrorKind::Model);
            assert_eq!(c.http_status, 503);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn user_message_never_echoes_upstream_text() {
        let secret = "internal detail sk-123";
        for e in [
            ProviderError::RateLimited(secret.into()),
            ProviderError::ModelUnavailable(secret.into()),
            ProviderError::Network(secret.into()),
            ProviderError::Malformed(secret.into()),
            ProviderError::Upstream {
                status: 502,
                body: secret.into(),
            },
        ] {
            assert!(!classify(&provider(e)).user_message.contains("sk-123"));
        }
    }

    #[test]
    fn kinds_serialize_to_wire_codes() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Auth,
            ErrorKind::RateLimit,
            ErrorKind::Model,
            ErrorKind::Timeout,
            ErrorKind::Unknown,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
    }
}

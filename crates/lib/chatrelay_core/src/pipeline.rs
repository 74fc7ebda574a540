//! Request orchestrator — runs one chat request through every gate, calls the
//! model and builds the response envelope.
//!
//! Order: request id → provider credential → content type → JSON body →
//! API key → destination URL → message → prompt → guarded model call.
//! Any gate failing short-circuits to the error classifier, so local
//! validation failures never reach the provider.

use std::sync::Arc;
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{ChatFailure, ErrorKind, classify};
use crate::config::Settings;
use crate::cost::{estimate_cost, estimate_tokens};
use crate::guard;
use crate::prompt::{ChatMessage, assemble};
use crate::provider::{ModelProvider, TokenUsage};
use crate::sanitize::sanitize_message;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Sent instead of an empty model reply.
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I didn't quite catch that. Could you rephrase your question?";

pub const SERVICE_NAME: &str = "chatrelay";

/// Why a request body could not be buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyError {
    /// Longer than [`MAX_BODY_BYTES`].
    TooLarge,
    /// The transport failed while reading.
    Unreadable,
}

/// A chat request as received, before any validation.
#[derive(Debug, Clone, Copy)]
pub struct InboundChat<'a> {
    pub content_type: Option<&'a str>,
    pub api_key: Option<&'a str>,
    pub body: Result<&'a [u8], BodyError>,
}

/// Validated shape of the JSON body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
    #[serde(default)]
    pub site_url: Option<String>,
}

impl ChatRequest {
    /// Parses a body: invalid JSON is a malformed body, a non-object or
    /// mistyped field is a shape error.
    pub fn parse(body: &[u8]) -> Result<Self, ChatFailure> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ChatFailure::MalformedBody(e.to_string()))?;
        if !value.is_object() {
            return Err(ChatFailure::InvalidShape(
                "body must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| ChatFailure::InvalidShape(e.to_string()))
    }
}

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub message: String,
    pub thread_id: String,
    pub timestamp: String,
    pub success: bool,
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Milliseconds spent on the request.
    pub duration: u64,
}

/// Body of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    pub error: bool,
    pub code: ErrorKind,
    pub retryable: bool,
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Milliseconds spent on the request.
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Final result of a chat request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Success(SuccessEnvelope),
    Failure {
        http_status: u16,
        envelope: ErrorEnvelope,
    },
}

impl ChatOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            ChatOutcome::Success(_) => 200,
            ChatOutcome::Failure { http_status, .. } => *http_status,
        }
    }
}

/// Response of the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub service: String,
    pub status: String,
    pub version: String,
    pub auth_required: bool,
}

struct Completed {
    text: String,
    thread_id: String,
    model: String,
    usage: TokenUsage,
    usage_estimated: bool,
}

/// Shared, immutable request handler.
#[derive(Clone)]
pub struct ChatPipeline {
    settings: Arc<Settings>,
    provider: Arc<dyn ModelProvider>,
    shutdown: CancellationToken,
}

impl ChatPipeline {
    pub fn new(settings: Arc<Settings>, provider: Arc<dyn ModelProvider>) -> Self {
        Self::with_shutdown(settings, provider, CancellationToken::new())
    }

    /// Like [`new`](Self::new); in-flight model calls are abandoned when
    /// `shutdown` is cancelled.
    pub fn with_shutdown(
        settings: Arc<Settings>,
        provider: Arc<dyn ModelProvider>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            provider,
            shutdown,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            service: SERVICE_NAME.to_string(),
            status: "active".to_string(),
            version: crate::version().to_string(),
            auth_required: self.settings.api_keys.require_auth(),
        }
    }

    /// Handles one chat request. Always returns an envelope and always
    /// emits exactly one `chat_metrics` record.
    pub async fn handle(&self, inbound: InboundChat<'_>) -> ChatOutcome {
        let request_id = new_request_id();
        let started = Instant::now();
        debug!(request_id = %request_id, "chat request received");

        let result = self.run(&request_id, inbound).await;
        let duration = elapsed_ms(started);

        match result {
            Ok(done) => {
                info!(
                    target: "chat_metrics",
                    request_id = %request_id,
                    outcome = "success",
                    status = 200u16,
                    duration_ms = duration,
                    provider = self.provider.name(),
                    model = %done.model,
                    prompt_tokens = done.usage.prompt_tokens,
                    completion_tokens = done.usage.completion_tokens,
                    usage_estimated = done.usage_estimated,
                    estimated_cost_usd = estimate_cost(&done.model, done.usage),
                    "chat request completed"
                );
                ChatOutcome::Success(SuccessEnvelope {
                    message: done.text,
                    thread_id: done.thread_id,
                    timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                    success: true,
                    request_id,
                    duration,
                })
            }
            Err(failure) => {
                let c = classify(&failure);
                warn!(
                    target: "chat_metrics",
                    request_id = %request_id,
                    outcome = c.kind.as_str(),
                    status = c.http_status,
                    retryable = c.retryable,
                    duration_ms = duration,
                    error = %failure,
                    "chat request failed"
                );
                ChatOutcome::Failure {
                    http_status: c.http_status,
                    envelope: ErrorEnvelope {
                        message: c.user_message.to_string(),
                        error: true,
                        code: c.kind,
                        retryable: c.retryable,
                        request_id,
                        duration,
                        details: self
                            .settings
                            .env
                            .is_development()
                            .then(|| failure.to_string()),
                    },
                }
            }
        }
    }

    async fn run(
        &self,
        request_id: &str,
        inbound: InboundChat<'_>,
    ) -> Result<Completed, ChatFailure> {
        let settings = &self.settings;

        if !self.provider.is_configured() {
            return Err(ChatFailure::ProviderNotConfigured);
        }

        if !is_json_content_type(inbound.content_type) {
            return Err(ChatFailure::UnsupportedContentType(
                inbound.content_type.unwrap_or("<none>").to_string(),
            ));
        }

        let body = inbound.body.map_err(|e| match e {
            BodyError::TooLarge => ChatFailure::BodyTooLarge(MAX_BODY_BYTES),
            BodyError::Unreadable => ChatFailure::UnreadableBody,
        })?;
        let request = ChatRequest::parse(body)?;

        if !settings.api_keys.authorize(inbound.api_key, request_id) {
            return Err(ChatFailure::Unauthorized);
        }

        let site_url = settings
            .destinations
            .validate(request.site_url.as_deref())
            .ok_or(ChatFailure::InvalidDestination)?;

        let raw_message = request
            .message
            .as_deref()
            .ok_or(ChatFailure::MissingMessage)?;
        let message = sanitize_message(raw_message);
        if message.is_empty() {
            return Err(ChatFailure::EmptyMessage);
        }

        // Opaque echo value; no ownership or uniqueness checks.
        let thread_id = request
            .thread_id
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| request_id.to_string());

        let messages = assemble(
            &settings.prompt,
            &site_url,
            request.messages.as_deref().unwrap_or_default(),
            &message,
            settings.context_messages,
        );
        debug!(
            request_id,
            thread_id = %thread_id,
            prompt_messages = messages.len(),
            "invoking model"
        );

        let generation = guard::invoke(
            self.provider.as_ref(),
            &messages,
            &settings.model,
            settings.timeout,
            &self.shutdown,
        )
        .await?;

        let text = match generation.text.trim() {
            "" => FALLBACK_REPLY.to_string(),
            text => text.to_string(),
        };
        let (usage, usage_estimated) = match generation.usage {
            Some(usage) => (usage, false),
            None => (estimate_usage(&messages, &text), true),
        };

        Ok(Completed {
            text,
            thread_id,
            model: generation.model,
            usage,
            usage_estimated,
        })
    }
}

fn new_request_id() -> String {
    format!("req_{}", Uuid::now_v7().simple())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Accepts `application/json` with optional parameters, case-insensitive.
pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
}

fn estimate_usage(prompt: &[ChatMessage], reply: &str) -> TokenUsage {
    TokenUsage {
        prompt_tokens: prompt.iter().map(|m| estimate_tokens(&m.content)).sum(),
        completion_tokens: estimate_tokens(reply),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::credentials::ApiKeyConfiguration;
    use crate::prompt::{PromptTemplate, Role};
    use crate::provider::{CallContext, Generation, GoogleProvider, ModelParams, ProviderError};
    use crate::sanitize::{AllowedHosts, DomainAllowList};
    use crate::test_support::CapturedEvents;

    /// Records the prompt it receives and answers with a fixed reply.
    struct Recorder {
        reply: &'static str,
        configured: bool,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Recorder {
        fn new(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply,
                configured: true,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelProvider for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn generate(
            &self,
            messages: &[ChatMessage],
            params: &ModelParams,
            _ctx: &CallContext,
        ) -> Result<Generation, ProviderError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(Generation {
                text: self.reply.to_string(),
                model: params.model.clone(),
                usage: None,
            })
        }
    }

    /// Never answers; only the guard's deadline ends the call.
    struct Stalled;

    #[async_trait]
    impl ModelProvider for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _params: &ModelParams,
            _ctx: &CallContext,
        ) -> Result<Generation, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::Cancelled)
        }
    }

    fn settings() -> Settings {
        let mut s = Settings::from_lookup(|_| None).unwrap();
        s.api_keys = ApiKeyConfiguration::open();
        s.prompt = PromptTemplate::new("site={{SITE_URL}}");
        s
    }

    fn pipeline(settings: Settings, provider: Arc<Recorder>) -> ChatPipeline {
        ChatPipeline::new(Arc::new(settings), provider)
    }

    fn json_request(body: &Value) -> Vec<u8> {
        serde_json::to_vec(body).unwrap()
    }

    async fn send(p: &ChatPipeline, body: &[u8], key: Option<&str>) -> ChatOutcome {
        p.handle(InboundChat {
            content_type: Some("application/json"),
            api_key: key,
            body: Ok(body),
        })
        .await
    }

    fn failure(outcome: &ChatOutcome) -> (u16, &ErrorEnvelope) {
        match outcome {
            ChatOutcome::Failure {
                http_status,
                envelope,
            } => (*http_status, envelope),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_contact_uses_request_id_as_thread() {
        let provider = Recorder::new("Hi there!");
        let p = pipeline(settings(), provider.clone());
        let out = send(&p, &json_request(&json!({ "message": "Hello" })), None).await;

        let ChatOutcome::Success(env) = out else {
            panic!("expected success");
        };
        assert!(env.success);
        assert_eq!(env.message, "Hi there!");
        assert_eq!(env.thread_id, env.request_id);
        assert!(env.request_id.starts_with("req_"));
        assert!(env.timestamp.ends_with('Z'));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn caller_thread_id_is_echoed() {
        let p = pipeline(settings(), Recorder::new("ok"));
        let body = json_request(&json!({ "message": "Hello", "thread_id": "thread-42" }));
        let ChatOutcome::Success(env) = send(&p, &body, None).await else {
            panic!("expected success");
        };
        assert_eq!(env.thread_id, "thread-42");
        assert_ne!(env.thread_id, env.request_id);
    }

    #[tokio::test]
    async fn empty_reply_replaced_by_fallback() {
        let p = pipeline(settings(), Recorder::new("   "));
        let ChatOutcome::Success(env) =
            send(&p, &json_request(&json!({ "message": "Hello" })), None).await
        else {
            panic!("expected success");
        };
        assert_eq!(env.message, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn unconfigured_provider_short_circuits_first() {
        let provider = Arc::new(Recorder {
            reply: "x",
            configured: false,
            seen: Mutex::new(Vec::new()),
        });
        let p = pipeline(settings(), provider.clone());
        let out = p
            .handle(InboundChat {
                content_type: Some("text/plain"),
                api_key: None,
                body: Ok(&b"not json"[..]),
            })
            .await;
        let (status, env) = failure(&out);
        assert_eq!(status, 503);
        assert_eq!(env.code, ErrorKind::Model);
        assert!(!env.retryable);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn wrong_content_type_rejected() {
        let p = pipeline(settings(), Recorder::new("x"));
        let out = p
            .handle(InboundChat {
                content_type: Some("text/plain"),
                api_key: None,
                body: Ok(&br#"{"message":"hi"}"#[..]),
            })
            .await;
        assert_eq!(failure(&out).1.code, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn malformed_and_mistyped_bodies_rejected() {
        let p = pipeline(settings(), Recorder::new("x"));
        let bodies: [&[u8]; 6] = [
            b"{not json",
            b"[]",
            b"\"hello\"",
            br#"{"message": 5}"#,
            br#"{"message": "hi", "messages": "nope"}"#,
            br#"{"message": "hi", "thread_id": 7}"#,
        ];
        for body in bodies {
            let out = send(&p, body, None).await;
            let (status, env) = failure(&out);
            assert_eq!(status, 400, "{}", String::from_utf8_lossy(body));
            assert_eq!(env.code, ErrorKind::Validation);
            assert!(!env.retryable);
        }
    }

    #[tokio::test]
    async fn missing_or_blank_message_rejected() {
        let provider = Recorder::new("x");
        let p = pipeline(settings(), provider.clone());
        for body in [json!({}), json!({ "message": "   " }), json!({ "message": null })] {
            let out = send(&p, &json_request(&body), None).await;
            let (status, env) = failure(&out);
            assert_eq!(status, 400);
            assert_eq!(env.code, ErrorKind::Validation);
            assert_eq!(env.message, "Message is required.");
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn body_read_failures_are_told_apart() {
        let provider = Recorder::new("x");
        let p = pipeline(settings(), provider.clone());
        let read_with = |body| InboundChat {
            content_type: Some("application/json"),
            api_key: None,
            body: Err(body),
        };

        let out = p.handle(read_with(BodyError::TooLarge)).await;
        let (status, env) = failure(&out);
        assert_eq!(status, 400);
        assert_eq!(env.message, "Request body is too large.");
        assert!(!env.retryable);

        let out = p.handle(read_with(BodyError::Unreadable)).await;
        let (status, env) = failure(&out);
        assert_eq!(status, 400);
        assert_eq!(env.message, "Request body could not be read.");
        assert!(env.retryable);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn auth_required_rejects_missing_and_wrong_keys() {
        let mut s = settings();
        s.api_keys = ApiKeyConfiguration::new(["secret-key-1"], true);
        let provider = Recorder::new("x");
        let p = pipeline(s, provider.clone());
        let body = json_request(&json!({ "message": "Hello" }));

        for key in [None, Some("wrong-key-12")] {
            let out = send(&p, &body, key).await;
            let (status, env) = failure(&out);
            assert_eq!(status, 401);
            assert_eq!(env.code, ErrorKind::Auth);
        }
        assert!(matches!(
            send(&p, &body, Some("secret-key-1")).await,
            ChatOutcome::Success(_)
        ));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn disallowed_site_url_rejected_in_production() {
        let mut s = settings();
        s.destinations.allow_list = DomainAllowList {
            enforced: true,
            hosts: AllowedHosts::Only(vec!["bubbl.io".into()]),
        };
        let provider = Recorder::new("x");
        let p = pipeline(s, provider.clone());

        let bad = json_request(&json!({
            "message": "Hi",
            "site_url": "https://malicious.com"
        }));
        let out = send(&p, &bad, None).await;
        let (status, env) = failure(&out);
        assert_eq!(status, 400);
        assert_eq!(env.code, ErrorKind::Validation);

        let good = json_request(&json!({
            "message": "Hi",
            "site_url": "https://app.bubbl.io/x?y=1"
        }));
        assert!(matches!(send(&p, &good, None).await, ChatOutcome::Success(_)));
        let prompt = &provider.seen.lock().unwrap()[0];
        assert_eq!(prompt[0].content, "site=https://app.bubbl.io/x");
    }

    #[tokio::test]
    async fn history_window_applied() {
        let provider = Recorder::new("ok");
        let p = pipeline(settings(), provider.clone());
        let history: Vec<Value> = (0..8)
            .map(|i| {
                json!({
                    "role": if i % 2 == 0 { "user" } else { "assistant" },
                    "content": format!("turn {i}")
                })
            })
            .collect();
        let body = json_request(&json!({ "message": "latest", "messages": history }));
        assert!(matches!(send(&p, &body, None).await, ChatOutcome::Success(_)));

        let prompt = provider.seen.lock().unwrap()[0].clone();
        assert_eq!(prompt.len(), 7);
        assert_eq!(prompt[0].role, Role::System);
        assert_eq!(prompt[1].content, "turn 3");
        assert_eq!(prompt[5].content, "turn 7");
        assert_eq!(prompt[6], ChatMessage::user("latest"));
    }

    #[tokio::test]
    async fn details_only_in_development() {
        let p = pipeline(settings(), Recorder::new("x"));
        let out = send(&p, b"{oops", None).await;
        assert!(failure(&out).1.details.is_some());

        let mut prod = settings();
        prod.env = crate::config::AppEnv::Production;
        let p = pipeline(prod, Recorder::new("x"));
        let out = send(&p, b"{oops", None).await;
        assert!(failure(&out).1.details.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let p = ChatPipeline::new(Arc::new(settings()), Arc::new(Stalled));
        let out = send(&p, &json_request(&json!({ "message": "Hello" })), None).await;
        let (status, env) = failure(&out);
        assert_eq!(status, 504);
        assert_eq!(env.code, ErrorKind::Timeout);
        assert!(env.retryable);
    }

    #[tokio::test]
    async fn slow_upstream_model_is_reported_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "candidates": [] }))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let provider = GoogleProvider::new(reqwest::Client::new(), server.uri(), Some("g".into()));
        let mut s = settings();
        s.timeout = Duration::from_millis(300);
        let p = ChatPipeline::new(Arc::new(s), Arc::new(provider));

        for _ in 0..3 {
            let out = send(&p, &json_request(&json!({ "message": "Hello" })), None).await;
            let (status, env) = failure(&out);
            assert_eq!(status, 504);
            assert_eq!(env.code, ErrorKind::Timeout);
            assert!(env.retryable);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_metrics_record_per_request() {
        let (events, _guard) = CapturedEvents::install();
        let guarded = || {
            let mut s = settings();
            s.api_keys = ApiKeyConfiguration::new(["secret-key-1"], true);
            Arc::new(s)
        };
        let answering = ChatPipeline::new(guarded(), Recorder::new("Hi"));
        let stalled = ChatPipeline::new(guarded(), Arc::new(Stalled));
        let hello = json_request(&json!({ "message": "Hello" }));
        let no_message = json_request(&json!({ "thread_id": "t-1" }));

        let cases: [(&ChatPipeline, &[u8], &str, u16); 4] = [
            (&answering, hello.as_slice(), "secret-key-1", 200),
            (&answering, no_message.as_slice(), "secret-key-1", 400),
            (&answering, hello.as_slice(), "wrong-key-12", 401),
            (&stalled, hello.as_slice(), "secret-key-1", 504),
        ];
        for (p, body, key, expected) in cases {
            events.clear();
            let out = send(p, body, Some(key)).await;
            assert_eq!(out.http_status(), expected);
            assert_eq!(events.count("chat_metrics"), 1, "status {expected}");
        }
    }

    #[test]
    fn content_type_matching() {
        assert!(is_json_content_type(Some("application/json")));
        assert!(is_json_content_type(Some("Application/JSON; charset=utf-8")));
        assert!(!is_json_content_type(Some("text/plain")));
        assert!(!is_json_content_type(Some("application/jsonp")));
        assert!(!is_json_content_type(None));
    }

    #[test]
    fn error_envelope_wire_shape() {
        let env = ErrorEnvelope {
            message: "Message is required.".into(),
            error: true,
            code: ErrorKind::Validation,
            retryable: false,
            request_id: "req_1".into(),
            duration: 3,
            details: None,
        };
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "message": "Message is required.",
                "error": true,
                "code": "VALIDATION_ERROR",
                "retryable": false,
                "requestId": "req_1",
                "duration": 3
            })
        );
    }

    #[test]
    fn status_report_shape() {
        let p = pipeline(settings(), Recorder::new("x"));
        let v = serde_json::to_value(p.status()).unwrap();
        assert_eq!(v["service"], SERVICE_NAME);
        assert_eq!(v["status"], "active");
        assert_eq!(v["authRequired"], false);
    }
}

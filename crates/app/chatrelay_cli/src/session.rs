//! Client-side chat session.
//!
//! The server is stateless: this session keeps the history, resends it with
//! every turn and echoes back the `thread_id` the server returned. Turns are
//! recorded only after a successful reply. One request may be in flight;
//! starting another abandons the previous one.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chatrelay_core::pipeline::{ErrorEnvelope, StatusReport, SuccessEnvelope};
use chatrelay_core::prompt::ChatMessage;
use chatrelay_core::session::InFlightSlot;
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;

use crate::{CliError, Result};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Default, Clone)]
struct Conversation {
    thread_id: Option<String>,
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct OutboundChat<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    site_url: Option<&'a str>,
}

pub struct ChatSession {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    site_url: Option<String>,
    slot: InFlightSlot,
    conversation: Mutex<Conversation>,
}

impl ChatSession {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        site_url: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            site_url,
            slot: InFlightSlot::new(),
            conversation: Mutex::new(Conversation::default()),
        }
    }

    /// Continues an existing thread.
    pub fn set_thread_id(&self, thread_id: impl Into<String>) {
        self.lock().thread_id = Some(thread_id.into());
    }

    pub fn thread_id(&self) -> Option<String> {
        self.lock().thread_id.clone()
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock().history.clone()
    }

    /// Forgets history and thread.
    pub fn reset(&self) {
        self.slot.abort();
        *self.lock() = Conversation::default();
    }

    /// Abandons the pending request, if any.
    pub fn abort(&self) {
        self.slot.abort();
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Sends `message` with the current history.
    ///
    /// Returns `Ok(None)` when the request was abandoned by [`abort`](Self::abort)
    /// or by a newer `send`.
    pub async fn send(&self, message: &str) -> Result<Option<String>> {
        let request = self.slot.begin();
        let snapshot = self.lock().clone();

        let body = OutboundChat {
            message,
            thread_id: snapshot.thread_id.as_deref(),
            messages: &snapshot.history,
            site_url: self.site_url.as_deref(),
        };
        let builder = self.authorized(self.client.post(&self.endpoint)).json(&body);

        let result = tokio::select! {
            _ = request.token().cancelled() => {
                debug!("chat request abandoned");
                return Ok(None);
            }
            result = exchange(builder) => result,
        };
        self.slot.finish(&request);
        let envelope = result?;

        let mut conversation = self.lock();
        conversation.thread_id = Some(envelope.thread_id);
        conversation.history.push(ChatMessage::user(message));
        conversation
            .history
            .push(ChatMessage::assistant(envelope.message.clone()));
        debug!("reply received for request {}", envelope.request_id);
        Ok(Some(envelope.message))
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let response = self
            .authorized(self.client.get(&self.endpoint))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn exchange(builder: RequestBuilder) -> Result<SuccessEnvelope> {
    let response = builder.send().await?;
    let status = response.status();
    let bytes = response.bytes().await?;

    if status.is_success() {
        return Ok(serde_json::from_slice(&bytes)?);
    }
    match serde_json::from_slice::<ErrorEnvelope>(&bytes) {
        Ok(envelope) => Err(CliError::Server {
            status: status.as_u16(),
            code: envelope.code.as_str().to_string(),
            message: envelope.message,
            retryable: envelope.retryable,
            request_id: envelope.request_id,
        }),
        Err(_) => Err(CliError::Custom(format!("server returned {status}"))),
    }
}

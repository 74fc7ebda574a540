//! OpenAI-compatible chat completions provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    CallContext, Generation, ModelParams, ModelProvider, ProviderError, TokenUsage,
    read_success_body, send_within,
};
use crate::prompt::ChatMessage;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Client for `/chat/completions` endpoints.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn parse_response(body: &str, requested_model: &str) -> Result<Generation, ProviderError> {
    let data: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("chat completion response: {e}")))?;

    let text = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    Ok(Generation {
        text,
        model: data.model.unwrap_or_else(|| requested_model.to_string()),
        usage: data.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
    })
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        params: &ModelParams,
        ctx: &CallContext,
    ) -> Result<Generation, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ProviderError::NotConfigured)?;

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&CompletionRequest {
                model: &params.model,
                messages,
                temperature: params.temperature,
                max_tokens: params.max_output_tokens,
            });

        let response = send_within(request, ctx).await?;
        let body = read_success_body(response, ctx).await?;
        parse_response(&body, &params.model)
    }
}

//! Google generative language provider.
//!
//! Calls `POST {base}/models/{model}:generateContent`. The system message is
//! sent as `systemInstruction`; assistant turns use the `model` role.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    CallContext, Generation, ModelParams, ModelProvider, ProviderError, TokenUsage,
    read_success_body, send_within,
};
use crate::prompt::{ChatMessage, Role};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Client for the Google generative language API.
pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl GoogleProvider {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn build_request<'a>(messages: &'a [ChatMessage], params: &ModelParams) -> GenerateRequest<'a> {
    let system: Vec<Part<'a>> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| Part { text: &m.content })
        .collect();
    let contents = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => return None,
            };
            Some(Content {
                role: Some(role),
                parts: vec![Part { text: &m.content }],
            })
        })
        .collect();

    GenerateRequest {
        system_instruction: (!system.is_empty()).then_some(Content {
            role: None,
            parts: system,
        }),
        contents,
        generation_config: GenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
        },
    }
}

fn parse_response(body: &str, requested_model: &str) -> Result<Generation, ProviderError> {
    let data: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("generateContent response: {e}")))?;

    let text = data
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    Ok(Generation {
        text,
        model: data
            .model_version
            .unwrap_or_else(|| requested_model.to_string()),
        usage: data.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
        }),
    })
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
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

        let url = format!("{}/models/{}:generateContent", self.base_url, params.model);
        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&build_request(messages, params));

        let response = send_within(request, ctx).await?;
        let body = read_success_body(response, ctx).await?;
        parse_response(&body, &params.model)
    }
}

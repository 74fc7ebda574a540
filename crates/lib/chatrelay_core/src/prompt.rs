//! Prompt assembly — system template, bounded history window, new message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder replaced by the validated destination URL.
pub const SITE_URL_PLACEHOLDER: &str = "{{SITE_URL}}";

const DEFAULT_TEMPLATE: &str = "\
You are the friendly assistant embedded on a website built with Bubbl.
Answer questions about the site, its pages and its upcoming events concisely.
When you point the visitor to a page, write a markdown link whose URL starts \
with {{SITE_URL}} (for example [Events]({{SITE_URL}}/events)).
Never invent links to other domains. If you do not know an answer, say so and \
suggest where on the site the visitor might look.";

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of a model conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Reads a caller-supplied history entry.
    ///
    /// Only `user` and `assistant` turns with non-blank string content are
    /// kept; a caller cannot inject extra system instructions.
    pub fn from_history_value(value: &Value) -> Option<Self> {
        let role = match value.get("role")?.as_str()? {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => return None,
        };
        let content = value.get("content")?.as_str()?;
        if content.trim().is_empty() {
            return None;
        }
        Some(Self {
            role,
            content: content.to_string(),
        })
    }
}

/// System instruction template, parameterized by the destination URL.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn render(&self, site_url: &str) -> String {
        self.text
            .replace(SITE_URL_PLACEHOLDER, site_url.trim_end_matches('/'))
    }
}

/// Builds the ordered message list sent to the model.
///
/// Output is one system message, then the last `max_history` valid history
/// entries in their original order, then the new user message. Invalid
/// entries are dropped before the window is applied.
pub fn assemble(
    template: &PromptTemplate,
    destination_url: &str,
    history: &[Value],
    new_message: &str,
    max_history: usize,
) -> Vec<ChatMessage> {
    let valid: Vec<ChatMessage> = history
        .iter()
        .filter_map(ChatMessage::from_history_value)
        .collect();
    let skip = valid.len().saturating_sub(max_history);

    let mut messages = Vec::with_capacity(valid.len() - skip + 2);
    messages.push(ChatMessage::system(template.render(destination_url)));
    messages.extend(valid.into_iter().skip(skip));
    messages.push(ChatMessage::user(new_message));
    messages
}

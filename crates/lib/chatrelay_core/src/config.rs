//! Process-wide configuration.
//!
//! Built once at startup and shared read-only; nothing here is re-read per
//! request.
//!
//! | Variable | Default |
//! |---|---|
//! | `BIND_ADDR` | `127.0.0.1:3000` |
//! | `APP_ENV` | `development` |
//! | `CHAT_PROVIDER` | `google` |
//! | `GOOGLE_GENERATIVE_AI_API_KEY` / `OPENAI_API_KEY` | unset |
//! | `GOOGLE_BASE_URL` / `OPENAI_BASE_URL` | public endpoints |
//! | `CHAT_MODEL` | `gemini-1.5-flash` / `gpt-4o-mini` |
//! | `CHAT_TEMPERATURE` | `0.7` |
//! | `CHAT_MAX_OUTPUT_TOKENS` | `1024` |
//! | `CHAT_TIMEOUT_MS` | `25000` |
//! | `CHAT_CONTEXT_MESSAGES` | `5` |
//! | `API_KEYS` | empty |
//! | `REQUIRE_AUTH` | `true` |
//! | `ALLOWED_DOMAINS` | absent (unconfigured) |
//! | `DEFAULT_SITE_URL` | `https://bubbl.io` |
//! | `SYSTEM_PROMPT_PATH` | built-in template |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::credentials::ApiKeyConfiguration;
use crate::prompt::PromptTemplate;
use crate::provider::{ModelParams, google, openai};
use crate::sanitize::{AllowedHosts, DestinationPolicy, DomainAllowList};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_SITE_URL: &str = "https://bubbl.io";
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);
pub const DEFAULT_CONTEXT_MESSAGES: usize = 5;

/// Configuration errors, all reported at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn is_production(self) -> bool {
        self == AppEnv::Production
    }

    pub fn is_development(self) -> bool {
        self == AppEnv::Development
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(AppEnv::Development),
            "production" | "prod" | "staging" => Ok(AppEnv::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Which provider API to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Google,
    OpenAi,
}

impl ProviderKind {
    fn key_var(self) -> &'static str {
        match self {
            ProviderKind::Google => "GOOGLE_GENERATIVE_AI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }

    fn base_url_var(self) -> &'static str {
        match self {
            ProviderKind::Google => "GOOGLE_BASE_URL",
            ProviderKind::OpenAi => "OPENAI_BASE_URL",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Google => google::DEFAULT_BASE_URL,
            ProviderKind::OpenAi => openai::DEFAULT_BASE_URL,
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            ProviderKind::Google => "gemini-1.5-flash",
            ProviderKind::OpenAi => "gpt-4o-mini",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gemini" => Ok(ProviderKind::Google),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Provider endpoint and credential.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub env: AppEnv,
    pub provider: ProviderConfig,
    pub model: ModelParams,
    pub timeout: Duration,
    pub context_messages: usize,
    pub api_keys: ApiKeyConfiguration,
    pub destinations: DestinationPolicy,
    pub prompt: PromptTemplate,
}

impl Settings {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which returns the raw value of a
    /// variable or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env: AppEnv = parse_or(&lookup, "APP_ENV", AppEnv::Development)?;
        let kind: ProviderKind = parse_or(&lookup, "CHAT_PROVIDER", ProviderKind::Google)?;

        let provider = ProviderConfig {
            kind,
            base_url: non_blank(&lookup, kind.base_url_var())
                .unwrap_or_else(|| kind.default_base_url().to_string()),
            api_key: non_blank(&lookup, kind.key_var()),
        };

        let model = ModelParams {
            model: non_blank(&lookup, "CHAT_MODEL")
                .unwrap_or_else(|| kind.default_model().to_string()),
            temperature: parse_or(&lookup, "CHAT_TEMPERATURE", 0.7)?,
            max_output_tokens: parse_or(&lookup, "CHAT_MAX_OUTPUT_TOKENS", 1024)?,
        };
        if !(0.0..=2.0).contains(&model.temperature) {
            return Err(invalid("CHAT_TEMPERATURE", "must be between 0 and 2"));
        }

        let timeout_ms: u64 = parse_or(&lookup, "CHAT_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(invalid("CHAT_TIMEOUT_MS", "must be >= 1"));
        }

        let api_keys = ApiKeyConfiguration::new(
            lookup("API_KEYS")
                .unwrap_or_default()
                .split(',')
                .map(str::to_string)
                .collect::<Vec<_>>(),
            parse_bool_or(&lookup, "REQUIRE_AUTH", true)?,
        );

        let default_url = non_blank(&lookup, "DEFAULT_SITE_URL")
            .unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        check_site_url(&default_url)?;
        let destinations = DestinationPolicy {
            default_url,
            allow_list: DomainAllowList {
                enforced: env.is_production(),
                hosts: AllowedHosts::parse(lookup("ALLOWED_DOMAINS").as_deref()),
            },
        };

        let context_messages =
            parse_or(&lookup, "CHAT_CONTEXT_MESSAGES", DEFAULT_CONTEXT_MESSAGES)?;

        let prompt = match non_blank(&lookup, "SYSTEM_PROMPT_PATH") {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path, source })?;
                PromptTemplate::new(text)
            }
            None => PromptTemplate::default(),
        };

        Ok(Self {
            bind_addr: non_blank(&lookup, "BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            env,
            provider,
            model,
            timeout: Duration::from_millis(timeout_ms),
            context_messages,
            api_keys,
            destinations,
            prompt,
        })
    }
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

fn non_blank<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match non_blank(lookup, key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool_or<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_blank(lookup, key).map(|v| v.to_ascii_lowercase()).as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => Err(invalid(key, format!("expected a boolean, got '{other}'"))),
    }
}

fn check_site_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid("DEFAULT_SITE_URL", e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("DEFAULT_SITE_URL", "must use http or https"));
    }
    Ok(())
}

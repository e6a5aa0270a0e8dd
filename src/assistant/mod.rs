//! Natural-language filter assistant.
//!
//! The user's intent, an anonymized sample row and the current column
//! queries go to an OpenAI-compatible chat completion endpoint; the reply is
//! cleaned by [`normalize_assistant_query`] into an expression for the
//! filter prompt.

mod normalize;

pub use normalize::normalize_assistant_query;

use std::time::Duration;

use log::debug;
use serde_json::Value;
use thiserror::Error;

use crate::config::AssistantConfig;

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_TOKENS: u32 = 256;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const MODEL_ENV: &str = "CUTL_OPENAI_MODEL";

const SYSTEM_PROMPT: &str = "You turn natural language requests plus an example JSON row into a jq \
boolean expression that can be placed inside select(...). Reference the current row as '.', and \
prefer piping into functions, e.g. (.input // \"\" | ascii_downcase | contains(\"paket\")). Never \
emit select(), jq prefixes, invalid function signatures, or commentary.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssistantError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Upstream(String),
    #[error("assistant returned an empty response")]
    EmptyResult,
    #[error("AI assistant unavailable (set OPENAI_API_KEY to enable it)")]
    Unavailable,
}

/// Everything sent to the model for one filter request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRequest {
    pub prompt: String,
    pub sample_json: String,
    pub column_hints: Vec<String>,
}

impl FilterRequest {
    /// The user turn of the conversation.
    pub fn user_message(&self) -> String {
        let hints = if self.column_hints.is_empty() {
            "(no column hints)".to_string()
        } else {
            self.column_hints.join(", ")
        };
        let sample = match self.sample_json.trim() {
            "" => "{}",
            sample => sample,
        };
        format!(
            "User intent:\n{}\n\nAnonymized JSONL row structure:\n{}\n\nColumn hints: {}\n\n\
             Return ONLY a valid jq boolean expression that can be placed inside select(...). \
             Use '.' as the current row. Prefer piping to functions, e.g. \
             (.input // \"\" | ascii_downcase | contains(\"paket\")) or (.language == \"fr\"). \
             Do not emit select(), jq prefixes, extra explanation, or invalid function signatures.",
            self.prompt, sample, hints
        )
    }
}

/// Replace every scalar with a placeholder of the same type so the sample
/// shows structure without leaking data. Pretty-printed.
pub fn anonymized_sample(data: &Value) -> String {
    serde_json::to_string_pretty(&anonymize(data)).unwrap_or_else(|_| "{}".to_string())
}

fn anonymize(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, val)| (key.clone(), anonymize(val)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(anonymize).collect()),
        Value::String(_) => Value::String("abc".to_string()),
        Value::Number(_) => Value::from(123),
        Value::Bool(_) => Value::Bool(true),
        Value::Null => Value::Null,
    }
}

/// A chat completion backend. Returns the text of the first choice.
pub trait CompletionProvider: Send + Sync {
    fn complete(&self, system: &str, user: &str) -> Result<String, AssistantError>;
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl AssistantSettings {
    /// Settings from the process environment layered over `config`.
    /// `None` when no API key is available.
    pub fn from_env(config: &AssistantConfig) -> Option<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }

    /// Settings from `lookup` (environment variables) layered over `config`.
    pub fn resolve(config: &AssistantConfig, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = non_empty(lookup(API_KEY_ENV))?;
        let base_url = non_empty(lookup(BASE_URL_ENV))
            .or_else(|| non_empty(config.base_url.clone()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = non_empty(lookup(MODEL_ENV))
            .or_else(|| non_empty(config.model.clone()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Some(Self {
            api_key,
            base_url,
            model,
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Blocking client for `/chat/completions`.
#[cfg(feature = "assistant")]
pub struct OpenAiProvider {
    settings: AssistantSettings,
}

#[cfg(feature = "assistant")]
impl OpenAiProvider {
    pub fn new(settings: AssistantSettings) -> Self {
        Self { settings }
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        serde_json::json!({
            "model": self.settings.model,
            "temperature": 0,
            "max_tokens": MAX_TOKENS,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        })
    }
}

#[cfg(feature = "assistant")]
impl CompletionProvider for OpenAiProvider {
    fn complete(&self, system: &str, user: &str) -> Result<String, AssistantError> {
        let response = ureq::post(&self.settings.completions_url())
            .timeout(REQUEST_TIMEOUT)
            .set("Authorization", &format!("Bearer {}", self.settings.api_key))
            .send_json(self.request_body(system, user))
            .map_err(|e| AssistantError::Upstream(format!("request failed: {}", e)))?;

        let body: Value = response
            .into_json()
            .map_err(|e| AssistantError::Upstream(format!("invalid response: {}", e)))?;
        first_choice_content(&body)
    }
}

/// Text of `choices[0].message.content` in a chat completion response.
pub fn first_choice_content(body: &Value) -> Result<String, AssistantError> {
    let choices = body
        .get("choices")
        .and_then(Value::as_array)
        .filter(|choices| !choices.is_empty())
        .ok_or_else(|| AssistantError::Upstream("assistant returned no choices".to_string()))?;
    Ok(choices[0]
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Turns filter requests into filter expressions through a provider.
pub struct Assistant {
    provider: Box<dyn CompletionProvider>,
}

impl Assistant {
    pub fn new(provider: Box<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// The production assistant, when an API key is configured and the
    /// `assistant` feature is compiled in.
    pub fn from_config(config: &AssistantConfig) -> Option<Self> {
        #[cfg(feature = "assistant")]
        {
            let settings = AssistantSettings::from_env(config)?;
            debug!(
                "Assistant enabled (model {}, endpoint {})",
                settings.model,
                settings.completions_url()
            );
            Some(Self::new(Box::new(OpenAiProvider::new(settings))))
        }
        #[cfg(not(feature = "assistant"))]
        {
            let _ = config;
            None
        }
    }

    pub fn generate_filter_query(&self, request: &FilterRequest) -> Result<String, AssistantError> {
        if request.prompt.trim().is_empty() {
            return Err(AssistantError::InvalidRequest("prompt is empty".to_string()));
        }
        debug!(
            "Sending assistant prompt {:?} with columns [{}]",
            request.prompt,
            request.column_hints.join(", ")
        );
        let raw = self
            .provider
            .complete(SYSTEM_PROMPT, &request.user_message())?;
        let query = normalize_assistant_query(&raw)?;
        debug!("Assistant filter response normalized to {:?}", query);
        Ok(query)
    }
}

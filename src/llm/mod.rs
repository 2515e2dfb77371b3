//! Language-model access
//!
//! Every provider sits behind [`LanguageModel`]. HTTP providers read the
//! rendered chat messages; the offline planner and the scripted model read
//! the structured view carried alongside them.

mod offline;
mod openai;
mod retry;
mod scripted;

pub use offline::OfflinePlanner;
pub use openai::OpenAiCompatible;
pub use scripted::ScriptedModel;

use crate::agent::ToolInvocation;
use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("API key not set: environment variable {var} is empty")]
    MissingApiKey { var: String },

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Status { status, .. } => *status >= 500,
            LlmError::RateLimited | LlmError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// What the orchestrator is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Pick the next tool or answer
    Select,
    /// Answer from the evidence gathered so far
    Synthesize,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub question: String,
    pub invocations: Vec<ToolInvocation>,
    pub tools: Vec<&'static str>,
    /// Why the previous selection reply was rejected
    pub feedback: Option<String>,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Build the configured provider
pub fn model_from_config(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    match config.provider.as_str() {
        "offline" => Ok(Arc::new(OfflinePlanner::new())),
        "openai" => Ok(Arc::new(OpenAiCompatible::from_config(config, true)?)),
        "ollama" => Ok(Arc::new(OpenAiCompatible::from_config(config, false)?)),
        other => Err(LlmError::UnknownProvider(other.to_string())),
    }
}

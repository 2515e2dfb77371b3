use super::retry::send_with_retry;
use super::{CompletionRequest, LanguageModel, LlmError, Message};
use crate::config::LlmConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434/v1";

/// Chat-completions client for OpenAI and compatible servers (Ollama, vLLM, ...)
pub struct OpenAiCompatible {
    client: reqwest::Client,
    provider: &'static str,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatible {
    /// `require_key` is false for local servers that accept anonymous requests
    pub fn from_config(config: &LlmConfig, require_key: bool) -> Result<Self, LlmError> {
        let provider = if require_key { "openai" } else { "ollama" };
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if require_key && api_key.is_none() {
            return Err(LlmError::MissingApiKey {
                var: config.api_key_env.clone(),
            });
        }

        let base_url = if !require_key && config.base_url == OPENAI_DEFAULT_URL {
            OLLAMA_DEFAULT_URL.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            provider,
            base_url,
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    fn name(&self) -> &str {
        self.provider
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };
        let url = format!("{}/chat/completions", self.base_url);

        let response = send_with_retry(self.provider, self.max_retries, || {
            let mut builder = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                builder = builder.bearer_auth(key);
            }
            builder.send()
        })
        .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            tracing::error!("{} API error {}: {}", self.provider, status, text);
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: self.provider.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::super::retry::tests::spawn_mock_server;
    use super::super::Phase;
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            phase: Phase::Select,
            messages: vec![Message::system("sys"), Message::user("hi")],
            question: "hi".to_string(),
            invocations: Vec::new(),
            tools: Vec::new(),
            feedback: None,
        }
    }

    fn local(port: u16) -> OpenAiCompatible {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            base_url: format!("http://127.0.0.1:{port}/v1"),
            api_key_env: "CODEPAL_TEST_UNSET_KEY".to_string(),
            max_retries: 1,
            ..LlmConfig::default()
        };
        OpenAiCompatible::from_config(&config, false).unwrap()
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LlmConfig {
            api_key_env: "CODEPAL_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            OpenAiCompatible::from_config(&config, true),
            Err(LlmError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_ollama_default_url() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            ..LlmConfig::default()
        };
        let model = OpenAiCompatible::from_config(&config, false).unwrap();
        assert_eq!(model.base_url(), OLLAMA_DEFAULT_URL);
    }

    #[tokio::test]
    async fn test_complete_parses_first_choice() {
        let ok = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 58\r\n\r\n{\"choices\":[{\"message\":{\"content\":\"the answer is here\"}}]}";
        let (port, _handle) = spawn_mock_server(vec![ok]).await;
        let reply = local(port).complete(&request()).await.unwrap();
        assert_eq!(reply, "the answer is here");
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let empty = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 14\r\n\r\n{\"choices\":[]}";
        let (port, _handle) = spawn_mock_server(vec![empty]).await;
        let err = local(port).complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { .. }));
    }
}

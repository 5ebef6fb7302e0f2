//! OpenAI-compatible chat-completions oracle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationOracle, OracleError, OracleRequest, OracleResponse};
use crate::prompt::render::truncate_chars;

/// HTTP backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpOracleConfig {
    /// Full chat-completions URL.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl Default for HttpOracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: Some(0.7),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client.
pub struct HttpChatOracle {
    config: HttpOracleConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl HttpChatOracle {
    /// Build a client, reading the API key from `config.api_key_env`.
    pub fn new(config: HttpOracleConfig) -> Result<Self, OracleError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                OracleError::Config(format!("environment variable {} is not set", config.api_key_env))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: HttpOracleConfig, api_key: String) -> Result<Self, OracleError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("pdeforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OracleError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            api_key,
            http_client,
        })
    }

    fn body<'a>(&'a self, request: &'a OracleRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

fn parse_reply(body: &str) -> Result<OracleResponse, OracleError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| OracleError::Transport(format!("malformed chat response: {e}")))?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or(OracleError::EmptyResponse)?;
    Ok(OracleResponse {
        text,
        model: parsed.model,
    })
}

#[async_trait]
impl GenerationOracle for HttpChatOracle {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        debug!(
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            call_id = %request.call_id,
            prompt_chars = request.prompt.len(),
            "sending chat completion"
        );
        let response = self
            .http_client
            .post(&self.config.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(OracleError::Status {
                status: status.as_u16(),
                body: truncate_chars(&body, 500),
            });
        }
        parse_reply(&body)
    }
}

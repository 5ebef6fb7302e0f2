//! Generation oracle: the external code-producing collaborator.
//!
//! The loop treats the oracle as an opaque, unreliable text-to-text
//! function. Adapters:
//! - [`CommandOracle`]: prompt on stdin, response on stdout of a local command
//! - [`HttpChatOracle`]: OpenAI-compatible chat completions endpoint
//! - [`ScriptedOracle`]: canned responses for tests and offline replays

pub mod command;
pub mod error;
pub mod extract;
pub mod http;
pub mod retry;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use command::{CommandOracle, SYSTEM_PROMPT_ENV};
pub use error::OracleError;
pub use extract::extract_code;
pub use http::{HttpChatOracle, HttpOracleConfig};
pub use retry::{call_with_retry, CircuitBreaker, RetryPolicy};
pub use scripted::{ScriptedOracle, ScriptedReply};

/// One generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Provenance id recorded on the resulting candidate.
    pub call_id: Uuid,
    pub system: String,
    pub prompt: String,
}

impl OracleRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            system: system.into(),
            prompt: prompt.into(),
        }
    }
}

/// Raw oracle reply; code is extracted by the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub text: String,
    /// Model that produced the text, when the backend reports it.
    pub model: Option<String>,
}

impl OracleResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }
}

/// The code-producing collaborator.
#[async_trait]
pub trait GenerationOracle: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// Which adapter backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleBackend {
    #[default]
    Command,
    Http,
}

/// `[oracle]` configuration section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    /// Argv for the command backend.
    pub command: Vec<String>,
    pub http: HttpOracleConfig,
}

/// Build the configured adapter.
pub fn build_oracle(config: &OracleConfig) -> Result<Arc<dyn GenerationOracle>, OracleError> {
    match config.backend {
        OracleBackend::Command => Ok(Arc::new(CommandOracle::from_argv(&config.command)?)),
        OracleBackend::Http => Ok(Arc::new(HttpChatOracle::new(config.http.clone())?)),
    }
}

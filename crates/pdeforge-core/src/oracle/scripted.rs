//! Scripted oracle: replays canned replies in order.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerationOracle, OracleError, OracleRequest, OracleResponse};

/// One canned reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    /// Transport failure with this message.
    Fail(String),
    /// HTTP-style status failure.
    Status(u16),
    /// Never resolves; exercises the per-call timeout.
    Hang,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptedReply::Text(text.into())
    }

    /// A reply wrapping `code` in a fenced block tagged `language`.
    pub fn code(language: &str, code: &str) -> Self {
        ScriptedReply::Text(format!("Here is the solver.\n\n```{language}\n{code}\n```\n"))
    }
}

/// Oracle answering from a fixed script, recording every request.
///
/// Running past the end of the script is a permanent error.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GenerationOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let next = self
            .replies
            .lock()
            .map_err(|_| OracleError::Config("scripted oracle state poisoned".into()))?
            .pop_front();

        match next {
            Some(ScriptedReply::Text(text)) => Ok(OracleResponse {
                text,
                model: Some("scripted".to_string()),
            }),
            Some(ScriptedReply::Fail(message)) => Err(OracleError::Transport(message)),
            Some(ScriptedReply::Status(status)) => Err(OracleError::Status {
                status,
                body: String::new(),
            }),
            Some(ScriptedReply::Hang) => {
                std::future::pending::<()>().await;
                Err(OracleError::Transport("unreachable".into()))
            }
            None => Err(OracleError::Config("scripted oracle has no replies left".into())),
        }
    }
}

//! Oracle error taxonomy.

/// Failures talking to the generation oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("oracle call timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("oracle returned an empty response")]
    EmptyResponse,

    #[error("oracle command failed: {0}")]
    Command(String),

    #[error("oracle misconfigured: {0}")]
    Config(String),

    #[error("oracle unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl OracleError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Client errors other than request timeout (408), rate limiting (429)
    /// and configuration problems are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            OracleError::Status { status, .. } => matches!(*status, 408 | 429) || *status >= 500,
            OracleError::Config(_) | OracleError::Exhausted { .. } => false,
            OracleError::Transport(_)
            | OracleError::Timeout { .. }
            | OracleError::EmptyResponse
            | OracleError::Command(_) => true,
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OracleError::Transport(format!("request timed out: {err}"))
        } else {
            OracleError::Transport(err.to_string())
        }
    }
}

//! Evaluation results: what running a candidate measured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a candidate produced no numeric signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// The oracle response had no extractable code.
    Unparseable,
    /// The run command could not be started.
    Spawn,
    /// The process exited unsuccessfully (exception, crash, signal).
    NonZeroExit,
    Timeout,
    /// The run finished but wrote no output manifest or tensor.
    MissingOutput,
    MalformedOutput,
    ShapeMismatch,
    /// Scratch directory or input staging failed.
    Setup,
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionErrorKind::Unparseable => "unparseable",
            ExecutionErrorKind::Spawn => "spawn",
            ExecutionErrorKind::NonZeroExit => "non_zero_exit",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::MissingOutput => "missing_output",
            ExecutionErrorKind::MalformedOutput => "malformed_output",
            ExecutionErrorKind::ShapeMismatch => "shape_mismatch",
            ExecutionErrorKind::Setup => "setup",
        };
        write!(f, "{s}")
    }
}

/// Terminal status reported by the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Output was finite and scored.
    Completed,
    /// Output contained NaN or infinite values.
    NonFinite,
    ExecutionError {
        kind: ExecutionErrorKind,
        message: String,
    },
}

/// Error measured at one spatial resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionError {
    pub resolution: usize,
    pub normalized_error: f64,
}

/// Everything measured for one candidate. Produced exactly once per
/// candidate and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub candidate_index: usize,
    pub status: EvaluationStatus,
    /// Normalized RMSE at the primary resolution; `None` when the run
    /// failed or the value was not finite.
    pub normalized_error: Option<f64>,
    /// Empirical order of convergence across resolutions (advisory).
    pub convergence_order: Option<f64>,
    pub resolution_errors: Vec<ResolutionError>,
    pub runtime_secs: f64,
    /// Captured stdout/stderr, bounded.
    pub output: String,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationResult {
    pub fn execution_error(
        candidate_index: usize,
        kind: ExecutionErrorKind,
        message: impl Into<String>,
        output: String,
        runtime_secs: f64,
    ) -> Self {
        Self {
            candidate_index,
            status: EvaluationStatus::ExecutionError {
                kind,
                message: message.into(),
            },
            normalized_error: None,
            convergence_order: None,
            resolution_errors: Vec::new(),
            runtime_secs,
            output,
            evaluated_at: Utc::now(),
        }
    }

    pub fn non_finite(candidate_index: usize, output: String, runtime_secs: f64) -> Self {
        Self {
            candidate_index,
            status: EvaluationStatus::NonFinite,
            normalized_error: None,
            convergence_order: None,
            resolution_errors: Vec::new(),
            runtime_secs,
            output,
            evaluated_at: Utc::now(),
        }
    }

    pub fn completed(
        candidate_index: usize,
        normalized_error: f64,
        runtime_secs: f64,
        output: String,
    ) -> Self {
        Self {
            candidate_index,
            status: EvaluationStatus::Completed,
            normalized_error: Some(normalized_error),
            convergence_order: None,
            resolution_errors: Vec::new(),
            runtime_secs,
            output,
            evaluated_at: Utc::now(),
        }
    }

    pub fn with_convergence(
        mut self,
        resolution_errors: Vec<ResolutionError>,
        convergence_order: Option<f64>,
    ) -> Self {
        self.resolution_errors = resolution_errors;
        self.convergence_order = convergence_order;
        self
    }

    /// The error, only when the run completed with a finite value.
    pub fn finite_error(&self) -> Option<f64> {
        match self.status {
            EvaluationStatus::Completed => self.normalized_error.filter(|e| e.is_finite()),
            _ => None,
        }
    }

    /// Error message for execution failures, empty otherwise.
    pub fn error_message(&self) -> &str {
        match &self.status {
            EvaluationStatus::ExecutionError { message, .. } => message,
            _ => "",
        }
    }
}

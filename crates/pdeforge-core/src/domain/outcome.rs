//! Closed outcome taxonomy used to pick the next repair request.

use serde::{Deserialize, Serialize};

/// Classification of one evaluated candidate.
///
/// Variant order mirrors classification precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    ExecutionFailure,
    NumericalBlowup,
    AccuracyShortfall,
    PerformanceShortfall,
    Accepted,
}

impl OutcomeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeKind::ExecutionFailure => "execution_failure",
            OutcomeKind::NumericalBlowup => "numerical_blowup",
            OutcomeKind::AccuracyShortfall => "accuracy_shortfall",
            OutcomeKind::PerformanceShortfall => "performance_shortfall",
            OutcomeKind::Accepted => "accepted",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Session outcome: what the refinement loop hands back to its caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::history::{Attempt, History};
use crate::domain::problem::ProblemSpec;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Termination {
    /// A candidate met the acceptance criteria.
    Accepted { index: usize },
    /// The iteration budget ran out first.
    Exhausted,
    /// The oracle could not be reached or kept returning unusable text.
    FatalOracleFailure { reason: String },
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Accepted { index } => write!(f, "accepted (attempt {index})"),
            Termination::Exhausted => write!(f, "exhausted"),
            Termination::FatalOracleFailure { reason } => {
                write!(f, "fatal oracle failure: {reason}")
            }
        }
    }
}

/// Final report of one refinement session, full history included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub problem: ProblemSpec,
    pub termination: Termination,
    pub best_index: Option<usize>,
    pub iterations: u32,
    pub history: History,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SessionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.termination, Termination::Accepted { .. })
    }

    pub fn best(&self) -> Option<&Attempt> {
        self.best_index.and_then(|i| self.history.get(i))
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

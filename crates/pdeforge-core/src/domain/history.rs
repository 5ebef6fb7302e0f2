//! Append-only record of every attempt in a session.

use serde::{Deserialize, Serialize};

use crate::domain::candidate::Candidate;
use crate::domain::error::{ForgeError, Result};
use crate::domain::evaluation::EvaluationResult;
use crate::domain::outcome::OutcomeKind;

/// A candidate together with its single evaluation and classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub candidate: Candidate,
    pub evaluation: EvaluationResult,
    pub outcome: OutcomeKind,
}

/// Ordered attempts, oldest first. Insertion order is what the oracle sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    attempts: Vec<Attempt>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one attempt.
    ///
    /// The candidate must carry the next ordinal and the evaluation must
    /// refer to that same candidate, so every candidate has exactly one
    /// evaluation and none is recorded twice.
    pub fn record(
        &mut self,
        candidate: Candidate,
        evaluation: EvaluationResult,
        outcome: OutcomeKind,
    ) -> Result<&Attempt> {
        let expected = self.attempts.len();
        if candidate.index != expected {
            return Err(ForgeError::HistoryOrder {
                expected,
                actual: candidate.index,
            });
        }
        if evaluation.candidate_index != expected {
            return Err(ForgeError::HistoryOrder {
                expected,
                actual: evaluation.candidate_index,
            });
        }
        self.attempts.push(Attempt {
            candidate,
            evaluation,
            outcome,
        });
        Ok(&self.attempts[expected])
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn get(&self, index: usize) -> Option<&Attempt> {
        self.attempts.get(index)
    }

    /// Index the next recorded candidate must carry.
    pub fn next_index(&self) -> usize {
        self.attempts.len()
    }

    pub fn outcomes(&self) -> Vec<OutcomeKind> {
        self.attempts.iter().map(|a| a.outcome).collect()
    }

    /// Best-so-far attempt.
    ///
    /// Accepted attempts win over everything else; otherwise any attempt
    /// with a finite error competes. Lowest error wins, the earliest attempt
    /// wins ties. `None` when no attempt produced a finite error.
    pub fn best(&self) -> Option<&Attempt> {
        lowest_error(self.attempts.iter().filter(|a| a.outcome == OutcomeKind::Accepted))
            .or_else(|| lowest_error(self.attempts.iter()))
    }
}

fn lowest_error<'a>(attempts: impl Iterator<Item = &'a Attempt>) -> Option<&'a Attempt> {
    attempts
        .filter_map(|a| a.evaluation.finite_error().map(|e| (e, a)))
        .min_by(|(x, _), (y, _)| x.total_cmp(y))
        .map(|(_, a)| a)
}

//! Candidate evaluation: execute, capture, score.
//!
//! [`SubprocessEvaluator`] runs each candidate in a scratch directory per
//! reference case and scores the outputs with normalized RMSE. Failures of
//! any kind come back as an [`EvaluationResult`]; nothing propagates past
//! [`Evaluator::evaluate`].

pub mod driver;
pub mod reference;
pub mod sandbox;
pub mod scoring;
pub mod subprocess;

use async_trait::async_trait;

use crate::domain::{Candidate, EvaluationResult, ProblemSpec};

pub use reference::{ReferenceCase, ReferenceSet, TensorEncoding, TensorEntry};
pub use subprocess::{EvaluatorConfig, InputManifest, OutputManifest, SubprocessEvaluator};

/// Runs one candidate and measures it.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Produce exactly one result for `candidate`. Never fails.
    async fn evaluate(&self, candidate: &Candidate, spec: &ProblemSpec) -> EvaluationResult;
}

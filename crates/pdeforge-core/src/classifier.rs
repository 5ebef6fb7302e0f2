//! Outcome classification: evaluator result → closed taxonomy.

use crate::domain::{EvaluationResult, EvaluationStatus, OutcomeKind, ProblemSpec};

/// Classify an evaluation against the spec's targets.
///
/// Precedence, first match wins:
/// 1. execution error → `ExecutionFailure`
/// 2. non-finite output (or no finite error) → `NumericalBlowup`
/// 3. error > threshold → `AccuracyShortfall`
/// 4. runtime > budget → `PerformanceShortfall`
/// 5. `Accepted`
pub fn classify(result: &EvaluationResult, spec: &ProblemSpec) -> OutcomeKind {
    match result.status {
        EvaluationStatus::ExecutionError { .. } => return OutcomeKind::ExecutionFailure,
        EvaluationStatus::NonFinite => return OutcomeKind::NumericalBlowup,
        EvaluationStatus::Completed => {}
    }

    let Some(error) = result.finite_error() else {
        return OutcomeKind::NumericalBlowup;
    };
    if error > spec.targets.accuracy_threshold {
        return OutcomeKind::AccuracyShortfall;
    }
    if result.runtime_secs > spec.targets.runtime_budget_secs {
        return OutcomeKind::PerformanceShortfall;
    }
    OutcomeKind::Accepted
}

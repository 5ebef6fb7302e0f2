//! Structured lifecycle events for refinement sessions.
//!
//! Every event carries `event = "<name>"` and the session id so a session
//! can be reconstructed from logs alone.

use tracing::{info, warn};
use uuid::Uuid;

/// Span covering one session; attach with `tracing::Instrument`.
pub fn session_span(session_id: &Uuid, problem_id: &str) -> tracing::Span {
    tracing::info_span!("pdeforge.session", session_id = %session_id, problem = %problem_id)
}

pub fn emit_session_started(session_id: &Uuid, problem_id: &str, max_iterations: u32) {
    info!(
        event = "session.started",
        session_id = %session_id,
        problem = %problem_id,
        max_iterations = max_iterations,
    );
}

/// Loop state change.
pub fn emit_transition(session_id: &Uuid, from: &str, to: &str, iteration: u32) {
    info!(
        event = "session.transition",
        session_id = %session_id,
        from = %from,
        to = %to,
        iteration = iteration,
    );
}

pub fn emit_candidate_generated(
    session_id: &Uuid,
    index: usize,
    template: &str,
    parseable: bool,
    source_chars: usize,
) {
    info!(
        event = "candidate.generated",
        session_id = %session_id,
        index = index,
        template = %template,
        parseable = parseable,
        source_chars = source_chars,
    );
}

pub fn emit_candidate_evaluated(
    session_id: &Uuid,
    index: usize,
    outcome: &str,
    normalized_error: Option<f64>,
    runtime_secs: f64,
) {
    info!(
        event = "candidate.evaluated",
        session_id = %session_id,
        index = index,
        outcome = %outcome,
        normalized_error = ?normalized_error,
        runtime_secs = runtime_secs,
    );
}

pub fn emit_session_finished(
    session_id: &Uuid,
    termination: &str,
    iterations: u32,
    best_index: Option<usize>,
    duration_ms: u64,
) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        termination = %termination,
        iterations = iterations,
        best_index = ?best_index,
        duration_ms = duration_ms,
    );
}

/// Artifact sink failure; never fatal to the session.
pub fn emit_sink_error(session_id: &Uuid, error: &dyn std::fmt::Display) {
    warn!(event = "sink.error", session_id = %session_id, error = %error);
}

//! Refinement loop: generate, evaluate, classify, repeat.
//!
//! - one candidate per iteration, always a full replacement program
//! - bounded by [`SessionPolicy::max_iterations`]; oracle retries do not count
//! - every candidate gets exactly one evaluation, recorded in order
//! - persistence goes through the injected [`SessionSink`]

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, Instrument};
use uuid::Uuid;

use crate::classifier::classify;
use crate::domain::{
    Candidate, EvaluationResult, ExecutionErrorKind, ForgeError, History, OutcomeKind,
    ProblemSpec, Result, SessionOutcome, Termination,
};
use crate::evaluator::Evaluator;
use crate::metrics::METRICS;
use crate::obs;
use crate::oracle::{
    call_with_retry, extract_code, CircuitBreaker, GenerationOracle, OracleRequest, RetryPolicy,
};
use crate::prompt::{ComposedRequest, PromptComposer};
use crate::sink::SessionSink;

/// Bounds and acceptance policy for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Maximum number of candidates generated.
    pub max_iterations: u32,
    /// When false, a candidate that meets accuracy but overruns the runtime
    /// budget ends the session as accepted.
    pub strict_runtime: bool,
    /// Consecutive responses without extractable code before giving up.
    pub max_unparseable: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            strict_runtime: false,
            max_unparseable: 3,
        }
    }
}

impl SessionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(ForgeError::InvalidConfig(
                "session.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.max_unparseable == 0 {
            return Err(ForgeError::InvalidConfig(
                "session.max_unparseable must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `outcome` ends the session as accepted.
    pub fn accepts(&self, outcome: OutcomeKind) -> bool {
        match outcome {
            OutcomeKind::Accepted => true,
            OutcomeKind::PerformanceShortfall => !self.strict_runtime,
            _ => false,
        }
    }
}

/// Loop state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Generating,
    Evaluating,
    Classifying,
    Continue,
    Accepted,
    Exhausted,
    FatalOracleFailure,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::Init => "init",
            LoopState::Generating => "generating",
            LoopState::Evaluating => "evaluating",
            LoopState::Classifying => "classifying",
            LoopState::Continue => "continue",
            LoopState::Accepted => "accepted",
            LoopState::Exhausted => "exhausted",
            LoopState::FatalOracleFailure => "fatal_oracle_failure",
        }
    }

    fn terminal(termination: &Termination) -> Self {
        match termination {
            Termination::Accepted { .. } => LoopState::Accepted,
            Termination::Exhausted => LoopState::Exhausted,
            Termination::FatalOracleFailure { .. } => LoopState::FatalOracleFailure,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One refinement session over a fixed problem.
///
/// Construction validates everything that can be checked up front; `run`
/// then always produces a [`SessionOutcome`]. Dropping the `run` future
/// aborts the session and kills any running candidate.
pub struct RefinementSession {
    session_id: Uuid,
    spec: ProblemSpec,
    oracle: Arc<dyn GenerationOracle>,
    evaluator: Arc<dyn Evaluator>,
    sink: Arc<dyn SessionSink>,
    composer: PromptComposer,
    retry: RetryPolicy,
    policy: SessionPolicy,
}

impl RefinementSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: ProblemSpec,
        oracle: Arc<dyn GenerationOracle>,
        evaluator: Arc<dyn Evaluator>,
        sink: Arc<dyn SessionSink>,
        composer: PromptComposer,
        retry: RetryPolicy,
        policy: SessionPolicy,
    ) -> Result<Self> {
        spec.validate()?;
        policy.validate()?;
        composer.check_fits(&spec)?;
        Ok(Self {
            session_id: Uuid::new_v4(),
            spec,
            oracle,
            evaluator,
            sink,
            composer,
            retry,
            policy,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn spec(&self) -> &ProblemSpec {
        &self.spec
    }

    /// Run the session to termination.
    pub async fn run(self) -> SessionOutcome {
        let span = obs::session_span(&self.session_id, &self.spec.id);
        self.drive().instrument(span).await
    }

    async fn drive(self) -> SessionOutcome {
        let id = self.session_id;
        let started_at = Utc::now();
        obs::emit_session_started(&id, &self.spec.id, self.policy.max_iterations);
        if let Err(e) = self.sink.session_started(&id, &self.spec) {
            obs::emit_sink_error(&id, &e);
        }

        let max_iterations = self.policy.max_iterations as usize;
        let breaker = CircuitBreaker::new(self.policy.max_unparseable);
        let mut history = History::new();
        let mut latest: Option<OutcomeKind> = None;
        let mut state = LoopState::Init;

        let termination = loop {
            if history.len() >= max_iterations {
                break Termination::Exhausted;
            }
            let index = history.next_index();
            let iteration = index as u32 + 1;

            self.transition(&mut state, LoopState::Generating, iteration);
            let request = self.composer.compose(&self.spec, &history, latest);
            let candidate = match self.generate(index, &request).await {
                Ok(candidate) => candidate,
                Err(reason) => break Termination::FatalOracleFailure { reason },
            };
            if candidate.is_parseable() {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
            obs::emit_candidate_generated(
                &id,
                index,
                request.template.as_str(),
                candidate.is_parseable(),
                candidate.source.chars().count(),
            );

            self.transition(&mut state, LoopState::Evaluating, iteration);
            let evaluation = self.evaluate(&candidate).await;

            self.transition(&mut state, LoopState::Classifying, iteration);
            let outcome = classify(&evaluation, &self.spec);
            obs::emit_candidate_evaluated(
                &id,
                index,
                outcome.as_str(),
                evaluation.finite_error(),
                evaluation.runtime_secs,
            );

            let attempt = match history.record(candidate, evaluation, outcome) {
                Ok(attempt) => attempt,
                Err(e) => {
                    error!(session_id = %id, index = index, error = %e, "failed to record attempt");
                    break Termination::Exhausted;
                }
            };
            if let Err(e) = self.sink.attempt_recorded(&id, &self.spec, &request, attempt) {
                obs::emit_sink_error(&id, &e);
            }

            if self.policy.accepts(outcome) {
                break Termination::Accepted { index };
            }
            if breaker.is_open() {
                break Termination::FatalOracleFailure {
                    reason: format!(
                        "{} consecutive responses without a fenced {} code block",
                        breaker.failure_count(),
                        self.spec.language
                    ),
                };
            }
            if history.len() < max_iterations {
                self.transition(&mut state, LoopState::Continue, iteration);
            }
            latest = Some(outcome);
        };

        let iterations = history.len() as u32;
        self.transition(&mut state, LoopState::terminal(&termination), iterations);
        METRICS.flush(&self.session_id);

        let outcome = SessionOutcome {
            session_id: id,
            problem: self.spec,
            termination,
            best_index: history.best().map(|a| a.candidate.index),
            iterations,
            history,
            started_at,
            finished_at: Utc::now(),
        };
        obs::emit_session_finished(
            &id,
            &outcome.termination.to_string(),
            outcome.iterations,
            outcome.best_index,
            outcome.duration_ms(),
        );
        if let Err(e) = self.sink.session_finished(&outcome) {
            obs::emit_sink_error(&id, &e);
        }
        outcome
    }

    /// Ask the oracle for the next candidate. `Err` carries the reason the
    /// oracle is considered gone for this session.
    async fn generate(
        &self,
        index: usize,
        request: &ComposedRequest,
    ) -> std::result::Result<Candidate, String> {
        let oracle_request = OracleRequest::new(request.system.clone(), request.prompt.clone());
        let response = call_with_retry(self.oracle.as_ref(), &oracle_request, &self.retry)
            .await
            .map_err(|e| e.to_string())?;

        Ok(match extract_code(&response.text, &self.spec.language) {
            Ok(source) => Candidate::new(index, source, response.text, oracle_request.call_id),
            Err(reason) => {
                Candidate::unparseable(index, response.text, oracle_request.call_id, reason)
            }
        })
    }

    async fn evaluate(&self, candidate: &Candidate) -> EvaluationResult {
        let index = candidate.index;
        if let Some(reason) = &candidate.parse_error {
            return EvaluationResult::execution_error(
                index,
                ExecutionErrorKind::Unparseable,
                reason.clone(),
                String::new(),
                0.0,
            );
        }

        let evaluation = self.evaluator.evaluate(candidate, &self.spec).await;
        if evaluation.candidate_index == index {
            return evaluation;
        }
        EvaluationResult::execution_error(
            index,
            ExecutionErrorKind::Setup,
            format!(
                "evaluator reported candidate {} while evaluating {index}",
                evaluation.candidate_index
            ),
            evaluation.output,
            evaluation.runtime_secs,
        )
    }

    fn transition(&self, state: &mut LoopState, to: LoopState, iteration: u32) {
        obs::emit_transition(&self.session_id, state.as_str(), to.as_str(), iteration);
        *state = to;
    }
}

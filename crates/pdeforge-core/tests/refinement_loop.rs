//! Refinement loop behaviour with a scripted oracle and a planned evaluator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pdeforge_core::domain::Attempt;
use pdeforge_core::{
    catalog, read_session_artifact, Candidate, ComposedRequest, ComposerConfig, EvaluationResult,
    Evaluator, ExecutionErrorKind, ForgeError, FsArtifactSink, NullSink, OutcomeKind, ProblemSpec,
    PromptComposer, RefinementSession, RetryPolicy, ScriptedOracle, ScriptedReply, SessionOutcome,
    SessionPolicy, SessionSink, TemplateKind, Termination,
};
use tempfile::tempdir;
use uuid::Uuid;

const TRACEBACK: &str = "Traceback (most recent call last):\n  File \"solver.py\", line 12, in solver\n    dt = dx / 0\nZeroDivisionError: division by zero";

/// What the evaluator reports for the candidate with the same index.
#[derive(Debug, Clone, Copy)]
enum Plan {
    Crash,
    Blowup,
    Scored { error: f64, runtime: f64 },
}

fn scored(error: f64, runtime: f64) -> Plan {
    Plan::Scored { error, runtime }
}

struct PlannedEvaluator {
    plans: Vec<Plan>,
    calls: AtomicUsize,
}

impl PlannedEvaluator {
    fn new(plans: Vec<Plan>) -> Arc<Self> {
        Arc::new(Self {
            plans,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for PlannedEvaluator {
    async fn evaluate(&self, candidate: &Candidate, _spec: &ProblemSpec) -> EvaluationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = candidate.index;
        match self.plans.get(index).copied().unwrap_or(Plan::Crash) {
            Plan::Crash => EvaluationResult::execution_error(
                index,
                ExecutionErrorKind::NonZeroExit,
                "process exited with exit status: 1",
                TRACEBACK.to_string(),
                0.4,
            ),
            Plan::Blowup => EvaluationResult::non_finite(index, "step 3: overflow".into(), 2.0),
            Plan::Scored { error, runtime } => {
                EvaluationResult::completed(index, error, runtime, String::new())
            }
        }
    }
}

/// Remembers which template produced each attempt.
#[derive(Default)]
struct RecordingSink {
    templates: Mutex<Vec<TemplateKind>>,
    finished: Mutex<Option<SessionOutcome>>,
}

impl SessionSink for RecordingSink {
    fn session_started(&self, _session_id: &Uuid, _spec: &ProblemSpec) -> pdeforge_core::Result<()> {
        Ok(())
    }

    fn attempt_recorded(
        &self,
        _session_id: &Uuid,
        _spec: &ProblemSpec,
        request: &ComposedRequest,
        _attempt: &Attempt,
    ) -> pdeforge_core::Result<()> {
        self.templates.lock().unwrap().push(request.template);
        Ok(())
    }

    fn session_finished(&self, outcome: &SessionOutcome) -> pdeforge_core::Result<()> {
        *self.finished.lock().unwrap() = Some(outcome.clone());
        Ok(())
    }
}

struct FailingSink;

impl SessionSink for FailingSink {
    fn session_started(&self, _session_id: &Uuid, _spec: &ProblemSpec) -> pdeforge_core::Result<()> {
        Err(ForgeError::InvalidConfig("disk full".into()))
    }

    fn attempt_recorded(
        &self,
        _session_id: &Uuid,
        _spec: &ProblemSpec,
        _request: &ComposedRequest,
        _attempt: &Attempt,
    ) -> pdeforge_core::Result<()> {
        Err(ForgeError::InvalidConfig("disk full".into()))
    }

    fn session_finished(&self, _outcome: &SessionOutcome) -> pdeforge_core::Result<()> {
        Err(ForgeError::InvalidConfig("disk full".into()))
    }
}

fn spec() -> ProblemSpec {
    let mut spec = catalog::builtin("burgers").unwrap();
    spec.targets.accuracy_threshold = 0.01;
    spec.targets.runtime_budget_secs = 600.0;
    spec
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        timeout_ms: 5_000,
        max_retries,
        backoff_base_ms: 1,
    }
}

fn solver(tag: usize) -> ScriptedReply {
    ScriptedReply::code(
        "python",
        &format!("import numpy as np\n\ndef solver(u0_batch, t_coordinate, nu):\n    # v{tag}\n    return u0_batch\n"),
    )
}

fn solvers(n: usize) -> Vec<ScriptedReply> {
    (0..n).map(solver).collect()
}

struct Harness {
    oracle: Arc<ScriptedOracle>,
    evaluator: Arc<PlannedEvaluator>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(replies: Vec<ScriptedReply>, plans: Vec<Plan>) -> Self {
        Self {
            oracle: Arc::new(ScriptedOracle::new(replies)),
            evaluator: PlannedEvaluator::new(plans),
            sink: Arc::new(RecordingSink::default()),
        }
    }

    async fn run(&self, retry: RetryPolicy, policy: SessionPolicy) -> SessionOutcome {
        let max_iterations = policy.max_iterations;
        let session = RefinementSession::new(
            spec(),
            self.oracle.clone(),
            self.evaluator.clone(),
            self.sink.clone(),
            PromptComposer::new(ComposerConfig::default()),
            retry,
            policy,
        )
        .unwrap();
        let outcome = session.run().await;
        assert_invariants(&outcome, max_iterations);
        outcome
    }

    fn templates(&self) -> Vec<TemplateKind> {
        self.sink.templates.lock().unwrap().clone()
    }
}

fn assert_invariants(outcome: &SessionOutcome, max_iterations: u32) {
    assert!(outcome.iterations <= max_iterations);
    assert_eq!(outcome.iterations as usize, outcome.history.len());
    for (position, attempt) in outcome.history.attempts().iter().enumerate() {
        assert_eq!(attempt.candidate.index, position);
        assert_eq!(attempt.evaluation.candidate_index, position);
    }
    if let Termination::Accepted { index } = outcome.termination {
        let accepted = outcome.history.get(index).unwrap();
        let error = accepted.evaluation.finite_error().unwrap();
        assert!(error <= outcome.problem.targets.accuracy_threshold);
        assert_eq!(index + 1, outcome.history.len());
    }
}

#[tokio::test]
async fn execution_failure_gets_repair_prompt_with_traceback() {
    let h = Harness::new(solvers(2), vec![Plan::Crash, scored(0.004, 50.0)]);
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert_eq!(outcome.termination, Termination::Accepted { index: 1 });
    assert_eq!(
        outcome.history.outcomes(),
        vec![OutcomeKind::ExecutionFailure, OutcomeKind::Accepted]
    );
    assert_eq!(h.templates(), vec![TemplateKind::Initial, TemplateKind::ExecutionRepair]);

    let requests = h.oracle.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].prompt.contains("ZeroDivisionError: division by zero"));
    assert!(requests[1].prompt.contains("# v0"));

    // every candidate is a full replacement program
    let second = outcome.history.get(1).unwrap();
    assert!(second.candidate.source.contains("# v1"));
    assert!(!second.candidate.source.contains("# v0"));
    assert_eq!(outcome.best_index, Some(1));
}

#[tokio::test]
async fn numerical_blowup_gets_stability_prompt() {
    let h = Harness::new(solvers(2), vec![Plan::Blowup, scored(0.004, 50.0)]);
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert_eq!(outcome.history.get(0).unwrap().outcome, OutcomeKind::NumericalBlowup);
    assert_eq!(outcome.history.get(0).unwrap().evaluation.normalized_error, None);
    assert_eq!(h.templates(), vec![TemplateKind::Initial, TemplateKind::StabilityRepair]);
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn accuracy_shortfall_continues_with_growing_history() {
    let h = Harness::new(
        solvers(3),
        vec![scored(0.15, 30.0), scored(0.05, 30.0), scored(0.004, 30.0)],
    );
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert_eq!(
        outcome.history.outcomes(),
        vec![
            OutcomeKind::AccuracyShortfall,
            OutcomeKind::AccuracyShortfall,
            OutcomeKind::Accepted
        ]
    );
    assert_eq!(
        h.templates(),
        vec![TemplateKind::Initial, TemplateKind::Improvement, TemplateKind::Improvement]
    );
    let requests = h.oracle.requests();
    // the third request digests both earlier attempts, oldest first
    let third = &requests[2].prompt;
    let first_pos = third.find("# v0").unwrap();
    let second_pos = third.find("# v1").unwrap();
    assert!(first_pos < second_pos);
    assert_eq!(outcome.termination, Termination::Accepted { index: 2 });
}

#[tokio::test]
async fn first_candidate_meeting_targets_is_accepted() {
    let h = Harness::new(solvers(3), vec![scored(0.004, 50.0)]);
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert_eq!(outcome.termination, Termination::Accepted { index: 0 });
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.best_index, Some(0));
    assert_eq!(outcome.best().unwrap().evaluation.normalized_error, Some(0.004));
    assert_eq!(h.oracle.remaining(), 2);
    assert_eq!(h.sink.finished.lock().unwrap().as_ref(), Some(&outcome));
}

#[tokio::test]
async fn exhausted_session_reports_lowest_finite_error() {
    let h = Harness::new(
        solvers(6),
        vec![
            scored(0.5, 10.0),
            scored(0.2, 10.0),
            Plan::Crash,
            scored(0.3, 10.0),
            Plan::Blowup,
        ],
    );
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.iterations, 5);
    assert_eq!(outcome.best_index, Some(1));
    assert_eq!(h.evaluator.calls(), 5);
    assert_eq!(h.oracle.remaining(), 1);
}

#[tokio::test]
async fn exhausted_session_without_finite_error_has_no_best() {
    let h = Harness::new(solvers(3), vec![Plan::Crash, Plan::Blowup, Plan::Crash]);
    let policy = SessionPolicy {
        max_iterations: 3,
        ..SessionPolicy::default()
    };
    let outcome = h.run(fast_retry(0), policy).await;

    assert_eq!(outcome.termination, Termination::Exhausted);
    assert_eq!(outcome.best_index, None);
    assert!(outcome.best().is_none());
}

#[tokio::test]
async fn performance_shortfall_ends_session_unless_strict() {
    let h = Harness::new(solvers(1), vec![scored(0.004, 900.0)]);
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;
    assert_eq!(outcome.termination, Termination::Accepted { index: 0 });
    assert_eq!(
        outcome.history.get(0).unwrap().outcome,
        OutcomeKind::PerformanceShortfall
    );

    let h = Harness::new(solvers(2), vec![scored(0.004, 900.0), scored(0.006, 100.0)]);
    let strict = SessionPolicy {
        strict_runtime: true,
        ..SessionPolicy::default()
    };
    let outcome = h.run(fast_retry(0), strict).await;
    assert_eq!(outcome.termination, Termination::Accepted { index: 1 });
    assert_eq!(h.templates(), vec![TemplateKind::Initial, TemplateKind::Improvement]);
    // accepted attempts win best-so-far even with a higher error
    assert_eq!(outcome.best_index, Some(1));
}

#[tokio::test]
async fn transient_oracle_failures_do_not_consume_iterations() {
    let replies = vec![
        ScriptedReply::Fail("connection reset".into()),
        ScriptedReply::Status(503),
        ScriptedReply::text("   "),
        solver(0),
    ];
    let h = Harness::new(replies, vec![scored(0.004, 50.0)]);
    let policy = SessionPolicy {
        max_iterations: 1,
        ..SessionPolicy::default()
    };
    let outcome = h.run(fast_retry(3), policy).await;

    assert_eq!(outcome.termination, Termination::Accepted { index: 0 });
    assert_eq!(outcome.iterations, 1);
    assert_eq!(h.oracle.requests().len(), 4);
}

#[tokio::test]
async fn exhausted_retries_end_session_with_history_kept() {
    let replies = vec![
        solver(0),
        ScriptedReply::Fail("connection refused".into()),
        ScriptedReply::Fail("connection refused".into()),
    ];
    let h = Harness::new(replies, vec![scored(0.5, 10.0)]);
    let outcome = h.run(fast_retry(1), SessionPolicy::default()).await;

    match &outcome.termination {
        Termination::FatalOracleFailure { reason } => {
            assert!(reason.contains("connection refused"), "{reason}")
        }
        other => panic!("unexpected termination {other:?}"),
    }
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(outcome.best_index, Some(0));
}

#[tokio::test]
async fn permanent_oracle_error_is_not_retried() {
    let h = Harness::new(vec![ScriptedReply::Status(401), solver(0)], vec![]);
    let outcome = h.run(fast_retry(3), SessionPolicy::default()).await;

    assert!(matches!(outcome.termination, Termination::FatalOracleFailure { .. }));
    assert!(outcome.history.is_empty());
    assert_eq!(h.oracle.requests().len(), 1);
    assert_eq!(h.evaluator.calls(), 0);
}

#[tokio::test]
async fn consecutive_unparseable_responses_trip_the_breaker() {
    let replies = vec![
        ScriptedReply::text("I would use a spectral method."),
        ScriptedReply::text("Sure! Let me think about it."),
        ScriptedReply::text("```python\nunterminated"),
        solver(3),
    ];
    let h = Harness::new(replies, vec![]);
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert!(matches!(outcome.termination, Termination::FatalOracleFailure { .. }));
    assert_eq!(outcome.history.len(), 3);
    for attempt in outcome.history.attempts() {
        assert!(!attempt.candidate.is_parseable());
        assert_eq!(attempt.outcome, OutcomeKind::ExecutionFailure);
    }
    assert_eq!(h.evaluator.calls(), 0);
    assert_eq!(h.oracle.remaining(), 1);
}

#[tokio::test]
async fn parseable_response_resets_the_breaker() {
    let replies = vec![
        ScriptedReply::text("no code in this one"),
        ScriptedReply::text("nor this one"),
        solver(2),
        ScriptedReply::text("forgot the code again"),
        solver(4),
    ];
    let plans = vec![Plan::Crash, Plan::Crash, scored(0.5, 1.0), Plan::Crash, scored(0.001, 1.0)];
    let h = Harness::new(replies, plans);
    let outcome = h.run(fast_retry(0), SessionPolicy::default()).await;

    assert_eq!(outcome.termination, Termination::Accepted { index: 4 });
    assert_eq!(h.evaluator.calls(), 2);
    let requests = h.oracle.requests();
    assert!(requests[1].prompt.contains("no code in this one"));
}

#[tokio::test]
async fn sink_failures_never_end_the_session() {
    let oracle = Arc::new(ScriptedOracle::new(solvers(2)));
    let session = RefinementSession::new(
        spec(),
        oracle,
        PlannedEvaluator::new(vec![scored(0.3, 1.0), scored(0.002, 1.0)]),
        Arc::new(FailingSink),
        PromptComposer::new(ComposerConfig::default()),
        fast_retry(0),
        SessionPolicy::default(),
    )
    .unwrap();
    let outcome = session.run().await;
    assert_eq!(outcome.termination, Termination::Accepted { index: 1 });
}

#[tokio::test]
async fn filesystem_sink_round_trips_the_outcome() {
    let dir = tempdir().unwrap();
    let sink = Arc::new(FsArtifactSink::new(dir.path()));
    let session = RefinementSession::new(
        spec(),
        Arc::new(ScriptedOracle::new(solvers(2))),
        PlannedEvaluator::new(vec![Plan::Crash, scored(0.004, 5.0)]),
        sink.clone(),
        PromptComposer::new(ComposerConfig::default()),
        fast_retry(0),
        SessionPolicy::default(),
    )
    .unwrap();
    let session_id = session.session_id();
    let outcome = session.run().await;

    let session_dir = sink.session_dir(&session_id);
    assert!(session_dir.join("attempt-000.solver.py").is_file());
    assert!(session_dir.join("attempt-001.prompt.md").is_file());
    assert_eq!(read_session_artifact(&session_dir).unwrap(), outcome);
}

#[tokio::test]
async fn null_sink_session_ids_are_unique() {
    let build = || {
        RefinementSession::new(
            spec(),
            Arc::new(ScriptedOracle::new(Vec::new())),
            PlannedEvaluator::new(Vec::new()),
            Arc::new(NullSink),
            PromptComposer::new(ComposerConfig::default()),
            fast_retry(0),
            SessionPolicy::default(),
        )
        .unwrap()
    };
    let (a, b) = (build(), build());
    assert_ne!(a.session_id(), b.session_id());

    // an empty script is a permanent oracle error
    let outcome = a.run().await;
    assert!(matches!(outcome.termination, Termination::FatalOracleFailure { .. }));
}

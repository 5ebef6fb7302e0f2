//! pdeforge Core Library
//!
//! Iterative synthesis of numerical PDE solvers: an oracle writes a
//! candidate, the evaluator runs and scores it, the classifier picks the
//! next prompt, and the loop repeats until a candidate is accepted or the
//! iteration budget runs out.

pub mod catalog;
pub mod classifier;
pub mod config;
pub mod domain;
pub mod evaluator;
pub mod metrics;
pub mod obs;
pub mod oracle;
pub mod prompt;
pub mod refinement;
pub mod sink;
pub mod telemetry;

pub use classifier::classify;

pub use config::ForgeConfig;

pub use domain::{
    AcceptanceTargets, Attempt, Candidate, ContentDigest, EvaluationResult, EvaluationStatus,
    ExecutionErrorKind, ForgeError, History, OutcomeKind, ProblemSpec, ResolutionError, Result,
    SessionOutcome, ShapeContract, SpecError, Termination,
};

pub use evaluator::{Evaluator, EvaluatorConfig, ReferenceSet, SubprocessEvaluator};

pub use oracle::{
    build_oracle, GenerationOracle, OracleBackend, OracleConfig, OracleError, OracleRequest,
    OracleResponse, RetryPolicy, ScriptedOracle, ScriptedReply,
};

pub use prompt::{ComposedRequest, ComposerConfig, PromptComposer, TemplateKind};

pub use refinement::{LoopState, RefinementSession, SessionPolicy};

pub use sink::{read_session_artifact, FsArtifactSink, NullSink, SessionSink};

pub use telemetry::init_tracing;

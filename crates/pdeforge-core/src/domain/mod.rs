//! Domain models for pdeforge.
//!
//! Canonical definitions for the core entities:
//! - `ProblemSpec`: immutable PDE task and acceptance targets
//! - `Candidate`: one generated solver program
//! - `EvaluationResult`: what running a candidate measured
//! - `History`: append-only attempts of a session
//! - `SessionOutcome`: termination reason, best candidate, full history

pub mod candidate;
pub mod digest;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod outcome;
pub mod problem;
pub mod session;

pub use candidate::Candidate;
pub use digest::ContentDigest;
pub use error::{ForgeError, Result, SpecError};
pub use evaluation::{EvaluationResult, EvaluationStatus, ExecutionErrorKind, ResolutionError};
pub use history::{Attempt, History};
pub use outcome::OutcomeKind;
pub use problem::{uniform_grid, AcceptanceTargets, ProblemSpec, ShapeContract, TimeGrid};
pub use session::{SessionOutcome, Termination};

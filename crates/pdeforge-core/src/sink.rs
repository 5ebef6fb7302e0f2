//! Session persistence behind an injected sink.
//!
//! The loop never writes to fixed paths; whatever it wants kept goes through
//! a [`SessionSink`]. Sink failures are logged by the caller and never end a
//! session.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::domain::{Attempt, ContentDigest, ForgeError, ProblemSpec, Result, SessionOutcome};
use crate::evaluator::driver::candidate_file_name;
use crate::prompt::ComposedRequest;

/// Final session record inside a session directory.
pub const SESSION_FILE: &str = "session.json";
/// SHA-256 of [`SESSION_FILE`].
pub const DIGEST_FILE: &str = "session.digest";

/// Receives session progress for persistence.
pub trait SessionSink: Send + Sync {
    fn session_started(&self, session_id: &Uuid, spec: &ProblemSpec) -> Result<()>;

    /// Called once per recorded attempt with the request that produced it.
    fn attempt_recorded(
        &self,
        session_id: &Uuid,
        spec: &ProblemSpec,
        request: &ComposedRequest,
        attempt: &Attempt,
    ) -> Result<()>;

    fn session_finished(&self, outcome: &SessionOutcome) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SessionSink for NullSink {
    fn session_started(&self, _session_id: &Uuid, _spec: &ProblemSpec) -> Result<()> {
        Ok(())
    }

    fn attempt_recorded(
        &self,
        _session_id: &Uuid,
        _spec: &ProblemSpec,
        _request: &ComposedRequest,
        _attempt: &Attempt,
    ) -> Result<()> {
        Ok(())
    }

    fn session_finished(&self, _outcome: &SessionOutcome) -> Result<()> {
        Ok(())
    }
}

/// Writes one directory per session under `root`:
///
/// ```text
/// <root>/<session id>/problem.json
/// <root>/<session id>/attempt-000.prompt.md
/// <root>/<session id>/attempt-000.response.md
/// <root>/<session id>/attempt-000.solver.py
/// <root>/<session id>/attempt-000.json
/// <root>/<session id>/session.json
/// <root>/<session id>/session.digest
/// ```
#[derive(Debug, Clone)]
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn session_dir(&self, session_id: &Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }
}

impl SessionSink for FsArtifactSink {
    fn session_started(&self, session_id: &Uuid, spec: &ProblemSpec) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("problem.json"), serde_json::to_vec_pretty(spec)?)?;
        Ok(())
    }

    fn attempt_recorded(
        &self,
        session_id: &Uuid,
        spec: &ProblemSpec,
        request: &ComposedRequest,
        attempt: &Attempt,
    ) -> Result<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        let stem = format!("attempt-{:03}", attempt.candidate.index);

        fs::write(
            dir.join(format!("{stem}.prompt.md")),
            format!("<!-- template: {} -->\n\n{}", request.template, request.prompt),
        )?;
        fs::write(dir.join(format!("{stem}.response.md")), &attempt.candidate.response)?;
        if attempt.candidate.is_parseable() {
            fs::write(
                dir.join(format!("{stem}.{}", candidate_file_name(&spec.language))),
                &attempt.candidate.source,
            )?;
        }
        fs::write(
            dir.join(format!("{stem}.json")),
            serde_json::to_vec_pretty(attempt)?,
        )?;
        debug!(
            session_id = %session_id,
            index = attempt.candidate.index,
            source_digest = %ContentDigest::from_bytes(attempt.candidate.source.as_bytes()).short(),
            "attempt persisted"
        );
        Ok(())
    }

    fn session_finished(&self, outcome: &SessionOutcome) -> Result<()> {
        write_session_artifact(outcome, &self.session_dir(&outcome.session_id)).map(|_| ())
    }
}

/// Persist `session.json` and its digest into `dir`.
pub fn write_session_artifact(outcome: &SessionOutcome, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let artifact_path = dir.join(SESSION_FILE);
    let json = serde_json::to_vec_pretty(outcome)?;
    let digest = ContentDigest::from_bytes(&json);

    fs::write(&artifact_path, &json)?;
    fs::write(dir.join(DIGEST_FILE), digest.as_str().as_bytes())?;
    Ok(artifact_path)
}

/// Read `session.json` from `dir` after verifying its digest.
pub fn read_session_artifact(dir: &Path) -> Result<SessionOutcome> {
    let json = fs::read(dir.join(SESSION_FILE))?;
    let expected = fs::read_to_string(dir.join(DIGEST_FILE))?;
    let actual = ContentDigest::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        return Err(ForgeError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

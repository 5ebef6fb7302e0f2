//! Evaluator that runs each candidate as a child process.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::driver::{candidate_file_name, DEFAULT_DRIVER, DRIVER_FILE};
use super::reference::{
    read_tensor, write_tensor, ReferenceCase, ReferenceSet, TensorEncoding, TensorEntry,
    MANIFEST_FILE,
};
use super::sandbox::{run_command, RunStatus};
use super::scoring::{convergence_order, has_non_finite, normalized_rmse};
use super::Evaluator;
use crate::domain::{
    Candidate, EvaluationResult, ExecutionErrorKind, ForgeError, ProblemSpec, ResolutionError,
};
use crate::metrics::METRICS;
use crate::prompt::render::render_placeholders;

/// Subdirectory of the working directory holding the staged inputs.
pub const INPUT_DIR: &str = "inputs";
/// Subdirectory the candidate writes its outputs to.
pub const OUTPUT_DIR: &str = "outputs";

/// `[evaluator]` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Command run in the working directory. `{candidate}`, `{driver}` and
    /// `{workdir}` are replaced with absolute paths.
    pub command: Vec<String>,
    /// Custom harness file; the built-in Python harness when unset.
    pub driver: Option<PathBuf>,
    /// Reference data root, `<references>/<problem id>/<case>/`.
    pub references: PathBuf,
    /// Seconds added to the runtime budget before the child is killed.
    pub overhead_secs: f64,
    /// Cap on captured output per run.
    pub output_limit_chars: usize,
    /// Encoding of the staged input tensors.
    pub input_encoding: TensorEncoding,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "python3".to_string(),
                "{driver}".to_string(),
                "{candidate}".to_string(),
                "{workdir}".to_string(),
            ],
            driver: None,
            references: PathBuf::from("references"),
            overhead_secs: 60.0,
            output_limit_chars: 8_000,
            input_encoding: TensorEncoding::F64le,
        }
    }
}

/// `inputs/manifest.json` as seen by the candidate process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputManifest {
    pub problem_id: String,
    pub parameters: BTreeMap<String, f64>,
    pub t_coordinate: Vec<f64>,
    pub resolution: usize,
    pub output_fields: Vec<String>,
    pub inputs: Vec<TensorEntry>,
}

/// `outputs/manifest.json` written by the candidate process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub outputs: Vec<TensorEntry>,
}

/// One failed case run.
#[derive(Debug)]
struct CaseFailure {
    kind: ExecutionErrorKind,
    message: String,
    output: String,
    runtime_secs: f64,
}

impl CaseFailure {
    fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            output: String::new(),
            runtime_secs: 0.0,
        }
    }

    fn into_result(self, index: usize) -> EvaluationResult {
        EvaluationResult::execution_error(
            index,
            self.kind,
            self.message,
            self.output,
            self.runtime_secs,
        )
    }
}

/// Run blocking filesystem work on the blocking pool.
async fn off_runtime<T, F>(work: F) -> Result<T, String>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| format!("filesystem task failed: {e}"))
}

/// What [`stage`] writes into a case's working directory.
struct StageJob {
    source: String,
    driver_source: String,
    encoding: TensorEncoding,
    spec: ProblemSpec,
    case: ReferenceCase,
}

/// Stage the working directory for one case.
fn stage(root: &Path, job: &StageJob) -> Result<(PathBuf, PathBuf), String> {
    let StageJob {
        source,
        driver_source,
        encoding,
        spec,
        case,
    } = job;
    let candidate_path = root.join(candidate_file_name(&spec.language));
    fs::write(&candidate_path, source).map_err(|e| format!("cannot write candidate: {e}"))?;
    let driver_path = root.join(DRIVER_FILE);
    fs::write(&driver_path, driver_source).map_err(|e| format!("cannot write driver: {e}"))?;

    let input_dir = root.join(INPUT_DIR);
    fs::create_dir_all(&input_dir).map_err(|e| format!("cannot create {INPUT_DIR}/: {e}"))?;
    let entries = case
        .load_inputs(spec)?
        .iter()
        .map(|(name, array)| write_tensor(&input_dir, name, array, *encoding))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| format!("cannot stage inputs: {e}"))?;

    let manifest = InputManifest {
        problem_id: spec.id.clone(),
        parameters: spec.parameters.clone(),
        t_coordinate: spec.t_coordinate.clone(),
        resolution: case.resolution,
        output_fields: spec.shape.output_fields.clone(),
        inputs: entries,
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| format!("cannot encode input manifest: {e}"))?;
    fs::write(input_dir.join(MANIFEST_FILE), json)
        .map_err(|e| format!("cannot write input manifest: {e}"))?;
    Ok((candidate_path, driver_path))
}

/// Reference outputs of `case`, read on the blocking pool.
async fn load_references(
    case: &ReferenceCase,
    spec: &ProblemSpec,
) -> Result<Vec<ArrayD<f64>>, String> {
    let (case, spec) = (case.clone(), spec.clone());
    off_runtime(move || case.load_references(&spec))
        .await
        .and_then(|loaded| loaded)
}

/// Outputs of one successful case run, in `output_fields` order.
struct CaseRun {
    outputs: Vec<ArrayD<f64>>,
    output: String,
    runtime_secs: f64,
}

/// Runs candidates in fresh scratch directories against a reference set.
#[derive(Debug, Clone)]
pub struct SubprocessEvaluator {
    config: EvaluatorConfig,
    references: ReferenceSet,
    driver_source: String,
}

impl SubprocessEvaluator {
    /// Build with an already loaded reference set.
    pub fn new(config: EvaluatorConfig, references: ReferenceSet) -> Result<Self, ForgeError> {
        if config.command.is_empty() {
            return Err(ForgeError::InvalidConfig("evaluator command is empty".into()));
        }
        if !(config.overhead_secs.is_finite() && config.overhead_secs >= 0.0) {
            return Err(ForgeError::InvalidConfig(format!(
                "evaluator overhead must be a non-negative number of seconds, got {}",
                config.overhead_secs
            )));
        }
        let driver_source = match &config.driver {
            Some(path) => fs::read_to_string(path)?,
            None => DEFAULT_DRIVER.to_string(),
        };
        Ok(Self {
            config,
            references,
            driver_source,
        })
    }

    /// Load references for `spec` from `config.references` and build.
    pub fn from_config(config: EvaluatorConfig, spec: &ProblemSpec) -> Result<Self, ForgeError> {
        let references = ReferenceSet::load(&config.references, spec)?;
        Self::new(config, references)
    }

    pub fn references(&self) -> &ReferenceSet {
        &self.references
    }

    fn argv(&self, candidate: &Path, driver: &Path, workdir: &Path) -> Vec<String> {
        let candidate = candidate.display().to_string();
        let driver = driver.display().to_string();
        let workdir = workdir.display().to_string();
        self.config
            .command
            .iter()
            .map(|arg| {
                render_placeholders(
                    arg,
                    &[
                        ("candidate", &candidate),
                        ("driver", &driver),
                        ("workdir", &workdir),
                    ],
                )
            })
            .collect()
    }

    fn wall_clock_limit(&self, spec: &ProblemSpec) -> Duration {
        Duration::try_from_secs_f64(spec.targets.runtime_budget_secs + self.config.overhead_secs)
            .unwrap_or(Duration::MAX)
    }

    /// Run the candidate on one case in a fresh scratch directory.
    ///
    /// The directory is removed when this returns or is dropped.
    async fn run_case(
        &self,
        candidate: &Candidate,
        spec: &ProblemSpec,
        case: &ReferenceCase,
    ) -> Result<CaseRun, CaseFailure> {
        let setup = |message: String| CaseFailure::new(ExecutionErrorKind::Setup, message);
        let workdir = off_runtime(|| tempfile::Builder::new().prefix("pdeforge-eval-").tempdir())
            .await
            .and_then(|dir| dir.map_err(|e| format!("cannot create scratch dir: {e}")))
            .map_err(setup)?;
        let root = workdir.path();
        let job = StageJob {
            source: candidate.source.clone(),
            driver_source: self.driver_source.clone(),
            encoding: self.config.input_encoding,
            spec: spec.clone(),
            case: case.clone(),
        };
        let staged_root = root.to_path_buf();
        let (candidate_path, driver_path) = off_runtime(move || stage(&staged_root, &job))
            .await
            .and_then(|staged| staged)
            .map_err(setup)?;

        let limit = self.wall_clock_limit(spec);
        let argv = self.argv(&candidate_path, &driver_path, root);
        let report = run_command(&argv, root, limit, self.config.output_limit_chars).await;
        let runtime_secs = report.elapsed.as_secs_f64();
        let fail = |kind, message: String| CaseFailure {
            kind,
            message,
            output: report.output.clone(),
            runtime_secs,
        };

        match &report.status {
            RunStatus::SpawnFailed(message) => {
                return Err(fail(ExecutionErrorKind::Spawn, message.clone()))
            }
            RunStatus::TimedOut => {
                METRICS.inc_evaluation_timeouts();
                return Err(fail(
                    ExecutionErrorKind::Timeout,
                    format!("killed at the {:.1}s wall-clock limit", limit.as_secs_f64()),
                ));
            }
            RunStatus::Exited(status) if !status.success() => {
                return Err(fail(
                    ExecutionErrorKind::NonZeroExit,
                    format!("process exited with {status}"),
                ))
            }
            RunStatus::Exited(_) => {}
        }

        let output_dir = root.join(OUTPUT_DIR);
        let (resolution, spec) = (case.resolution, spec.clone());
        let outputs = off_runtime(move || read_outputs(&output_dir, &spec, resolution))
            .await
            .map_err(|e| (ExecutionErrorKind::Setup, e))
            .and_then(|read| read)
            .map_err(|(kind, message)| fail(kind, message))?;
        Ok(CaseRun {
            outputs,
            output: report.output,
            runtime_secs,
        })
    }

    /// Error at a secondary resolution, or why it could not be measured.
    async fn secondary_error(
        &self,
        candidate: &Candidate,
        spec: &ProblemSpec,
        case: &ReferenceCase,
    ) -> Result<f64, String> {
        let run = self
            .run_case(candidate, spec, case)
            .await
            .map_err(|f| format!("{}: {}", f.kind, f.message))?;
        if has_non_finite(&run.outputs) {
            return Err("output contains NaN or infinite values".to_string());
        }
        let references = load_references(case, spec).await?;
        let error = normalized_rmse(&run.outputs, &references);
        if error.is_finite() {
            Ok(error)
        } else {
            Err("error is not finite".to_string())
        }
    }
}

/// Read and check the candidate's outputs against the shape contract.
fn read_outputs(
    dir: &Path,
    spec: &ProblemSpec,
    resolution: usize,
) -> Result<Vec<ArrayD<f64>>, (ExecutionErrorKind, String)> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let text = fs::read_to_string(&manifest_path).map_err(|_| {
        (
            ExecutionErrorKind::MissingOutput,
            format!("candidate wrote no {OUTPUT_DIR}/{MANIFEST_FILE}"),
        )
    })?;
    let manifest: OutputManifest = serde_json::from_str(&text).map_err(|e| {
        (
            ExecutionErrorKind::MalformedOutput,
            format!("invalid {OUTPUT_DIR}/{MANIFEST_FILE}: {e}"),
        )
    })?;

    let expected = spec.shape.output_shape(resolution, spec.frames());
    spec.shape
        .output_fields
        .iter()
        .map(|field| {
            let entry = manifest
                .outputs
                .iter()
                .find(|e| &e.name == field)
                .ok_or_else(|| {
                    (
                        ExecutionErrorKind::MissingOutput,
                        format!("no output named `{field}`"),
                    )
                })?;
            if entry.shape != expected {
                return Err((
                    ExecutionErrorKind::ShapeMismatch,
                    format!(
                        "output `{field}` has shape {:?}, expected {expected:?}",
                        entry.shape
                    ),
                ));
            }
            if !Path::new(&entry.file)
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            {
                return Err((
                    ExecutionErrorKind::MalformedOutput,
                    format!("output `{field}` points outside {OUTPUT_DIR}/: {}", entry.file),
                ));
            }
            if !dir.join(&entry.file).is_file() {
                return Err((
                    ExecutionErrorKind::MissingOutput,
                    format!("output file {} does not exist", entry.file),
                ));
            }
            read_tensor(dir, entry).map_err(|e| (ExecutionErrorKind::MalformedOutput, e))
        })
        .collect()
}

#[async_trait]
impl Evaluator for SubprocessEvaluator {
    async fn evaluate(&self, candidate: &Candidate, spec: &ProblemSpec) -> EvaluationResult {
        METRICS.inc_candidates_evaluated();
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

        let cases = self.references.ordered(spec.shape.resolution);
        let Some((primary, secondary)) = cases.split_first() else {
            return CaseFailure::new(ExecutionErrorKind::Setup, "no reference cases loaded")
                .into_result(index);
        };

        let run = match self.run_case(candidate, spec, primary).await {
            Ok(run) => run,
            Err(failure) => {
                debug!(index, kind = %failure.kind, "primary case failed");
                return failure.into_result(index);
            }
        };
        if has_non_finite(&run.outputs) {
            return EvaluationResult::non_finite(index, run.output, run.runtime_secs);
        }
        let references = match load_references(primary, spec).await {
            Ok(references) => references,
            Err(e) => {
                return EvaluationResult::execution_error(
                    index,
                    ExecutionErrorKind::Setup,
                    format!("cannot load reference outputs: {e}"),
                    run.output,
                    run.runtime_secs,
                )
            }
        };
        let error = normalized_rmse(&run.outputs, &references);

        let mut output = run.output;
        let mut errors = vec![ResolutionError {
            resolution: primary.resolution,
            normalized_error: error,
        }];
        for case in secondary {
            match self.secondary_error(candidate, spec, case).await {
                Ok(normalized_error) => errors.push(ResolutionError {
                    resolution: case.resolution,
                    normalized_error,
                }),
                Err(reason) => {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(&format!(
                        "[pdeforge] resolution {} skipped: {reason}",
                        case.resolution
                    ));
                }
            }
        }
        errors.sort_by_key(|e| e.resolution);
        let order = convergence_order(&errors);

        info!(
            index,
            normalized_error = error,
            runtime_secs = run.runtime_secs,
            convergence_order = ?order,
            resolutions = errors.len(),
            "candidate scored"
        );
        EvaluationResult::completed(index, error, run.runtime_secs, output)
            .with_convergence(errors, order)
    }
}

//! Immutable problem specification: the fixed target case a session solves.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::error::{ForgeError, SpecError};
use crate::prompt::render::render_placeholders;

/// Tensor shape contract shared by the candidate, the evaluator and the
/// reference data.
///
/// Inputs are `[batch_size, N; spatial_rank]`, outputs are
/// `[batch_size, frames, N; spatial_rank]` where `frames` is the number of
/// requested time coordinates (initial frame included).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShapeContract {
    pub batch_size: usize,
    pub spatial_rank: usize,
    /// Primary spatial resolution `N`; the reported error comes from it.
    pub resolution: usize,
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
}

impl ShapeContract {
    /// Expected shape of every input tensor at `resolution`.
    pub fn input_shape(&self, resolution: usize) -> Vec<usize> {
        let mut shape = vec![self.batch_size];
        shape.extend(std::iter::repeat(resolution).take(self.spatial_rank));
        shape
    }

    /// Expected shape of every output tensor at `resolution`.
    pub fn output_shape(&self, resolution: usize, frames: usize) -> Vec<usize> {
        let mut shape = vec![self.batch_size, frames];
        shape.extend(std::iter::repeat(resolution).take(self.spatial_rank));
        shape
    }

    fn validate(&self) -> Result<(), SpecError> {
        if self.batch_size == 0 {
            return Err(SpecError::InvalidShape("batch_size must be > 0".into()));
        }
        if !(1..=3).contains(&self.spatial_rank) {
            return Err(SpecError::InvalidShape(format!(
                "spatial_rank must be 1, 2 or 3, got {}",
                self.spatial_rank
            )));
        }
        if self.resolution < 2 {
            return Err(SpecError::InvalidShape("resolution must be >= 2".into()));
        }
        if self.input_fields.is_empty() || self.output_fields.is_empty() {
            return Err(SpecError::InvalidShape(
                "input_fields and output_fields must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Acceptance criteria a candidate is judged against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptanceTargets {
    /// Maximum normalized RMSE.
    pub accuracy_threshold: f64,
    /// Wall-clock budget for one run at the primary resolution.
    pub runtime_budget_secs: f64,
    /// Advisory: reported to the oracle, never gates acceptance.
    pub min_convergence_order: f64,
}

impl Default for AcceptanceTargets {
    fn default() -> Self {
        Self {
            accuracy_threshold: 1e-2,
            runtime_budget_secs: 600.0,
            min_convergence_order: 1.0,
        }
    }
}

/// Immutable description of one PDE task.
///
/// `description` is a template; `{name}` placeholders are filled from
/// `parameters` when rendered, so overriding a parameter keeps the text in
/// sync with the numbers the evaluator passes to the candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemSpec {
    pub id: String,
    pub equation: String,
    pub parameters: BTreeMap<String, f64>,
    pub shape: ShapeContract,
    pub t_coordinate: Vec<f64>,
    pub targets: AcceptanceTargets,
    pub description: String,
    /// Explicit solver skeleton; generated from the contract when absent.
    #[serde(default)]
    pub solver_template: Option<String>,
    /// Fence tag expected around candidate code (e.g. `python`).
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "python".to_string()
}

/// On-disk problem definition. Time may be given explicitly or as a
/// uniform grid.
#[derive(Debug, Deserialize)]
struct ProblemFile {
    id: String,
    equation: String,
    #[serde(default)]
    parameters: BTreeMap<String, f64>,
    shape: ShapeContract,
    time: TimeGrid,
    #[serde(default)]
    targets: AcceptanceTargets,
    description: String,
    #[serde(default)]
    solver_template: Option<String>,
    #[serde(default = "default_language")]
    language: String,
}

/// Time coordinates as written in a problem file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TimeGrid {
    Explicit { t_coordinate: Vec<f64> },
    Uniform { t_end: f64, frames: usize },
}

impl TimeGrid {
    /// Materialize the coordinates, `t_0 = 0` first.
    pub fn points(&self) -> Vec<f64> {
        match self {
            TimeGrid::Explicit { t_coordinate } => t_coordinate.clone(),
            TimeGrid::Uniform { t_end, frames } => uniform_grid(*t_end, *frames),
        }
    }
}

/// `frames` evenly spaced points on `[0, t_end]`.
pub fn uniform_grid(t_end: f64, frames: usize) -> Vec<f64> {
    match frames {
        0 => Vec::new(),
        1 => vec![0.0],
        n => (0..n)
            .map(|i| t_end * i as f64 / (n - 1) as f64)
            .collect(),
    }
}

impl ProblemSpec {
    /// Parse and validate a TOML problem definition.
    pub fn from_toml_str(text: &str) -> Result<Self, ForgeError> {
        let file: ProblemFile = toml::from_str(text)?;
        let spec = ProblemSpec {
            id: file.id,
            equation: file.equation,
            parameters: file.parameters,
            shape: file.shape,
            t_coordinate: file.time.points(),
            targets: file.targets,
            description: file.description,
            solver_template: file.solver_template,
            language: file.language,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check every structural invariant of the spec.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.id.trim().is_empty() {
            return Err(SpecError::EmptyId);
        }
        for (name, value) in &self.parameters {
            if !value.is_finite() {
                return Err(SpecError::NonFiniteParameter {
                    name: name.clone(),
                    value: *value,
                });
            }
        }
        if self.t_coordinate.len() < 2 {
            return Err(SpecError::TooFewTimePoints(self.t_coordinate.len()));
        }
        if self.t_coordinate[0] != 0.0
            || self.t_coordinate.windows(2).any(|w| !(w[1] > w[0]))
        {
            return Err(SpecError::NonMonotonicTime);
        }
        self.shape.validate()?;
        let threshold = self.targets.accuracy_threshold;
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(SpecError::InvalidThreshold(threshold));
        }
        let budget = self.targets.runtime_budget_secs;
        if !(budget.is_finite() && budget > 0.0) {
            return Err(SpecError::InvalidBudget(budget));
        }
        Ok(())
    }

    /// Return a copy with `overrides` applied.
    ///
    /// Only parameters the spec already declares may be set; this is the
    /// whole contract with a parameter-extraction front end.
    pub fn with_parameters(&self, overrides: &BTreeMap<String, f64>) -> Result<Self, SpecError> {
        let mut next = self.clone();
        for (name, value) in overrides {
            let Some(slot) = next.parameters.get_mut(name) else {
                return Err(SpecError::UnknownParameter {
                    name: name.clone(),
                    declared: self.parameter_names().join(", "),
                });
            };
            if !value.is_finite() {
                return Err(SpecError::NonFiniteParameter {
                    name: name.clone(),
                    value: *value,
                });
            }
            *slot = *value;
        }
        Ok(next)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }

    /// Number of output frames, initial frame included.
    pub fn frames(&self) -> usize {
        self.t_coordinate.len()
    }

    /// Description with parameter placeholders filled in.
    pub fn rendered_description(&self) -> String {
        let values: Vec<(String, String)> = self
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        let pairs: Vec<(&str, &str)> = values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        render_placeholders(&self.description, &pairs)
    }

    /// Solver skeleton shown to the oracle.
    pub fn solver_template(&self) -> Cow<'_, str> {
        match &self.solver_template {
            Some(t) => Cow::Borrowed(t.as_str()),
            None => Cow::Owned(self.generated_solver_template()),
        }
    }

    /// `solver(...)` call signature every candidate must keep.
    pub fn solver_signature(&self) -> String {
        format!("solver({})", self.solver_args().join(", "))
    }

    fn solver_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .shape
            .input_fields
            .iter()
            .map(|f| format!("{f}_batch"))
            .collect();
        args.push("t_coordinate".to_string());
        args.extend(self.parameters.keys().cloned());
        args
    }

    fn generated_solver_template(&self) -> String {
        let inputs: Vec<String> = self
            .shape
            .input_fields
            .iter()
            .map(|f| format!("{f}_batch"))
            .collect();
        let args = self.solver_args();

        let spatial = vec!["N"; self.shape.spatial_rank].join(", ");
        let mut doc = String::new();
        for name in &inputs {
            doc.push_str(&format!(
                "        {name} (np.ndarray): Initial condition [batch_size, {spatial}].\n"
            ));
        }
        doc.push_str(
            "        t_coordinate (np.ndarray): Time coordinates of shape [T+1].\n\
             \x20           It begins with t_0=0 and follows the time steps t_1, ..., t_T.\n",
        );
        for name in self.parameters.keys() {
            doc.push_str(&format!("        {name} (float): The {name} parameter.\n"));
        }
        let mut returns = String::new();
        for field in &self.shape.output_fields {
            returns.push_str(&format!(
                "        {field}_pred (np.ndarray): Shape [batch_size, len(t_coordinate), {spatial}].\n"
            ));
        }
        let outputs: Vec<String> = self
            .shape
            .output_fields
            .iter()
            .map(|f| format!("{f}_pred"))
            .collect();

        format!(
            "import numpy as np\n\n\
             def solver({args}):\n\
             \x20   \"\"\"Solves the {equation} problem for all times in t_coordinate.\n\n\
             \x20   Args:\n{doc}\n\
             \x20   Returns:\n{returns}\
             \x20       The first timeframe is identical to the initial condition.\n\
             \x20   \"\"\"\n\
             \x20   # TODO: Implement the solver\n\
             \x20   return {outputs}\n",
            args = args.join(", "),
            equation = self.equation,
            outputs = outputs.join(", "),
        )
    }
}

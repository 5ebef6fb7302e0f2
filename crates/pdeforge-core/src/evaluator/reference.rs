//! Reference data and tensor files.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/<problem id>/<case dir>/manifest.json
//! <root>/<problem id>/<case dir>/<tensor files>
//! ```
//!
//! Each case holds the inputs and reference outputs at one spatial
//! resolution. The same [`TensorEntry`] format is used for the run
//! contract with the candidate process.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{ForgeError, ProblemSpec};

/// Name of the manifest file in every case, input and output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// On-disk encoding of a tensor file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorEncoding {
    /// Raw little-endian IEEE-754 doubles, row-major.
    #[default]
    F64le,
    /// Whitespace-separated decimals, row-major; `nan`/`inf` allowed.
    Text,
}

impl TensorEncoding {
    fn extension(self) -> &'static str {
        match self {
            TensorEncoding::F64le => "f64",
            TensorEncoding::Text => "txt",
        }
    }
}

/// One tensor listed in a manifest. `file` is relative to the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub file: String,
    #[serde(default)]
    pub encoding: TensorEncoding,
}

/// Read the tensor `entry` describes, relative to `dir`.
pub fn read_tensor(dir: &Path, entry: &TensorEntry) -> Result<ArrayD<f64>, String> {
    let path = dir.join(&entry.file);
    let expected: usize = entry.shape.iter().product();
    let values = match entry.encoding {
        TensorEncoding::F64le => {
            let bytes =
                fs::read(&path).map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            if bytes.len() != expected * 8 {
                return Err(format!(
                    "{}: expected {} bytes for shape {:?}, found {}",
                    entry.file,
                    expected * 8,
                    entry.shape,
                    bytes.len()
                ));
            }
            bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    f64::from_le_bytes(raw)
                })
                .collect::<Vec<f64>>()
        }
        TensorEncoding::Text => {
            let text = fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
            let values = text
                .split_whitespace()
                .map(|token| {
                    token
                        .parse::<f64>()
                        .map_err(|_| format!("{}: invalid number `{token}`", entry.file))
                })
                .collect::<Result<Vec<f64>, String>>()?;
            if values.len() != expected {
                return Err(format!(
                    "{}: expected {expected} values for shape {:?}, found {}",
                    entry.file,
                    entry.shape,
                    values.len()
                ));
            }
            values
        }
    };
    ArrayD::from_shape_vec(IxDyn(&entry.shape), values)
        .map_err(|e| format!("{}: {e}", entry.file))
}

/// Write `array` under `dir` as `<name>.<ext>` and return its manifest entry.
pub fn write_tensor(
    dir: &Path,
    name: &str,
    array: &ArrayD<f64>,
    encoding: TensorEncoding,
) -> std::io::Result<TensorEntry> {
    write_tensor_as(dir, name, name, array, encoding)
}

fn write_tensor_as(
    dir: &Path,
    name: &str,
    stem: &str,
    array: &ArrayD<f64>,
    encoding: TensorEncoding,
) -> std::io::Result<TensorEntry> {
    let file = format!("{stem}.{}", encoding.extension());
    let path = dir.join(&file);
    match encoding {
        TensorEncoding::F64le => {
            let mut bytes = Vec::with_capacity(array.len() * 8);
            for value in array.iter() {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            fs::write(&path, bytes)?;
        }
        TensorEncoding::Text => {
            let text: Vec<String> = array.iter().map(|v| format!("{v:e}")).collect();
            fs::write(&path, text.join("\n"))?;
        }
    }
    Ok(TensorEntry {
        name: name.to_string(),
        shape: array.shape().to_vec(),
        file,
        encoding,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CaseManifest {
    resolution: usize,
    inputs: Vec<TensorEntry>,
    references: Vec<TensorEntry>,
}

/// Inputs and reference outputs at one resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceCase {
    pub resolution: usize,
    pub dir: PathBuf,
    pub inputs: Vec<TensorEntry>,
    pub references: Vec<TensorEntry>,
}

impl ReferenceCase {
    /// Load `dir/manifest.json`.
    pub fn load(dir: &Path) -> Result<Self, ForgeError> {
        let path = dir.join(MANIFEST_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            ForgeError::ReferenceData(format!("cannot read {}: {e}", path.display()))
        })?;
        let manifest: CaseManifest = serde_json::from_str(&text).map_err(|e| {
            ForgeError::ReferenceData(format!("invalid manifest {}: {e}", path.display()))
        })?;
        Ok(Self {
            resolution: manifest.resolution,
            dir: dir.to_path_buf(),
            inputs: manifest.inputs,
            references: manifest.references,
        })
    }

    /// Stage a case on disk: tensors plus manifest.
    pub fn write(
        dir: &Path,
        resolution: usize,
        inputs: &[(&str, ArrayD<f64>)],
        references: &[(&str, ArrayD<f64>)],
        encoding: TensorEncoding,
    ) -> Result<Self, ForgeError> {
        fs::create_dir_all(dir)?;
        let inputs = inputs
            .iter()
            .map(|(name, array)| {
                write_tensor_as(dir, name, &format!("input_{name}"), array, encoding)
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        let references = references
            .iter()
            .map(|(name, array)| {
                write_tensor_as(dir, name, &format!("reference_{name}"), array, encoding)
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        let manifest = CaseManifest {
            resolution,
            inputs,
            references,
        };
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(Self {
            resolution,
            dir: dir.to_path_buf(),
            inputs: manifest.inputs,
            references: manifest.references,
        })
    }

    /// Input tensors in `spec.shape.input_fields` order.
    pub fn load_inputs(&self, spec: &ProblemSpec) -> Result<Vec<(String, ArrayD<f64>)>, String> {
        spec.shape
            .input_fields
            .iter()
            .map(|field| {
                let entry = find(&self.inputs, field)?;
                Ok((field.clone(), read_tensor(&self.dir, entry)?))
            })
            .collect()
    }

    /// Reference outputs in `spec.shape.output_fields` order.
    pub fn load_references(&self, spec: &ProblemSpec) -> Result<Vec<ArrayD<f64>>, String> {
        spec.shape
            .output_fields
            .iter()
            .map(|field| read_tensor(&self.dir, find(&self.references, field)?))
            .collect()
    }

    /// Check names and shapes against the contract without reading tensors.
    fn check_contract(&self, spec: &ProblemSpec) -> Result<(), String> {
        let input_shape = spec.shape.input_shape(self.resolution);
        for field in &spec.shape.input_fields {
            let entry = find(&self.inputs, field)?;
            if entry.shape != input_shape {
                return Err(format!(
                    "input `{field}` has shape {:?}, expected {input_shape:?}",
                    entry.shape
                ));
            }
        }
        let output_shape = spec.shape.output_shape(self.resolution, spec.frames());
        for field in &spec.shape.output_fields {
            let entry = find(&self.references, field)?;
            if entry.shape != output_shape {
                return Err(format!(
                    "reference `{field}` has shape {:?}, expected {output_shape:?}",
                    entry.shape
                ));
            }
        }
        Ok(())
    }
}

fn find<'a>(entries: &'a [TensorEntry], name: &str) -> Result<&'a TensorEntry, String> {
    entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| format!("no tensor named `{name}`"))
}

/// All reference cases for one problem, one per resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceSet {
    pub problem_id: String,
    cases: Vec<ReferenceCase>,
}

impl ReferenceSet {
    /// Load `<root>/<spec.id>/*/manifest.json` and validate every case.
    pub fn load(root: &Path, spec: &ProblemSpec) -> Result<Self, ForgeError> {
        let problem_dir = root.join(&spec.id);
        let entries = fs::read_dir(&problem_dir).map_err(|e| {
            ForgeError::ReferenceData(format!("cannot list {}: {e}", problem_dir.display()))
        })?;

        let mut cases = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() && path.join(MANIFEST_FILE).is_file() {
                cases.push(ReferenceCase::load(&path)?);
            }
        }
        debug!(
            problem = %spec.id,
            cases = cases.len(),
            root = %root.display(),
            "loaded reference cases"
        );
        Self::from_cases(spec, cases)
    }

    /// Validate pre-built cases against `spec`.
    ///
    /// Requires exactly one case per resolution and one at the primary
    /// resolution.
    pub fn from_cases(
        spec: &ProblemSpec,
        mut cases: Vec<ReferenceCase>,
    ) -> Result<Self, ForgeError> {
        cases.sort_by_key(|c| c.resolution);
        if cases.windows(2).any(|w| w[0].resolution == w[1].resolution) {
            return Err(ForgeError::ReferenceData(format!(
                "`{}` has more than one case per resolution",
                spec.id
            )));
        }
        if !cases.iter().any(|c| c.resolution == spec.shape.resolution) {
            return Err(ForgeError::ReferenceData(format!(
                "`{}` has no case at the primary resolution {}",
                spec.id, spec.shape.resolution
            )));
        }
        for case in &cases {
            case.check_contract(spec).map_err(|e| {
                ForgeError::ReferenceData(format!("{}: {e}", case.dir.display()))
            })?;
        }
        Ok(Self {
            problem_id: spec.id.clone(),
            cases,
        })
    }

    /// Primary case first, then the others by ascending resolution.
    pub fn ordered(&self, primary_resolution: usize) -> Vec<&ReferenceCase> {
        let mut ordered: Vec<&ReferenceCase> = self.cases.iter().collect();
        ordered.sort_by_key(|c| (c.resolution != primary_resolution, c.resolution));
        ordered
    }

    pub fn resolutions(&self) -> Vec<usize> {
        self.cases.iter().map(|c| c.resolution).collect()
    }
}

//! Domain-level error taxonomy for pdeforge.

/// Errors produced while validating a problem specification.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("problem id must not be empty")]
    EmptyId,

    #[error("unknown parameter `{name}` (declared: {declared})")]
    UnknownParameter { name: String, declared: String },

    #[error("parameter `{name}` must be finite, got {value}")]
    NonFiniteParameter { name: String, value: f64 },

    #[error("time coordinates need at least two points, got {0}")]
    TooFewTimePoints(usize),

    #[error("time coordinates must start at 0 and be strictly increasing")]
    NonMonotonicTime,

    #[error("shape contract invalid: {0}")]
    InvalidShape(String),

    #[error("accuracy threshold must be positive and finite, got {0}")]
    InvalidThreshold(f64),

    #[error("runtime budget must be positive, got {0}s")]
    InvalidBudget(f64),
}

/// pdeforge domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("invalid problem spec: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("unknown problem: {0}")]
    UnknownProblem(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("reference data error: {0}")]
    ReferenceData(String),

    #[error("history out of order: expected attempt {expected}, got {actual}")]
    HistoryOrder { expected: usize, actual: usize },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pdeforge domain operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forge_error_display() {
        let err = ForgeError::UnknownProblem("heat3d".to_string());
        assert!(err.to_string().contains("unknown problem"));

        let err = ForgeError::HistoryOrder {
            expected: 2,
            actual: 4,
        };
        assert!(err.to_string().contains("expected attempt 2"));
    }

    #[test]
    fn test_spec_error_wraps_into_forge_error() {
        let err: ForgeError = SpecError::UnknownParameter {
            name: "mu".to_string(),
            declared: "nu".to_string(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("invalid problem spec"));
        assert!(msg.contains("`mu`"));
    }

    #[test]
    fn test_digest_mismatch_error() {
        let err = ForgeError::DigestMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }
}

//! Generated solver programs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One generated solver program submitted for evaluation.
///
/// `source` is the code extracted from `response`. When extraction failed,
/// `source` is empty and `parse_error` says why; such a candidate is never
/// executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// 0-based ordinal within the session.
    pub index: usize,
    pub source: String,
    /// Raw oracle response the source was extracted from.
    pub response: String,
    pub parse_error: Option<String>,
    /// Provenance: the oracle call that produced this candidate.
    pub oracle_call_id: Uuid,
    pub generated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(index: usize, source: String, response: String, oracle_call_id: Uuid) -> Self {
        Self {
            index,
            source,
            response,
            parse_error: None,
            oracle_call_id,
            generated_at: Utc::now(),
        }
    }

    /// A candidate whose response carried no usable code.
    pub fn unparseable(
        index: usize,
        response: String,
        oracle_call_id: Uuid,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            index,
            source: String::new(),
            response,
            parse_error: Some(reason.into()),
            oracle_call_id,
            generated_at: Utc::now(),
        }
    }

    pub fn is_parseable(&self) -> bool {
        self.parse_error.is_none()
    }
}

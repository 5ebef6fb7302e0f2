//! Top-level configuration, read from TOML.
//!
//! Every section is optional; missing keys fall back to their defaults.
//!
//! ```toml
//! [session]
//! max_iterations = 5
//! strict_runtime = false
//!
//! [oracle]
//! backend = "http"
//!
//! [oracle.http]
//! model = "gpt-4o"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ForgeError, Result};
use crate::evaluator::EvaluatorConfig;
use crate::oracle::{OracleConfig, RetryPolicy};
use crate::prompt::ComposerConfig;
use crate::refinement::SessionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub session: SessionPolicy,
    pub retry: RetryPolicy,
    pub composer: ComposerConfig,
    pub evaluator: EvaluatorConfig,
    pub oracle: OracleConfig,
}

impl ForgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ForgeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.evaluator.command.is_empty() {
            return Err(ForgeError::InvalidConfig(
                "evaluator.command must not be empty".to_string(),
            ));
        }
        if self.composer.digest_budget_chars > self.composer.request_budget_chars {
            return Err(ForgeError::InvalidConfig(format!(
                "composer.digest_budget_chars ({}) exceeds composer.request_budget_chars ({})",
                self.composer.digest_budget_chars, self.composer.request_budget_chars
            )));
        }
        Ok(())
    }
}

//! Oracle backed by a local command: prompt on stdin, response on stdout.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{GenerationOracle, OracleError, OracleRequest, OracleResponse};
use crate::prompt::render::truncate_chars_tail;

/// Environment variable carrying the system prompt to the command.
pub const SYSTEM_PROMPT_ENV: &str = "PDEFORGE_SYSTEM_PROMPT";

/// Runs `program args...` once per request.
///
/// The user prompt is written to stdin and the system prompt is exported as
/// `PDEFORGE_SYSTEM_PROMPT`. A non-zero exit is a retryable failure. The
/// child is killed if the call is dropped.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv vector; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self, OracleError> {
        match argv.split_first() {
            Some((program, args)) if !program.trim().is_empty() => {
                Ok(Self::new(program.clone(), args.to_vec()))
            }
            _ => Err(OracleError::Config("oracle command is empty".into())),
        }
    }
}

#[async_trait]
impl GenerationOracle for CommandOracle {
    fn name(&self) -> &str {
        &self.program
    }

    async fn generate(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(SYSTEM_PROMPT_ENV, &request.system)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Command(format!("failed to spawn {}: {e}", self.program)))?;

        // Feed stdin while draining stdout so large prompts cannot deadlock.
        let stdin = child.stdin.take();
        let writer = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(request.prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(writer, child.wait_with_output());
        let output = output
            .map_err(|e| {
                OracleError::Command(format!("failed to wait for {}: {e}", self.program))
            })?;
        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(OracleError::Command(format!("failed to write prompt: {e}")));
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                truncate_chars_tail(stderr.trim(), 500)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        if text.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }
        Ok(OracleResponse { text, model: None })
    }
}

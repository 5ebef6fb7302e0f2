//! pdeforge - iterative synthesis of numerical PDE solvers
//!
//! ## Commands
//!
//! - `problems`: List built-in problems
//! - `prompt`: Print the first request a session would send
//! - `evaluate`: Score one candidate file against the reference data
//! - `run`: Run a full refinement session
//! - `inspect`: Verify and summarize a stored session

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdeforge_core::domain::History;
use pdeforge_core::{
    build_oracle, catalog, classify, read_session_artifact, Candidate, Evaluator, ForgeConfig,
    FsArtifactSink, ProblemSpec, PromptComposer, RefinementSession, SessionOutcome,
    SubprocessEvaluator,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use uuid::Uuid;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "pdeforge.toml";

#[derive(Parser)]
#[command(name = "pdeforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Iterative synthesis and repair of numerical PDE solvers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: ./pdeforge.toml when present)
    #[arg(short, long, global = true, env = "PDEFORGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Problem selection shared by every command that needs one.
#[derive(clap::Args, Debug, Clone)]
struct ProblemArgs {
    /// Built-in problem id or path to a problem TOML file
    #[arg(short, long)]
    problem: String,

    /// Parameter override, `name=value` (repeatable)
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, f64)>,
}

#[derive(Subcommand)]
enum Commands {
    /// List built-in problems
    Problems {
        /// Print the listing as JSON
        #[arg(long)]
        full: bool,
    },

    /// Print the initial request for a problem without calling the oracle
    Prompt {
        #[command(flatten)]
        problem: ProblemArgs,
    },

    /// Evaluate one candidate file and print the result as JSON
    Evaluate {
        #[command(flatten)]
        problem: ProblemArgs,

        /// Candidate source file
        candidate: PathBuf,

        /// Reference data root (overrides `[evaluator] references`)
        #[arg(long, env = "PDEFORGE_REFERENCES")]
        references: Option<PathBuf>,
    },

    /// Run a refinement session
    Run {
        #[command(flatten)]
        problem: ProblemArgs,

        /// Reference data root (overrides `[evaluator] references`)
        #[arg(long, env = "PDEFORGE_REFERENCES")]
        references: Option<PathBuf>,

        /// Directory receiving per-session artifacts
        #[arg(long, env = "PDEFORGE_ARTIFACTS", default_value = ".pdeforge/sessions")]
        artifacts: PathBuf,

        /// Override `[session] max_iterations`
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Treat runtime overruns as failures
        #[arg(long)]
        strict_runtime: bool,
    },

    /// Verify a stored session artifact and print its summary
    Inspect {
        /// Session directory (contains session.json and session.digest)
        session_dir: PathBuf,

        /// Print the full session record as JSON
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    pdeforge_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Problems { full } => cmd_problems(full),
        Commands::Prompt { problem } => cmd_prompt(&config, &problem),
        Commands::Evaluate {
            problem,
            candidate,
            references,
        } => cmd_evaluate(config, &problem, &candidate, references).await,
        Commands::Run {
            problem,
            references,
            artifacts,
            max_iterations,
            strict_runtime,
        } => {
            let mut config = config;
            if let Some(max) = max_iterations {
                config.session.max_iterations = max;
            }
            if strict_runtime {
                config.session.strict_runtime = true;
            }
            if let Some(root) = references {
                config.evaluator.references = root;
            }
            cmd_run(config, &problem, &artifacts).await
        }
        Commands::Inspect { session_dir, full } => cmd_inspect(&session_dir, full),
    }
}

fn parse_param(raw: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not a number", value.trim()))?;
    Ok((name.trim().to_string(), value))
}

fn load_config(path: Option<&Path>) -> Result<ForgeConfig> {
    match path {
        Some(path) => ForgeConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            ForgeConfig::load(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("Failed to load config {DEFAULT_CONFIG_FILE}"))
        }
        None => Ok(ForgeConfig::default()),
    }
}

/// Resolve a catalog id or problem file and apply overrides.
fn resolve_problem(args: &ProblemArgs) -> Result<ProblemSpec> {
    let path = Path::new(&args.problem);
    let base = if path.is_file() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read problem file {:?}", path))?;
        ProblemSpec::from_toml_str(&text)
            .with_context(|| format!("Invalid problem file {:?}", path))?
    } else {
        catalog::builtin(&args.problem).with_context(|| {
            format!(
                "No problem file or built-in problem named `{}` (built-in: {})",
                args.problem,
                catalog::BUILTIN_IDS.join(", ")
            )
        })?
    };

    if args.params.is_empty() {
        return Ok(base);
    }
    let overrides: BTreeMap<String, f64> = args.params.iter().cloned().collect();
    base.with_parameters(&overrides)
        .with_context(|| format!("Invalid parameter override for `{}`", base.id))
}

#[derive(Serialize)]
struct ProblemListing {
    id: String,
    equation: String,
    parameters: BTreeMap<String, f64>,
    resolution: usize,
    frames: usize,
}

fn cmd_problems(full: bool) -> Result<()> {
    if full {
        println!("{}", serde_json::to_string_pretty(&problem_listing())?);
        return Ok(());
    }
    for spec in catalog::all() {
        let params: Vec<String> = spec
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!(
            "{:<12} {:<34} N={:<5} frames={:<4} {}",
            spec.id,
            spec.equation,
            spec.shape.resolution,
            spec.frames(),
            params.join(" ")
        );
    }
    Ok(())
}

fn problem_listing() -> Vec<ProblemListing> {
    catalog::all()
        .into_iter()
        .map(|spec| ProblemListing {
            frames: spec.frames(),
            resolution: spec.shape.resolution,
            id: spec.id,
            equation: spec.equation,
            parameters: spec.parameters,
        })
        .collect()
}

fn cmd_prompt(config: &ForgeConfig, args: &ProblemArgs) -> Result<()> {
    let spec = resolve_problem(args)?;
    let composer = PromptComposer::new(config.composer.clone());
    composer.check_fits(&spec)?;
    let request = composer.compose(&spec, &History::new(), None);

    println!("=== system ===\n{}\n", request.system);
    println!("=== prompt ({}) ===\n{}", request.template, request.prompt);
    Ok(())
}

async fn cmd_evaluate(
    mut config: ForgeConfig,
    args: &ProblemArgs,
    candidate_path: &Path,
    references: Option<PathBuf>,
) -> Result<()> {
    let spec = resolve_problem(args)?;
    if let Some(root) = references {
        config.evaluator.references = root;
    }
    let source = std::fs::read_to_string(candidate_path)
        .with_context(|| format!("Failed to read candidate {:?}", candidate_path))?;
    let evaluator = SubprocessEvaluator::from_config(config.evaluator, &spec)
        .context("Failed to prepare evaluator")?;

    let candidate = Candidate::new(0, source.clone(), source, Uuid::nil());
    let result = evaluator.evaluate(&candidate, &spec).await;
    let outcome = classify(&result, &spec);

    let report = serde_json::json!({
        "problem": spec.id,
        "outcome": outcome,
        "evaluation": result,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_run(config: ForgeConfig, args: &ProblemArgs, artifacts: &Path) -> Result<()> {
    let spec = resolve_problem(args)?;
    let oracle = build_oracle(&config.oracle).context("Failed to configure oracle")?;
    let evaluator = SubprocessEvaluator::from_config(config.evaluator.clone(), &spec)
        .context("Failed to prepare evaluator")?;
    let sink = Arc::new(FsArtifactSink::new(artifacts));

    let session = RefinementSession::new(
        spec,
        oracle,
        Arc::new(evaluator),
        sink.clone(),
        PromptComposer::new(config.composer.clone()),
        config.retry.clone(),
        config.session.clone(),
    )
    .context("Failed to start session")?;
    let session_dir = sink.session_dir(&session.session_id());
    info!(session_dir = %session_dir.display(), "session started");

    let outcome = session.run().await;
    print_summary(&outcome);
    println!("Artifacts: {}", session_dir.display());
    require_accepted(&outcome)
}

/// Non-accepted sessions become an error so the process exits non-zero.
fn require_accepted(outcome: &SessionOutcome) -> Result<()> {
    if outcome.is_accepted() {
        Ok(())
    } else {
        anyhow::bail!(
            "Session {} ended without an accepted candidate: {}",
            outcome.session_id,
            outcome.termination
        )
    }
}

fn cmd_inspect(session_dir: &Path, full: bool) -> Result<()> {
    let outcome = read_session_artifact(session_dir)
        .with_context(|| format!("Failed to read session artifact in {:?}", session_dir))?;

    if full {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
        for attempt in outcome.history.attempts() {
            let error = attempt
                .evaluation
                .finite_error()
                .map(|e| format!("{e:.4e}"))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  #{:<3} {:<22} error={:<11} runtime={:.2}s",
                attempt.candidate.index,
                attempt.outcome.as_str(),
                error,
                attempt.evaluation.runtime_secs
            );
        }
    }
    println!("Session digest verified");
    Ok(())
}

fn print_summary(outcome: &SessionOutcome) {
    println!("Session:     {}", outcome.session_id);
    println!("Problem:     {}", outcome.problem.id);
    println!("Termination: {}", outcome.termination);
    println!("Iterations:  {}", outcome.iterations);
    match outcome.best() {
        Some(best) => println!(
            "Best:        attempt {} ({}, error {})",
            best.candidate.index,
            best.outcome,
            best.evaluation
                .finite_error()
                .map(|e| format!("{e:.4e}"))
                .unwrap_or_else(|| "-".to_string())
        ),
        None => println!("Best:        none"),
    }
    println!("Duration:    {} ms", outcome.duration_ms());
}

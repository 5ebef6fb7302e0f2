//! Prompt composer: history + latest outcome → next oracle request.
//!
//! Every request embeds the spec block verbatim so the oracle is always
//! anchored to the same target case. Flexible content (failing source,
//! captured output, the attempt digest) is cut to fit the request budget;
//! the spec block never is.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::domain::{
    Attempt, Candidate, EvaluationStatus, ForgeError, History, OutcomeKind, ProblemSpec,
};
use crate::prompt::render::{char_len, render_placeholders, truncate_chars, truncate_chars_tail};
use crate::prompt::templates;

/// Character budgets for composed requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Hard cap on the user prompt, spec block included.
    pub request_budget_chars: usize,
    /// Cap on the attempt digest inside improvement requests.
    pub digest_budget_chars: usize,
    /// Cap on captured output quoted for any single attempt.
    pub output_budget_chars: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            request_budget_chars: 48_000,
            digest_budget_chars: 24_000,
            output_budget_chars: 2_000,
        }
    }
}

/// Which request template was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Initial,
    ExecutionRepair,
    StabilityRepair,
    Improvement,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 4] = [
        TemplateKind::Initial,
        TemplateKind::ExecutionRepair,
        TemplateKind::StabilityRepair,
        TemplateKind::Improvement,
    ];

    /// Template for the latest outcome. Total over every input.
    pub fn for_outcome(latest: Option<OutcomeKind>) -> Self {
        match latest {
            None => TemplateKind::Initial,
            Some(OutcomeKind::ExecutionFailure) => TemplateKind::ExecutionRepair,
            Some(OutcomeKind::NumericalBlowup) => TemplateKind::StabilityRepair,
            Some(OutcomeKind::AccuracyShortfall)
            | Some(OutcomeKind::PerformanceShortfall)
            | Some(OutcomeKind::Accepted) => TemplateKind::Improvement,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::Initial => "initial",
            TemplateKind::ExecutionRepair => "execution_repair",
            TemplateKind::StabilityRepair => "stability_repair",
            TemplateKind::Improvement => "improvement",
        }
    }

    fn text(self) -> &'static str {
        match self {
            TemplateKind::Initial => templates::INITIAL,
            TemplateKind::ExecutionRepair => templates::EXECUTION_REPAIR,
            TemplateKind::StabilityRepair => templates::STABILITY_REPAIR,
            TemplateKind::Improvement => templates::IMPROVEMENT,
        }
    }
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully rendered oracle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedRequest {
    pub system: String,
    pub prompt: String,
    pub template: TemplateKind,
}

/// Renders the fixed block describing the target case.
///
/// Parameters, shapes and thresholds are printed exactly as stored.
pub fn spec_block(spec: &ProblemSpec) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "Target case (fixed for this session):");
    let _ = writeln!(block, "- problem: {} ({})", spec.id, spec.equation);
    if spec.parameters.is_empty() {
        let _ = writeln!(block, "- parameters: none");
    } else {
        let params: Vec<String> = spec
            .parameters
            .iter()
            .map(|(k, v)| format!("{k} = {v}"))
            .collect();
        let _ = writeln!(block, "- parameters: {}", params.join(", "));
    }
    let _ = writeln!(block, "- signature: {}", spec.solver_signature());

    let res = spec.shape.resolution;
    let _ = writeln!(
        block,
        "- inputs: {} each with shape {:?}",
        spec.shape.input_fields.join(", "),
        spec.shape.input_shape(res)
    );
    let _ = writeln!(
        block,
        "- outputs: {} each with shape {:?}",
        spec.shape.output_fields.join(", "),
        spec.shape.output_shape(res, spec.frames())
    );
    let first = spec.t_coordinate.first().copied().unwrap_or(0.0);
    let last = spec.t_coordinate.last().copied().unwrap_or(0.0);
    let _ = writeln!(
        block,
        "- t_coordinate: {} points from {first} to {last}; frame 0 is the initial condition",
        spec.frames()
    );
    let _ = writeln!(
        block,
        "- accuracy target: nRMSE <= {} against the reference solution, frame 0 excluded",
        spec.targets.accuracy_threshold
    );
    let _ = writeln!(
        block,
        "- runtime budget: {} s",
        spec.targets.runtime_budget_secs
    );
    let _ = write!(
        block,
        "- convergence order target: {} (advisory)",
        spec.targets.min_convergence_order
    );
    block
}

/// Values that do not depend on history.
struct FixedContext {
    description: String,
    spec_block: String,
    solver_template: String,
    language: String,
    accuracy_threshold: String,
    runtime_budget: String,
    min_convergence_order: String,
}

impl FixedContext {
    fn new(spec: &ProblemSpec) -> Self {
        Self {
            description: spec.rendered_description(),
            spec_block: spec_block(spec),
            solver_template: spec.solver_template().into_owned(),
            language: spec.language.clone(),
            accuracy_threshold: spec.targets.accuracy_threshold.to_string(),
            runtime_budget: spec.targets.runtime_budget_secs.to_string(),
            min_convergence_order: spec.targets.min_convergence_order.to_string(),
        }
    }

    fn render(&self, kind: TemplateKind, slots: &Slots) -> String {
        render_placeholders(
            kind.text(),
            &[
                ("description", &self.description),
                ("spec_block", &self.spec_block),
                ("solver_template", &self.solver_template),
                ("language", &self.language),
                ("accuracy_threshold", &self.accuracy_threshold),
                ("runtime_budget", &self.runtime_budget),
                ("min_convergence_order", &self.min_convergence_order),
                ("source", &slots.source),
                ("output", &slots.output),
                ("error_message", &slots.error_message),
                ("samples", &slots.samples),
            ],
        )
    }
}

/// History-dependent content, already cut to size.
#[derive(Default)]
struct Slots {
    source: String,
    output: String,
    error_message: String,
    samples: String,
}

/// Builds oracle requests within fixed character budgets.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    config: ComposerConfig,
}

impl PromptComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Length of the largest request with every flexible slot empty.
    pub fn fixed_len(&self, spec: &ProblemSpec) -> usize {
        let ctx = FixedContext::new(spec);
        TemplateKind::ALL
            .iter()
            .map(|kind| char_len(&ctx.render(*kind, &Slots::default())))
            .max()
            .unwrap_or(0)
    }

    /// Fail when the request budget cannot hold the fixed content for `spec`.
    pub fn check_fits(&self, spec: &ProblemSpec) -> Result<(), ForgeError> {
        let fixed = self.fixed_len(spec);
        if fixed > self.config.request_budget_chars {
            return Err(ForgeError::InvalidConfig(format!(
                "request budget of {} chars cannot hold the {fixed}-char problem statement for `{}`",
                self.config.request_budget_chars, spec.id
            )));
        }
        Ok(())
    }

    /// Compose the next request.
    ///
    /// `latest` is the outcome of the most recent attempt, `None` before the
    /// first one. Repair and improvement templates need an attempt to quote;
    /// with an empty history they fall back to the initial template.
    pub fn compose(
        &self,
        spec: &ProblemSpec,
        history: &History,
        latest: Option<OutcomeKind>,
    ) -> ComposedRequest {
        let ctx = FixedContext::new(spec);
        let (kind, last) = match (TemplateKind::for_outcome(latest), history.last()) {
            (_, None) => (TemplateKind::Initial, None),
            (kind, last) => (kind, last),
        };

        let base = char_len(&ctx.render(kind, &Slots::default()));
        let room = self.config.request_budget_chars.saturating_sub(base);

        let slots = match (kind, last) {
            (TemplateKind::ExecutionRepair, Some(attempt)) => {
                self.repair_slots(attempt, room, true)
            }
            (TemplateKind::StabilityRepair, Some(attempt)) => {
                self.repair_slots(attempt, room, false)
            }
            (TemplateKind::Improvement, Some(_)) => Slots {
                samples: self.digest(
                    &ctx.language,
                    history.attempts(),
                    room.min(self.config.digest_budget_chars),
                ),
                ..Slots::default()
            },
            _ => Slots::default(),
        };

        let prompt = truncate_chars(&ctx.render(kind, &slots), self.config.request_budget_chars);
        ComposedRequest {
            system: templates::SYSTEM_PROMPT.to_string(),
            prompt,
            template: kind,
        }
    }

    /// Failing source, output and error message sharing `room` chars.
    /// The error keeps its tail, the source its head.
    fn repair_slots(&self, attempt: &Attempt, room: usize, with_error: bool) -> Slots {
        let cap = self.config.output_budget_chars;
        let error_message = if with_error {
            truncate_chars_tail(&error_text(attempt), (room / 4).min(cap))
        } else {
            String::new()
        };
        let left = room.saturating_sub(char_len(&error_message));
        let output = truncate_chars_tail(&output_text(attempt), (left / 3).min(cap));
        let left = left.saturating_sub(char_len(&output));
        let source = truncate_chars(&source_text(&attempt.candidate), left);
        Slots {
            source,
            output,
            error_message,
            samples: String::new(),
        }
    }

    /// Attempt digest, oldest first, within `budget` chars.
    ///
    /// Oldest entries are dropped first. The most recent attempt is never
    /// dropped: when it alone exceeds the budget its output is cut, then its
    /// source.
    fn digest(&self, language: &str, attempts: &[Attempt], budget: usize) -> String {
        if attempts.is_empty() {
            return String::new();
        }
        let cap = self.config.output_budget_chars;
        let entries: Vec<String> = attempts
            .iter()
            .map(|a| {
                render_sample(
                    language,
                    a,
                    &source_text(&a.candidate),
                    &truncate_chars_tail(&output_text(a), cap),
                )
            })
            .collect();

        let newest = entries.len() - 1;
        for start in 0..newest {
            let text = join_entries(&entries[start..], start);
            if char_len(&text) <= budget {
                return text;
            }
        }

        let single = join_entries(&entries[newest..], newest);
        if char_len(&single) <= budget {
            return single;
        }

        let attempt = &attempts[newest];
        let note = join_entries(&[], newest);
        let overhead = char_len(&note) + char_len(&render_sample(language, attempt, "", ""));
        let room = budget.saturating_sub(overhead);
        let output = truncate_chars_tail(&output_text(attempt), (room / 4).min(cap));
        let source = truncate_chars(
            &source_text(&attempt.candidate),
            room.saturating_sub(char_len(&output)),
        );
        let entry = render_sample(language, attempt, &source, &output);
        truncate_chars(&join_entries(&[entry], newest), budget)
    }
}

fn join_entries(entries: &[String], omitted: usize) -> String {
    let mut text = String::new();
    if omitted > 0 {
        text.push_str(&render_placeholders(
            templates::OMITTED_NOTE,
            &[("count", &omitted.to_string())],
        ));
        text.push_str("\n\n");
    }
    text.push_str(&entries.join("\n\n"));
    text
}

fn render_sample(language: &str, attempt: &Attempt, source: &str, output: &str) -> String {
    let eval = &attempt.evaluation;
    let error = match (&eval.status, eval.finite_error()) {
        (_, Some(e)) => format!("{e:.4e}"),
        (EvaluationStatus::ExecutionError { kind, .. }, None) => format!("n/a ({kind})"),
        _ => "not finite".to_string(),
    };
    let runtime = format!("{:.2}s", eval.runtime_secs);
    let convergence = eval
        .convergence_order
        .map(|o| format!("{o:.2}"))
        .unwrap_or_else(|| "n/a".to_string());

    render_placeholders(
        templates::CODE_SAMPLE,
        &[
            ("number", &(attempt.candidate.index + 1).to_string()),
            ("outcome", attempt.outcome.as_str()),
            ("language", language),
            ("source", source),
            ("error", &error),
            ("runtime", &runtime),
            ("convergence", &convergence),
            ("output", output),
        ],
    )
}

/// Code to quote for a candidate; the raw response when extraction failed.
fn source_text(candidate: &Candidate) -> String {
    match &candidate.parse_error {
        None => candidate.source.clone(),
        Some(reason) => format!(
            "# no code could be extracted ({reason}); raw response follows\n{}",
            candidate.response
        ),
    }
}

fn output_text(attempt: &Attempt) -> String {
    if attempt.evaluation.output.trim().is_empty() {
        "(no output)".to_string()
    } else {
        attempt.evaluation.output.clone()
    }
}

fn error_text(attempt: &Attempt) -> String {
    match &attempt.evaluation.status {
        EvaluationStatus::ExecutionError { kind, message } => format!("[{kind}] {message}"),
        EvaluationStatus::NonFinite => "output contains NaN or infinite values".to_string(),
        EvaluationStatus::Completed => String::new(),
    }
}

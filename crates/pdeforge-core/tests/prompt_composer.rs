use pdeforge_core::domain::History;
use pdeforge_core::prompt::spec_block;
use pdeforge_core::{
    catalog, Candidate, ComposerConfig, EvaluationResult, ExecutionErrorKind, OutcomeKind,
    PromptComposer, TemplateKind,
};
use uuid::Uuid;

fn attempt_history(outcome: OutcomeKind, source_len: usize, output_len: usize) -> History {
    let body = "    x = 1\n".repeat(source_len / 10);
    let source = format!("def solver(u0_batch, t_coordinate, nu):\n{body}");
    let output = "o".repeat(output_len);
    let evaluation = match outcome {
        OutcomeKind::ExecutionFailure => EvaluationResult::execution_error(
            0,
            ExecutionErrorKind::NonZeroExit,
            "process exited with exit status: 1",
            output,
            1.0,
        ),
        OutcomeKind::NumericalBlowup => EvaluationResult::non_finite(0, output, 1.0),
        _ => EvaluationResult::completed(0, 0.2, 1.0, output),
    };
    let mut history = History::new();
    history
        .record(
            Candidate::new(0, source.clone(), format!("```python\n{source}\n```"), Uuid::new_v4()),
            evaluation,
            outcome,
        )
        .unwrap();
    history
}

#[test]
fn every_catalog_problem_fits_the_default_budget() {
    let composer = PromptComposer::new(ComposerConfig::default());
    for spec in catalog::all() {
        composer.check_fits(&spec).unwrap();
        let request = composer.compose(&spec, &History::new(), None);
        assert_eq!(request.template, TemplateKind::Initial);
        assert!(request.prompt.contains(&spec_block(&spec)), "{}", spec.id);
        assert!(request.prompt.contains(&spec.solver_signature()), "{}", spec.id);
    }
}

#[test]
fn composition_is_pure() {
    let composer = PromptComposer::new(ComposerConfig::default());
    let spec = catalog::builtin("burgers").unwrap();
    let history = attempt_history(OutcomeKind::AccuracyShortfall, 400, 100);

    let a = composer.compose(&spec, &history, Some(OutcomeKind::AccuracyShortfall));
    let b = composer.compose(&spec, &history, Some(OutcomeKind::AccuracyShortfall));
    assert_eq!(a, b);
}

#[test]
fn budget_holds_for_every_outcome_and_problem() {
    let config = ComposerConfig {
        request_budget_chars: 20_000,
        digest_budget_chars: 6_000,
        output_budget_chars: 1_000,
    };
    let composer = PromptComposer::new(config.clone());
    let outcomes = [
        OutcomeKind::ExecutionFailure,
        OutcomeKind::NumericalBlowup,
        OutcomeKind::AccuracyShortfall,
        OutcomeKind::PerformanceShortfall,
        OutcomeKind::Accepted,
    ];
    for spec in catalog::all() {
        for outcome in outcomes {
            let history = attempt_history(outcome, 60_000, 60_000);
            let request = composer.compose(&spec, &history, Some(outcome));
            assert!(
                request.prompt.chars().count() <= config.request_budget_chars,
                "{} / {outcome}: {} chars",
                spec.id,
                request.prompt.chars().count()
            );
            assert!(request.prompt.contains(&spec_block(&spec)));
            assert_eq!(request.template, TemplateKind::for_outcome(Some(outcome)));
        }
    }
}

#[test]
fn parameter_overrides_flow_into_the_prompt() {
    let composer = PromptComposer::new(ComposerConfig::default());
    let base = catalog::builtin("burgers").unwrap();
    let overrides = [("nu".to_string(), 0.001)].into_iter().collect();
    let spec = base.with_parameters(&overrides).unwrap();

    let request = composer.compose(&spec, &History::new(), None);
    assert!(request.prompt.contains("0.001"));
    assert!(!request.prompt.contains("\\nu = 0.01"));
}

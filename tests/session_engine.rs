//! End-to-end session scenarios against scripted inference

use pretty_assertions::assert_eq;

use persona_ab::elements::{ElementSet, TaskDefinition, UiElement};
use persona_ab::engine::{EngineSettings, SessionEngine};
use persona_ab::outcome::OutcomeKind;
use persona_ab::parser::ActionIntent;
use persona_ab::persona::Persona;
use persona_ab::prompt::{CORRECTION_NOTICE, PromptBuilder};
use persona_ab::retry::{InferenceRetryPolicy, ParseRetryPolicy};
use persona_ab::session::{RunDirectory, SessionLog, SessionResult};
use persona_ab::snapshot::WireframeBackend;
use persona_ab::validator::Validation;
use persona_ab::vlm::{ScriptedInference, VlmError};

fn elements() -> ElementSet {
    ElementSet::new(vec![
        UiElement::new("Checkout button", "cart summary"),
        UiElement::new("Shipping options", "sidebar"),
        UiElement::new("Cancel purchase", "footer"),
    ])
}

fn persona() -> Persona {
    Persona::new("customer_1", "Dana")
        .with_attribute("age", 41)
        .with_attribute("decision_making_style", "Cautious")
}

fn settings() -> EngineSettings {
    EngineSettings {
        max_steps: 5,
        inference_retry: InferenceRetryPolicy::immediate(3),
        parse_retry: ParseRetryPolicy::default(),
    }
}

fn click(text: &str, reasons: usize) -> String {
    let reasoning: String = (1..=reasons).map(|i| format!("{i}. thought {i}\n")).collect();
    format!("REASONING:\n{reasoning}\nACTION:\n{{\"text\": \"{text}\", \"context\": \"somewhere\"}}")
}

struct Harness {
    _dir: tempfile::TempDir,
    run: RunDirectory,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let run = RunDirectory::in_dir(dir.path().join("run"));
        Self { _dir: dir, run }
    }

    fn run(&self, service: &ScriptedInference, prompts: PromptBuilder) -> SessionResult {
        let set = elements();
        let mut capture = WireframeBackend::new("A", &set);
        SessionEngine::new(service, &self.run, TaskDefinition::default(), settings())
            .with_prompts(prompts)
            .run_session(&persona(), "A", &set, &mut capture, 1)
            .unwrap()
    }

    fn log(&self, result: &SessionResult) -> SessionLog {
        SessionLog::read(&self.run.session_log_path(&result.session_id)).unwrap()
    }
}

fn assert_exclusive_outcome(result: &SessionResult, log: &SessionLog) {
    assert_eq!(result.success, result.outcome == OutcomeKind::Converted);
    assert_eq!(log.final_outcome, result.outcome.as_str());
    assert_eq!(log.success, result.success);
    assert_eq!(log.steps.len() as u32, result.steps_taken);
}

#[test]
fn test_converted_on_first_step() {
    let h = Harness::new();
    let service = ScriptedInference::new([click("Checkout button", 3)]);

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::Converted);
    assert!(result.success);
    assert_eq!(result.steps_taken, 1);
    assert_eq!(result.total_hesitation, 3);
    assert_eq!(result.abandonment_reasoning, None);
    assert!(result.session_id.starts_with("session_"));
    assert!(result.session_id.ends_with("_customer_1_A_1"));

    let log = h.log(&result);
    assert_exclusive_outcome(&result, &log);
    assert_eq!(
        log.steps[0].parsed_action,
        Some(ActionIntent::click("Checkout button", "somewhere"))
    );
    assert_eq!(log.steps[0].snapshot_source, "wireframe");
}

#[test]
fn test_parsing_error_after_three_unparseable_attempts() {
    let h = Harness::new();
    let service = ScriptedInference::repeating("I would probably click the checkout button.");

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::ParsingError);
    assert!(!result.success);
    assert_eq!(result.steps_taken, 1);

    let prompts = service.prompts();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[0].matches(CORRECTION_NOTICE).count(), 0);
    assert_eq!(prompts[1].matches(CORRECTION_NOTICE).count(), 1);
    assert_eq!(prompts[2].matches(CORRECTION_NOTICE).count(), 2);

    let log = h.log(&result);
    assert_exclusive_outcome(&result, &log);
    assert_eq!(log.steps[0].attempts.len(), 3);
    assert!(log.steps[0].error.as_deref().unwrap().starts_with("Parsing failed on attempt 3"));
}

#[test]
fn test_abandoned_max_steps_after_five_plain_clicks() {
    let h = Harness::new();
    let service = ScriptedInference::repeating(click("Shipping options", 2));

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::AbandonedMaxSteps);
    assert_eq!(result.steps_taken, 5);
    assert_eq!(result.total_hesitation, 10);

    let prompts = service.prompts();
    assert_eq!(prompts.len(), 5);
    assert!(!prompts[0].contains("SESSION HISTORY"));
    assert_eq!(prompts[4].matches("You clicked 'Shipping options'").count(), 4);

    let log = h.log(&result);
    assert_exclusive_outcome(&result, &log);
}

#[test]
fn test_invalid_click_continues_session() {
    let h = Harness::new();
    let service = ScriptedInference::new([click("Free gift banner", 1), click("Checkout button", 1)]);

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::Converted);
    assert_eq!(result.steps_taken, 2);

    let log = h.log(&result);
    assert_eq!(log.steps[0].validation, Some(Validation::Invalid));
    assert_eq!(log.steps[0].valid, Some(false));
    assert_eq!(log.steps[1].valid, Some(true));
    assert!(service.prompts()[1].contains("You clicked 'Free gift banner'"));
}

#[test]
fn test_terminate_records_abandonment_reasoning() {
    let h = Harness::new();
    let service = ScriptedInference::new([
        click("Shipping options", 1),
        "REASONING:\n1. Shipping costs more than the item.\nACTION:\n{\"action\": \"terminate\"}".to_string(),
    ]);

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::AbandonedByAgent);
    assert_eq!(
        result.abandonment_reasoning.as_deref(),
        Some("1. Shipping costs more than the item.")
    );
    assert_eq!(result.steps_taken, 2);

    let log = h.log(&result);
    assert_exclusive_outcome(&result, &log);
    assert_eq!(log.abandonment_reasoning, result.abandonment_reasoning);
}

#[test]
fn test_termination_element_abandons() {
    let h = Harness::new();
    let service = ScriptedInference::new([click("Cancel purchase", 2)]);

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::AbandonedByAgent);
    assert_eq!(result.abandonment_reasoning.as_deref(), Some("1. thought 1\n2. thought 2"));
}

#[test]
fn test_transient_inference_errors_are_retried_and_timed() {
    let h = Harness::new();
    let service = ScriptedInference::repeating(click("Checkout button", 1));
    service.push_error(VlmError::ConnectionFailed("reset".into()));
    service.push_error(VlmError::RateLimited("429".into()));

    let result = h.run(&service, PromptBuilder::new());
    assert_eq!(result.outcome, OutcomeKind::Converted);
    assert_eq!(service.prompts().len(), 3);

    let log = h.log(&result);
    let attempts: Vec<u32> = log.steps[0].attempts.iter().map(|a| a.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(log.steps[0].attempts[1].error.as_deref().unwrap().contains("Rate limited"));
    assert!(result.total_processing_time >= 0.0);
}

#[test]
fn test_distraction_clause_only_at_configured_step() {
    let h = Harness::new();
    let service = ScriptedInference::repeating(click("Shipping options", 1));

    h.run(&service, PromptBuilder::new().with_distraction_step(Some(3)));
    let with_interrupt: Vec<usize> = service
        .prompts()
        .iter()
        .enumerate()
        .filter(|(_, p)| p.contains("INTERRUPT"))
        .map(|(i, _)| i + 1)
        .collect();
    assert_eq!(with_interrupt, vec![3]);
}

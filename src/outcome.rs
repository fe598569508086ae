//! Session outcome state machine.
//!
//! A session starts `Running` and ends in exactly one terminal outcome. The
//! classifier is applied once per step; precedence is fixed:
//! inference/parse exhaustion, then abandonment, then conversion, then the
//! step cap.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::elements::TaskDefinition;
use crate::parser::ActionIntent;
use crate::validator::Validation;

/// Terminal outcome of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Converted,
    AbandonedByAgent,
    ParsingError,
    AbandonedMaxSteps,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 4] = [
        OutcomeKind::Converted,
        OutcomeKind::AbandonedByAgent,
        OutcomeKind::ParsingError,
        OutcomeKind::AbandonedMaxSteps,
    ];

    /// Label used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Converted => "converted",
            OutcomeKind::AbandonedByAgent => "abandoned_by_agent",
            OutcomeKind::ParsingError => "parsing_error",
            OutcomeKind::AbandonedMaxSteps => "abandoned_max_steps",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == label)
    }

    /// Only conversion counts as success
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Converted)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Finished(OutcomeKind),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished(_))
    }
}

/// What happened in a step, as seen by the classifier
#[derive(Debug, Clone, Copy)]
pub enum StepEvent<'a> {
    /// Every inference or parse attempt failed
    Exhausted,
    /// The agent produced an action
    Acted {
        action: &'a ActionIntent,
        validation: Validation,
        reasoning: &'a str,
    },
}

/// Result of classifying one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    /// Step reasoning, set when the agent abandoned the task
    pub abandonment_reasoning: Option<String>,
}

impl Transition {
    fn to(state: SessionState) -> Self {
        Self {
            state,
            abandonment_reasoning: None,
        }
    }
}

/// Maps step events to session state transitions
#[derive(Debug, Clone)]
pub struct OutcomeClassifier {
    task: TaskDefinition,
    max_steps: u32,
}

impl OutcomeClassifier {
    pub fn new(task: TaskDefinition, max_steps: u32) -> Self {
        Self { task, max_steps }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Classify `event` observed at `step` (1-based)
    pub fn classify(&self, step: u32, event: StepEvent<'_>) -> Transition {
        match event {
            StepEvent::Exhausted => Transition::to(SessionState::Finished(OutcomeKind::ParsingError)),
            StepEvent::Acted {
                validation: Validation::Terminate | Validation::TerminationElement,
                reasoning,
                ..
            } => Transition {
                state: SessionState::Finished(OutcomeKind::AbandonedByAgent),
                abandonment_reasoning: Some(reasoning.to_string()),
            },
            StepEvent::Acted {
                action: ActionIntent::Click { text, .. },
                ..
            } if self.task.is_success(text) => {
                Transition::to(SessionState::Finished(OutcomeKind::Converted))
            }
            StepEvent::Acted { .. } if step >= self.max_steps => {
                Transition::to(SessionState::Finished(OutcomeKind::AbandonedMaxSteps))
            }
            StepEvent::Acted { .. } => Transition::to(SessionState::Running),
        }
    }
}

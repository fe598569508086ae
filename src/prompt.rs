//! Prompt construction for one session step.
//!
//! A prompt is a pure function of the persona, the session history, the active
//! element set and the step number. Nothing here touches I/O or the clock, so
//! the same inputs always render the same text.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::elements::ElementSet;
use crate::parser::ActionIntent;
use crate::persona::Persona;

/// Appended to the prompt once per failed parse attempt
pub const CORRECTION_NOTICE: &str = "Your last response was not valid JSON. Please correct your thinking and provide the action in the correct format.";

const IMMERSIVE_MANDATE: &str = "\
THE IMMERSIVE MANDATE (The \"How to Be\")
You are not an AI model. For the duration of this session, you are a human being. Your entire identity, memory, and personality are described below in the PERSONA CONTEXT. You will think, reason, and act as this person.

You will see the world through their eyes. You will not perceive everything on the page at once; your attention will be drawn to the things that matter to you. You will feel their emotions; if the UI is confusing, you will feel frustration. If it seems untrustworthy, you will feel anxiety.

Your patience is not a number; it is a reflection of your mood and personality. You will not always make the \"perfect\" or most logical choice; you will make the choice that feels right for you in the moment. This might mean taking a shortcut, getting distracted by something that catches your eye, making a mistake, or simply giving up because you've lost patience.

Your only goal is to behave as this person would, believably and authentically.
";

const DISTRACTION_CLAUSE: &str = "\
INTERRUPT: Your boss just sent you a Slack message. You need to look away from this page for a moment to answer it.

Now, you have returned to the webpage. You have momentarily forgotten exactly where you were in the process. Re-orient yourself and determine your next action to complete your original goal.
";

const RESPONSE_INSTRUCTIONS: &str = "\
Based on your previous reasoning and actions, continue your thought process. Provide your step-by-step reasoning for your next action as a numbered list, building upon what you've already thought about.
REASONING:
1. [Building on your previous thoughts...]
2. [Your next consideration...]
...

Finally, provide the JSON for your chosen action. Your response MUST be ONLY the JSON object for the single element you want to click. Use this exact format: {\"text\": \"Element Name\", \"context\": \"Element Context\"}. You can also choose to terminate the session if you feel you've explored enough.
To terminate, respond with: {\"action\": \"terminate\"}

ACTION:
";

/// One completed, non-terminal step replayed into later prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: ActionIntent,
    pub reasoning: String,
}

/// Renders step prompts for a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptBuilder {
    /// Step at which the persona is interrupted, if any
    pub distraction_step: Option<u32>,
    /// Explicit goal statement, if any
    pub primary_goal: Option<String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_distraction_step(mut self, step: Option<u32>) -> Self {
        self.distraction_step = step;
        self
    }

    pub fn with_primary_goal(mut self, goal: Option<String>) -> Self {
        self.primary_goal = goal.filter(|g| !g.trim().is_empty());
        self
    }

    /// Build the prompt for `step` (1-based)
    pub fn build(
        &self,
        persona: &Persona,
        history: &[HistoryEntry],
        elements: &ElementSet,
        step: u32,
    ) -> String {
        let mut prompt = String::with_capacity(4096);
        prompt.push('\n');
        prompt.push_str(IMMERSIVE_MANDATE);
        prompt.push_str("\nPERSONA CONTEXT (The \"Who You Are\")\n");
        for (label, value) in persona.profile_lines() {
            let _ = writeln!(prompt, "{label}: {value}");
        }
        let failure_conditions = serde_json::to_string_pretty(&persona.failure_conditions)
            .unwrap_or_else(|_| "{}".to_string());
        let _ = writeln!(
            prompt,
            "\nFailure Conditions (What will make you abandon this task):\n{failure_conditions}\n"
        );

        if !history.is_empty() {
            prompt.push_str("SESSION HISTORY (Your previous reasoning and actions):\n");
            for (i, entry) in history.iter().enumerate() {
                let (text, context) = match &entry.action {
                    ActionIntent::Click { text, context } => (
                        text.as_str(),
                        if context.is_empty() { "unknown location" } else { context.as_str() },
                    ),
                    _ => ("unknown", "unknown location"),
                };
                let _ = write!(
                    prompt,
                    "Step {}:\nYour reasoning: {}\nYour action: You clicked '{}' ({}).\n\n",
                    i + 1,
                    entry.reasoning,
                    text,
                    context
                );
            }
            prompt.push('\n');
        }

        if self.distraction_step == Some(step) {
            prompt.push('\n');
            prompt.push_str(DISTRACTION_CLAUSE);
        }

        if let Some(goal) = &self.primary_goal {
            let _ = write!(prompt, "\nYOUR PRIMARY GOAL: {goal}\n\n");
        }

        let element_json =
            serde_json::to_string_pretty(elements).unwrap_or_else(|_| "[]".to_string());
        let _ = write!(
            prompt,
            "You are looking at a webpage. Here are all the clickable elements you can see:\n\n\
             AVAILABLE CLICKABLE ELEMENTS:\n{element_json}\n\n"
        );
        prompt.push_str(RESPONSE_INSTRUCTIONS);
        prompt
    }
}

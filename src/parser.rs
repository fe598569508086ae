//! Response parsing: free-form model text to a structured action.
//!
//! Candidate extraction is an ordered chain of strategies, each returning an
//! optional JSON-looking substring. The first strategy that finds a candidate
//! wins:
//! 1. `labeled_action` - the first balanced object after an `ACTION:` label
//! 2. `last_action_shape` - the last top-level object with `"text"` and `"context"` keys
//! 3. `last_brace_block` - the last top-level object of any shape
//!
//! The candidate is decoded strictly, then once more after [`repair_json`].
//! Parsing is stateless: the same input always yields the same result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const ACTION_LABEL: &str = "ACTION:";

/// Reasoning text used when the response has no `REASONING:` section
pub const NO_REASONING: &str = "No reasoning provided";

static REASONING_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)REASONING:(.*?)(?:ACTION:|\z)").expect("valid regex"));
static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d+\.\s").expect("valid regex"));
static REPEATED_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*,)+").expect("valid regex"));
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",\s*([}\]])").expect("valid regex"));

/// The action chosen by the agent in one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionIntent {
    /// Click the element with this exact text
    Click { text: String, context: String },
    /// Explicitly end the session
    Terminate,
    /// A JSON object was decoded but names no element and no termination
    Unparseable,
}

impl ActionIntent {
    pub fn click(text: impl Into<String>, context: impl Into<String>) -> Self {
        ActionIntent::Click {
            text: text.into(),
            context: context.into(),
        }
    }

    /// Element text for click actions
    pub fn text(&self) -> Option<&str> {
        match self {
            ActionIntent::Click { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A successfully parsed response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResponse {
    pub action: ActionIntent,
    /// Text of the `REASONING:` section, trimmed
    pub reasoning: String,
    /// Number of numbered reasoning items
    pub hesitation: u32,
    /// Name of the extraction strategy that found the action
    pub strategy: &'static str,
}

/// Why a response could not be turned into an action
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Action block not found")]
    NoActionFound,
    #[error("Invalid action JSON ({message}): {candidate}")]
    InvalidJson { message: String, candidate: String },
    #[error("Action JSON is not an object: {0}")]
    NotAnObject(String),
}

type Strategy = for<'a> fn(&'a str) -> Option<&'a str>;

const STRATEGIES: [(&str, Strategy); 3] = [
    ("labeled_action", labeled_action),
    ("last_action_shape", last_action_shape),
    ("last_brace_block", last_brace_block),
];

/// Parse raw model output into an action, reasoning and hesitation count
pub fn parse_response(raw: &str) -> Result<ParsedResponse, ParseError> {
    let (strategy, candidate) = STRATEGIES
        .iter()
        .find_map(|(name, strategy)| strategy(raw).map(|c| (*name, c)))
        .ok_or(ParseError::NoActionFound)?;
    debug!(strategy, candidate, "Extracted action candidate");

    let object = decode_object(candidate)?;
    let (reasoning, hesitation) = extract_reasoning(raw);

    Ok(ParsedResponse {
        action: action_from_object(&object),
        reasoning,
        hesitation,
        strategy,
    })
}

/// First balanced `{...}` following the first `ACTION:` label
pub fn labeled_action(raw: &str) -> Option<&str> {
    let idx = raw.find(ACTION_LABEL)?;
    balanced_object(&raw[idx + ACTION_LABEL.len()..])
}

/// Last top-level object mentioning both `"text"` and `"context"` keys
pub fn last_action_shape(raw: &str) -> Option<&str> {
    top_level_objects(raw)
        .into_iter()
        .filter(|s| s.contains("\"text\"") && s.contains("\"context\""))
        .last()
}

/// Last top-level object of any shape
pub fn last_brace_block(raw: &str) -> Option<&str> {
    top_level_objects(raw).pop()
}

/// Every brace-balanced object in `raw` that is not nested in another one.
///
/// An unmatched `{` is skipped and scanning resumes right after it.
fn top_level_objects(raw: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut pos = 0;
    while let Some(offset) = raw[pos..].find('{') {
        let start = pos + offset;
        match balanced_object(&raw[start..]) {
            Some(object) => {
                objects.push(object);
                pos = start + object.len();
            }
            None => pos = start + 1,
        }
    }
    objects
}

/// The first brace-balanced object in `text`, skipping braces inside strings
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Fix the syntax slips models commonly make in small JSON objects:
/// typographic quotes, repeated commas, trailing commas before `}` or `]`.
pub fn repair_json(candidate: &str) -> String {
    let quotes_fixed: String = candidate
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => '"',
            other => other,
        })
        .collect();
    let commas_fixed = REPEATED_COMMA.replace_all(&quotes_fixed, ",");
    TRAILING_COMMA.replace_all(&commas_fixed, "$1").into_owned()
}

fn decode_object(candidate: &str) -> Result<Map<String, Value>, ParseError> {
    let value = match serde_json::from_str::<Value>(candidate) {
        Ok(value) => value,
        Err(_) => {
            let repaired = repair_json(candidate);
            serde_json::from_str::<Value>(&repaired).map_err(|e| ParseError::InvalidJson {
                message: e.to_string(),
                candidate: repaired.clone(),
            })?
        }
    };
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ParseError::NotAnObject(other.to_string())),
    }
}

fn action_from_object(object: &Map<String, Value>) -> ActionIntent {
    let terminate = object
        .get("action")
        .and_then(Value::as_str)
        .map(|a| a.trim().eq_ignore_ascii_case("terminate"))
        .unwrap_or(false);
    if terminate {
        return ActionIntent::Terminate;
    }

    match object.get("text").and_then(Value::as_str) {
        Some(text) => ActionIntent::Click {
            text: text.to_string(),
            context: object
                .get("context")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        None => ActionIntent::Unparseable,
    }
}

/// Reasoning section and its numbered-item count
pub fn extract_reasoning(raw: &str) -> (String, u32) {
    match REASONING_SECTION.captures(raw).and_then(|c| c.get(1)) {
        Some(section) => {
            let reasoning = section.as_str().trim().to_string();
            let hesitation = NUMBERED_ITEM.find_iter(&reasoning).count() as u32;
            (reasoning, hesitation)
        }
        None => (NO_REASONING.to_string(), 0),
    }
}

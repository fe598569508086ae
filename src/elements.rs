//! Clickable UI elements and the task definition that gives them meaning.
//!
//! An [`ElementSet`] is the list of elements visible in one UI variant. It is
//! loaded once per variant batch and swapped wholesale between variants.
//! A [`TaskDefinition`] names which element texts complete the task and which
//! end it as an abandonment; the outcome classifier is parameterized by it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

use crate::suite::{SuiteError, SuiteResult};

/// One clickable element as the agent sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiElement {
    /// Visible label; actions reference elements by exact text
    pub text: String,
    /// Where the element sits on the page (e.g., "cart summary panel")
    #[serde(default)]
    pub context: String,
}

impl UiElement {
    pub fn new(text: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: context.into(),
        }
    }
}

/// The active set of clickable elements for a variant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementSet {
    elements: Vec<UiElement>,
}

impl ElementSet {
    pub fn new(elements: Vec<UiElement>) -> Self {
        Self { elements }
    }

    /// Load an element set from a JSON array of `{text, context}` records.
    ///
    /// A missing or malformed file is an error: a variant without its element
    /// set cannot produce comparable metrics.
    pub fn load(path: impl AsRef<Path>) -> SuiteResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let elements: Vec<UiElement> =
            serde_json::from_str(&raw).map_err(|source| SuiteError::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), count = elements.len(), "Loaded element set");
        Ok(Self::new(elements))
    }

    /// Whether any element has exactly this text
    pub fn contains_text(&self, text: &str) -> bool {
        self.elements.iter().any(|e| e.text == text)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UiElement> {
        self.elements.iter()
    }

    pub fn as_slice(&self) -> &[UiElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Declarative success and termination criteria for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Element texts whose selection completes the task
    pub success_elements: BTreeSet<String>,
    /// Element texts whose selection ends the session as abandoned
    pub termination_elements: BTreeSet<String>,
}

impl Default for TaskDefinition {
    /// The checkout task: reaching checkout or placing the order converts,
    /// cancelling or navigating away abandons.
    fn default() -> Self {
        Self {
            success_elements: ["Checkout button", "Continue button", "Place Your Order"]
                .into_iter()
                .map(String::from)
                .collect(),
            termination_elements: [
                "Cancel purchase",
                "Browse other events",
                "Become Distracted",
                "BEST BUY logo",
                "Remove item",
                "Back to Delivery options",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl TaskDefinition {
    pub fn new<S, T>(success: S, termination: T) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            success_elements: success.into_iter().map(Into::into).collect(),
            termination_elements: termination.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_success(&self, text: &str) -> bool {
        self.success_elements.contains(text)
    }

    pub fn is_termination(&self, text: &str) -> bool {
        self.termination_elements.contains(text)
    }

    /// Warn when a variant offers no way to reach either terminal element kind.
    pub fn check_reachability(&self, variant: &str, elements: &ElementSet) {
        if !elements.iter().any(|e| self.is_success(&e.text)) {
            warn!(variant, "No success element present in element set");
        }
        if !elements.iter().any(|e| self.is_termination(&e.text)) {
            warn!(variant, "No termination element present in element set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_set_exact_text_match() {
        let set = ElementSet::new(vec![UiElement::new("Checkout button", "cart")]);
        assert!(set.contains_text("Checkout button"));
        assert!(!set.contains_text("checkout button"));
        assert!(!set.contains_text("Checkout"));
    }

    #[test]
    fn test_element_set_load_defaults_missing_context() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elements.json");
        std::fs::write(
            &path,
            r#"[{"text": "Checkout button", "context": "cart"}, {"text": "Help"}]"#,
        )
        .unwrap();

        let set = ElementSet::load(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.as_slice()[1], UiElement::new("Help", ""));
    }

    #[test]
    fn test_element_set_load_missing_file_is_error() {
        let err = ElementSet::load("/nonexistent/elements.json").unwrap_err();
        assert!(matches!(err, SuiteError::Io { .. }));
    }

    #[test]
    fn test_element_set_load_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elements.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = ElementSet::load(&path).unwrap_err();
        assert!(matches!(err, SuiteError::InvalidJson { .. }));
    }

    #[test]
    fn test_default_task_definition() {
        let task = TaskDefinition::default();
        assert!(task.is_success("Checkout button"));
        assert!(task.is_termination("Cancel purchase"));
        assert!(!task.is_success("Cancel purchase"));
        assert!(!task.is_termination("Checkout button"));
    }

    #[test]
    fn test_task_definition_deserializes_from_lists() {
        let task: TaskDefinition = serde_json::from_str(
            r#"{"success_elements": ["Buy"], "termination_elements": ["Back"]}"#,
        )
        .unwrap();
        assert_eq!(task, TaskDefinition::new(["Buy"], ["Back"]));
    }
}

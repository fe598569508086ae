//! Checks a parsed action against the active element set.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::elements::{ElementSet, TaskDefinition};
use crate::parser::ActionIntent;

/// Verdict on a single action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    /// Click on an element present in the set
    Valid,
    /// Click on an element that does not exist, or an unusable action
    Invalid,
    /// Explicit terminate sentinel
    Terminate,
    /// Click on a termination element
    TerminationElement,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Validation::Invalid)
    }
}

/// Validate `action` against `elements`.
///
/// Termination elements are recognized by text even when the variant does not
/// render them. Invalid clicks are logged and the session carries on.
pub fn validate(action: &ActionIntent, elements: &ElementSet, task: &TaskDefinition) -> Validation {
    match action {
        ActionIntent::Terminate => Validation::Terminate,
        ActionIntent::Click { text, .. } if task.is_termination(text) => {
            Validation::TerminationElement
        }
        ActionIntent::Click { text, .. } if elements.contains_text(text) => Validation::Valid,
        ActionIntent::Click { text, context } => {
            warn!(text, context, "Clicked element not present in element set");
            Validation::Invalid
        }
        ActionIntent::Unparseable => {
            warn!("Action names no element");
            Validation::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::UiElement;

    fn elements() -> ElementSet {
        ElementSet::new(vec![
            UiElement::new("Checkout button", "cart"),
            UiElement::new("Cancel purchase", "footer"),
        ])
    }

    #[test]
    fn test_validate() {
        let task = TaskDefinition::default();
        let set = elements();
        assert_eq!(validate(&ActionIntent::Terminate, &set, &task), Validation::Terminate);
        assert_eq!(
            validate(&ActionIntent::click("Cancel purchase", ""), &set, &task),
            Validation::TerminationElement
        );
        assert_eq!(
            validate(&ActionIntent::click("Checkout button", "anywhere"), &set, &task),
            Validation::Valid
        );
        assert_eq!(
            validate(&ActionIntent::click("Free money", "banner"), &set, &task),
            Validation::Invalid
        );
        assert_eq!(validate(&ActionIntent::Unparseable, &set, &task), Validation::Invalid);
    }

    #[test]
    fn test_termination_element_recognized_when_absent_from_set() {
        let set = ElementSet::new(vec![UiElement::new("Checkout button", "cart")]);
        assert_eq!(
            validate(&ActionIntent::click("Remove item", ""), &set, &TaskDefinition::default()),
            Validation::TerminationElement
        );
    }
}

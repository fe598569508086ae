//! Persona profiles and loading them from a directory of JSON files.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::suite::{SuiteError, SuiteResult};

/// Profile fields rendered first, in this order, when present.
const PROFILE_ORDER: &[&str] = &[
    "persona",
    "age",
    "profession",
    "location",
    "education",
    "income",
    "background",
    "core_motivation",
    "primary_anxiety",
    "decision_making_style",
    "technical_proficiency",
    "interaction_pattern",
    "work_habits",
    "device_context",
    "accessibility_needs",
    "dominant_trait",
    "user_type",
    "archetype",
    "core_value",
    "emotional_trigger",
];

/// A simulated user: identity, behavioral profile and abandonment triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Identifier taken from the persona file name
    #[serde(default)]
    pub persona_id: String,

    #[serde(default = "default_name")]
    pub name: String,

    /// What makes this persona give up on the task
    #[serde(default = "empty_object")]
    pub failure_conditions: Value,

    /// Every other profile field, kept verbatim
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

fn default_name() -> String {
    "Unknown".to_string()
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl Persona {
    pub fn new(persona_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            name: name.into(),
            failure_conditions: empty_object(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder helper to set a profile attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder helper to set the failure conditions
    pub fn with_failure_conditions(mut self, conditions: Value) -> Self {
        self.failure_conditions = conditions;
        self
    }

    /// Load one persona file; the file stem becomes the persona id
    pub fn from_file(path: &Path) -> SuiteResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut persona: Persona =
            serde_json::from_str(&raw).map_err(|source| SuiteError::InvalidJson {
                path: path.to_path_buf(),
                source,
            })?;
        persona.persona_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(persona)
    }

    /// Attribute rendered as plain text, if present and not null
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).and_then(value_text)
    }

    /// Labeled profile lines: well-known fields first, then the rest by key
    pub fn profile_lines(&self) -> Vec<(String, String)> {
        let mut lines = Vec::new();
        let mut push = |key: &str, value: &Value| {
            if let Some(text) = value_text(value) {
                lines.push((field_label(key), text));
            }
        };

        if let Some(v) = self.attributes.get("persona") {
            push("persona", v);
        }
        push("name", &Value::String(self.name.clone()));
        for key in PROFILE_ORDER.iter().skip(1) {
            if let Some(v) = self.attributes.get(*key) {
                push(key, v);
            }
        }
        for (key, value) in &self.attributes {
            if !PROFILE_ORDER.contains(&key.as_str()) {
                push(key, value);
            }
        }
        lines
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// `decision_making_style` -> `Decision Making Style`
fn field_label(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Load personas from `dir`, sampling `count` of them when given.
///
/// Files that fail to parse are skipped with a warning. A missing directory,
/// or a directory yielding no persona at all, is an error.
pub fn load_personas(dir: &Path, count: Option<usize>, seed: Option<u64>) -> SuiteResult<Vec<Persona>> {
    let entries = std::fs::read_dir(dir).map_err(|source| SuiteError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    files.sort();

    let selected: Vec<PathBuf> = match count {
        Some(n) if n < files.len() => {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut chosen: Vec<PathBuf> = files.choose_multiple(&mut rng, n).cloned().collect();
            chosen.sort();
            chosen
        }
        Some(n) => {
            if n > files.len() {
                warn!(
                    requested = n,
                    available = files.len(),
                    "Fewer persona files than requested, using all of them"
                );
            }
            files
        }
        None => files,
    };

    let mut personas = Vec::with_capacity(selected.len());
    for path in &selected {
        match Persona::from_file(path) {
            Ok(persona) => {
                debug!(persona_id = %persona.persona_id, name = %persona.name, "Loaded persona");
                personas.push(persona);
            }
            Err(e) => warn!(error = %e, "Skipping persona file"),
        }
    }

    if personas.is_empty() {
        return Err(SuiteError::NoPersonas(dir.to_path_buf()));
    }
    info!(count = personas.len(), dir = %dir.display(), "Loaded personas");
    Ok(personas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_persona(dir: &Path, id: &str, body: &str) {
        std::fs::write(dir.join(format!("{id}.json")), body).unwrap();
    }

    #[test]
    fn test_field_label() {
        assert_eq!(field_label("decision_making_style"), "Decision Making Style");
        assert_eq!(field_label("age"), "Age");
    }

    #[test]
    fn test_persona_deserialize_keeps_attributes() {
        let persona: Persona = serde_json::from_str(
            r#"{"name": "Dana", "age": 34, "profession": "Nurse",
                "failure_conditions": {"price_shock": "fees above 10%"}}"#,
        )
        .unwrap();
        assert_eq!(persona.name, "Dana");
        assert_eq!(persona.attribute("age").as_deref(), Some("34"));
        assert_eq!(persona.attribute("profession").as_deref(), Some("Nurse"));
        assert_eq!(persona.failure_conditions["price_shock"], "fees above 10%");
    }

    #[test]
    fn test_profile_lines_order() {
        let persona = Persona::new("p1", "Dana")
            .with_attribute("zodiac", "Leo")
            .with_attribute("profession", "Nurse")
            .with_attribute("age", 34)
            .with_attribute("persona", "Busy parent");
        let labels: Vec<String> = persona.profile_lines().into_iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["Persona", "Name", "Age", "Profession", "Zodiac"]);
    }

    #[test]
    fn test_load_personas_uses_file_stem_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write_persona(dir.path(), "customer_1", r#"{"name": "Ana"}"#);
        write_persona(dir.path(), "customer_2", r#"{"name": "Ben"}"#);
        write_persona(dir.path(), "broken", "{");

        let personas = load_personas(dir.path(), None, None).unwrap();
        let ids: Vec<&str> = personas.iter().map(|p| p.persona_id.as_str()).collect();
        assert_eq!(ids, vec!["customer_1", "customer_2"]);
    }

    #[test]
    fn test_load_personas_seeded_sample_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write_persona(dir.path(), &format!("p{i:02}"), r#"{"name": "X"}"#);
        }
        let first = load_personas(dir.path(), Some(3), Some(7)).unwrap();
        let second = load_personas(dir.path(), Some(3), Some(7)).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_load_personas_empty_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_personas(dir.path(), Some(5), None).unwrap_err();
        assert!(matches!(err, SuiteError::NoPersonas(_)));
    }
}

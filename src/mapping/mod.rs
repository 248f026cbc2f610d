// pdsync/src/mapping/mod.rs
pub(crate) mod resolve;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use resolve::resolve;

/// Target keys that Pipedrive stores as labelled lists instead of scalars.
/// `emails`/`phones` are the v2 spellings.
pub const MULTI_VALUE_KEYS: &[&str] = &["email", "phone", "emails", "phones"];

/// The payload key that must be present after resolution.
pub const REQUIRED_KEY: &str = "name";

/// One row of the mapping table: copy the value at `source_path` in the input
/// document to `target_key` in the payload.
///
/// On disk the keys are `pipedriveKey` and `inputKey`; `targetKey` and
/// `sourcePath` are accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldMapping {
    #[serde(rename = "pipedriveKey", alias = "targetKey")]
    pub target_key: String,
    #[serde(rename = "inputKey", alias = "sourcePath")]
    pub source_path: String,
}

impl FieldMapping {
    #[cfg(test)]
    pub fn new(target_key: impl Into<String>, source_path: impl Into<String>) -> Self {
        FieldMapping {
            target_key: target_key.into(),
            source_path: source_path.into(),
        }
    }
}

/// Flat person payload sent to the create/update endpoints.
/// Keys keep the order in which the mapping list first wrote them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Payload(Map::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The `name` field as text. Only non-blank strings and numbers count.
    pub fn name(&self) -> Option<String> {
        self.get(REQUIRED_KEY).and_then(name_text)
    }

    /// The value of the first entry in the email list (`email` or `emails`).
    pub fn primary_email(&self) -> Option<&str> {
        ["email", "emails"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .filter_map(|v| v.as_array())
            .filter_map(|entries| entries.first())
            .filter_map(|entry| entry.get("value").and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
    }
}

pub fn is_multi_value_key(key: &str) -> bool {
    MULTI_VALUE_KEYS.contains(&key)
}

/// Strings are used verbatim; everything else renders as its JSON text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn name_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

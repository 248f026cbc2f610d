// pdsync/src/mapping/resolve.rs
use log::debug;
use serde_json::{Value, json};

use super::{FieldMapping, Payload, REQUIRED_KEY, is_multi_value_key, stringify};
use crate::errors::{Result, SyncError};

const MULTI_VALUE_LABEL: &str = "work";

/// Walks `path` through `input` one dot-separated segment at a time.
///
/// Objects are indexed by key and arrays by decimal position. A missing
/// segment, a scalar in the middle of the path, or a final `null` all yield
/// `None`.
pub fn resolve_path<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = input;
    for segment in path.split('.') {
        current = match current {
            Value::Object(fields) => fields.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        Value::Null => None,
        found => Some(found),
    }
}

/// Builds the person payload from the mapping table and the input document.
///
/// Mappings whose path does not resolve are skipped. Email and phone values are
/// wrapped as a single primary "work" entry. When a key is written twice, the
/// later mapping wins.
pub fn resolve(mappings: &[FieldMapping], input: &Value) -> Result<Payload> {
    let mut payload = Payload::new();

    for mapping in mappings {
        let Some(value) = resolve_path(input, &mapping.source_path) else {
            debug!(
                "No value at '{}', skipping '{}'",
                mapping.source_path, mapping.target_key
            );
            continue;
        };

        let shaped = if is_multi_value_key(&mapping.target_key) {
            json!([{
                "label": MULTI_VALUE_LABEL,
                "value": stringify(value),
                "primary": true
            }])
        } else {
            value.clone()
        };
        payload.insert(mapping.target_key.clone(), shaped);
    }

    if payload.name().is_none() {
        return Err(SyncError::MissingRequiredField(REQUIRED_KEY.to_string()));
    }

    Ok(payload)
}

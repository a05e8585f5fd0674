use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

/// What an atomic update closure decided for the value it was shown.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResult {
    /// Write this value. `Value::Null` deletes the node.
    Commit(Value),
    Abort,
}

/// Final state of an `atomic_update` call.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicOutcome {
    /// The committed value.
    Committed(Value),
    /// The value the closure saw when it aborted.
    Aborted(Option<Value>),
}

impl AtomicOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, AtomicOutcome::Committed(_))
    }
}

/// Closure applied by `atomic_update`. Backends with optimistic concurrency may
/// call it several times, so it must not have side effects.
pub type Transaction<'a> = &'a (dyn Fn(Option<&Value>) -> TransactionResult + Send + Sync);

/// Key-path document store. Paths are `/`-separated, relative to the root.
///
/// Only `atomic_update` is race-safe. `update` merges `fields` into the node at
/// `path`; a key may span several segments and a `null` value deletes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    async fn atomic_update(
        &self,
        path: &str,
        apply: Transaction<'_>,
    ) -> Result<AtomicOutcome, StoreError>;

    async fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Children of `path` whose `key` field equals `value`.
    async fn find_by_child(
        &self,
        path: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let children = match self.get(path).await? {
            Some(Value::Object(children)) => children,
            _ => return Ok(Vec::new()),
        };

        Ok(children
            .into_iter()
            .filter(|(_, child)| child.get(key) == Some(value))
            .collect())
    }
}

const FORBIDDEN_KEY_CHARS: [char; 5] = ['.', '$', '#', '[', ']'];

/// Splits a path into its segments, rejecting keys the Realtime Database refuses.
pub fn path_segments(path: &str) -> Result<Vec<&str>, StoreError> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    for segment in &segments {
        if segment.contains(FORBIDDEN_KEY_CHARS) || segment.chars().any(char::is_control) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }

    Ok(segments)
}

/// Drops `null` members and empty objects, the way the Realtime Database
/// stores documents. Returns `Value::Null` when nothing is left.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if cleaned.is_empty() {
                Value::Null
            } else {
                Value::Object(cleaned)
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_segments_skip_empty_parts() {
        let segments = path_segments("/availability//p1/2026-03-02/09:00/").unwrap();
        assert_eq!(segments, vec!["availability", "p1", "2026-03-02", "09:00"]);
    }

    #[test]
    fn path_segments_reject_forbidden_characters() {
        assert!(path_segments("appointments/a.b").is_err());
        assert!(path_segments("appointments/$id").is_err());
        assert!(path_segments("appointments/[0]").is_err());
    }

    #[test]
    fn normalize_removes_nulls_and_empty_objects() {
        let value = json!({
            "isAvailable": true,
            "appointmentId": null,
            "nested": { "gone": null },
        });
        assert_eq!(normalize(value), json!({ "isAvailable": true }));
        assert_eq!(normalize(json!({})), Value::Null);
    }
}

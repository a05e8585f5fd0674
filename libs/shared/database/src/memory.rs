use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::store::{normalize, path_segments, AtomicOutcome, DocumentStore, Transaction, TransactionResult};

/// Process-local store with Realtime Database semantics. Every operation,
/// multi-path `update` included, runs under one lock.
pub struct InMemoryStore {
    root: Mutex<Value>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Null),
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            root: Mutex::new(normalize(data)),
        }
    }

    /// Copy of the whole tree.
    pub async fn snapshot(&self) -> Value {
        self.root.lock().await.clone()
    }
}

fn node_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(*segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn write_at(root: &mut Value, segments: &[&str], value: Value) {
    let value = normalize(value);

    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_at(root, segments);
        return;
    }

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { unreachable!() };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), value);
    }
}

/// Removes the node and prunes parents left empty.
fn remove_at(node: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    let Value::Object(map) = node else { return };

    if rest.is_empty() {
        map.remove(*first);
    } else if let Some(child) = map.get_mut(*first) {
        remove_at(child, rest);
        if child.is_null() {
            map.remove(*first);
        }
    }

    if map.is_empty() {
        *node = Value::Null;
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let segments = path_segments(path)?;
        let root = self.root.lock().await;
        Ok(node_at(&root, &segments).cloned())
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let segments = path_segments(path)?;
        let mut root = self.root.lock().await;
        write_at(&mut root, &segments, value);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let base = path_segments(path)?;
        let mut writes = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let mut segments = base.clone();
            segments.extend(path_segments(&key)?);
            if segments.len() == base.len() {
                return Err(StoreError::InvalidPath(key));
            }
            writes.push((segments.iter().map(|s| s.to_string()).collect::<Vec<_>>(), value));
        }

        let mut root = self.root.lock().await;
        for (segments, value) in writes {
            let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
            write_at(&mut root, &segments, value);
        }
        Ok(())
    }

    async fn atomic_update(
        &self,
        path: &str,
        apply: Transaction<'_>,
    ) -> Result<AtomicOutcome, StoreError> {
        let segments = path_segments(path)?;
        let mut root = self.root.lock().await;

        let current = node_at(&root, &segments).cloned();
        match apply(current.as_ref()) {
            TransactionResult::Commit(value) => {
                let value = normalize(value);
                write_at(&mut root, &segments, value.clone());
                Ok(AtomicOutcome::Committed(value))
            }
            TransactionResult::Abort => {
                debug!("Atomic update on {} aborted", path);
                Ok(AtomicOutcome::Aborted(current))
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let segments = path_segments(path)?;
        let mut root = self.root.lock().await;
        remove_at(&mut root, &segments);
        Ok(())
    }
}

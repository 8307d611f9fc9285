use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;

use super::RemoteStore;
use crate::error::StoreError;

/// In-memory store for tests and offline runs.
///
/// Each path holds an append-only list of records; `read_latest` returns the
/// last one. Paths are compared without leading/trailing slashes.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    records: Mutex<HashMap<String, Vec<Value>>>,
    failing: Mutex<HashSet<String>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record as if an operator had written it.
    pub fn insert(&self, path: &str, record: Value) {
        if let Ok(mut records) = self.records.lock() {
            records.entry(key(path)).or_default().push(record);
        }
    }

    /// Every record written under `path`, oldest first.
    pub fn records(&self, path: &str) -> Vec<Value> {
        self.records
            .lock()
            .map(|records| records.get(&key(path)).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Make subsequent writes to `path` fail with a 500.
    pub fn fail_writes_to(&self, path: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(key(path));
        }
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn read_latest(&self, path: &str) -> Result<Value, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Network {
            url: path.to_string(),
            reason: "in-memory store lock poisoned".to_string(),
        })?;
        records
            .get(&key(path))
            .and_then(|list| list.last())
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })
    }

    fn write_record(&self, path: &str, record: &Value) -> Result<(), StoreError> {
        let failing = self
            .failing
            .lock()
            .map(|failing| failing.contains(&key(path)))
            .unwrap_or(false);
        if failing {
            return Err(StoreError::Rejected {
                url: path.to_string(),
                status: 500,
            });
        }
        let mut records = self.records.lock().map_err(|_| StoreError::Network {
            url: path.to_string(),
            reason: "in-memory store lock poisoned".to_string(),
        })?;
        records.entry(key(path)).or_default().push(record.clone());
        Ok(())
    }
}

fn key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn latest_record_wins() {
        let store = InMemoryRemoteStore::new();
        store.insert("/a/b", json!({"v": 1}));
        store.insert("a/b/", json!({"v": 2}));
        assert_eq!(store.read_latest("/a/b").unwrap()["v"], 2);
        assert_eq!(store.records("/a/b").len(), 2);
    }

    #[test]
    fn missing_path_is_not_found() {
        let store = InMemoryRemoteStore::new();
        assert!(store.read_latest("/nope").unwrap_err().is_not_found());
    }

    #[test]
    fn failing_path_rejects_writes() {
        let store = InMemoryRemoteStore::new();
        store.fail_writes_to("/out");
        let err = store.write_record("/out", &json!({})).unwrap_err();
        assert!(matches!(err, StoreError::Rejected { status: 500, .. }));
        assert!(store.records("/out").is_empty());
    }
}

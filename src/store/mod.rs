//! Remote resource-tree store.
//!
//! The agent only needs two operations against the CSE: read the latest
//! content instance of a container, and append a new content instance. Both go
//! through `RemoteStore` so the resolver and reporter can run against the
//! in-memory store in tests.

mod http;
mod memory;

pub use http::{CreateOutcome, HttpRemoteStore, ResourceType, StoreConfig};
pub use memory::InMemoryRemoteStore;

use serde_json::Value;

use crate::error::StoreError;

/// Read/write of opaque JSON records at named paths.
pub trait RemoteStore: Send + Sync {
    /// Latest record stored under `path`.
    fn read_latest(&self, path: &str) -> Result<Value, StoreError>;

    /// Append `record` under `path`.
    fn write_record(&self, path: &str, record: &Value) -> Result<(), StoreError>;
}

impl<S: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<S> {
    fn read_latest(&self, path: &str) -> Result<Value, StoreError> {
        (**self).read_latest(path)
    }

    fn write_record(&self, path: &str, record: &Value) -> Result<(), StoreError> {
        (**self).write_record(path, record)
    }
}

/// Join a base URL and a resource path with exactly one `/` between them.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// Extract the record carried by a content instance response.
///
/// `con` may hold either a JSON object or a string containing JSON.
pub(crate) fn cin_content(path: &str, body: &Value) -> Result<Value, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        path: path.to_string(),
        reason,
    };
    let con = body
        .get("m2m:cin")
        .and_then(|cin| cin.get("con"))
        .ok_or_else(|| malformed("'con' is empty".to_string()))?;
    match con {
        Value::String(raw) if raw.trim().is_empty() => Err(malformed("'con' is empty".to_string())),
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| malformed(format!("JSON parse error in 'con': {}", e))),
        Value::Object(map) if map.is_empty() => Err(malformed("'con' is empty".to_string())),
        Value::Object(_) => Ok(con.clone()),
        Value::Null => Err(malformed("'con' is empty".to_string())),
        other => Err(malformed(format!("unexpected 'con' value: {}", other))),
    }
}

/// Content instance body used for result uploads.
pub(crate) fn cin_body(record: &Value) -> Value {
    serde_json::json!({
        "m2m:cin": {
            "con": "data",
            "lbl": [record.to_string()],
        }
    })
}

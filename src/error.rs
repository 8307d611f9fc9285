//! Error taxonomy for a single agent run.
//!
//! `StoreError` is what the remote store client reports. `AgentError` is what a
//! run reports; the component that sees a store failure decides which bucket it
//! lands in. The resolver keeps transport and server failures as `Network` and
//! turns absent or unreadable records into `ConfigUnresolved`; the reporter
//! turns every write failure into `Network`.

use thiserror::Error;

/// Failure talking to the remote resource tree.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {path}")]
    NotFound { path: String },

    #[error("access denied for {path} (check the access control policy)")]
    Forbidden { path: String },

    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("remote rejected request to {url}: HTTP {status}")]
    Rejected { url: String, status: u16 },

    #[error("malformed record at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Which link of the deployment -> model chain failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveStage {
    Deployment,
    Model,
}

impl std::fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveStage::Deployment => f.write_str("deployment record"),
            ResolveStage::Model => f.write_str("model metadata"),
        }
    }
}

/// Failure of one scheduled run. The process survives all of these.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("network error: {0}")]
    Network(#[source] StoreError),

    #[error("configuration unresolved at {stage} {path}: {reason}")]
    ConfigUnresolved {
        stage: ResolveStage,
        path: String,
        reason: String,
    },

    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("camera capture failed: {0:#}")]
    Camera(anyhow::Error),
}

impl AgentError {
    pub(crate) fn unresolved(
        stage: ResolveStage,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        AgentError::ConfigUnresolved {
            stage,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_config_unresolved(&self) -> bool {
        matches!(self, AgentError::ConfigUnresolved { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_error_names_stage_and_path() {
        let err = AgentError::unresolved(ResolveStage::Model, "/repo/m1", "missing mlModelPath");
        assert!(err.is_config_unresolved());
        let msg = err.to_string();
        assert!(msg.contains("model metadata"));
        assert!(msg.contains("/repo/m1"));
    }

    #[test]
    fn network_error_keeps_store_source() {
        let err = AgentError::Network(StoreError::Rejected {
            url: "http://cse/x".to_string(),
            status: 500,
        });
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("HTTP 500"));
    }
}

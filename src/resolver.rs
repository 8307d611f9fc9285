//! Deployment -> model metadata -> artifact path resolution.
//!
//! The operator repoints a deployment by writing a new content instance to the
//! deployment container; the agent picks it up on the next run because nothing
//! here is cached.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AgentError, ResolveStage};
use crate::error::StoreError;
use crate::store::RemoteStore;

/// Pointer from a model slot to a model metadata resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub deployment_name: String,
    pub model_resource_id: String,
    pub input_resource: Option<String>,
    pub output_resource: Option<String>,
    pub model_status: Option<String>,
}

/// Model metadata record. `model_id` is the resource id it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_artifact_path: String,
    pub name: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDeployment {
    pub deployment: DeploymentRecord,
    pub model: ModelMetadata,
}

impl ResolvedDeployment {
    pub fn model_artifact_path(&self) -> &str {
        &self.model.model_artifact_path
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentWire {
    #[serde(rename = "modelID")]
    model_id: Option<String>,
    #[serde(rename = "inputResource")]
    input_resource: Option<String>,
    #[serde(rename = "outputResource")]
    output_resource: Option<String>,
    #[serde(rename = "modelStatus")]
    model_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelWire {
    #[serde(rename = "mlModelPath")]
    ml_model_path: Option<String>,
    name: Option<String>,
    version: Option<String>,
    platform: Option<String>,
}

pub struct ConfigResolver {
    store: Arc<dyn RemoteStore>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Artifact path of the model the deployment currently points to.
    pub fn resolve_model_path(&self, deployment_path: &str) -> Result<String, AgentError> {
        Ok(self.resolve(deployment_path)?.model.model_artifact_path)
    }

    /// Both records of the chain.
    pub fn resolve(&self, deployment_path: &str) -> Result<ResolvedDeployment, AgentError> {
        let deployment = self.read_deployment(deployment_path)?;
        let model = self.read_model(&deployment.model_resource_id)?;
        log::info!(
            "deployment {} -> model {} ({})",
            deployment.deployment_name,
            model.model_id,
            model.model_artifact_path
        );
        if let Some(output) = &deployment.output_resource {
            log::debug!("deployment {} declares output {}", deployment.deployment_name, output);
        }
        Ok(ResolvedDeployment { deployment, model })
    }

    fn read_deployment(&self, path: &str) -> Result<DeploymentRecord, AgentError> {
        let stage = ResolveStage::Deployment;
        let raw = self
            .store
            .read_latest(path)
            .map_err(|e| lookup_error(stage, path, e))?;
        let wire: DeploymentWire = decode(stage, path, raw)?;
        let model_resource_id = required(stage, path, "modelID", wire.model_id)?;
        Ok(DeploymentRecord {
            deployment_name: deployment_name(path),
            model_resource_id,
            input_resource: wire.input_resource,
            output_resource: wire.output_resource.filter(|p| !p.trim().is_empty()),
            model_status: wire.model_status,
        })
    }

    fn read_model(&self, model_resource_id: &str) -> Result<ModelMetadata, AgentError> {
        let stage = ResolveStage::Model;
        let raw = self
            .store
            .read_latest(model_resource_id)
            .map_err(|e| lookup_error(stage, model_resource_id, e))?;
        let wire: ModelWire = decode(stage, model_resource_id, raw)?;
        let model_artifact_path =
            required(stage, model_resource_id, "mlModelPath", wire.ml_model_path)?;
        Ok(ModelMetadata {
            model_id: model_resource_id.to_string(),
            model_artifact_path,
            name: wire.name,
            version: wire.version,
            platform: wire.platform,
        })
    }
}

/// A record that is absent, forbidden or unreadable leaves the run unresolved.
/// An unreachable CSE or a server-side failure stays a network error.
fn lookup_error(stage: ResolveStage, path: &str, err: StoreError) -> AgentError {
    match err {
        StoreError::Network { .. } | StoreError::Rejected { .. } => AgentError::Network(err),
        StoreError::NotFound { .. } | StoreError::Forbidden { .. } | StoreError::Malformed { .. } => {
            AgentError::unresolved(stage, path, err.to_string())
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    stage: ResolveStage,
    path: &str,
    raw: Value,
) -> Result<T, AgentError> {
    serde_json::from_value(raw).map_err(|e| AgentError::unresolved(stage, path, e.to_string()))
}

fn required(
    stage: ResolveStage,
    path: &str,
    field: &str,
    value: Option<String>,
) -> Result<String, AgentError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(AgentError::unresolved(
            stage,
            path,
            format!("missing '{}'", field),
        )),
    }
}

fn deployment_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRemoteStore;
    use serde_json::json;

    const DEPLOY: &str = "/TinyIoT/TinyFarm/modelDeploymentList/modelDeploy_healthy";
    const MODEL: &str = "/TinyIoT/modelRepo/mlModel-health";

    fn seeded() -> Arc<InMemoryRemoteStore> {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.insert(
            DEPLOY,
            json!({
                "modelID": MODEL,
                "inputResource": "/TinyIoT/TinyFarm/Camera/Images",
                "outputResource": "/TinyIoT/TinyFarm/inference/health",
                "modelStatus": "deployed"
            }),
        );
        store.insert(
            MODEL,
            json!({
                "name": "health-species-detector",
                "version": "v2.1",
                "mlModelPath": "/home/farm/last.onnx"
            }),
        );
        store
    }

    #[test]
    fn resolves_artifact_through_both_records() {
        let resolver = ConfigResolver::new(seeded());
        assert_eq!(
            resolver.resolve_model_path(DEPLOY).unwrap(),
            "/home/farm/last.onnx"
        );

        let resolved = resolver.resolve(DEPLOY).unwrap();
        assert_eq!(resolved.deployment.deployment_name, "modelDeploy_healthy");
        assert_eq!(resolved.model.model_id, MODEL);
        assert_eq!(resolved.model.version.as_deref(), Some("v2.1"));
        assert_eq!(
            resolved.deployment.output_resource.as_deref(),
            Some("/TinyIoT/TinyFarm/inference/health")
        );
    }

    #[test]
    fn repointed_deployment_is_picked_up_next_call() {
        let store = seeded();
        let resolver = ConfigResolver::new(store.clone());
        assert_eq!(resolver.resolve_model_path(DEPLOY).unwrap(), "/home/farm/last.onnx");

        store.insert("/TinyIoT/modelRepo/mlModel-v3", json!({"mlModelPath": "/home/farm/v3.onnx"}));
        store.insert(DEPLOY, json!({"modelID": "/TinyIoT/modelRepo/mlModel-v3"}));
        assert_eq!(resolver.resolve_model_path(DEPLOY).unwrap(), "/home/farm/v3.onnx");
    }

    #[test]
    fn missing_deployment_is_unresolved() {
        let resolver = ConfigResolver::new(Arc::new(InMemoryRemoteStore::new()));
        let err = resolver.resolve_model_path(DEPLOY).unwrap_err();
        match err {
            AgentError::ConfigUnresolved { stage, .. } => assert_eq!(stage, ResolveStage::Deployment),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_model_metadata_is_unresolved_at_model_stage() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.insert(DEPLOY, json!({"modelID": MODEL}));
        let err = ConfigResolver::new(store).resolve_model_path(DEPLOY).unwrap_err();
        match err {
            AgentError::ConfigUnresolved { stage, path, .. } => {
                assert_eq!(stage, ResolveStage::Model);
                assert_eq!(path, MODEL);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unreachable_cse_is_a_network_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let store = crate::store::HttpRemoteStore::new(crate::store::StoreConfig {
            base_url: format!("http://127.0.0.1:{}/", port),
            origin: "SRaspberryPi_AI".to_string(),
            timeout: Some(std::time::Duration::from_secs(2)),
        });
        let err = ConfigResolver::new(Arc::new(store))
            .resolve_model_path(DEPLOY)
            .unwrap_err();
        assert!(matches!(err, AgentError::Network(StoreError::Network { .. })), "{:?}", err);
        assert!(!err.is_config_unresolved());
    }

    #[test]
    fn server_failure_is_a_network_error_and_missing_is_not() {
        let rejected = StoreError::Rejected {
            url: "http://cse/x".to_string(),
            status: 500,
        };
        assert!(matches!(
            lookup_error(ResolveStage::Model, MODEL, rejected),
            AgentError::Network(StoreError::Rejected { status: 500, .. })
        ));
        let missing = StoreError::NotFound { path: MODEL.to_string() };
        assert!(lookup_error(ResolveStage::Model, MODEL, missing).is_config_unresolved());
    }

    #[test]
    fn absent_fields_are_unresolved() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.insert(DEPLOY, json!({"modelStatus": "deployed"}));
        assert!(ConfigResolver::new(store.clone())
            .resolve_model_path(DEPLOY)
            .unwrap_err()
            .is_config_unresolved());

        store.insert(DEPLOY, json!({"modelID": MODEL}));
        store.insert(MODEL, json!({"name": "no path", "mlModelPath": "  "}));
        assert!(ConfigResolver::new(store)
            .resolve_model_path(DEPLOY)
            .unwrap_err()
            .is_config_unresolved());
    }
}

//! First-time setup of the farm's resource tree on a CSE.
//!
//! Creates the application entity, an access policy for the agent, the model
//! repository and deployment containers with one content instance each, and
//! the inference output containers. Re-running is safe: existing containers
//! are left alone (409), but new content instances are appended.

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};

use crate::error::StoreError;
use crate::store::{join_url, CreateOutcome, HttpRemoteStore, ResourceType};

/// acop bits: create, retrieve, update, delete, notify, discover.
pub const ACOP_ALL: u8 = 63;

/// The resource-tree operations provisioning needs.
pub trait ResourceTree {
    fn retrieve(&self, path: &str) -> Result<Value, StoreError>;
    fn create(&self, parent: &str, ty: ResourceType, body: &Value) -> Result<CreateOutcome, StoreError>;
}

impl ResourceTree for HttpRemoteStore {
    fn retrieve(&self, path: &str) -> Result<Value, StoreError> {
        HttpRemoteStore::retrieve(self, path)
    }

    fn create(&self, parent: &str, ty: ResourceType, body: &Value) -> Result<CreateOutcome, StoreError> {
        HttpRemoteStore::create(self, parent, ty, body)
    }
}

#[derive(Clone, Debug)]
pub struct ModelEntry {
    /// Container name under the model repository, e.g. `mlModel-health`.
    pub container: String,
    pub name: String,
    pub version: String,
    pub platform: String,
    pub description: String,
    pub artifact_path: String,
}

impl ModelEntry {
    fn record(&self) -> Value {
        json!({
            "name": self.name,
            "version": self.version,
            "platform": self.platform,
            "description": self.description,
            "mlModelURL": "",
            "mlModelPath": self.artifact_path,
        })
    }
}

#[derive(Clone, Debug)]
pub struct DeploymentEntry {
    /// Container name under `modelDeploymentList`, e.g. `modelDeploy_healthy`.
    pub container: String,
    /// Model container this deployment points at.
    pub model: String,
    /// Output container name under `inference`.
    pub output: String,
}

#[derive(Clone, Debug)]
pub struct ProvisionPlan {
    pub cse: String,
    pub ae: String,
    pub origin: String,
    pub acp_name: String,
    pub models: Vec<ModelEntry>,
    pub deployments: Vec<DeploymentEntry>,
}

impl ProvisionPlan {
    /// Species and health models with one deployment each.
    pub fn farm(cse: &str, ae: &str, origin: &str, species_model: &str, health_model: &str) -> Self {
        Self {
            cse: cse.to_string(),
            ae: ae.to_string(),
            origin: origin.to_string(),
            acp_name: "acp_pi_full_access".to_string(),
            models: vec![
                ModelEntry {
                    container: "mlModel-species".to_string(),
                    name: "species-detector".to_string(),
                    version: "v1.0".to_string(),
                    platform: "ONNX".to_string(),
                    description: "Plant species detection (basil, poinsettia)".to_string(),
                    artifact_path: species_model.to_string(),
                },
                ModelEntry {
                    container: "mlModel-health".to_string(),
                    name: "health-species-detector".to_string(),
                    version: "v2.1".to_string(),
                    platform: "ONNX".to_string(),
                    description: "Health+Species detection (healthy_basil, etc.)".to_string(),
                    artifact_path: health_model.to_string(),
                },
            ],
            deployments: vec![
                DeploymentEntry {
                    container: "modelDeploy_species".to_string(),
                    model: "mlModel-species".to_string(),
                    output: "species".to_string(),
                },
                DeploymentEntry {
                    container: "modelDeploy_healthy".to_string(),
                    model: "mlModel-health".to_string(),
                    output: "health".to_string(),
                },
            ],
        }
    }

    fn cse_path(&self) -> String {
        format!("/{}", self.cse)
    }

    fn ae_path(&self) -> String {
        format!("/{}/{}", self.cse, self.ae)
    }

    fn repo_path(&self) -> String {
        format!("/{}/modelRepo", self.cse)
    }

    fn deployment_record(&self, entry: &DeploymentEntry) -> Value {
        json!({
            "modelID": join_url(&self.repo_path(), &entry.model),
            "inputResource": format!("{}/Camera/Images", self.ae_path()),
            "outputResource": format!("{}/inference/{}", self.ae_path(), entry.output),
            "modelStatus": "deployed",
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProvisionReport {
    pub acp_ri: String,
    /// Paths created by this run.
    pub created: Vec<String>,
    /// Paths that already existed.
    pub existing: Vec<String>,
}

pub fn provision(tree: &dyn ResourceTree, plan: &ProvisionPlan) -> Result<ProvisionReport> {
    let mut report = ProvisionReport::default();
    let cse = plan.cse_path();
    let ae = plan.ae_path();

    let ae_body = json!({
        "m2m:ae": {"rn": plan.ae, "api": "N.org.example.minifarm", "rr": true}
    });
    let outcome = tree
        .create(&cse, ResourceType::ApplicationEntity, &ae_body)
        .with_context(|| format!("create AE {}", ae))?;
    record(&mut report, &ae, outcome);

    report.acp_ri = ensure_acp(tree, plan)?;
    let acpi = vec![report.acp_ri.clone()];
    log::info!("using access policy {}", report.acp_ri);

    let deploy_list = format!("{}/modelDeploymentList", ae);
    ensure_container(tree, &mut report, &ae, "modelDeploymentList", &acpi)?;
    ensure_container(tree, &mut report, &cse, "modelRepo", &acpi)?;

    let repo = plan.repo_path();
    for model in &plan.models {
        let path = ensure_container(tree, &mut report, &repo, &model.container, &acpi)?;
        add_config_instance(tree, &path, &model.record(), &model.name)?;
    }

    for deployment in &plan.deployments {
        let path = ensure_container(tree, &mut report, &deploy_list, &deployment.container, &acpi)?;
        add_config_instance(tree, &path, &plan.deployment_record(deployment), "deployment")?;
    }

    let inference = ensure_container(tree, &mut report, &ae, "inference", &acpi)?;
    for deployment in &plan.deployments {
        ensure_container(tree, &mut report, &inference, &deployment.output, &acpi)?;
    }

    Ok(report)
}

fn record(report: &mut ProvisionReport, path: &str, outcome: CreateOutcome) {
    match outcome {
        CreateOutcome::Created(_) => {
            log::info!("created {}", path);
            report.created.push(path.to_string());
        }
        CreateOutcome::AlreadyExists => {
            log::info!("{} already exists", path);
            report.existing.push(path.to_string());
        }
    }
}

fn acp_ri(body: &Value) -> Option<String> {
    body.get("m2m:acp")
        .and_then(|acp| acp.get("ri"))
        .and_then(Value::as_str)
        .filter(|ri| !ri.is_empty())
        .map(str::to_string)
}

/// Existing policy id, or a new full-access policy for the plan's originator.
fn ensure_acp(tree: &dyn ResourceTree, plan: &ProvisionPlan) -> Result<String> {
    let path = join_url(&plan.cse_path(), &plan.acp_name);
    match tree.retrieve(&path) {
        Ok(body) => {
            if let Some(ri) = acp_ri(&body) {
                return Ok(ri);
            }
        }
        Err(err) if err.is_not_found() => {}
        Err(err) => return Err(anyhow!(err).context(format!("retrieve ACP {}", path))),
    }

    let rule = json!({"acop": ACOP_ALL, "acor": [plan.origin]});
    let body = json!({
        "m2m:acp": {
            "rn": plan.acp_name,
            "pv": {"acr": [rule]},
            "pvs": {"acr": [rule]},
        }
    });
    let created = match tree
        .create(&plan.cse_path(), ResourceType::AccessControlPolicy, &body)
        .with_context(|| format!("create ACP {}", path))?
    {
        CreateOutcome::Created(body) => body,
        CreateOutcome::AlreadyExists => tree
            .retrieve(&path)
            .with_context(|| format!("retrieve ACP {}", path))?,
    };
    acp_ri(&created).ok_or_else(|| anyhow!("ACP {} response carries no resource id", path))
}

fn ensure_container(
    tree: &dyn ResourceTree,
    report: &mut ProvisionReport,
    parent: &str,
    name: &str,
    acpi: &[String],
) -> Result<String> {
    let path = join_url(parent, name);
    let body = json!({"m2m:cnt": {"rn": name, "acpi": acpi}});
    let outcome = tree
        .create(parent, ResourceType::Container, &body)
        .with_context(|| format!("create container {}", path))?;
    record(report, &path, outcome);
    Ok(path)
}

fn add_config_instance(tree: &dyn ResourceTree, container: &str, data: &Value, label: &str) -> Result<()> {
    let body = json!({
        "m2m:cin": {
            "con": data.to_string(),
            "lbl": ["config", label],
        }
    });
    match tree
        .create(container, ResourceType::ContentInstance, &body)
        .with_context(|| format!("create content instance under {}", container))?
    {
        CreateOutcome::Created(_) => {
            log::info!("content instance added under {}", container);
            Ok(())
        }
        CreateOutcome::AlreadyExists => {
            Err(anyhow!("CSE refused content instance under {} (409)", container))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Records every call; `existing` paths answer 409 on create.
    #[derive(Default)]
    struct FakeTree {
        calls: RefCell<Vec<(String, u8, Value)>>,
        existing: HashSet<String>,
        acp: Option<Value>,
    }

    impl ResourceTree for FakeTree {
        fn retrieve(&self, path: &str) -> Result<Value, StoreError> {
            match &self.acp {
                Some(body) => Ok(body.clone()),
                None => Err(StoreError::NotFound {
                    path: path.to_string(),
                }),
            }
        }

        fn create(&self, parent: &str, ty: ResourceType, body: &Value) -> Result<CreateOutcome, StoreError> {
            self.calls
                .borrow_mut()
                .push((parent.to_string(), ty.code(), body.clone()));
            let rn = body
                .as_object()
                .and_then(|o| o.values().next())
                .and_then(|r| r.get("rn"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if self.existing.contains(&join_url(parent, rn)) {
                return Ok(CreateOutcome::AlreadyExists);
            }
            if ty == ResourceType::AccessControlPolicy {
                return Ok(CreateOutcome::Created(json!({"m2m:acp": {"ri": "acp-new"}})));
            }
            Ok(CreateOutcome::Created(Value::Null))
        }
    }

    fn plan() -> ProvisionPlan {
        ProvisionPlan::farm("TinyIoT", "TinyFarm", "SRaspberryPi_AI", "/models/best.onnx", "/models/last.onnx")
    }

    #[test]
    fn builds_the_full_tree() {
        let tree = FakeTree::default();
        let report = provision(&tree, &plan()).unwrap();
        assert_eq!(report.acp_ri, "acp-new");
        assert!(report
            .created
            .contains(&"/TinyIoT/TinyFarm/modelDeploymentList/modelDeploy_healthy".to_string()));
        assert!(report.created.contains(&"/TinyIoT/TinyFarm/inference/health".to_string()));

        let calls = tree.calls.borrow();
        let deploy_cin = calls
            .iter()
            .find(|(parent, ty, _)| {
                *ty == 4 && parent == "/TinyIoT/TinyFarm/modelDeploymentList/modelDeploy_healthy"
            })
            .unwrap();
        let con: Value =
            serde_json::from_str(deploy_cin.2["m2m:cin"]["con"].as_str().unwrap()).unwrap();
        assert_eq!(con["modelID"], "/TinyIoT/modelRepo/mlModel-health");
        assert_eq!(con["outputResource"], "/TinyIoT/TinyFarm/inference/health");

        let model_cin = calls
            .iter()
            .find(|(parent, ty, _)| *ty == 4 && parent == "/TinyIoT/modelRepo/mlModel-health")
            .unwrap();
        assert!(model_cin.2["m2m:cin"]["con"]
            .as_str()
            .unwrap()
            .contains("/models/last.onnx"));
    }

    #[test]
    fn containers_link_the_policy() {
        let tree = FakeTree::default();
        provision(&tree, &plan()).unwrap();
        let calls = tree.calls.borrow();
        assert!(calls
            .iter()
            .filter(|(_, ty, _)| *ty == 3)
            .all(|(_, _, body)| body["m2m:cnt"]["acpi"][0] == "acp-new"));
    }

    #[test]
    fn existing_acp_is_reused() {
        let tree = FakeTree {
            acp: Some(json!({"m2m:acp": {"ri": "acp-old"}})),
            ..FakeTree::default()
        };
        let report = provision(&tree, &plan()).unwrap();
        assert_eq!(report.acp_ri, "acp-old");
        assert!(tree.calls.borrow().iter().all(|(_, ty, _)| *ty != 1));
    }

    #[test]
    fn existing_containers_are_reported() {
        let tree = FakeTree {
            existing: ["/TinyIoT/TinyFarm".to_string(), "/TinyIoT/modelRepo".to_string()]
                .into_iter()
                .collect(),
            ..FakeTree::default()
        };
        let report = provision(&tree, &plan()).unwrap();
        assert!(report.existing.contains(&"/TinyIoT/TinyFarm".to_string()));
        assert!(report.existing.contains(&"/TinyIoT/modelRepo".to_string()));
    }
}

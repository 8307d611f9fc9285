use std::time::Duration;

use rand::RngCore;
use serde_json::Value;

use super::{cin_body, cin_content, join_url, RemoteStore};
use crate::error::StoreError;

const RELEASE_VERSION: &str = "2a";

/// Connection settings for the CSE.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// CSE base URL, e.g. `http://10.0.0.2:3000`.
    pub base_url: String,
    /// Originator sent as `X-M2M-Origin`.
    pub origin: String,
    /// Overall request timeout. `None` keeps the HTTP client default.
    pub timeout: Option<Duration>,
}

/// oneM2M resource types used by the agent and the provisioning tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceType {
    AccessControlPolicy,
    ApplicationEntity,
    Container,
    ContentInstance,
}

impl ResourceType {
    pub fn code(self) -> u8 {
        match self {
            ResourceType::AccessControlPolicy => 1,
            ResourceType::ApplicationEntity => 2,
            ResourceType::Container => 3,
            ResourceType::ContentInstance => 4,
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            ResourceType::AccessControlPolicy => "acp",
            ResourceType::ApplicationEntity => "ae",
            ResourceType::Container => "cnt",
            ResourceType::ContentInstance => "cin",
        }
    }
}

/// Result of a create request.
#[derive(Debug)]
pub enum CreateOutcome {
    Created(Value),
    AlreadyExists,
}

/// `RemoteStore` over HTTP with oneM2M headers.
pub struct HttpRemoteStore {
    agent: ureq::Agent,
    config: StoreConfig,
}

impl HttpRemoteStore {
    pub fn new(config: StoreConfig) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            agent: builder.build(),
            config,
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    fn request(&self, method: &str, url: &str, request_id: &str) -> ureq::Request {
        self.agent
            .request(method, url)
            .set("X-M2M-Origin", &self.config.origin)
            .set("X-M2M-RVI", RELEASE_VERSION)
            .set("X-M2M-RI", request_id)
            .set("Accept", "application/json")
    }

    /// Retrieve a resource representation as-is.
    pub fn retrieve(&self, path: &str) -> Result<Value, StoreError> {
        let url = self.url_for(path);
        let response = self
            .request("GET", &url, &request_id("retrieve"))
            .call()
            .map_err(|err| classify(&url, path, err))?;
        if response.status() != 200 {
            return Err(StoreError::Rejected {
                url,
                status: response.status(),
            });
        }
        parse_body(&url, path, response)
    }

    /// Create a child resource of `parent`. 409 maps to `AlreadyExists`.
    pub fn create(
        &self,
        parent: &str,
        ty: ResourceType,
        body: &Value,
    ) -> Result<CreateOutcome, StoreError> {
        let url = self.url_for(parent);
        let result = self
            .request("POST", &url, &request_id(&format!("create_{}", ty.short_name())))
            .set("Content-Type", &format!("application/json; ty={}", ty.code()))
            .send_string(&body.to_string());
        match result {
            Ok(response) if matches!(response.status(), 200 | 201) => {
                let created = parse_body(&url, parent, response).unwrap_or(Value::Null);
                Ok(CreateOutcome::Created(created))
            }
            Ok(response) => Err(StoreError::Rejected {
                url,
                status: response.status(),
            }),
            Err(ureq::Error::Status(409, _)) => Ok(CreateOutcome::AlreadyExists),
            Err(err) => Err(classify(&url, parent, err)),
        }
    }
}

impl RemoteStore for HttpRemoteStore {
    fn read_latest(&self, path: &str) -> Result<Value, StoreError> {
        let latest = join_url(path, "la");
        let body = self.retrieve(&latest)?;
        let record = cin_content(path, &body)?;
        log::debug!("read {} ok", self.url_for(&latest));
        Ok(record)
    }

    fn write_record(&self, path: &str, record: &Value) -> Result<(), StoreError> {
        match self.create(path, ResourceType::ContentInstance, &cin_body(record))? {
            CreateOutcome::Created(_) => {
                log::debug!("wrote content instance under {}", self.url_for(path));
                Ok(())
            }
            // Content instances never collide; a 409 here means the CSE refused.
            CreateOutcome::AlreadyExists => Err(StoreError::Rejected {
                url: self.url_for(path),
                status: 409,
            }),
        }
    }
}

fn classify(url: &str, path: &str, err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(404, _) => StoreError::NotFound {
            path: path.to_string(),
        },
        ureq::Error::Status(403, _) => StoreError::Forbidden {
            path: path.to_string(),
        },
        ureq::Error::Status(status, _) => StoreError::Rejected {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => StoreError::Network {
            url: url.to_string(),
            reason: transport.to_string(),
        },
    }
}

fn parse_body(url: &str, path: &str, response: ureq::Response) -> Result<Value, StoreError> {
    let raw = response.into_string().map_err(|e| StoreError::Network {
        url: url.to_string(),
        reason: format!("read response body: {}", e),
    })?;
    serde_json::from_str(&raw).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        reason: format!("response is not JSON: {}", e),
    })
}

fn request_id(prefix: &str) -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}_{}", prefix, hex::encode(bytes))
}

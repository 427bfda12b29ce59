use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ApiClient, IamPolicy};

const BASE: &str = "https://run.googleapis.com/v2";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RevisionTemplate {
    pub service_account: String,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunService {
    /// `projects/<p>/locations/<r>/services/<s>`
    pub name: String,
    pub uri: String,
    pub urls: Vec<String>,
    pub ingress: String,
    pub create_time: String,
    pub template: Option<RevisionTemplate>,
}

impl RunService {
    pub fn short_name(&self) -> &str {
        super::short_name(&self.name)
    }

    pub fn region(&self) -> &str {
        self.name.split('/').nth(3).unwrap_or_default()
    }

    pub fn containers(&self) -> &[Container] {
        self.template.as_ref().map(|t| t.containers.as_slice()).unwrap_or_default()
    }
}

#[async_trait]
pub trait RunApi: Send + Sync {
    /// `location` may be `-` for every region.
    async fn list_services(&self, project_id: &str, location: &str) -> Result<Vec<RunService>>;
    async fn get_service(&self, name: &str) -> Result<RunService>;
    async fn get_service_iam_policy(&self, name: &str) -> Result<IamPolicy>;
}

pub struct RestRun {
    api: ApiClient,
}

impl RestRun {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ServicesPage {
    services: Vec<RunService>,
    next_page_token: Option<String>,
}

#[async_trait]
impl RunApi for RestRun {
    async fn list_services(&self, project_id: &str, location: &str) -> Result<Vec<RunService>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/locations/{}/services", BASE, project_id, location),
                &[],
                |p: ServicesPage| (p.services, p.next_page_token),
            )
            .await
    }

    async fn get_service(&self, name: &str) -> Result<RunService> {
        self.api.get_json(&format!("{}/{}", BASE, name), &[]).await
    }

    async fn get_service_iam_policy(&self, name: &str) -> Result<IamPolicy> {
        self.api.get_json(&format!("{}/{}:getIamPolicy", BASE, name), &[]).await
    }
}

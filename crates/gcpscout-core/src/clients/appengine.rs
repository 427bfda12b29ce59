use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ApiClient;

const BASE: &str = "https://appengine.googleapis.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UrlDispatchRule {
    pub domain: String,
    pub path: String,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub location_id: String,
    pub default_hostname: String,
    pub serving_status: String,
    pub dispatch_rules: Vec<UrlDispatchRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppService {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Version {
    pub id: String,
    pub name: String,
    pub runtime: String,
    pub serving_status: String,
    pub version_url: String,
    pub create_time: String,
    pub service_account: String,
    pub env_variables: BTreeMap<String, String>,
}

#[async_trait]
pub trait AppEngineApi: Send + Sync {
    async fn get_application(&self, project_id: &str) -> Result<Application>;
    async fn list_services(&self, project_id: &str) -> Result<Vec<AppService>>;
    /// Full view, environment variables included.
    async fn list_versions(&self, project_id: &str, service: &str) -> Result<Vec<Version>>;
    async fn get_version(&self, project_id: &str, service: &str, version: &str) -> Result<Version>;
}

pub struct RestAppEngine {
    api: ApiClient,
}

impl RestAppEngine {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ServicesPage {
    services: Vec<AppService>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VersionsPage {
    versions: Vec<Version>,
    next_page_token: Option<String>,
}

#[async_trait]
impl AppEngineApi for RestAppEngine {
    async fn get_application(&self, project_id: &str) -> Result<Application> {
        self.api.get_json(&format!("{}/apps/{}", BASE, project_id), &[]).await
    }

    async fn list_services(&self, project_id: &str) -> Result<Vec<AppService>> {
        self.api
            .list_all(
                &format!("{}/apps/{}/services", BASE, project_id),
                &[],
                |p: ServicesPage| (p.services, p.next_page_token),
            )
            .await
    }

    async fn list_versions(&self, project_id: &str, service: &str) -> Result<Vec<Version>> {
        self.api
            .list_all(
                &format!("{}/apps/{}/services/{}/versions", BASE, project_id, service),
                &[("view", "FULL".to_string())],
                |p: VersionsPage| (p.versions, p.next_page_token),
            )
            .await
    }

    async fn get_version(&self, project_id: &str, service: &str, version: &str) -> Result<Version> {
        self.api
            .get_json(
                &format!("{}/apps/{}/services/{}/versions/{}", BASE, project_id, service, version),
                &[("view", "FULL".to_string())],
            )
            .await
    }
}

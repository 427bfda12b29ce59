use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ApiClient;

const BASE: &str = "https://firebasehosting.googleapis.com/v1beta1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Site {
    /// `projects/<p>/sites/<site>`
    pub name: String,
    pub default_url: String,
    pub app_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait FirebaseHostingApi: Send + Sync {
    async fn list_sites(&self, project_id: &str) -> Result<Vec<Site>>;
}

pub struct RestFirebaseHosting {
    api: ApiClient,
}

impl RestFirebaseHosting {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SitesPage {
    sites: Vec<Site>,
    next_page_token: Option<String>,
}

#[async_trait]
impl FirebaseHostingApi for RestFirebaseHosting {
    async fn list_sites(&self, project_id: &str) -> Result<Vec<Site>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/sites", BASE, project_id),
                &[],
                |p: SitesPage| (p.sites, p.next_page_token),
            )
            .await
    }
}

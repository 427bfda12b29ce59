use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ApiClient, IamPolicy};

const BASE: &str = "https://cloudfunctions.googleapis.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpsTrigger {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CloudFunction {
    /// `projects/<p>/locations/<r>/functions/<f>`
    pub name: String,
    pub status: String,
    pub runtime: String,
    pub entry_point: String,
    pub https_trigger: Option<HttpsTrigger>,
    pub ingress_settings: String,
    pub service_account_email: String,
    pub source_archive_url: String,
    pub environment_variables: BTreeMap<String, String>,
    pub update_time: String,
}

impl CloudFunction {
    pub fn short_name(&self) -> &str {
        super::short_name(&self.name)
    }

    pub fn region(&self) -> &str {
        self.name.split('/').nth(3).unwrap_or_default()
    }
}

#[async_trait]
pub trait FunctionsApi: Send + Sync {
    /// v1 functions across every location of the project.
    async fn list_functions(&self, project_id: &str) -> Result<Vec<CloudFunction>>;
    async fn get_function(&self, name: &str) -> Result<CloudFunction>;
    async fn get_function_iam_policy(&self, name: &str) -> Result<IamPolicy>;
}

pub struct RestFunctions {
    api: ApiClient,
}

impl RestFunctions {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FunctionsPage {
    functions: Vec<CloudFunction>,
    next_page_token: Option<String>,
}

#[async_trait]
impl FunctionsApi for RestFunctions {
    async fn list_functions(&self, project_id: &str) -> Result<Vec<CloudFunction>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/locations/-/functions", BASE, project_id),
                &[],
                |p: FunctionsPage| (p.functions, p.next_page_token),
            )
            .await
    }

    async fn get_function(&self, name: &str) -> Result<CloudFunction> {
        self.api.get_json(&format!("{}/{}", BASE, name), &[]).await
    }

    async fn get_function_iam_policy(&self, name: &str) -> Result<IamPolicy> {
        self.api.get_json(&format!("{}/{}:getIamPolicy", BASE, name), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_parts() {
        let f = CloudFunction {
            name: "projects/alpha/locations/us-central1/functions/hook".into(),
            ..Default::default()
        };
        assert_eq!(f.short_name(), "hook");
        assert_eq!(f.region(), "us-central1");
    }
}

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApiClient;

const BASE: &str = "https://orgpolicy.googleapis.com/v2";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StringValues {
    pub allowed_values: Vec<String>,
    pub denied_values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyRule {
    pub enforce: Option<bool>,
    pub allow_all: Option<bool>,
    pub deny_all: Option<bool>,
    pub values: Option<StringValues>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicySpec {
    pub rules: Vec<PolicyRule>,
    pub inherit_from_parent: bool,
    pub reset: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    pub name: String,
    pub spec: Option<PolicySpec>,
}

impl Policy {
    pub fn rules(&self) -> &[PolicyRule] {
        self.spec.as_ref().map(|s| s.rules.as_slice()).unwrap_or_default()
    }

    /// Boolean constraints: any rule with `enforce: true`.
    pub fn is_enforced(&self) -> bool {
        self.rules().iter().any(|r| r.enforce == Some(true))
    }

    pub fn allowed_values(&self) -> Vec<String> {
        self.rules()
            .iter()
            .filter_map(|r| r.values.as_ref())
            .flat_map(|v| v.allowed_values.iter().cloned())
            .collect()
    }

    pub fn denied_values(&self) -> Vec<String> {
        self.rules()
            .iter()
            .filter_map(|r| r.values.as_ref())
            .flat_map(|v| v.denied_values.iter().cloned())
            .collect()
    }

    pub fn allows_all(&self) -> bool {
        self.rules().iter().any(|r| r.allow_all == Some(true))
    }
}

#[async_trait]
pub trait OrgPolicyApi: Send + Sync {
    /// `resource` is `organizations/<id>`, `folders/<id>` or `projects/<id>`;
    /// `constraint` omits the `constraints/` prefix.
    async fn get_effective_policy(&self, resource: &str, constraint: &str) -> Result<Policy>;
    /// Policy set directly on `resource`; not-found when only inherited.
    async fn get_policy(&self, resource: &str, constraint: &str) -> Result<Policy>;
}

pub struct RestOrgPolicy {
    api: ApiClient,
}

impl RestOrgPolicy {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl OrgPolicyApi for RestOrgPolicy {
    async fn get_effective_policy(&self, resource: &str, constraint: &str) -> Result<Policy> {
        self.api
            .get_json(
                &format!("{}/{}/policies/{}:getEffectivePolicy", BASE, resource, constraint),
                &[],
            )
            .await
    }

    async fn get_policy(&self, resource: &str, constraint: &str) -> Result<Policy> {
        self.api
            .get_json(&format!("{}/{}/policies/{}", BASE, resource, constraint), &[])
            .await
    }
}

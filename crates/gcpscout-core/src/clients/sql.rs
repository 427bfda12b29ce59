use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApiClient;

const BASE: &str = "https://sqladmin.googleapis.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AclEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IpConfiguration {
    pub ipv4_enabled: bool,
    pub require_ssl: bool,
    pub authorized_networks: Vec<AclEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub tier: String,
    pub ip_configuration: Option<IpConfiguration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IpMapping {
    #[serde(rename = "type")]
    pub kind: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseInstance {
    pub name: String,
    pub database_version: String,
    pub region: String,
    pub state: String,
    pub connection_name: String,
    pub settings: Option<Settings>,
    pub ip_addresses: Vec<IpMapping>,
}

impl DatabaseInstance {
    /// Address of the `PRIMARY` mapping when public IPv4 is enabled in settings.
    pub fn public_ip(&self) -> Option<&str> {
        let enabled = self
            .settings
            .as_ref()
            .and_then(|s| s.ip_configuration.as_ref())
            .map(|c| c.ipv4_enabled)
            .unwrap_or(false);
        if !enabled {
            return None;
        }
        self.ip_addresses
            .iter()
            .find(|ip| ip.kind == "PRIMARY" && !ip.ip_address.is_empty())
            .map(|ip| ip.ip_address.as_str())
    }
}

#[async_trait]
pub trait SqlApi: Send + Sync {
    async fn list_instances(&self, project_id: &str) -> Result<Vec<DatabaseInstance>>;
}

pub struct RestSql {
    api: ApiClient,
}

impl RestSql {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InstancesPage {
    items: Vec<DatabaseInstance>,
    next_page_token: Option<String>,
}

#[async_trait]
impl SqlApi for RestSql {
    async fn list_instances(&self, project_id: &str) -> Result<Vec<DatabaseInstance>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/instances", BASE, project_id),
                &[],
                |p: InstancesPage| (p.items, p.next_page_token),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_ip_requires_ipv4_enabled() {
        let mut db = DatabaseInstance {
            name: "db".into(),
            ip_addresses: vec![
                IpMapping { kind: "PRIVATE".into(), ip_address: "10.0.0.3".into() },
                IpMapping { kind: "PRIMARY".into(), ip_address: "34.70.1.1".into() },
            ],
            ..Default::default()
        };
        assert_eq!(db.public_ip(), None);
        db.settings = Some(Settings {
            ip_configuration: Some(IpConfiguration { ipv4_enabled: true, ..Default::default() }),
            ..Default::default()
        });
        assert_eq!(db.public_ip(), Some("34.70.1.1"));
    }
}

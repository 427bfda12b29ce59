use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{short_name, ApiClient};

const BASE: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Zone {
    pub name: String,
    pub region: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Region {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccessConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "natIP")]
    pub nat_ip: String,
    pub external_ipv6: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkInterface {
    pub name: String,
    pub network: String,
    #[serde(rename = "networkIP")]
    pub network_ip: String,
    pub access_configs: Vec<AccessConfig>,
    pub ipv6_access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttachedServiceAccount {
    pub email: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataItem {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Zone URL or bare zone name.
    pub zone: String,
    pub status: String,
    pub machine_type: String,
    pub network_interfaces: Vec<NetworkInterface>,
    pub service_accounts: Vec<AttachedServiceAccount>,
    pub metadata: Option<Metadata>,
    pub labels: BTreeMap<String, String>,
}

impl Instance {
    pub fn zone_name(&self) -> &str {
        short_name(&self.zone)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForwardingRule {
    pub name: String,
    pub region: String,
    #[serde(rename = "IPAddress")]
    pub ip_address: String,
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    pub port_range: String,
    pub ports: Vec<String>,
    pub load_balancing_scheme: String,
    pub target: String,
    pub network_tier: String,
}

impl ForwardingRule {
    pub fn is_external(&self) -> bool {
        matches!(self.load_balancing_scheme.as_str(), "EXTERNAL" | "EXTERNAL_MANAGED")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    pub name: String,
    pub address: String,
    pub address_type: String,
    pub status: String,
    pub region: String,
    pub ip_version: String,
    pub users: Vec<String>,
}

#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_zones(&self, project_id: &str) -> Result<Vec<Zone>>;
    async fn list_regions(&self, project_id: &str) -> Result<Vec<Region>>;
    async fn list_instances(&self, project_id: &str, zone: &str) -> Result<Vec<Instance>>;
    async fn get_instance(&self, project_id: &str, zone: &str, name: &str) -> Result<Instance>;
    async fn list_global_forwarding_rules(&self, project_id: &str) -> Result<Vec<ForwardingRule>>;
    async fn list_forwarding_rules(
        &self,
        project_id: &str,
        region: &str,
    ) -> Result<Vec<ForwardingRule>>;
    async fn list_global_addresses(&self, project_id: &str) -> Result<Vec<Address>>;
    async fn list_addresses(&self, project_id: &str, region: &str) -> Result<Vec<Address>>;
    /// Every address in the project, global and regional.
    async fn aggregated_addresses(&self, project_id: &str) -> Result<Vec<Address>>;
}

pub struct RestCompute {
    api: ApiClient,
}

impl RestCompute {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddressesScope {
    addresses: Vec<Address>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AggregatedAddressesPage {
    items: BTreeMap<String, AddressesScope>,
    next_page_token: Option<String>,
}

impl RestCompute {
    async fn list<T: serde::de::DeserializeOwned + Send>(&self, path: String) -> Result<Vec<T>> {
        self.api
            .list_all(&format!("{}/{}", BASE, path), &[], |p: Page<T>| (p.items, p.next_page_token))
            .await
    }
}

#[async_trait]
impl ComputeApi for RestCompute {
    async fn list_zones(&self, project_id: &str) -> Result<Vec<Zone>> {
        self.list(format!("projects/{}/zones", project_id)).await
    }

    async fn list_regions(&self, project_id: &str) -> Result<Vec<Region>> {
        self.list(format!("projects/{}/regions", project_id)).await
    }

    async fn list_instances(&self, project_id: &str, zone: &str) -> Result<Vec<Instance>> {
        self.list(format!("projects/{}/zones/{}/instances", project_id, zone)).await
    }

    async fn get_instance(&self, project_id: &str, zone: &str, name: &str) -> Result<Instance> {
        self.api
            .get_json(
                &format!("{}/projects/{}/zones/{}/instances/{}", BASE, project_id, zone, name),
                &[],
            )
            .await
    }

    async fn list_global_forwarding_rules(&self, project_id: &str) -> Result<Vec<ForwardingRule>> {
        self.list(format!("projects/{}/global/forwardingRules", project_id)).await
    }

    async fn list_forwarding_rules(
        &self,
        project_id: &str,
        region: &str,
    ) -> Result<Vec<ForwardingRule>> {
        self.list(format!("projects/{}/regions/{}/forwardingRules", project_id, region)).await
    }

    async fn list_global_addresses(&self, project_id: &str) -> Result<Vec<Address>> {
        self.list(format!("projects/{}/global/addresses", project_id)).await
    }

    async fn list_addresses(&self, project_id: &str, region: &str) -> Result<Vec<Address>> {
        self.list(format!("projects/{}/regions/{}/addresses", project_id, region)).await
    }

    async fn aggregated_addresses(&self, project_id: &str) -> Result<Vec<Address>> {
        let scopes = self
            .api
            .list_all(
                &format!("{}/projects/{}/aggregated/addresses", BASE, project_id),
                &[],
                |p: AggregatedAddressesPage| (p.items.into_values().collect(), p.next_page_token),
            )
            .await?;
        Ok(scopes.into_iter().flat_map(|s: AddressesScope| s.addresses).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_for_ip_fields() {
        let raw =
            r#"{"name":"fr","IPAddress":"34.1.2.3","loadBalancingScheme":"EXTERNAL_MANAGED"}"#;
        let fr: ForwardingRule = serde_json::from_str(raw).unwrap();
        assert_eq!(fr.ip_address, "34.1.2.3");
        assert!(fr.is_external());

        let raw = r#"{"name":"vm","zone":"https://x/zones/us-central1-a",
                      "networkInterfaces":[{"accessConfigs":[{"natIP":"35.9.9.9"}]}]}"#;
        let vm: Instance = serde_json::from_str(raw).unwrap();
        assert_eq!(vm.zone_name(), "us-central1-a");
        assert_eq!(vm.network_interfaces[0].access_configs[0].nat_ip, "35.9.9.9");
    }
}

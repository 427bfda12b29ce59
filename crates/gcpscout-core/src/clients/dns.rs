use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApiClient;

const BASE: &str = "https://dns.googleapis.com/dns/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagedZone {
    pub id: String,
    pub name: String,
    /// Fully qualified, with the trailing dot.
    pub dns_name: String,
    pub description: String,
    pub visibility: String,
    pub creation_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub ttl: i64,
    pub rrdatas: Vec<String>,
}

#[async_trait]
pub trait DnsApi: Send + Sync {
    async fn list_managed_zones(&self, project_id: &str) -> Result<Vec<ManagedZone>>;
    async fn list_record_sets(
        &self,
        project_id: &str,
        zone: &str,
    ) -> Result<Vec<ResourceRecordSet>>;
}

pub struct RestDns {
    api: ApiClient,
}

impl RestDns {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ZonesPage {
    managed_zones: Vec<ManagedZone>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RecordSetsPage {
    rrsets: Vec<ResourceRecordSet>,
    next_page_token: Option<String>,
}

#[async_trait]
impl DnsApi for RestDns {
    async fn list_managed_zones(&self, project_id: &str) -> Result<Vec<ManagedZone>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/managedZones", BASE, project_id),
                &[],
                |p: ZonesPage| (p.managed_zones, p.next_page_token),
            )
            .await
    }

    async fn list_record_sets(
        &self,
        project_id: &str,
        zone: &str,
    ) -> Result<Vec<ResourceRecordSet>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/managedZones/{}/rrsets", BASE, project_id, zone),
                &[],
                |p: RecordSetsPage| (p.rrsets, p.next_page_token),
            )
            .await
    }
}

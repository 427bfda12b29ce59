use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{encode_segment, ApiClient, IamPolicy};

const BASE: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BucketAccessControl {
    pub entity: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    pub location: String,
    pub location_type: String,
    pub storage_class: String,
    pub time_created: String,
    pub updated: String,
    pub project_number: String,
    pub labels: BTreeMap<String, String>,
    pub acl: Vec<BucketAccessControl>,
    pub iam_configuration: Option<serde_json::Value>,
}

impl Bucket {
    pub fn uniform_access(&self) -> bool {
        self.iam_configuration
            .as_ref()
            .and_then(|c| c.pointer("/uniformBucketLevelAccess/enabled"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageObject {
    pub name: String,
    pub bucket: String,
    /// Decimal string on the wire.
    pub size: String,
    pub content_type: String,
    pub updated: String,
}

impl StorageObject {
    pub fn size_bytes(&self) -> u64 {
        self.size.parse().unwrap_or(0)
    }
}

#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn list_buckets(&self, project_id: &str) -> Result<Vec<Bucket>>;
    /// Full projection, ACL included.
    async fn get_bucket(&self, bucket: &str) -> Result<Bucket>;
    async fn get_bucket_iam_policy(&self, bucket: &str) -> Result<IamPolicy>;
    async fn list_objects(&self, bucket: &str) -> Result<Vec<StorageObject>>;
    async fn download_object(&self, bucket: &str, object: &str) -> Result<Vec<u8>>;
}

pub struct RestStorage {
    api: ApiClient,
}

impl RestStorage {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BucketsPage {
    items: Vec<Bucket>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ObjectsPage {
    items: Vec<StorageObject>,
    next_page_token: Option<String>,
}

#[async_trait]
impl StorageApi for RestStorage {
    async fn list_buckets(&self, project_id: &str) -> Result<Vec<Bucket>> {
        self.api
            .list_all(
                &format!("{}/b", BASE),
                &[("project", project_id.to_string()), ("projection", "full".to_string())],
                |p: BucketsPage| (p.items, p.next_page_token),
            )
            .await
    }

    async fn get_bucket(&self, bucket: &str) -> Result<Bucket> {
        self.api
            .get_json(
                &format!("{}/b/{}", BASE, encode_segment(bucket)),
                &[("projection", "full".to_string())],
            )
            .await
    }

    async fn get_bucket_iam_policy(&self, bucket: &str) -> Result<IamPolicy> {
        self.api
            .get_json(&format!("{}/b/{}/iam", BASE, encode_segment(bucket)), &[])
            .await
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<StorageObject>> {
        self.api
            .list_all(
                &format!("{}/b/{}/o", BASE, encode_segment(bucket)),
                &[],
                |p: ObjectsPage| (p.items, p.next_page_token),
            )
            .await
    }

    async fn download_object(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        self.api
            .get_bytes(
                &format!("{}/b/{}/o/{}", BASE, encode_segment(bucket), encode_segment(object)),
                &[("alt", "media".to_string())],
            )
            .await
    }
}

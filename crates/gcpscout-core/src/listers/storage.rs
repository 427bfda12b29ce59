use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

use super::{ListScope, ProjectLister};
use crate::clients::Bucket;
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase, GcpServices};
use crate::record::{properties, ObjectRef, Resource, ResourceType};
use crate::rules::anonymous::AnonymousAccessInfo;

const BUCKETS: &[ResourceType] = &[ResourceType::Bucket];

pub fn bucket_record(bucket: &Bucket, project: &str) -> Result<Resource> {
    let props = properties([
        ("location", json!(bucket.location)),
        ("locationType", json!(bucket.location_type)),
        ("storageClass", json!(bucket.storage_class)),
        ("timeCreated", json!(bucket.time_created)),
        ("updated", json!(bucket.updated)),
        ("projectNumber", json!(bucket.project_number)),
        ("labels", json!(bucket.labels)),
        ("uniformBucketLevelAccess", json!(bucket.uniform_access())),
    ]);
    Ok(Resource::new(&bucket.name, project, ResourceType::Bucket, props)?
        .with_region(bucket.location.to_lowercase()))
}

/// Annotate a bucket with anonymous access from its IAM policy and ACL. A policy read
/// failure leaves the record unannotated.
pub async fn annotate_bucket(services: &GcpServices, bucket: &Bucket, record: &mut Resource) {
    let mut info = match services.storage.get_bucket_iam_policy(&bucket.name).await {
        Ok(policy) => AnonymousAccessInfo::from_policy(&policy),
        Err(e) => {
            debug!(
                bucket = %bucket.name,
                error = %format!("{:#}", e),
                "bucket IAM policy unavailable"
            );
            return;
        }
    };
    if !bucket.uniform_access() {
        info.add_acl(&bucket.acl);
    }
    info.annotate(record);
    if info.is_public() {
        record.set("publicURL", format!("https://storage.googleapis.com/{}", bucket.name));
    }
}

#[derive(Default)]
pub struct BucketLister;

#[async_trait]
impl ProjectLister for BucketLister {
    fn name(&self) -> &'static str {
        "gcp-bucket-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let buckets = scope.services.storage.list_buckets(scope.project).await.map_err(|e| {
            handle_gcp_error(e, &format!("failed to list buckets in project {}", scope.project))
        })?;
        debug!(project = scope.project, count = buckets.len(), "listed buckets");
        for bucket in &buckets {
            let mut record = match bucket_record(bucket, scope.project) {
                Ok(r) => r,
                Err(e) => {
                    error!(bucket = %bucket.name, error = %e, "failed to build bucket record");
                    continue;
                }
            };
            annotate_bucket(scope.services, bucket, &mut record).await;
            out.send(record).await?;
        }
        Ok(())
    }
}

/// Single bucket by name (`--bucket` or input text); `--project` is required.
#[derive(Default)]
pub struct BucketInfo {
    base: GcpBase,
}

impl BucketInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for BucketInfo {
    fn name(&self) -> &'static str {
        "gcp-bucket-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::project().required());
        params.push(Param::string("bucket", "Bucket name"));
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Text
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Text(text) = input else { return Ok(()) };
        let args = self.base.args();
        let project = args.str("project").unwrap_or_default().to_string();
        let name = match text.trim() {
            "" => args
                .str("bucket")
                .map(str::to_string)
                .ok_or_else(|| ReconError::MissingParam("bucket".to_string()))?,
            n => n.trim_start_matches("gs://").to_string(),
        };
        let services = self.base.services()?;
        let bucket = match services.storage.get_bucket(&name).await {
            Ok(b) => b,
            Err(e) if is_not_found(&e) => {
                return Err(ReconError::NotFound(format!("bucket not found: {}", name)).into())
            }
            Err(e) => return Err(handle_gcp_error(e, &format!("failed to get bucket {}", name))),
        };
        let mut record = bucket_record(&bucket, &project)?;
        annotate_bucket(services, &bucket, &mut record).await;
        out.send(record).await
    }
}

/// Objects of each bucket record, as `ObjectRef`s for the secrets path.
#[derive(Default)]
pub struct ObjectLister {
    base: GcpBase,
}

impl ObjectLister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ObjectLister {
    fn name(&self) -> &'static str {
        "gcp-object-lister"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(BUCKETS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(bucket) = input else { return Ok(()) };
        let services = self.base.services()?;
        let objects = services
            .storage
            .list_objects(&bucket.name)
            .await
            .map_err(|e| {
                handle_gcp_error(e, &format!("failed to list objects in bucket {}", bucket.name))
            })?;
        let location = bucket.prop_str("location").unwrap_or(&bucket.region).to_string();
        let refs: Vec<ObjectRef> = objects
            .into_iter()
            .filter(|o| !o.name.ends_with('/'))
            .map(|o| ObjectRef {
                bucket: bucket.name.clone(),
                size: o.size_bytes(),
                name: o.name,
                content_type: o.content_type,
                project: bucket.account_ref.clone(),
                location: location.clone(),
            })
            .collect();
        debug!(bucket = %bucket.name, count = refs.len(), "listed objects");
        for r in refs {
            out.send(r).await?;
        }
        Ok(())
    }
}

//! Provider base layer: credential resolution, service client construction and the
//! shared state every GCP link embeds.

pub mod auth;
pub mod memory;
pub mod options;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clients::{
    ApiClient, AppEngineApi, ArtifactRegistryApi, ComputeApi, DnsApi, Downloader,
    FirebaseHostingApi, FunctionsApi, HttpDownloader, OrgPolicyApi, ResourceManagerApi,
    RestAppEngine, RestArtifactRegistry, RestCompute, RestDns, RestFirebaseHosting, RestFunctions,
    RestOrgPolicy, RestResourceManager, RestRun, RestSql, RestStorage, RunApi, SqlApi, StorageApi,
};
use crate::pipeline::{Args, LinkContext, Param};
use auth::{Credentials, CredentialsTokenSource, TokenSource};

pub use memory::{CloudSnapshot, MemoryCloud};

/// One handle per provider service.
#[derive(Clone)]
pub struct GcpServices {
    pub resource_manager: Arc<dyn ResourceManagerApi>,
    pub storage: Arc<dyn StorageApi>,
    pub compute: Arc<dyn ComputeApi>,
    pub dns: Arc<dyn DnsApi>,
    pub sql: Arc<dyn SqlApi>,
    pub functions: Arc<dyn FunctionsApi>,
    pub run: Arc<dyn RunApi>,
    pub appengine: Arc<dyn AppEngineApi>,
    pub artifacts: Arc<dyn ArtifactRegistryApi>,
    pub org_policy: Arc<dyn OrgPolicyApi>,
    pub firebase: Arc<dyn FirebaseHostingApi>,
    pub downloader: Arc<dyn Downloader>,
}

impl GcpServices {
    /// REST clients sharing one token source.
    pub fn rest(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let api = ApiClient::new(tokens)?;
        Ok(Self {
            resource_manager: Arc::new(RestResourceManager::new(api.clone())),
            storage: Arc::new(RestStorage::new(api.clone())),
            compute: Arc::new(RestCompute::new(api.clone())),
            dns: Arc::new(RestDns::new(api.clone())),
            sql: Arc::new(RestSql::new(api.clone())),
            functions: Arc::new(RestFunctions::new(api.clone())),
            run: Arc::new(RestRun::new(api.clone())),
            appengine: Arc::new(RestAppEngine::new(api.clone())),
            artifacts: Arc::new(RestArtifactRegistry::new(api.clone())),
            org_policy: Arc::new(RestOrgPolicy::new(api.clone())),
            firebase: Arc::new(RestFirebaseHosting::new(api)),
            downloader: Arc::new(HttpDownloader::new()?),
        })
    }
}

impl std::fmt::Debug for GcpServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GcpServices")
    }
}

/// Turns resolved link arguments into provider clients.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn services(&self, args: &Args) -> Result<GcpServices>;
}

/// Factory for live REST clients. Credentials are resolved once per `creds-file` value.
#[derive(Default)]
pub struct RestClientFactory {
    cache: Mutex<HashMap<String, GcpServices>>,
}

impl RestClientFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientFactory for RestClientFactory {
    async fn services(&self, args: &Args) -> Result<GcpServices> {
        let creds_file = args.str("creds-file");
        let key = creds_file.unwrap_or_default().to_string();
        let mut cache = self.cache.lock().await;
        if let Some(services) = cache.get(&key) {
            return Ok(services.clone());
        }
        let credentials = Credentials::discover(creds_file).await?;
        debug!(kind = credentials.kind(), "resolved credentials");
        let tokens: Arc<dyn TokenSource> = Arc::new(CredentialsTokenSource::new(credentials)?);
        let services = GcpServices::rest(tokens)?;
        cache.insert(key, services.clone());
        Ok(services)
    }
}

/// Base state of every GCP link: the context it was initialized with and its clients.
#[derive(Default)]
pub struct GcpBase {
    ctx: Option<LinkContext>,
    services: Option<GcpServices>,
}

impl GcpBase {
    pub fn params() -> Vec<Param> {
        vec![options::creds_file(), options::concurrency()]
    }

    /// Resolve credentials and construct clients. Failure here fails the whole chain.
    pub async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        let services = ctx
            .clients()
            .services(ctx.args())
            .await
            .context("failed to initialize GCP clients")?;
        self.services = Some(services);
        self.ctx = Some(ctx.clone());
        Ok(())
    }

    pub fn services(&self) -> Result<&GcpServices> {
        self.services.as_ref().context("link used before initialize")
    }

    pub fn ctx(&self) -> Result<&LinkContext> {
        self.ctx.as_ref().context("link used before initialize")
    }

    pub fn args(&self) -> Args {
        self.ctx.as_ref().map(|c| c.args().clone()).unwrap_or_default()
    }

    pub fn concurrency(&self) -> usize {
        options::concurrency_limit(&self.args())
    }
}

/// Base plus the project/region scope used by regional listers.
#[derive(Default)]
pub struct ReconBase {
    pub base: GcpBase,
    regions: Vec<String>,
}

impl ReconBase {
    pub fn params() -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(Param::list("region", "Restrict regional listings to these regions"));
        params
    }

    pub async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await?;
        self.regions = ctx.args().list("region");
        Ok(())
    }

    pub fn services(&self) -> Result<&GcpServices> {
        self.base.services()
    }

    pub fn concurrency(&self) -> usize {
        self.base.concurrency()
    }

    /// True when no region filter is set or `region` is in it.
    pub fn wants_region(&self, region: &str) -> bool {
        self.regions.is_empty() || self.regions.iter().any(|r| r == region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_base_initializes_from_factory() {
        let cloud = MemoryCloud::default();
        let ctx = LinkContext::new(Args::new().with("concurrency", 4i64), Arc::new(cloud));
        let mut base = GcpBase::default();
        assert!(base.services().is_err());
        base.initialize(&ctx).await.unwrap();
        assert!(base.services().is_ok());
        assert_eq!(base.concurrency(), 4);
    }

    #[tokio::test]
    async fn test_recon_base_region_filter() {
        let ctx = LinkContext::new(
            Args::new().with("region", "us-east1"),
            Arc::new(MemoryCloud::default()),
        );
        let mut recon = ReconBase::default();
        recon.initialize(&ctx).await.unwrap();
        assert!(recon.wants_region("us-east1"));
        assert!(!recon.wants_region("europe-west1"));
    }

    #[tokio::test]
    async fn test_rest_factory_fails_on_missing_creds_file() {
        let factory = RestClientFactory::new();
        let err = factory
            .services(&Args::new().with("creds-file", "/nonexistent/creds.json"))
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("/nonexistent/creds.json"));
    }
}

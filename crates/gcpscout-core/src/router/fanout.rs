//! Per-project fan-out to the listers (and secret sources) selected by `--type`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::resource_map::{self, LIST_ALIASES, SECRETS_ALIASES};
use crate::errors::parse_aggregated_list_error;
use crate::hierarchy::listable_project;
use crate::listers::{
    AddressLister, AppEngineLister, ArtifactRepoLister, BucketLister, ContainerImageLister,
    FirebaseHostingLister, ForwardingRuleLister, FunctionLister, GlobalAddressLister,
    GlobalForwardingRuleLister, InstanceLister, ManagedZoneLister, ObjectLister, ProjectLink,
    RunServiceLister, SqlInstanceLister,
};
use crate::pipeline::{
    Accepts, Chain, Link, LinkContext, Message, Multi, Outlet, Param, Strictness, PROJECTS,
};
use crate::provider::{options, ReconBase};
use crate::record::ResourceType;
use crate::secrets::{
    AppEngineSecrets, ContainerImageSecrets, FunctionSecrets, InstanceSecrets, ObjectSecrets,
    RunSecrets, SecretLink,
};

/// Which family of sub-chains a fan-out builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// Resource records.
    Listing,
    /// `NpInput`s for secret scanning.
    Secrets,
}

impl FanOut {
    fn for_secrets(self) -> bool {
        self == FanOut::Secrets
    }

    fn table(self) -> &'static [(ResourceType, &'static [&'static str])] {
        match self {
            FanOut::Listing => LIST_ALIASES,
            FanOut::Secrets => SECRETS_ALIASES,
        }
    }

    /// Sub-chain for one resource type; `None` for types with nothing to list per project.
    pub fn chain(self, kind: ResourceType) -> Option<Chain> {
        match self {
            FanOut::Listing => listing_chain(kind),
            FanOut::Secrets => secrets_chain(kind),
        }
    }
}

fn listing_chain(kind: ResourceType) -> Option<Chain> {
    let chain = match kind {
        ResourceType::Bucket => Chain::of(ProjectLink::new(BucketLister)),
        ResourceType::SqlInstance => Chain::of(ProjectLink::new(SqlInstanceLister)),
        ResourceType::ComputeInstance => Chain::of(ProjectLink::new(InstanceLister)),
        ResourceType::ForwardingRule => Chain::of(ProjectLink::new(ForwardingRuleLister)),
        ResourceType::GlobalForwardingRule => {
            Chain::of(ProjectLink::new(GlobalForwardingRuleLister))
        }
        ResourceType::DnsManagedZone => Chain::of(ProjectLink::new(ManagedZoneLister)),
        ResourceType::Address => Chain::of(ProjectLink::new(AddressLister)),
        ResourceType::GlobalAddress => Chain::of(ProjectLink::new(GlobalAddressLister)),
        ResourceType::Function => Chain::of(ProjectLink::new(FunctionLister)),
        ResourceType::RunService => Chain::of(ProjectLink::new(RunServiceLister)),
        ResourceType::AppEngineApp => Chain::of(ProjectLink::new(AppEngineLister)),
        ResourceType::ArtifactRepo => Chain::of(ProjectLink::new(ArtifactRepoLister)),
        ResourceType::ContainerImage => {
            Chain::of(ProjectLink::new(ArtifactRepoLister)).then(ContainerImageLister::new())
        }
        ResourceType::FirebaseHostingSite => Chain::of(ProjectLink::new(FirebaseHostingLister)),
        _ => return None,
    };
    Some(chain)
}

fn secrets_chain(kind: ResourceType) -> Option<Chain> {
    let chain = match kind {
        ResourceType::Bucket => Chain::of(ProjectLink::new(BucketLister))
            .then(ObjectLister::new())
            .then(ObjectSecrets::new()),
        ResourceType::ComputeInstance => {
            Chain::of(ProjectLink::new(InstanceLister)).then(SecretLink::new(InstanceSecrets))
        }
        ResourceType::Function => {
            Chain::of(ProjectLink::new(FunctionLister)).then(SecretLink::new(FunctionSecrets))
        }
        ResourceType::RunService => {
            Chain::of(ProjectLink::new(RunServiceLister)).then(SecretLink::new(RunSecrets))
        }
        ResourceType::AppEngineApp => {
            Chain::of(ProjectLink::new(AppEngineLister)).then(SecretLink::new(AppEngineSecrets))
        }
        ResourceType::ContainerImage => Chain::of(ProjectLink::new(ArtifactRepoLister))
            .then(ContainerImageLister::new())
            .then(ContainerImageSecrets::new()),
        _ => return None,
    };
    Some(chain)
}

/// Takes project records and runs one lax multi per project over the selected types.
/// Sub-chain failures become `ResourceError` records; the fan-out itself never fails on
/// them.
pub struct ProjectFanOut {
    base: ReconBase,
    mode: FanOut,
    kinds: Option<BTreeSet<ResourceType>>,
}

impl ProjectFanOut {
    pub fn new(mode: FanOut) -> Self {
        Self { base: ReconBase::default(), mode, kinds: None }
    }

    pub fn listing() -> Self {
        Self::new(FanOut::Listing)
    }

    pub fn secrets() -> Self {
        Self::new(FanOut::Secrets)
    }

    fn selected(&self) -> Vec<ResourceType> {
        self.mode
            .table()
            .iter()
            .map(|(kind, _)| *kind)
            .filter(|kind| resource_map::wants(self.kinds.as_ref(), *kind))
            .collect()
    }

    /// Emit the project record itself in listing mode when projects were asked for.
    fn emits_project(&self) -> bool {
        self.mode == FanOut::Listing
            && resource_map::wants(self.kinds.as_ref(), ResourceType::Project)
    }
}

#[async_trait]
impl Link for ProjectFanOut {
    fn name(&self) -> &'static str {
        match self.mode {
            FanOut::Listing => "gcp-resource-fan-out",
            FanOut::Secrets => "gcp-secrets-fan-out",
        }
    }

    fn params(&self) -> Vec<Param> {
        let mut params = ReconBase::params();
        params.push(options::resource_type());
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(PROJECTS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        let types = ctx.args().list("type");
        self.kinds = resource_map::selected_kinds(&types, self.mode.for_secrets())?;
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(record) = input.as_resource() else { return Ok(()) };
        let Some(project) = listable_project(record).map(str::to_string) else {
            debug!(project = %record.name, "skipping inactive project");
            return Ok(());
        };
        if self.emits_project() {
            out.send(record.clone()).await?;
        }

        let chains: Vec<Chain> = self
            .selected()
            .into_iter()
            .filter_map(|k| self.mode.chain(k))
            .collect();
        if chains.is_empty() {
            return Ok(());
        }
        let ctx = self.base.base.ctx()?.clone();
        let mut running = Multi::new(chains).with_strictness(Strictness::Lax).start(&ctx);
        running.send(record.clone()).await;
        running.close();
        while let Some(msg) = running.recv().await {
            out.send(msg).await?;
        }
        if let Err(e) = running.finish().await {
            let text = format!("{:#}", e);
            warn!(project = %project, error = %text, "some listings failed");
            for record in parse_aggregated_list_error(&project, &text) {
                out.send(record).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{Bucket, Instance};
    use crate::errors::ApiError;
    use crate::pipeline::Args;
    use crate::provider::MemoryCloud;
    use crate::record::Resource;
    use std::sync::Arc;

    fn project_msg(id: &str, state: &str) -> Message {
        let mut r =
            Resource::new(id, "organizations/1234", ResourceType::Project, Default::default())
                .unwrap();
        r.set("projectId", id);
        r.set("lifecycleState", state);
        r.into()
    }

    fn bucket(name: &str, location: &str) -> Bucket {
        Bucket { name: name.into(), location: location.into(), ..Default::default() }
    }

    fn instance(id: &str, name: &str) -> Instance {
        Instance { id: id.into(), name: name.into(), ..Default::default() }
    }

    async fn list(ctx: &LinkContext, project: Message) -> (Vec<Message>, Result<()>) {
        Chain::of(ProjectFanOut::listing()).run(ctx, vec![project]).await
    }

    fn forbidden(message: &str) -> ApiError {
        ApiError {
            status: 403,
            status_text: Some("PERMISSION_DENIED".into()),
            reason: None,
            message: message.into(),
        }
    }

    #[test]
    fn test_every_listed_alias_type_has_a_chain_or_is_a_hierarchy_node() {
        for (kind, _) in LIST_ALIASES {
            let hierarchy = matches!(
                kind,
                ResourceType::Project | ResourceType::Folder | ResourceType::Organization
            );
            assert_eq!(FanOut::Listing.chain(*kind).is_some(), !hierarchy, "{kind}");
        }
        for (kind, _) in SECRETS_ALIASES {
            assert!(FanOut::Secrets.chain(*kind).is_some(), "{kind}");
        }
    }

    #[tokio::test]
    async fn test_listing_filters_by_type() {
        let cloud = MemoryCloud::default()
            .with_bucket("alpha", bucket("logs", "US"))
            .with_instance("alpha", "us-central1-a", instance("1", "vm-1"));
        let ctx = LinkContext::new(Args::new().with("type", "bucket"), Arc::new(cloud.clone()));
        let (out, result) = list(&ctx, project_msg("alpha", "ACTIVE")).await;
        result.unwrap();
        let names: Vec<&str> = out
            .iter()
            .filter_map(|m| m.as_resource())
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["logs"]);
        assert!(!cloud.calls().iter().any(|c| c.starts_with("compute.")));
    }

    #[tokio::test]
    async fn test_listing_failure_becomes_resource_error() {
        let cloud = MemoryCloud::default().fail(
            "storage.buckets.list",
            "*",
            forbidden(
                "caller does not have storage.buckets.list access to the Google Cloud project.",
            ),
        );
        let args = Args::new().with("type", vec!["bucket".to_string()]);
        let ctx = LinkContext::new(args, Arc::new(cloud));
        let (out, result) = list(&ctx, project_msg("alpha", "ACTIVE")).await;
        result.unwrap();
        let errors: Vec<_> = out
            .iter()
            .filter_map(|m| match m {
                Message::ResourceError(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].project, "alpha");
        assert_eq!(errors[0].resource_type, "storage.buckets");
        assert_eq!(errors[0].error_code, Some(403));
    }

    #[tokio::test]
    async fn test_inactive_project_is_never_listed() {
        let cloud = MemoryCloud::default();
        let ctx = LinkContext::new(Args::new(), Arc::new(cloud.clone()));
        let (out, result) = list(&ctx, project_msg("gone", "DELETE_REQUESTED")).await;
        result.unwrap();
        assert!(out.is_empty());
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_all_types_emit_project_record() {
        let cloud = Arc::new(MemoryCloud::default());
        let ctx = LinkContext::new(Args::new().with("type", "all"), cloud);
        let (out, result) = list(&ctx, project_msg("alpha", "ACTIVE")).await;
        result.unwrap();
        let projects: Vec<_> = out
            .iter()
            .filter(|m| m.resource_type() == Some(ResourceType::Project))
            .collect();
        assert_eq!(projects.len(), 1);
    }

    #[tokio::test]
    async fn test_listing_twice_over_one_snapshot_yields_same_records() {
        let cloud = MemoryCloud::default()
            .with_bucket("alpha", bucket("logs", "US"))
            .with_bucket("alpha", bucket("assets", "EU"))
            .with_instance("alpha", "us-central1-a", instance("1", "vm-1"))
            .with_instance("alpha", "europe-west1-b", instance("2", "vm-2"))
            .with_instance("alpha", "europe-west1-b", instance("3", "vm-3"));

        let mut runs = Vec::new();
        for _ in 0..2 {
            let ctx = LinkContext::new(Args::new().with("type", "all"), Arc::new(cloud.clone()));
            let (out, result) = list(&ctx, project_msg("alpha", "ACTIVE")).await;
            result.unwrap();
            let records: std::collections::BTreeSet<(String, String)> = out
                .iter()
                .filter_map(|m| m.as_resource())
                .map(|r| (r.name.clone(), r.resource_type.as_str().to_string()))
                .collect();
            runs.push(records);
        }

        assert_eq!(runs[0], runs[1]);
        let bucket_key = ("logs".to_string(), ResourceType::Bucket.as_str().to_string());
        let vm_key = ("vm-3".to_string(), ResourceType::ComputeInstance.as_str().to_string());
        assert!(runs[0].contains(&bucket_key));
        assert!(runs[0].contains(&vm_key));
        assert_eq!(runs[0].len(), 6);
    }

    #[tokio::test]
    async fn test_secrets_rejects_list_only_alias() {
        let cloud = Arc::new(MemoryCloud::default());
        let ctx = LinkContext::new(Args::new().with("type", "sql"), cloud);
        let (_, result) = Chain::of(ProjectFanOut::secrets())
            .run(&ctx, vec![project_msg("alpha", "ACTIVE")])
            .await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("unsupported resource type for secrets scanning: sql"), "{err}");
    }
}

//! Per-service listers. Every lister consumes project records, skips everything else,
//! and emits one resource record per listed item.

pub mod appengine;
pub mod artifacts;
pub mod compute;
pub mod dns;
pub mod firebase;
pub mod functions;
pub mod networking;
pub mod run;
pub mod sql;
pub mod storage;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Display;
use std::net::IpAddr;
use tracing::{error, warn};

use crate::hierarchy::listable_project;
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param, PROJECTS};
use crate::provider::{GcpServices, ReconBase};
use crate::record::Resource;

pub use appengine::{AppEngineInfo, AppEngineLister};
pub use artifacts::{ArtifactRepoLister, ContainerImageLister};
pub use compute::{InstanceInfo, InstanceLister, InstanceServiceAccounts};
pub use dns::ManagedZoneLister;
pub use firebase::FirebaseHostingLister;
pub use functions::FunctionLister;
pub use networking::{
    networking_fan_out, AddressLister, ForwardingRuleLister, GlobalAddressLister,
    GlobalForwardingRuleLister,
};
pub use run::{CloudRunInfo, RunServiceLister};
pub use sql::SqlInstanceLister;
pub use storage::{BucketInfo, BucketLister, ObjectLister};

/// What a lister sees for one project.
pub struct ListScope<'a> {
    pub project: &'a str,
    pub services: &'a GcpServices,
    pub base: &'a ReconBase,
}

/// Service-specific half of a project lister.
#[async_trait]
pub trait ProjectLister: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn extra_params(&self) -> Vec<Param> {
        Vec::new()
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()>;
}

/// Link adapter: project filtering, base initialization and dispatch.
pub struct ProjectLink<L> {
    lister: L,
    base: ReconBase,
}

impl<L: ProjectLister> ProjectLink<L> {
    pub fn new(lister: L) -> Self {
        Self { lister, base: ReconBase::default() }
    }
}

#[async_trait]
impl<L: ProjectLister> Link for ProjectLink<L> {
    fn name(&self) -> &'static str {
        self.lister.name()
    }

    fn params(&self) -> Vec<Param> {
        let mut params = ReconBase::params();
        params.extend(self.lister.extra_params());
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(PROJECTS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(project) = input.as_resource().and_then(listable_project) else {
            return Ok(());
        };
        let services = self.base.services()?;
        let scope = ListScope { project, services, base: &self.base };
        self.lister.list(&scope, out).await
    }
}

/// Build and send one record per item; construction failures are logged and skipped.
pub(crate) async fn send_records<T, K: Display>(
    items: &[T],
    out: &Outlet,
    key: impl Fn(&T) -> K,
    build: impl Fn(&T) -> Result<Resource>,
) -> Result<()> {
    for item in items {
        match build(item) {
            Ok(record) => out.send(record).await?,
            Err(e) => error!(
                item = %key(item),
                error = %format!("{:#}", e),
                "failed to build resource record"
            ),
        }
    }
    Ok(())
}

/// Zones of a project that are up. Discovery failures are logged and yield nothing.
pub(crate) async fn project_zones(scope: &ListScope<'_>) -> Vec<String> {
    match scope.services.compute.list_zones(scope.project).await {
        Ok(zones) => zones
            .into_iter()
            .filter(|z| z.status.is_empty() || z.status == "UP")
            .filter(|z| scope.base.wants_region(crate::clients::short_name(&z.region)))
            .map(|z| z.name)
            .collect(),
        Err(e) => {
            warn!(project = scope.project, error = %format!("{:#}", e), "zone discovery failed");
            Vec::new()
        }
    }
}

/// Regions of a project that are up and pass the region filter.
pub(crate) async fn project_regions(scope: &ListScope<'_>) -> Vec<String> {
    match scope.services.compute.list_regions(scope.project).await {
        Ok(regions) => regions
            .into_iter()
            .filter(|r| r.status.is_empty() || r.status == "UP")
            .filter(|r| scope.base.wants_region(&r.name))
            .map(|r| r.name)
            .collect(),
        Err(e) => {
            warn!(project = scope.project, error = %format!("{:#}", e), "region discovery failed");
            Vec::new()
        }
    }
}

/// `publicIP` / `publicIPv6` for an external address.
pub(crate) fn set_public_ip(record: &mut Resource, address: &str) {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            record.set("publicIP", v4.to_string());
            record.set("isPublic", true);
        }
        Ok(IpAddr::V6(v6)) => {
            record.set("publicIPv6", v6.to_string());
            record.set("isPublic", true);
        }
        Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Properties, ResourceType};

    #[test]
    fn test_set_public_ip_classifies_family() {
        let mut r = Resource::new("x", "p", ResourceType::Address, Properties::new()).unwrap();
        set_public_ip(&mut r, "34.1.2.3");
        set_public_ip(&mut r, "2600:1900::1");
        set_public_ip(&mut r, "not-an-ip");
        assert_eq!(r.prop_str("publicIP"), Some("34.1.2.3"));
        assert_eq!(r.prop_str("publicIPv6"), Some("2600:1900::1"));
        assert_eq!(r.prop_bool("isPublic"), Some(true));
    }
}

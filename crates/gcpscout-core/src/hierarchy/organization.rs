use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error};

use super::projects::emit_projects;
use super::{folder_record, org_path, organization_record};
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase};
use crate::record::{Resource, ResourceType};

const ORGANIZATIONS: &[ResourceType] = &[ResourceType::Organization];

/// Fetch one organization. Input text (bare or prefixed id) overrides `--org`.
#[derive(Default)]
pub struct OrganizationInfo {
    base: GcpBase,
}

impl OrganizationInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for OrganizationInfo {
    fn name(&self) -> &'static str {
        "gcp-org-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::org());
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
        let id = match text.trim() {
            "" => self
                .base
                .args()
                .str("org")
                .map(str::to_string)
                .ok_or_else(|| ReconError::MissingParam("org".to_string()))?,
            id => id.to_string(),
        };
        let path = org_path(&id);
        let services = self.base.services()?;
        let org = match services.resource_manager.get_organization(&path).await {
            Ok(org) => org,
            Err(e) if is_not_found(&e) => {
                let message = format!("organization not found: {}", id);
                return Err(ReconError::NotFound(message).into());
            }
            Err(e) => {
                return Err(handle_gcp_error(e, &format!("failed to get organization {}", id)))
            }
        };
        out.send(organization_record(&org)?).await
    }
}

/// Every organization visible to the caller; triggered by any input.
#[derive(Default)]
pub struct OrganizationList {
    base: GcpBase,
}

impl OrganizationList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for OrganizationList {
    fn name(&self) -> &'static str {
        "gcp-org-list"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, _input: Message, out: &Outlet) -> Result<()> {
        let services = self.base.services()?;
        let orgs = services
            .resource_manager
            .search_organizations()
            .await
            .map_err(|e| handle_gcp_error(e, "failed to search organizations"))?;
        for org in orgs {
            match organization_record(&org) {
                Ok(record) => out.send(record).await?,
                Err(e) => {
                    error!(org = %org.name, error = %e, "failed to build organization record")
                }
            }
        }
        Ok(())
    }
}

/// Direct child folders of an organization record.
#[derive(Default)]
pub struct OrganizationFolderList {
    base: GcpBase,
}

impl OrganizationFolderList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for OrganizationFolderList {
    fn name(&self) -> &'static str {
        "gcp-org-folder-list"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(ORGANIZATIONS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(org) = input else { return Ok(()) };
        list_child_folders(&self.base, &org, out).await
    }
}

pub(crate) async fn list_child_folders(
    base: &GcpBase,
    parent: &Resource,
    out: &Outlet,
) -> Result<()> {
    let services = base.services()?;
    let folders = services
        .resource_manager
        .list_folders(&parent.name)
        .await
        .map_err(|e| {
            handle_gcp_error(e, &format!("failed to list folders under {}", parent.name))
        })?;
    debug!(parent = %parent.name, count = folders.len(), "listed folders");
    for folder in folders {
        match folder_record(&folder) {
            Ok(record) => out.send(record).await?,
            Err(e) => error!(folder = %folder.name, error = %e, "failed to build folder record"),
        }
    }
    Ok(())
}

/// Every project visible to the caller, emitted for an organization record. Only ACTIVE
/// projects pass; system projects are dropped unless included.
#[derive(Default)]
pub struct OrganizationProjectList {
    base: GcpBase,
}

impl OrganizationProjectList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for OrganizationProjectList {
    fn name(&self) -> &'static str {
        "gcp-org-project-list"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::include_sys_projects());
        params.push(options::filter_sys_projects());
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(ORGANIZATIONS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(org) = input else { return Ok(()) };
        let services = self.base.services()?;
        let projects = services
            .resource_manager
            .list_projects(None)
            .await
            .map_err(|e| {
                handle_gcp_error(e, &format!("failed to list projects for {}", org.name))
            })?;
        let include = options::system_projects_included(&self.base.args());
        emit_projects(projects, include, &org.name, out).await
    }
}

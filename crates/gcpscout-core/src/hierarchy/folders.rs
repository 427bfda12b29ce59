use anyhow::Result;
use async_trait::async_trait;

use super::organization::list_child_folders;
use super::projects::emit_projects;
use super::{folder_path, folder_record};
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase};
use crate::record::ResourceType;

const FOLDERS: &[ResourceType] = &[ResourceType::Folder];

/// Fetch one folder. Input text (bare or prefixed id) overrides `--folder`.
#[derive(Default)]
pub struct FolderInfo {
    base: GcpBase,
}

impl FolderInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for FolderInfo {
    fn name(&self) -> &'static str {
        "gcp-folder-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::folder());
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
                .str("folder")
                .map(str::to_string)
                .ok_or_else(|| ReconError::MissingParam("folder".to_string()))?,
            id => id.to_string(),
        };
        let services = self.base.services()?;
        let folder = match services.resource_manager.get_folder(&folder_path(&id)).await {
            Ok(f) => f,
            Err(e) if is_not_found(&e) => {
                return Err(ReconError::NotFound(format!("folder not found: {}", id)).into())
            }
            Err(e) => return Err(handle_gcp_error(e, &format!("failed to get folder {}", id))),
        };
        out.send(folder_record(&folder)?).await
    }
}

/// Direct child folders of a folder record.
#[derive(Default)]
pub struct FolderSubFolderList {
    base: GcpBase,
}

impl FolderSubFolderList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for FolderSubFolderList {
    fn name(&self) -> &'static str {
        "gcp-folder-subfolder-list"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(FOLDERS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(folder) = input else { return Ok(()) };
        list_child_folders(&self.base, &folder, out).await
    }
}

/// Direct child projects of a folder record, with the same ACTIVE and system-project gates
/// as the organization listing.
#[derive(Default)]
pub struct FolderProjectList {
    base: GcpBase,
}

impl FolderProjectList {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for FolderProjectList {
    fn name(&self) -> &'static str {
        "gcp-folder-project-list"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::include_sys_projects());
        params.push(options::filter_sys_projects());
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(FOLDERS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(folder) = input else { return Ok(()) };
        let services = self.base.services()?;
        let projects = services
            .resource_manager
            .list_projects_by_parent(&folder.name)
            .await
            .map_err(|e| {
                handle_gcp_error(e, &format!("failed to list projects under {}", folder.name))
            })?;
        let include = options::system_projects_included(&self.base.args());
        emit_projects(projects, include, &folder.name, out).await
    }
}

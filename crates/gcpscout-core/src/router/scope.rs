//! Scope routing: turn `--org` / `--folder` / `--project` into hierarchy records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::hierarchy::{
    listable_project, FolderInfo, FolderProjectList, FolderSubFolderList, OrganizationFolderList,
    OrganizationInfo, OrganizationProjectList, ProjectInfo, LIFECYCLE_ACTIVE,
};
use crate::pipeline::{Chain, FromMessage, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase};
use crate::record::{Resource, ScopeConfig, ScopeKind};

/// What a router emits for its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The scope node itself.
    Node,
    /// Every active project under the scope.
    Projects,
    /// The scope node, every active folder below it, then every active project.
    Tree,
}

/// Entry link of every module. Resolves the single scope argument during initialize,
/// then on its first input walks the hierarchy and emits records per `Route`.
pub struct ScopeRouter {
    base: GcpBase,
    route: Route,
    scope: Option<ScopeConfig>,
    routed: bool,
}

impl ScopeRouter {
    pub fn new(route: Route) -> Self {
        Self { base: GcpBase::default(), route, scope: None, routed: false }
    }

    pub fn scope(&self) -> Option<&ScopeConfig> {
        self.scope.as_ref()
    }

    async fn node(&self, ctx: &LinkContext, scope: &ScopeConfig) -> Result<Resource> {
        let chain = match scope.kind {
            ScopeKind::Org => Chain::of(OrganizationInfo::new()),
            ScopeKind::Folder => Chain::of(FolderInfo::new()),
            ScopeKind::Project => Chain::of(ProjectInfo::new()),
        };
        collect(chain, ctx, vec![Message::Text(scope.value.clone())])
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("{} {} not found", scope.kind.as_str(), scope.value))
    }

    async fn emit(
        &self,
        ctx: &LinkContext,
        scope: &ScopeConfig,
        node: Resource,
        out: &Outlet,
    ) -> Result<()> {
        match (self.route, scope.kind) {
            (Route::Node, _) => out.send(node).await,
            (_, ScopeKind::Project) => {
                if listable_project(&node).is_none() {
                    warn!(project = %node.name, "project is not active; nothing to route");
                    return Ok(());
                }
                out.send(node).await
            }
            (Route::Projects, _) => {
                for project in projects_under(ctx, &node).await? {
                    out.send(project).await?;
                }
                Ok(())
            }
            (Route::Tree, _) => {
                let folders = descendant_folders(ctx, &node).await?;
                info!(scope = %node.name, folders = folders.len(), "walked folder tree");
                let projects = projects_under(ctx, &node).await?;
                out.send(node).await?;
                for folder in folders {
                    out.send(folder).await?;
                }
                for project in projects {
                    out.send(project).await?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Link for ScopeRouter {
    fn name(&self) -> &'static str {
        "gcp-scope-router"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::org());
        params.push(options::folder());
        params.push(options::project());
        params.push(options::include_sys_projects());
        params.push(options::filter_sys_projects());
        params
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        let args = ctx.args();
        let (orgs, folders) = (args.list("org"), args.list("folder"));
        let projects = args.list("project");
        let scope = ScopeConfig::from_lists(&orgs, &folders, &projects)?;
        info!(kind = scope.kind.as_str(), value = %scope.value, "resolved scope");
        self.scope = Some(scope);
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, _input: Message, out: &Outlet) -> Result<()> {
        if self.routed {
            debug!("scope already routed; ignoring extra input");
            return Ok(());
        }
        self.routed = true;
        let scope = self.scope.clone().context("router used before initialize")?;
        let ctx = self.base.ctx()?.clone();
        let node = self.node(&ctx, &scope).await?;
        self.emit(&ctx, &scope, node, out).await
    }
}

async fn collect(chain: Chain, ctx: &LinkContext, inputs: Vec<Message>) -> Result<Vec<Resource>> {
    let (out, result) = chain.run(ctx, inputs).await;
    result?;
    Ok(out.into_iter().filter_map(Resource::from_message).collect())
}

fn is_active_folder(folder: &Resource) -> bool {
    match folder.prop_str("lifecycleState") {
        Some(state) => state.is_empty() || state == LIFECYCLE_ACTIVE,
        None => true,
    }
}

/// Breadth-first walk of every active folder below an organization or folder node.
pub async fn descendant_folders(ctx: &LinkContext, root: &Resource) -> Result<Vec<Resource>> {
    let first = match root.resource_type {
        crate::record::ResourceType::Organization => Chain::of(OrganizationFolderList::new()),
        crate::record::ResourceType::Folder => Chain::of(FolderSubFolderList::new()),
        _ => return Ok(Vec::new()),
    };
    let mut seen: HashSet<String> = HashSet::from([root.name.clone()]);
    let mut found = Vec::new();
    let mut frontier = collect(first, ctx, vec![root.clone().into()]).await?;
    while !frontier.is_empty() {
        frontier.retain(|f| is_active_folder(f) && seen.insert(f.name.clone()));
        if frontier.is_empty() {
            break;
        }
        let inputs = frontier.iter().cloned().map(Message::from).collect();
        found.append(&mut frontier);
        frontier = collect(Chain::of(FolderSubFolderList::new()), ctx, inputs).await?;
    }
    Ok(found)
}

/// Active projects for an organization (everything visible) or a folder subtree.
pub async fn projects_under(ctx: &LinkContext, node: &Resource) -> Result<Vec<Resource>> {
    match node.resource_type {
        crate::record::ResourceType::Organization => {
            collect(Chain::of(OrganizationProjectList::new()), ctx, vec![node.clone().into()]).await
        }
        crate::record::ResourceType::Folder => {
            let mut folders = vec![node.clone()];
            folders.extend(descendant_folders(ctx, node).await?);
            let inputs = folders.into_iter().map(Message::from).collect();
            collect(Chain::of(FolderProjectList::new()), ctx, inputs).await
        }
        crate::record::ResourceType::Project => {
            Ok(listable_project(node).map(|_| node.clone()).into_iter().collect())
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Args;
    use crate::provider::MemoryCloud;
    use crate::record::ResourceType;
    use std::sync::Arc;

    fn cloud() -> MemoryCloud {
        MemoryCloud::default()
            .with_organization("1234", "Acme")
            .with_folder("10", "organizations/1234", "eng")
            .with_folder("11", "folders/10", "platform")
            .with_project("alpha", "ACTIVE", "folders/11")
            .with_project("beta", "DELETE_REQUESTED", "folders/10")
            .with_project("gamma", "ACTIVE", "organizations/1234")
    }

    async fn route(route: Route, args: Args, cloud: MemoryCloud) -> (Vec<Message>, Result<()>) {
        let ctx = LinkContext::new(args, Arc::new(cloud));
        Chain::of(ScopeRouter::new(route)).run(&ctx, vec![Message::Text(String::new())]).await
    }

    fn names(out: &[Message]) -> Vec<String> {
        out.iter().filter_map(|m| m.as_resource()).map(|r| r.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_requires_exactly_one_scope() {
        let (_, result) = route(Route::Node, Args::new(), cloud()).await;
        let message = result.unwrap_err().to_string();
        assert!(message.contains("exactly one of --org, --folder, or --project"));

        let args = Args::new().with("org", "1234").with("project", "alpha");
        let (_, result) = route(Route::Node, args, cloud()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_node_route_emits_scope_only() {
        let (out, result) = route(Route::Node, Args::new().with("org", "1234"), cloud()).await;
        result.unwrap();
        assert_eq!(names(&out), vec!["organizations/1234"]);
    }

    #[tokio::test]
    async fn test_folder_projects_cover_subtree() {
        let (out, result) = route(Route::Projects, Args::new().with("folder", "10"), cloud()).await;
        result.unwrap();
        assert_eq!(names(&out), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_tree_route_orders_node_folders_projects() {
        let (out, result) = route(Route::Tree, Args::new().with("org", "1234"), cloud()).await;
        result.unwrap();
        let kinds: Vec<ResourceType> = out.iter().filter_map(|m| m.resource_type()).collect();
        assert_eq!(kinds[0], ResourceType::Organization);
        assert_eq!(&kinds[1..3], &[ResourceType::Folder, ResourceType::Folder]);
        let mut projects: Vec<String> =
            out[3..].iter().filter_map(|m| m.as_resource()).map(|r| r.name.clone()).collect();
        projects.sort();
        assert_eq!(projects, vec!["alpha", "gamma"]);
    }

    #[tokio::test]
    async fn test_inactive_project_scope_emits_nothing() {
        let (out, result) =
            route(Route::Projects, Args::new().with("project", "beta"), cloud()).await;
        result.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_only_first_input_routes() {
        let ctx = LinkContext::new(Args::new().with("project", "alpha"), Arc::new(cloud()));
        let inputs = vec![Message::Text(String::new()), Message::Text(String::new())];
        let (out, result) = Chain::of(ScopeRouter::new(Route::Projects)).run(&ctx, inputs).await;
        result.unwrap();
        assert_eq!(names(&out), vec!["alpha"]);
    }
}

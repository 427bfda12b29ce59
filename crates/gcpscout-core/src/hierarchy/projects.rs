use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error};

use super::{project_record, LIFECYCLE_ACTIVE};
use crate::clients::Project;
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase};

/// Id/name prefixes of projects Google creates on the customer's behalf.
pub const SYSTEM_PROJECT_PREFIXES: &[&str] = &[
    "sys-",
    "script-editor-",
    "apps-script-",
    "system-",
    "firebase-",
    "cloud-build-",
    "gcf-",
    "gae-",
];

pub fn is_system_project(project_id: &str, name: &str) -> bool {
    let id = project_id.to_lowercase();
    let name = name.to_lowercase();
    SYSTEM_PROJECT_PREFIXES
        .iter()
        .any(|p| id.starts_with(p) || name.starts_with(p))
}

/// Emit the listable subset of `projects`: ACTIVE only, and system projects only when
/// `include_system` is set. Per-project record failures are logged and skipped.
pub(crate) async fn emit_projects(
    projects: Vec<Project>,
    include_system: bool,
    scope: &str,
    out: &Outlet,
) -> Result<()> {
    for project in projects {
        if project.lifecycle_state != LIFECYCLE_ACTIVE {
            debug!(
                scope,
                project = %project.project_id,
                state = %project.lifecycle_state,
                "skipping inactive project"
            );
            continue;
        }
        if !include_system && is_system_project(&project.project_id, &project.name) {
            debug!(scope, project = %project.project_id, "skipping system project");
            continue;
        }
        match project_record(&project) {
            Ok(record) => out.send(record).await?,
            Err(e) => error!(
                scope,
                project = %project.project_id,
                error = %e,
                "failed to build project record"
            ),
        }
    }
    Ok(())
}

/// One record for the requested project. Input text overrides `--project`.
#[derive(Default)]
pub struct ProjectInfo {
    base: GcpBase,
}

impl ProjectInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ProjectInfo {
    fn name(&self) -> &'static str {
        "gcp-project-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::project());
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
        let project_id = match text.trim() {
            "" => args
                .str("project")
                .map(str::to_string)
                .ok_or_else(|| ReconError::MissingParam("project".to_string()))?,
            id => id.trim_start_matches("projects/").to_string(),
        };

        let services = self.base.services()?;
        let project = match services.resource_manager.get_project(&project_id).await {
            Ok(p) => p,
            Err(e) if is_not_found(&e) => {
                let message = format!("project not found: {}", project_id);
                return Err(ReconError::NotFound(message).into());
            }
            Err(e) => {
                let context = format!("failed to get project {}", project_id);
                return Err(handle_gcp_error(e, &context));
            }
        };
        out.send(project_record(&project)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_project_prefixes() {
        assert!(is_system_project("sys-12345", ""));
        assert!(is_system_project("my-project", "Script-Editor-abc"));
        assert!(is_system_project("gcf-sources-1", "x"));
        assert!(!is_system_project("payments-prod", "Payments"));
        assert!(!is_system_project("mysys-app", "app"));
    }
}

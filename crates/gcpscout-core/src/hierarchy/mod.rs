//! Organization / folder / project discovery.

pub mod folders;
pub mod organization;
pub mod projects;

use serde_json::json;

use crate::clients::{Folder, Organization, Project};
use crate::errors::ReconError;
use crate::record::{properties, Resource, ResourceType};

pub use folders::{FolderInfo, FolderProjectList, FolderSubFolderList};
pub use organization::{
    OrganizationFolderList, OrganizationInfo, OrganizationList, OrganizationProjectList,
};
pub use projects::{ProjectInfo, SYSTEM_PROJECT_PREFIXES};

pub const LIFECYCLE_ACTIVE: &str = "ACTIVE";

/// `organizations/<id>` from a bare or prefixed id.
pub fn org_path(id: &str) -> String {
    format!("organizations/{}", id.trim().trim_start_matches("organizations/"))
}

/// `folders/<id>` from a bare or prefixed id.
pub fn folder_path(id: &str) -> String {
    format!("folders/{}", id.trim().trim_start_matches("folders/"))
}

pub fn organization_record(org: &Organization) -> Result<Resource, ReconError> {
    let props = properties([
        ("lifecycleState", json!(org.lifecycle_state)),
        ("creationTime", json!(org.creation_time)),
        ("owner", org.owner.clone().unwrap_or_default()),
    ]);
    Ok(Resource::new(&org.name, &org.name, ResourceType::Organization, props)?
        .with_display_name(&org.display_name))
}

pub fn folder_record(folder: &Folder) -> Result<Resource, ReconError> {
    let props = properties([
        ("resourceName", json!(folder.name)),
        ("lifecycleState", json!(folder.lifecycle_state)),
        ("createTime", json!(folder.create_time)),
    ]);
    Ok(Resource::new(&folder.name, &folder.parent, ResourceType::Folder, props)?
        .with_display_name(&folder.display_name))
}

pub fn project_record(project: &Project) -> Result<Resource, ReconError> {
    let parent = project.parent_path();
    let account_ref = parent.clone().unwrap_or_else(|| project.project_id.clone());
    let props = properties([
        ("projectId", json!(project.project_id)),
        ("name", json!(project.name)),
        ("projectNumber", json!(project.project_number)),
        ("lifecycleState", json!(project.lifecycle_state)),
        ("createTime", json!(project.create_time)),
        ("parent", json!(parent)),
        ("labels", json!(project.labels)),
    ]);
    Ok(Resource::new(&project.project_id, &account_ref, ResourceType::Project, props)?
        .with_display_name(&project.name))
}

/// Project id of a project record that may be listed against. Non-active projects yield
/// `None` so no descendant call is ever issued for them.
pub fn listable_project(resource: &Resource) -> Option<&str> {
    if !resource.is(ResourceType::Project) {
        return None;
    }
    match resource.prop_str("lifecycleState") {
        Some(state) if !state.is_empty() && state != LIFECYCLE_ACTIVE => None,
        _ => Some(resource.prop_str("projectId").unwrap_or(&resource.name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::resourcemanager::ProjectParent;

    fn project(id: &str, state: &str) -> Project {
        Project {
            project_id: id.into(),
            name: format!("{} name", id),
            lifecycle_state: state.into(),
            parent: Some(ProjectParent { kind: "folder".into(), id: "9".into() }),
            ..Default::default()
        }
    }

    #[test]
    fn test_paths_accept_bare_and_prefixed_ids() {
        assert_eq!(org_path("1234"), "organizations/1234");
        assert_eq!(org_path("organizations/1234"), "organizations/1234");
        assert_eq!(folder_path(" folders/55 "), "folders/55");
    }

    #[test]
    fn test_project_record_account_ref_is_parent() {
        let r = project_record(&project("alpha", "ACTIVE")).unwrap();
        assert_eq!(r.name, "alpha");
        assert_eq!(r.account_ref, "folders/9");
        assert_eq!(r.display_name.as_deref(), Some("alpha name"));
        assert_eq!(listable_project(&r), Some("alpha"));
    }

    #[test]
    fn test_inactive_project_is_not_listable() {
        let r = project_record(&project("beta", "DELETE_REQUESTED")).unwrap();
        assert_eq!(listable_project(&r), None);
    }

    #[test]
    fn test_org_record_account_ref_is_self() {
        let org = Organization {
            name: "organizations/1234".into(),
            display_name: "acme.example".into(),
            ..Default::default()
        };
        let r = organization_record(&org).unwrap();
        assert_eq!(r.account_ref, "organizations/1234");
        assert_eq!(r.resource_type, ResourceType::Organization);
    }
}

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use super::{ApiClient, IamPolicy};

const V1: &str = "https://cloudresourcemanager.googleapis.com/v1";
const V2: &str = "https://cloudresourcemanager.googleapis.com/v2";
const V3: &str = "https://cloudresourcemanager.googleapis.com/v3";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Organization {
    /// `organizations/<id>`
    pub name: String,
    pub display_name: String,
    pub lifecycle_state: String,
    pub creation_time: String,
    pub owner: Option<serde_json::Value>,
}

impl Organization {
    pub fn id(&self) -> &str {
        self.name.trim_start_matches("organizations/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Folder {
    /// `folders/<id>`
    pub name: String,
    pub parent: String,
    pub display_name: String,
    pub lifecycle_state: String,
    pub create_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectParent {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ProjectParent {
    /// `organizations/<id>` or `folders/<id>`.
    pub fn path(&self) -> String {
        format!("{}s/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub project_number: String,
    pub lifecycle_state: String,
    pub create_time: String,
    pub parent: Option<ProjectParent>,
    pub labels: BTreeMap<String, String>,
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.lifecycle_state == "ACTIVE"
    }

    pub fn parent_path(&self) -> Option<String> {
        self.parent.as_ref().map(ProjectParent::path)
    }
}

/// v3 project shape, normalized into `Project` on the way out.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectV3 {
    name: String,
    project_id: String,
    display_name: String,
    state: String,
    parent: String,
    create_time: String,
    labels: BTreeMap<String, String>,
}

impl From<ProjectV3> for Project {
    fn from(p: ProjectV3) -> Self {
        let parent = p.parent.split_once('/').map(|(kind, id)| ProjectParent {
            kind: kind.trim_end_matches('s').to_string(),
            id: id.to_string(),
        });
        Project {
            project_number: p.name.trim_start_matches("projects/").to_string(),
            project_id: p.project_id,
            name: p.display_name,
            lifecycle_state: p.state,
            create_time: p.create_time,
            parent,
            labels: p.labels,
        }
    }
}

#[async_trait]
pub trait ResourceManagerApi: Send + Sync {
    async fn get_organization(&self, org_id: &str) -> Result<Organization>;
    async fn search_organizations(&self) -> Result<Vec<Organization>>;
    async fn get_folder(&self, folder_id: &str) -> Result<Folder>;
    /// Direct children of `parent` (`organizations/<id>` or `folders/<id>`).
    async fn list_folders(&self, parent: &str) -> Result<Vec<Folder>>;
    async fn get_project(&self, project_id: &str) -> Result<Project>;
    /// Every project visible to the caller, optionally narrowed by a v1 filter expression.
    async fn list_projects(&self, filter: Option<&str>) -> Result<Vec<Project>>;
    /// Direct child projects of `parent`.
    async fn list_projects_by_parent(&self, parent: &str) -> Result<Vec<Project>>;
    async fn get_project_iam_policy(&self, project_id: &str) -> Result<IamPolicy>;
}

pub struct RestResourceManager {
    api: ApiClient,
}

impl RestResourceManager {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OrganizationsPage {
    organizations: Vec<Organization>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FoldersPage {
    folders: Vec<Folder>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectsPage {
    projects: Vec<Project>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectsV3Page {
    projects: Vec<ProjectV3>,
    next_page_token: Option<String>,
}

#[async_trait]
impl ResourceManagerApi for RestResourceManager {
    async fn get_organization(&self, org_id: &str) -> Result<Organization> {
        let id = org_id.trim_start_matches("organizations/");
        self.api.get_json(&format!("{}/organizations/{}", V1, id), &[]).await
    }

    async fn search_organizations(&self) -> Result<Vec<Organization>> {
        let url = format!("{}/organizations:search", V1);
        let mut all = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let body = match &token {
                Some(t) => json!({ "pageToken": t }),
                None => json!({}),
            };
            let page: OrganizationsPage = self.api.post_json(&url, &body).await?;
            all.extend(page.organizations);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        Ok(all)
    }

    async fn get_folder(&self, folder_id: &str) -> Result<Folder> {
        let id = folder_id.trim_start_matches("folders/");
        self.api.get_json(&format!("{}/folders/{}", V2, id), &[]).await
    }

    async fn list_folders(&self, parent: &str) -> Result<Vec<Folder>> {
        self.api
            .list_all(
                &format!("{}/folders", V2),
                &[("parent", parent.to_string())],
                |p: FoldersPage| (p.folders, p.next_page_token),
            )
            .await
    }

    async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.api.get_json(&format!("{}/projects/{}", V1, project_id), &[]).await
    }

    async fn list_projects(&self, filter: Option<&str>) -> Result<Vec<Project>> {
        let query: Vec<(&str, String)> =
            filter.map(|f| ("filter", f.to_string())).into_iter().collect();
        self.api
            .list_all(&format!("{}/projects", V1), &query, |p: ProjectsPage| {
                (p.projects, p.next_page_token)
            })
            .await
    }

    async fn list_projects_by_parent(&self, parent: &str) -> Result<Vec<Project>> {
        let projects = self
            .api
            .list_all(
                &format!("{}/projects", V3),
                &[("parent", parent.to_string())],
                |p: ProjectsV3Page| (p.projects, p.next_page_token),
            )
            .await?;
        Ok(projects.into_iter().map(Project::from).collect())
    }

    async fn get_project_iam_policy(&self, project_id: &str) -> Result<IamPolicy> {
        self.api
            .post_json(
                &format!("{}/projects/{}:getIamPolicy", V1, project_id),
                &json!({ "options": { "requestedPolicyVersion": 3 } }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v3_project_normalizes_parent_and_state() {
        let raw = r#"{"name":"projects/42","projectId":"alpha","displayName":"Alpha",
                      "state":"ACTIVE","parent":"folders/77"}"#;
        let p: Project = serde_json::from_str::<ProjectV3>(raw).unwrap().into();
        assert_eq!(p.project_id, "alpha");
        assert_eq!(p.project_number, "42");
        assert!(p.is_active());
        assert_eq!(p.parent_path().as_deref(), Some("folders/77"));
    }

    #[test]
    fn test_v1_project_parent_path() {
        let raw = r#"{"projectId":"beta","lifecycleState":"DELETE_REQUESTED",
                      "parent":{"type":"organization","id":"1234"}}"#;
        let p: Project = serde_json::from_str(raw).unwrap();
        assert!(!p.is_active());
        assert_eq!(p.parent_path().as_deref(), Some("organizations/1234"));
    }
}

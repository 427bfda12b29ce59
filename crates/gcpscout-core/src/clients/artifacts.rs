use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ApiClient;

const BASE: &str = "https://artifactregistry.googleapis.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Location {
    pub name: String,
    pub location_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Repository {
    /// `projects/<p>/locations/<l>/repositories/<r>`
    pub name: String,
    pub format: String,
    pub description: String,
    pub create_time: String,
    pub size_bytes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DockerImage {
    pub name: String,
    /// `<location>-docker.pkg.dev/<project>/<repo>/<image>@sha256:...`
    pub uri: String,
    pub tags: Vec<String>,
    pub image_size_bytes: String,
    pub media_type: String,
    pub upload_time: String,
}

#[async_trait]
pub trait ArtifactRegistryApi: Send + Sync {
    async fn list_locations(&self, project_id: &str) -> Result<Vec<Location>>;
    async fn list_repositories(&self, project_id: &str, location: &str) -> Result<Vec<Repository>>;
    async fn list_docker_images(&self, repository: &str) -> Result<Vec<DockerImage>>;
}

pub struct RestArtifactRegistry {
    api: ApiClient,
}

impl RestArtifactRegistry {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LocationsPage {
    locations: Vec<Location>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RepositoriesPage {
    repositories: Vec<Repository>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ImagesPage {
    docker_images: Vec<DockerImage>,
    next_page_token: Option<String>,
}

#[async_trait]
impl ArtifactRegistryApi for RestArtifactRegistry {
    async fn list_locations(&self, project_id: &str) -> Result<Vec<Location>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/locations", BASE, project_id),
                &[],
                |p: LocationsPage| (p.locations, p.next_page_token),
            )
            .await
    }

    async fn list_repositories(&self, project_id: &str, location: &str) -> Result<Vec<Repository>> {
        self.api
            .list_all(
                &format!("{}/projects/{}/locations/{}/repositories", BASE, project_id, location),
                &[],
                |p: RepositoriesPage| (p.repositories, p.next_page_token),
            )
            .await
    }

    async fn list_docker_images(&self, repository: &str) -> Result<Vec<DockerImage>> {
        self.api
            .list_all(
                &format!("{}/{}/dockerImages", BASE, repository),
                &[],
                |p: ImagesPage| (p.docker_images, p.next_page_token),
            )
            .await
    }
}

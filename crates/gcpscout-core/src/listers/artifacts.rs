use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{send_records, ListScope, ProjectLister};
use crate::clients::{short_name, DockerImage, Repository};
use crate::errors::handle_gcp_error;
use crate::pipeline::{bounded_fan_out, Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::GcpBase;
use crate::record::{properties, Resource, ResourceType};

const REPOSITORIES: &[ResourceType] = &[ResourceType::ArtifactRepo];

fn location_of(name: &str) -> &str {
    name.split('/').nth(3).unwrap_or_default()
}

pub fn repository_record(repo: &Repository, project: &str) -> Result<Resource> {
    let props = properties([
        ("fullName", json!(repo.name)),
        ("format", json!(repo.format)),
        ("description", json!(repo.description)),
        ("createTime", json!(repo.create_time)),
        ("sizeBytes", json!(repo.size_bytes)),
    ]);
    Ok(Resource::new(short_name(&repo.name), project, ResourceType::ArtifactRepo, props)?
        .with_region(location_of(&repo.name)))
}

pub fn image_record(image: &DockerImage, project: &str, region: &str) -> Result<Resource> {
    let props = properties([
        ("uri", json!(image.uri)),
        ("tags", json!(image.tags)),
        ("imageSizeBytes", json!(image.image_size_bytes)),
        ("mediaType", json!(image.media_type)),
        ("uploadTime", json!(image.upload_time)),
    ]);
    let name = if image.uri.is_empty() { image.name.as_str() } else { image.uri.as_str() };
    Ok(Resource::new(name, project, ResourceType::ContainerImage, props)?.with_region(region))
}

/// Artifact Registry repositories, one worker per location.
#[derive(Default)]
pub struct ArtifactRepoLister;

#[async_trait]
impl ProjectLister for ArtifactRepoLister {
    fn name(&self) -> &'static str {
        "gcp-artifact-repo-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let locations = match scope.services.artifacts.list_locations(scope.project).await {
            Ok(l) => l,
            Err(e) => {
                warn!(
                    project = scope.project,
                    error = %format!("{:#}", e),
                    "artifact location discovery failed"
                );
                return Ok(());
            }
        };
        let locations: Vec<String> = locations
            .into_iter()
            .map(|l| l.location_id)
            .filter(|l| scope.base.wants_region(l))
            .collect();
        let services = scope.services.clone();
        let project = scope.project.to_string();
        let out = out.clone();
        bounded_fan_out(locations, scope.base.concurrency(), scope.project, move |location| {
            let services = services.clone();
            let project = project.clone();
            let out = out.clone();
            async move {
                let repos = services
                    .artifacts
                    .list_repositories(&project, &location)
                    .await
                    .map_err(|e| {
                        let context =
                            format!("failed to list repositories in {}/{}", project, location);
                        handle_gcp_error(e, &context)
                    })?;
                send_records(&repos, &out, |r| r.name.clone(), |r| {
                    repository_record(r, &project)
                })
                .await
            }
        })
        .await;
        Ok(())
    }
}

/// Docker images of each Docker-format repository record.
#[derive(Default)]
pub struct ContainerImageLister {
    base: GcpBase,
}

impl ContainerImageLister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ContainerImageLister {
    fn name(&self) -> &'static str {
        "gcp-container-image-lister"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(REPOSITORIES)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(repo) = input else { return Ok(()) };
        if repo.prop_str("format").is_some_and(|f| f != "DOCKER") {
            return Ok(());
        }
        let full_name = repo.prop_str("fullName").unwrap_or(&repo.name).to_string();
        let images = self
            .base
            .services()?
            .artifacts
            .list_docker_images(&full_name)
            .await
            .map_err(|e| {
                handle_gcp_error(e, &format!("failed to list docker images in {}", full_name))
            })?;
        send_records(&images, out, |i| i.name.clone(), |i| {
            image_record(i, &repo.account_ref, &repo.region)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Args, Chain};
    use crate::provider::MemoryCloud;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_images_listed_for_docker_repo() {
        let repo_name = "projects/alpha/locations/us/repositories/apps";
        let cloud = MemoryCloud::default().with(|s| {
            s.docker_images.insert(
                repo_name.into(),
                vec![DockerImage {
                    name: format!("{}/dockerImages/api@sha256:abc", repo_name),
                    uri: "us-docker.pkg.dev/alpha/apps/api@sha256:abc".into(),
                    tags: vec!["latest".into()],
                    ..Default::default()
                }],
            );
        });
        let repo = repository_record(
            &Repository { name: repo_name.into(), format: "DOCKER".into(), ..Default::default() },
            "alpha",
        )
        .unwrap();
        assert_eq!(repo.region, "us");
        let ctx = LinkContext::new(Args::new(), Arc::new(cloud));
        let (out, result) =
            Chain::of(ContainerImageLister::new()).run(&ctx, vec![Message::from(repo)]).await;
        result.unwrap();
        let image = out[0].as_resource().unwrap();
        assert_eq!(image.name, "us-docker.pkg.dev/alpha/apps/api@sha256:abc");
        assert_eq!(image.account_ref, "alpha");
    }

    #[tokio::test]
    async fn test_non_docker_repo_skipped() {
        let repo = repository_record(
            &Repository {
                name: "projects/alpha/locations/us/repositories/py".into(),
                format: "PYTHON".into(),
                ..Default::default()
            },
            "alpha",
        )
        .unwrap();
        let cloud = MemoryCloud::default();
        let ctx = LinkContext::new(Args::new(), Arc::new(cloud.clone()));
        let (out, result) =
            Chain::of(ContainerImageLister::new()).run(&ctx, vec![Message::from(repo)]).await;
        result.unwrap();
        assert!(out.is_empty());
        assert!(cloud.calls().is_empty());
    }
}

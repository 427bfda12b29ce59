use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{send_records, ListScope, ProjectLister};
use crate::clients::{short_name, Site};
use crate::errors::{handle_gcp_error, is_service_disabled};
use crate::finding::Severity;
use crate::pipeline::Outlet;
use crate::record::{properties, Resource, ResourceType};

pub fn site_record(site: &Site, project: &str) -> Result<Resource> {
    let props = properties([
        ("name", json!(site.name)),
        ("labels", json!(site.labels)),
        ("type", json!(site.kind)),
        ("appId", json!(site.app_id)),
        ("defaultUrl", json!(site.default_url)),
    ]);
    let mut record =
        Resource::new(short_name(&site.name), project, ResourceType::FirebaseHostingSite, props)?;
    if !site.default_url.is_empty() {
        record.set("publicURL", &site.default_url);
        record.set("isPublic", true);
    }
    record.set("riskLevel", Severity::Informational);
    Ok(record)
}

/// Firebase Hosting sites. Projects without the Hosting API enabled are skipped quietly.
#[derive(Default)]
pub struct FirebaseHostingLister;

#[async_trait]
impl ProjectLister for FirebaseHostingLister {
    fn name(&self) -> &'static str {
        "gcp-firebase-hosting-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let sites = match scope.services.firebase.list_sites(scope.project).await {
            Ok(sites) => sites,
            Err(e) if is_service_disabled(&e) => {
                debug!(project = scope.project, "firebase hosting not enabled");
                return Ok(());
            }
            Err(e) => {
                let context =
                    format!("failed to list Firebase Hosting sites in project {}", scope.project);
                return Err(handle_gcp_error(e, &context));
            }
        };
        send_records(&sites, out, |s| s.name.clone(), |s| site_record(s, scope.project)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiError;
    use crate::listers::ProjectLink;
    use crate::pipeline::{Args, Chain, LinkContext, Message};
    use crate::provider::MemoryCloud;
    use std::sync::Arc;

    #[test]
    fn test_site_record_is_informational() {
        let site = Site {
            name: "projects/alpha/sites/alpha-web".into(),
            default_url: "https://alpha-web.web.app".into(),
            ..Default::default()
        };
        let record = site_record(&site, "alpha").unwrap();
        assert_eq!(record.name, "alpha-web");
        assert_eq!(record.prop_str("publicURL"), Some("https://alpha-web.web.app"));
        assert_eq!(record.prop_str("riskLevel"), Some("informational"));
    }

    #[tokio::test]
    async fn test_disabled_service_is_not_an_error() {
        let cloud = MemoryCloud::default().with_project("alpha", "ACTIVE", "organizations/1").fail(
            "firebasehosting.sites.list",
            "*",
            ApiError {
                status: 403,
                status_text: Some("PERMISSION_DENIED".into()),
                reason: Some("SERVICE_DISABLED".into()),
                message: "Firebase Hosting API has not been used in project alpha".into(),
            },
        );
        let project = crate::hierarchy::project_record(&cloud.snapshot().projects[0]).unwrap();
        let ctx = LinkContext::new(Args::new(), Arc::new(cloud));
        let (out, result) = Chain::of(ProjectLink::new(FirebaseHostingLister))
            .run(&ctx, vec![Message::from(project)])
            .await;
        result.unwrap();
        assert!(out.is_empty());
    }
}

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

use super::{ListScope, ProjectLister};
use crate::clients::RunService;
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase, GcpServices};
use crate::record::{properties, Resource, ResourceType};
use crate::rules::anonymous::AnonymousAccessInfo;

pub fn run_service_record(service: &RunService, project: &str) -> Result<Resource> {
    let images: Vec<&str> = service.containers().iter().map(|c| c.image.as_str()).collect();
    let service_account = service.template.as_ref().map(|t| t.service_account.as_str());
    let props = properties([
        ("fullName", json!(service.name)),
        ("ingress", json!(service.ingress)),
        ("createTime", json!(service.create_time)),
        ("images", json!(images)),
        ("serviceAccount", json!(service_account.filter(|s| !s.is_empty()))),
    ]);
    let mut record = Resource::new(service.short_name(), project, ResourceType::RunService, props)?
        .with_region(service.region());
    if !service.uri.is_empty() {
        record.set("publicURL", &service.uri);
    }
    if !service.urls.is_empty() {
        record.set("publicURLs", &service.urls);
    }
    Ok(record)
}

async fn annotate_service(services: &GcpServices, service: &RunService, record: &mut Resource) {
    match services.run.get_service_iam_policy(&service.name).await {
        Ok(policy) => AnonymousAccessInfo::from_policy(&policy).annotate(record),
        Err(e) => debug!(
            service = %service.name,
            error = %format!("{:#}", e),
            "run service IAM policy unavailable"
        ),
    }
}

#[derive(Default)]
pub struct RunServiceLister;

#[async_trait]
impl ProjectLister for RunServiceLister {
    fn name(&self) -> &'static str {
        "gcp-run-service-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let services = scope.services.run.list_services(scope.project, "-").await.map_err(|e| {
            let context =
                format!("failed to list Cloud Run services in project {}", scope.project);
            handle_gcp_error(e, &context)
        })?;
        for service in services.iter().filter(|s| scope.base.wants_region(s.region())) {
            let mut record = match run_service_record(service, scope.project) {
                Ok(r) => r,
                Err(e) => {
                    error!(
                        service = %service.name,
                        error = %e,
                        "failed to build run service record"
                    );
                    continue;
                }
            };
            annotate_service(scope.services, service, &mut record).await;
            out.send(record).await?;
        }
        Ok(())
    }
}

/// One Cloud Run service by `--project`, `--region` and `--service` (or input text).
#[derive(Default)]
pub struct CloudRunInfo {
    base: GcpBase,
}

impl CloudRunInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for CloudRunInfo {
    fn name(&self) -> &'static str {
        "gcp-cloud-run-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::project().required());
        params.push(options::region().required());
        params.push(options::service());
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
        let project = args.str("project").unwrap_or_default().to_string();
        let region = args.str("region").unwrap_or_default().to_string();
        let service = match text.trim() {
            "" => args
                .str("service")
                .map(str::to_string)
                .ok_or_else(|| ReconError::MissingParam("service".to_string()))?,
            s => s.to_string(),
        };
        let name = format!("projects/{}/locations/{}/services/{}", project, region, service);
        let services = self.base.services()?;
        let svc = match services.run.get_service(&name).await {
            Ok(s) => s,
            Err(e) if is_not_found(&e) => {
                let message = format!("cloud run service not found: {}", name);
                return Err(ReconError::NotFound(message).into());
            }
            Err(e) => {
                let context = format!("failed to get Cloud Run service {}", name);
                return Err(handle_gcp_error(e, &context));
            }
        };
        let mut record = run_service_record(&svc, &project)?;
        annotate_service(services, &svc, &mut record).await;
        out.send(record).await
    }
}

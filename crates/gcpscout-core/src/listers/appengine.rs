use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, warn};

use super::{ListScope, ProjectLister};
use crate::clients::{Application, Version};
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase};
use crate::record::{properties, Resource, ResourceType};

pub const DEFAULT_SERVICE: &str = "default";

/// `https://<version>-dot-<service>-dot-<host>`, or without the service part for `default`.
pub fn version_url(app_hostname: &str, service: &str, version: &str) -> String {
    if service == DEFAULT_SERVICE {
        format!("https://{}-dot-{}", version, app_hostname)
    } else {
        format!("https://{}-dot-{}-dot-{}", version, service, app_hostname)
    }
}

/// Dispatch-rule domains served by the app other than its default hostname.
pub fn custom_domains(app: &Application) -> Vec<String> {
    let mut domains: Vec<String> = app
        .dispatch_rules
        .iter()
        .map(|r| r.domain.clone())
        .filter(|d| !d.is_empty() && !d.contains(&app.default_hostname))
        .collect();
    domains.sort();
    domains.dedup();
    domains
}

pub fn version_record(
    app: &Application,
    service: &str,
    version: &Version,
    project: &str,
) -> Result<Resource> {
    let domains = custom_domains(app);
    let props = properties([
        ("applicationId", json!(app.id)),
        ("service", json!(service)),
        ("version", json!(version.id)),
        ("runtime", json!(version.runtime)),
        ("servingStatus", json!(version.serving_status)),
        ("versionUrl", json!(version.version_url)),
        ("createTime", json!(version.create_time)),
        ("serviceAccount", json!(version.service_account)),
        ("defaultHostname", json!(app.default_hostname)),
        ("customDomains", json!(domains)),
    ]);
    let mut record = Resource::new(
        format!("{}/{}", service, version.id),
        project,
        ResourceType::AppEngineApp,
        props,
    )?
    .with_region(&app.location_id);
    if !app.default_hostname.is_empty() {
        record.set("publicURL", version_url(&app.default_hostname, service, &version.id));
    }
    Ok(record)
}

/// App Engine versions of every service of the project's application.
#[derive(Default)]
pub struct AppEngineLister;

#[async_trait]
impl ProjectLister for AppEngineLister {
    fn name(&self) -> &'static str {
        "gcp-appengine-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let appengine = &scope.services.appengine;
        let app = match appengine.get_application(scope.project).await {
            Ok(app) => app,
            Err(e) if is_not_found(&e) => {
                debug!(project = scope.project, "no App Engine application");
                return Ok(());
            }
            Err(e) => {
                let context = format!(
                    "failed to get App Engine application in project {}",
                    scope.project
                );
                return Err(handle_gcp_error(e, &context));
            }
        };
        let services = appengine.list_services(scope.project).await.map_err(|e| {
            let context =
                format!("failed to list App Engine services in project {}", scope.project);
            handle_gcp_error(e, &context)
        })?;
        for service in &services {
            let versions = match appengine.list_versions(scope.project, &service.id).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        project = scope.project,
                        service = %service.id,
                        error = %format!("{:#}", e),
                        "failed to list versions"
                    );
                    continue;
                }
            };
            for version in &versions {
                match version_record(&app, &service.id, version, scope.project) {
                    Ok(record) => out.send(record).await?,
                    Err(e) => {
                        error!(
                            version = %version.id,
                            error = %e,
                            "failed to build App Engine record"
                        )
                    }
                }
            }
        }
        Ok(())
    }
}

/// One App Engine version by `--project`, `--service` (default `default`) and `--version`.
#[derive(Default)]
pub struct AppEngineInfo {
    base: GcpBase,
}

impl AppEngineInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for AppEngineInfo {
    fn name(&self) -> &'static str {
        "gcp-appengine-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::project().required());
        params.push(options::service().with_default(DEFAULT_SERVICE));
        params.push(options::version().required());
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Text
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, _input: Message, out: &Outlet) -> Result<()> {
        let args = self.base.args();
        let project = args.str("project").unwrap_or_default().to_string();
        let service = args.str("service").unwrap_or(DEFAULT_SERVICE).to_string();
        let version_id = args.str("version").unwrap_or_default().to_string();
        let appengine = &self.base.services()?.appengine;
        let app = appengine.get_application(&project).await.map_err(|e| {
            let context = format!("failed to get App Engine application in project {}", project);
            handle_gcp_error(e, &context)
        })?;
        let version = match appengine.get_version(&project, &service, &version_id).await {
            Ok(v) => v,
            Err(e) if is_not_found(&e) => {
                return Err(ReconError::NotFound(format!(
                    "app engine version not found: {}/{}",
                    service, version_id
                ))
                .into())
            }
            Err(e) => {
                let context = format!("failed to get App Engine version {}", version_id);
                return Err(handle_gcp_error(e, &context));
            }
        };
        out.send(version_record(&app, &service, &version, &project)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::appengine::UrlDispatchRule;

    fn dispatch(domain: &str, service: &str) -> UrlDispatchRule {
        UrlDispatchRule { domain: domain.into(), path: "/*".into(), service: service.into() }
    }

    fn app() -> Application {
        Application {
            id: "my-app".into(),
            default_hostname: "my-app.appspot.com".into(),
            dispatch_rules: vec![
                dispatch("api.example.com", "api"),
                dispatch("*.my-app.appspot.com", "default"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_public_url_for_named_service() {
        let v = Version { id: "v3".into(), ..Default::default() };
        let record = version_record(&app(), "api", &v, "alpha").unwrap();
        assert_eq!(record.prop_str("publicURL"), Some("https://v3-dot-api-dot-my-app.appspot.com"));
        assert_eq!(record.name, "api/v3");
    }

    #[test]
    fn test_public_url_for_default_service() {
        assert_eq!(
            version_url("my-app.appspot.com", "default", "v1"),
            "https://v1-dot-my-app.appspot.com"
        );
    }

    #[test]
    fn test_custom_domains_exclude_default_hostname() {
        assert_eq!(custom_domains(&app()), vec!["api.example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_appengine_info_fetches_one_version() {
        use crate::pipeline::{Args, Chain};
        use crate::provider::MemoryCloud;
        use std::sync::Arc;

        let cloud = MemoryCloud::default().with(|s| {
            s.applications.insert("alpha".into(), app());
            let version = Version { id: "v1".into(), ..Default::default() };
            s.app_versions.insert("alpha/default".into(), vec![version]);
        });
        let args = Args::new().with("project", "alpha").with("version", "v1");
        let ctx = LinkContext::new(args, Arc::new(cloud));
        let (out, result) =
            Chain::of(AppEngineInfo::new()).run(&ctx, vec![Message::from("")]).await;
        result.unwrap();
        let record = out[0].as_resource().unwrap();
        assert_eq!(record.name, "default/v1");
        assert_eq!(record.prop_str("publicURL"), Some("https://v1-dot-my-app.appspot.com"));

        let missing = Args::new().with("project", "alpha").with("version", "v9");
        let ctx = ctx.with_args(missing);
        let (_, result) = Chain::of(AppEngineInfo::new()).run(&ctx, vec![Message::from("")]).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("app engine version not found: default/v9"), "{err}");
    }
}

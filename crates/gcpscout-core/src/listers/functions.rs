use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error};

use super::{ListScope, ProjectLister};
use crate::clients::CloudFunction;
use crate::errors::handle_gcp_error;
use crate::pipeline::Outlet;
use crate::provider::GcpServices;
use crate::record::{properties, Resource, ResourceType};
use crate::rules::anonymous::AnonymousAccessInfo;

pub fn function_record(function: &CloudFunction, project: &str) -> Result<Resource> {
    let url = function.https_trigger.as_ref().map(|t| t.url.as_str()).filter(|u| !u.is_empty());
    let props = properties([
        ("fullName", json!(function.name)),
        ("status", json!(function.status)),
        ("runtime", json!(function.runtime)),
        ("entryPoint", json!(function.entry_point)),
        ("ingressSettings", json!(function.ingress_settings)),
        ("serviceAccountEmail", json!(function.service_account_email)),
        ("sourceArchiveUrl", json!(function.source_archive_url)),
        ("updateTime", json!(function.update_time)),
        ("publicURL", json!(url)),
    ]);
    Ok(Resource::new(function.short_name(), project, ResourceType::Function, props)?
        .with_region(function.region()))
}

async fn annotate_function(
    services: &GcpServices,
    function: &CloudFunction,
    record: &mut Resource,
) {
    match services.functions.get_function_iam_policy(&function.name).await {
        Ok(policy) => AnonymousAccessInfo::from_policy(&policy).annotate(record),
        Err(e) => debug!(
            function = %function.name,
            error = %format!("{:#}", e),
            "function IAM policy unavailable"
        ),
    }
}

/// Cloud Functions (v1) in every location of the project.
#[derive(Default)]
pub struct FunctionLister;

#[async_trait]
impl ProjectLister for FunctionLister {
    fn name(&self) -> &'static str {
        "gcp-function-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let functions = scope.services.functions.list_functions(scope.project).await.map_err(|e| {
            handle_gcp_error(e, &format!("failed to list functions in project {}", scope.project))
        })?;
        for function in functions.iter().filter(|f| scope.base.wants_region(f.region())) {
            let mut record = match function_record(function, scope.project) {
                Ok(r) => r,
                Err(e) => {
                    error!(
                        function = %function.name,
                        error = %e,
                        "failed to build function record"
                    );
                    continue;
                }
            };
            annotate_function(scope.services, function, &mut record).await;
            out.send(record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::functions::HttpsTrigger;

    #[test]
    fn test_function_record_uses_short_name_and_region() {
        let f = CloudFunction {
            name: "projects/alpha/locations/europe-west1/functions/hook".into(),
            runtime: "python312".into(),
            https_trigger: Some(HttpsTrigger {
                url: "https://europe-west1-alpha.cloudfunctions.net/hook".into(),
            }),
            ..Default::default()
        };
        let record = function_record(&f, "alpha").unwrap();
        assert_eq!(record.name, "hook");
        assert_eq!(record.region, "europe-west1");
        assert_eq!(
            record.prop_str("publicURL"),
            Some("https://europe-west1-alpha.cloudfunctions.net/hook")
        );
    }
}

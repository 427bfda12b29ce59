use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::errors::handle_gcp_error;
use crate::hierarchy::listable_project;
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param, PROJECTS};
use crate::provider::GcpBase;
use crate::record::{properties, IamBinding, IamPolicySnapshot, Resource, ResourceType};

/// `iam-policy` record carrying the snapshot under `policy_data`.
pub fn iam_policy_record(snapshot: &IamPolicySnapshot) -> Result<Resource> {
    let props = properties([
        ("project_id", json!(snapshot.project_id)),
        ("project_name", json!(snapshot.project_name)),
        ("policy_data", serde_json::to_value(snapshot)?),
        ("bindings", json!(snapshot.bindings)),
    ]);
    Ok(Resource::new(
        format!("{}-iam-policy", snapshot.project_id),
        &snapshot.account_ref,
        ResourceType::IamPolicy,
        props,
    )?
    .with_display_name(format!("IAM Policy - {}", snapshot.project_id)))
}

/// Read back the snapshot of an `iam-policy` record. Records without `policy_data` fall
/// back to their top-level `bindings`.
pub fn policy_snapshot(record: &Resource) -> Option<IamPolicySnapshot> {
    if !record.is(ResourceType::IamPolicy) {
        return None;
    }
    if let Some(data) = record.prop("policy_data") {
        return serde_json::from_value(data.clone()).ok();
    }
    let bindings: Vec<IamBinding> = serde_json::from_value(record.prop("bindings")?.clone()).ok()?;
    let project_id = record
        .prop_str("project_id")
        .map(str::to_string)
        .unwrap_or_else(|| record.name.trim_end_matches("-iam-policy").to_string());
    Some(IamPolicySnapshot {
        project_name: record.prop_str("project_name").unwrap_or(&project_id).to_string(),
        project_id,
        bindings,
        account_ref: record.account_ref.clone(),
    })
}

/// Fetches the IAM policy of each project record.
#[derive(Default)]
pub struct ProjectIamPolicy {
    base: GcpBase,
}

impl ProjectIamPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ProjectIamPolicy {
    fn name(&self) -> &'static str {
        "gcp-project-iam-policy"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(PROJECTS)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(project) = input.as_resource() else { return Ok(()) };
        let Some(project_id) = listable_project(project) else { return Ok(()) };
        let policy = self
            .base
            .services()?
            .resource_manager
            .get_project_iam_policy(project_id)
            .await
            .map_err(|e| {
                let context = format!("failed to get IAM policy for project {}", project_id);
                handle_gcp_error(e, &context)
            })?;
        debug!(project = project_id, bindings = policy.bindings.len(), "fetched IAM policy");
        let snapshot = IamPolicySnapshot {
            project_id: project_id.to_string(),
            project_name: project.label().to_string(),
            bindings: policy
                .bindings
                .into_iter()
                .map(|b| IamBinding { role: b.role, members: b.members })
                .collect(),
            account_ref: project.account_ref.clone(),
        };
        out.send(iam_policy_record(&snapshot)?.with_region(&project.region)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::IamPolicy;
    use crate::pipeline::{Args, Chain};
    use crate::provider::MemoryCloud;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_policy_record_round_trips_snapshot() {
        let cloud = MemoryCloud::default()
            .with_project("alpha", "ACTIVE", "organizations/1")
            .with_project_policy(
                "alpha",
                IamPolicy {
                    bindings: vec![IamPolicy::binding("roles/owner", &["user:a@x"])],
                    ..Default::default()
                },
            );
        let project = crate::hierarchy::project_record(&cloud.snapshot().projects[0]).unwrap();
        let ctx = LinkContext::new(Args::new(), Arc::new(cloud));
        let (out, result) =
            Chain::of(ProjectIamPolicy::new()).run(&ctx, vec![Message::from(project)]).await;
        result.unwrap();
        let record = out[0].as_resource().unwrap();
        assert_eq!(record.name, "alpha-iam-policy");
        assert_eq!(record.account_ref, "organizations/1");
        let snapshot = policy_snapshot(record).unwrap();
        assert_eq!(snapshot.project_id, "alpha");
        assert!(snapshot.grants("user:a@x", "roles/owner"));
    }

    #[test]
    fn test_snapshot_from_bare_bindings() {
        let bindings = json!([{ "role": "roles/viewer", "members": ["user:b@x"] }]);
        let props = properties([("bindings", bindings)]);
        let record =
            Resource::new("beta-iam-policy", "organizations/1", ResourceType::IamPolicy, props)
                .unwrap();
        let snapshot = policy_snapshot(&record).unwrap();
        assert_eq!(snapshot.project_id, "beta");
        assert_eq!(snapshot.project_name, "beta");
        assert_eq!(snapshot.bindings.len(), 1);
    }
}

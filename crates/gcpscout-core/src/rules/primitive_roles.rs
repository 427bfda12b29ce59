use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{
    basic_role_name, basic_role_risk, iam_policy::policy_snapshot, sole_principal, ROLE_EDITOR,
    ROLE_OWNER, ROLE_VIEWER,
};
use crate::finding::{max_severity, Evidence, Finding, FindingKind, Severity};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::record::{IamPolicySnapshot, Principal, ResourceType};

const IAM_POLICIES: &[ResourceType] = &[ResourceType::IamPolicy];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleViolation {
    pub principal: String,
    pub principal_type: String,
    pub project_id: String,
    pub project_name: String,
    pub role: String,
    pub role_name: String,
    pub risk_level: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleSummary {
    pub total_violations: usize,
    pub owner_roles: usize,
    pub editor_roles: usize,
    pub viewer_roles: usize,
    pub projects_affected: usize,
}

impl RoleSummary {
    pub fn from_violations(violations: &[RoleViolation]) -> Self {
        let projects: BTreeSet<&str> = violations.iter().map(|v| v.project_id.as_str()).collect();
        let count = |role: &str| violations.iter().filter(|v| v.role == role).count();
        Self {
            total_violations: violations.len(),
            owner_roles: count(ROLE_OWNER),
            editor_roles: count(ROLE_EDITOR),
            viewer_roles: count(ROLE_VIEWER),
            projects_affected: projects.len(),
        }
    }
}

/// Basic-role bindings in one policy. Default service accounts are dropped when
/// `exclude_default_sas` is set.
pub fn role_violations(
    snapshot: &IamPolicySnapshot,
    exclude_default_sas: bool,
) -> Vec<RoleViolation> {
    let mut violations = Vec::new();
    for binding in &snapshot.bindings {
        let Some(role_name) = basic_role_name(&binding.role) else { continue };
        for member in &binding.members {
            let principal = Principal::parse(member);
            if exclude_default_sas && principal.default_service_account().is_some() {
                debug!(principal = %member, "skipping default service account");
                continue;
            }
            violations.push(RoleViolation {
                principal: member.clone(),
                principal_type: principal.kind().to_string(),
                project_id: snapshot.project_id.clone(),
                project_name: snapshot.project_name.clone(),
                role: binding.role.clone(),
                role_name: role_name.to_string(),
                risk_level: basic_role_risk(&binding.role),
                description: format!(
                    "Principal has primitive role '{}' ({}) which violates least privilege \
                     principle",
                    binding.role, role_name
                ),
            });
        }
    }
    violations
}

/// Collects basic-role grants across every IAM policy record it sees.
#[derive(Default)]
pub struct PrimitiveRolesAnalyzer {
    exclude_default_sas: bool,
    violations: Vec<RoleViolation>,
}

impl PrimitiveRolesAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for PrimitiveRolesAnalyzer {
    fn name(&self) -> &'static str {
        "gcp-primitive-roles-analyzer"
    }

    fn params(&self) -> Vec<Param> {
        vec![Param::bool(
            "exclude-default-service-accounts",
            "Exclude default service accounts from primitive role detection",
        )
        .with_default(false)]
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(IAM_POLICIES)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.exclude_default_sas =
            ctx.args().bool("exclude-default-service-accounts").unwrap_or(false);
        Ok(())
    }

    async fn process(&mut self, input: Message, _out: &Outlet) -> Result<()> {
        let Some(snapshot) = input.as_resource().and_then(policy_snapshot) else {
            debug!("IAM policy record without policy data");
            return Ok(());
        };
        self.violations.extend(role_violations(&snapshot, self.exclude_default_sas));
        Ok(())
    }

    async fn complete(&mut self, out: &Outlet) -> Result<()> {
        if self.violations.is_empty() {
            info!("No primitive role violations found");
            return Ok(());
        }
        let violations = std::mem::take(&mut self.violations);
        let summary = RoleSummary::from_violations(&violations);
        info!(
            total_violations = summary.total_violations,
            projects_affected = summary.projects_affected,
            owner_roles = summary.owner_roles,
            editor_roles = summary.editor_roles,
            viewer_roles = summary.viewer_roles,
            "generated primitive roles finding"
        );
        let severity = max_severity(violations.iter().map(|v| v.risk_level), Severity::Medium);
        let principal =
            sole_principal(violations.iter().map(|v| v.principal.as_str())).map(str::to_string);
        let mut finding = Finding::new(
            FindingKind::PrimitiveRoles,
            severity,
            "GCP Primitive IAM Roles Violations",
            format!(
                "{} principal bindings use basic roles across {} project(s)",
                summary.total_violations, summary.projects_affected
            ),
            Evidence::PrimitiveRoles { violations, summary },
        )
        .with_remediation(
            "Replace basic roles with predefined or custom roles scoped to the permissions \
             actually needed",
        );
        if let Some(principal) = principal {
            finding = finding.with_principal(principal);
        }
        out.send(finding).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IamBinding;
    use crate::rules::iam_policy::iam_policy_record;
    use crate::pipeline::{Args, Chain};
    use crate::provider::MemoryCloud;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn snapshot() -> IamPolicySnapshot {
        IamPolicySnapshot {
            project_id: "alpha".into(),
            project_name: "Alpha".into(),
            bindings: vec![
                IamBinding { role: "roles/owner".into(), members: vec!["user:a@x".into()] },
                IamBinding {
                    role: "roles/viewer".into(),
                    members: vec!["serviceAccount:b@x".into()],
                },
                IamBinding {
                    role: "roles/storage.admin".into(),
                    members: vec!["user:c@x".into()],
                },
            ],
            account_ref: "organizations/1".into(),
        }
    }

    #[test]
    fn test_violations_for_basic_roles_only() {
        let violations = role_violations(&snapshot(), false);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].risk_level, Severity::High);
        assert_eq!(violations[0].principal_type, "user");
        assert_eq!(violations[1].risk_level, Severity::Medium);
        assert_eq!(violations[1].role_name, "Viewer");
    }

    #[test]
    fn test_exclude_default_service_accounts() {
        let mut snap = snapshot();
        snap.bindings.push(IamBinding {
            role: "roles/editor".into(),
            members: vec!["serviceAccount:123-compute@developer.gserviceaccount.com".into()],
        });
        assert_eq!(role_violations(&snap, false).len(), 3);
        assert_eq!(role_violations(&snap, true).len(), 2);
    }

    #[tokio::test]
    async fn test_complete_emits_single_finding() {
        let ctx = LinkContext::new(Args::new(), Arc::new(MemoryCloud::default()));
        let record = iam_policy_record(&snapshot()).unwrap();
        let (out, result) =
            Chain::of(PrimitiveRolesAnalyzer::new()).run(&ctx, vec![Message::from(record)]).await;
        result.unwrap();
        assert_eq!(out.len(), 1);
        let Message::Finding(finding) = &out[0] else { panic!("expected a finding") };
        let Evidence::PrimitiveRoles { violations, summary } = &finding.evidence else {
            panic!("wrong evidence")
        };
        assert_eq!(violations.len(), 2);
        assert_eq!(
            summary,
            &RoleSummary {
                total_violations: 2,
                owner_roles: 1,
                editor_roles: 0,
                viewer_roles: 1,
                projects_affected: 1,
            }
        );
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.principal, None);
    }

    #[tokio::test]
    async fn test_single_principal_is_named_on_finding() {
        let ctx = LinkContext::new(Args::new(), Arc::new(MemoryCloud::default()));
        let mut snap = snapshot();
        snap.bindings.truncate(1);
        let record = iam_policy_record(&snap).unwrap();
        let (out, result) =
            Chain::of(PrimitiveRolesAnalyzer::new()).run(&ctx, vec![Message::from(record)]).await;
        result.unwrap();
        let Message::Finding(finding) = &out[0] else { panic!("expected a finding") };
        assert_eq!(finding.principal.as_deref(), Some("user:a@x"));
    }

    #[tokio::test]
    async fn test_no_violations_emits_nothing() {
        let ctx = LinkContext::new(Args::new(), Arc::new(MemoryCloud::default()));
        let mut snap = snapshot();
        snap.bindings.truncate(0);
        let record = iam_policy_record(&snap).unwrap();
        let (out, result) =
            Chain::of(PrimitiveRolesAnalyzer::new()).run(&ctx, vec![Message::from(record)]).await;
        result.unwrap();
        assert!(out.is_empty());
    }
}

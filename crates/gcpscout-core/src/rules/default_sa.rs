use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

use super::{basic_role_name, basic_role_risk, iam_policy::policy_snapshot, sole_principal};
use crate::finding::{max_severity, Evidence, Finding, FindingKind, Severity};
use crate::pipeline::{Accepts, Link, Message, Outlet};
use crate::record::{DefaultServiceAccount, IamPolicySnapshot, Principal, ResourceType};

const IAM_POLICIES: &[ResourceType] = &[ResourceType::IamPolicy];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefaultSaViolation {
    pub service_account_email: String,
    pub service_account_type: DefaultServiceAccount,
    pub project_id: String,
    pub project_name: String,
    pub roles: Vec<String>,
    pub risk_level: Severity,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DefaultSaSummary {
    pub total_violations: usize,
    pub compute_default_sas: usize,
    pub appengine_default_sas: usize,
    pub active_service_accounts: usize,
    pub projects_affected: usize,
}

impl DefaultSaSummary {
    pub fn from_violations(violations: &[DefaultSaViolation]) -> Self {
        let projects: BTreeSet<&str> = violations.iter().map(|v| v.project_id.as_str()).collect();
        let of_type = |t: DefaultServiceAccount| {
            violations.iter().filter(|v| v.service_account_type == t).count()
        };
        Self {
            total_violations: violations.len(),
            compute_default_sas: of_type(DefaultServiceAccount::Compute),
            appengine_default_sas: of_type(DefaultServiceAccount::AppEngine),
            active_service_accounts: violations.iter().filter(|v| v.is_active).count(),
            projects_affected: projects.len(),
        }
    }
}

fn describe(kind: DefaultServiceAccount, email: &str, role: &str) -> String {
    let label = match kind {
        DefaultServiceAccount::Compute => "Default Compute Engine service account",
        DefaultServiceAccount::AppEngine => "Default App Engine service account",
    };
    format!(
        "{} ({}) has {} role which provides broad permissions and should be replaced with a \
         custom service account with minimal permissions",
        label, email, role
    )
}

/// Basic-role bindings held by auto-created service accounts.
pub fn default_sa_violations(snapshot: &IamPolicySnapshot) -> Vec<DefaultSaViolation> {
    let mut violations = Vec::new();
    for binding in &snapshot.bindings {
        if basic_role_name(&binding.role).is_none() {
            continue;
        }
        for member in &binding.members {
            let principal = Principal::parse(member);
            let (Some(email), Some(kind)) =
                (principal.service_account_email(), principal.default_service_account())
            else {
                continue;
            };
            debug!(
                sa = email,
                project = %snapshot.project_id,
                role = %binding.role,
                "default service account violation"
            );
            violations.push(DefaultSaViolation {
                service_account_email: member.clone(),
                service_account_type: kind,
                project_id: snapshot.project_id.clone(),
                project_name: snapshot.project_name.clone(),
                roles: vec![binding.role.clone()],
                risk_level: basic_role_risk(&binding.role),
                description: describe(kind, email, &binding.role),
                is_active: true,
            });
        }
    }
    violations
}

#[derive(Default)]
pub struct DefaultServiceAccountAnalyzer {
    violations: Vec<DefaultSaViolation>,
}

impl DefaultServiceAccountAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for DefaultServiceAccountAnalyzer {
    fn name(&self) -> &'static str {
        "gcp-default-service-account-analyzer"
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(IAM_POLICIES)
    }

    async fn process(&mut self, input: Message, _out: &Outlet) -> Result<()> {
        if let Some(snapshot) = input.as_resource().and_then(policy_snapshot) {
            self.violations.extend(default_sa_violations(&snapshot));
        }
        Ok(())
    }

    async fn complete(&mut self, out: &Outlet) -> Result<()> {
        if self.violations.is_empty() {
            info!("No default service account violations found");
            return Ok(());
        }
        let violations = std::mem::take(&mut self.violations);
        let summary = DefaultSaSummary::from_violations(&violations);
        info!(
            total_violations = summary.total_violations,
            compute = summary.compute_default_sas,
            appengine = summary.appengine_default_sas,
            projects_affected = summary.projects_affected,
            "generated default service account finding"
        );
        let severity = max_severity(violations.iter().map(|v| v.risk_level), Severity::Medium);
        let principal = sole_principal(violations.iter().map(|v| v.service_account_email.as_str()))
            .map(|email| format!("serviceAccount:{}", email));
        let mut finding = Finding::new(
            FindingKind::DefaultServiceAccounts,
            severity,
            "GCP Default Service Accounts with Basic Roles",
            format!(
                "{} default service account bindings grant basic roles across {} project(s)",
                summary.total_violations, summary.projects_affected
            ),
            Evidence::DefaultServiceAccounts { violations, summary },
        )
        .with_remediation(
            "Create dedicated service accounts with minimal roles and remove basic roles from \
             default service accounts",
        );
        if let Some(principal) = principal {
            finding = finding.with_principal(principal);
        }
        out.send(finding).await
    }
}

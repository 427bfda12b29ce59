use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::{basic_role_name, iam_policy::policy_snapshot, ROLE_EDITOR};
use crate::finding::{max_severity, Evidence, Finding, FindingKind, Severity};
use crate::pipeline::{Accepts, Link, Message, Outlet};
use crate::record::{IamPolicySnapshot, Principal, Resource, ResourceType};

const INPUTS: &[ResourceType] = &[ResourceType::IamPolicy, ResourceType::ServiceAccount];
const DEFAULT_COMPUTE: &str = "default-compute";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrincipalViolation {
    pub principal: String,
    pub principal_type: String,
    pub project_id: String,
    pub project_name: String,
    pub roles: Vec<String>,
    pub risk_level: Severity,
    pub description: String,
}

/// Instance service-account fields as carried on `service-account` records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceAccount {
    pub instance_id: String,
    pub instance_name: String,
    pub project_id: String,
    pub zone: String,
    pub service_account_email: String,
    pub service_account_type: String,
    pub is_default_sa: bool,
    pub scopes: Vec<String>,
}

impl InstanceAccount {
    pub fn from_record(record: &Resource) -> Option<Self> {
        if !record.is(ResourceType::ServiceAccount) {
            return None;
        }
        serde_json::to_value(&record.properties)
            .ok()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceViolation {
    #[serde(flatten)]
    pub account: InstanceAccount,
    pub risk_level: Severity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "violation_type", rename_all = "snake_case")]
pub enum OverprivilegedViolation {
    BasicRole(PrincipalViolation),
    DefaultComputeSaEditor(InstanceViolation),
}

impl OverprivilegedViolation {
    pub fn project_id(&self) -> &str {
        match self {
            OverprivilegedViolation::BasicRole(v) => &v.project_id,
            OverprivilegedViolation::DefaultComputeSaEditor(v) => &v.account.project_id,
        }
    }

    pub fn risk_level(&self) -> Severity {
        match self {
            OverprivilegedViolation::BasicRole(v) => v.risk_level,
            OverprivilegedViolation::DefaultComputeSaEditor(v) => v.risk_level,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverprivilegedSummary {
    pub total_violations: usize,
    pub basic_role_violations: usize,
    pub default_compute_sa_violations: usize,
    pub projects_affected: usize,
}

impl OverprivilegedSummary {
    pub fn from_violations(violations: &[OverprivilegedViolation]) -> Self {
        let projects: BTreeSet<&str> = violations.iter().map(|v| v.project_id()).collect();
        let basic = violations
            .iter()
            .filter(|v| matches!(v, OverprivilegedViolation::BasicRole(_)))
            .count();
        Self {
            total_violations: violations.len(),
            basic_role_violations: basic,
            default_compute_sa_violations: violations.len() - basic,
            projects_affected: projects.len(),
        }
    }
}

fn basic_role_violations(snapshot: &IamPolicySnapshot) -> Vec<OverprivilegedViolation> {
    let mut out = Vec::new();
    for binding in &snapshot.bindings {
        let Some(role_name) = basic_role_name(&binding.role) else { continue };
        for member in &binding.members {
            out.push(OverprivilegedViolation::BasicRole(PrincipalViolation {
                principal: member.clone(),
                principal_type: Principal::parse(member).kind().to_string(),
                project_id: snapshot.project_id.clone(),
                project_name: snapshot.project_name.clone(),
                roles: vec![binding.role.clone()],
                risk_level: Severity::High,
                description: format!(
                    "Principal has basic role '{}' ({}) which violates least privilege principle",
                    binding.role, role_name
                ),
            }));
        }
    }
    out
}

/// Joins project IAM policies with instance service accounts. The join runs at
/// `complete`, so the two streams may arrive in any order.
#[derive(Default)]
pub struct OverprivilegedAnalyzer {
    policies: BTreeMap<String, IamPolicySnapshot>,
    accounts: Vec<InstanceAccount>,
}

impl OverprivilegedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    fn violations(&self) -> Vec<OverprivilegedViolation> {
        let mut violations: Vec<_> =
            self.policies.values().flat_map(basic_role_violations).collect();
        for account in &self.accounts {
            if !account.is_default_sa || account.service_account_type != DEFAULT_COMPUTE {
                continue;
            }
            let Some(policy) = self.policies.get(&account.project_id) else { continue };
            let member = format!("serviceAccount:{}", account.service_account_email);
            if policy.grants(&member, ROLE_EDITOR) {
                violations.push(OverprivilegedViolation::DefaultComputeSaEditor(InstanceViolation {
                    account: account.clone(),
                    risk_level: Severity::High,
                    description: "Compute instance uses default service account with Editor role, \
                                  violating least privilege"
                        .to_string(),
                }));
            }
        }
        violations
    }
}

#[async_trait]
impl Link for OverprivilegedAnalyzer {
    fn name(&self) -> &'static str {
        "gcp-overprivileged-principals-analyzer"
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(INPUTS)
    }

    async fn process(&mut self, input: Message, _out: &Outlet) -> Result<()> {
        let Some(record) = input.as_resource() else { return Ok(()) };
        if let Some(snapshot) = policy_snapshot(record) {
            self.policies.insert(snapshot.project_id.clone(), snapshot);
        } else if let Some(account) = InstanceAccount::from_record(record) {
            self.accounts.push(account);
        }
        Ok(())
    }

    async fn complete(&mut self, out: &Outlet) -> Result<()> {
        let violations = self.violations();
        if violations.is_empty() {
            info!("No overprivileged principals found");
            return Ok(());
        }
        let summary = OverprivilegedSummary::from_violations(&violations);
        let risk = max_severity(violations.iter().map(|v| v.risk_level()), Severity::High);
        info!(
            total_violations = summary.total_violations,
            basic_role_violations = summary.basic_role_violations,
            compute_sa_violations = summary.default_compute_sa_violations,
            projects_affected = summary.projects_affected,
            "generated overprivileged principals finding"
        );
        let finding = Finding::new(
            FindingKind::OverprivilegedPrincipals,
            Severity::High,
            "Overprivileged GCP IAM Principals",
            format!(
                "{} overprivileged grants across {} project(s)",
                summary.total_violations, summary.projects_affected
            ),
            Evidence::OverprivilegedPrincipals { violations, summary },
        )
        .with_remediation(
            "Remove basic roles and attach dedicated least-privilege service accounts to compute \
             instances",
        )
        .with_risk_level(risk);
        out.send(finding).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IamBinding;
    use crate::rules::iam_policy::iam_policy_record;
    use serde_json::json;

    const SA: &str = "123-compute@developer.gserviceaccount.com";

    fn account_record() -> Resource {
        let props = crate::record::properties([
            ("instance_id", json!("42")),
            ("instance_name", json!("web-1")),
            ("project_id", json!("alpha")),
            ("zone", json!("us-central1-a")),
            ("service_account_email", json!(SA)),
            ("scopes", json!([])),
            ("is_default_sa", json!(true)),
            ("service_account_type", json!("default-compute")),
        ]);
        Resource::new(SA, "alpha", ResourceType::ServiceAccount, props).unwrap()
    }

    fn policy(role: &str) -> Resource {
        iam_policy_record(&IamPolicySnapshot {
            project_id: "alpha".into(),
            project_name: "alpha".into(),
            bindings: vec![IamBinding {
                role: role.into(),
                members: vec![format!("serviceAccount:{}", SA)],
            }],
            account_ref: "organizations/1".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_join_is_order_independent() {
        let mut analyzer = OverprivilegedAnalyzer::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let out = Outlet::new(tx);
        analyzer.process(account_record().into(), &out).await.unwrap();
        analyzer.process(policy("roles/editor").into(), &out).await.unwrap();
        let violations = analyzer.violations();
        let summary = OverprivilegedSummary::from_violations(&violations);
        assert_eq!(summary.basic_role_violations, 1);
        assert_eq!(summary.default_compute_sa_violations, 1);
        assert_eq!(summary.projects_affected, 1);
    }

    #[tokio::test]
    async fn test_default_sa_without_editor_is_not_flagged() {
        let mut analyzer = OverprivilegedAnalyzer::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        let out = Outlet::new(tx);
        analyzer.process(policy("roles/logging.logWriter").into(), &out).await.unwrap();
        analyzer.process(account_record().into(), &out).await.unwrap();
        assert!(analyzer.violations().is_empty());
    }

    #[test]
    fn test_violation_serializes_with_type_tag() {
        let account = InstanceAccount::from_record(&account_record()).unwrap();
        let v = OverprivilegedViolation::DefaultComputeSaEditor(InstanceViolation {
            account,
            risk_level: Severity::High,
            description: String::new(),
        });
        let value = serde_json::to_value(&v).unwrap();
        assert_eq!(value["violation_type"], "default_compute_sa_editor");
        assert_eq!(value["instance_name"], "web-1");
        assert_eq!(value["risk_level"], "high");
    }
}

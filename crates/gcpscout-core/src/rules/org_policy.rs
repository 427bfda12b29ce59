use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::clients::Policy;
use crate::finding::{max_severity, Evidence, Finding, FindingKind, Severity};
use crate::hierarchy::{listable_project, LIFECYCLE_ACTIVE};
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param, HIERARCHY};
use crate::provider::GcpBase;
use crate::record::{properties, Properties, Resource, ResourceType};

const POLICY_RECORDS: &[ResourceType] =
    &[ResourceType::OrganizationPolicy, ResourceType::FolderPolicy, ResourceType::ProjectPolicy];

/// Secure configuration expected for one constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintBaseline {
    pub constraint: &'static str,
    pub expected_enforced: bool,
    pub allowlist_required: bool,
    pub severity: Severity,
    pub description: &'static str,
    pub rationale: &'static str,
}

impl ConstraintBaseline {
    pub fn id(&self) -> String {
        format!("constraints/{}", self.constraint)
    }
}

pub const BASELINE: &[ConstraintBaseline] = &[
    ConstraintBaseline {
        constraint: "iam.automaticIamGrantsForDefaultServiceAccounts",
        expected_enforced: true,
        allowlist_required: false,
        severity: Severity::High,
        description: "Disable Automatic IAM Grants for Default Service Accounts",
        rationale: "Default service accounts are automatically granted the Editor role, which \
                    violates least privilege principles",
    },
    ConstraintBaseline {
        constraint: "compute.skipDefaultNetworkCreation",
        expected_enforced: true,
        allowlist_required: false,
        severity: Severity::High,
        description: "Skip Default Network Creation",
        rationale: "Default VPC includes permissive firewall rules allowing SSH/RDP from internet",
    },
    ConstraintBaseline {
        constraint: "sql.restrictPublicIp",
        expected_enforced: true,
        allowlist_required: false,
        severity: Severity::Critical,
        description: "Restrict Public IP access on Cloud SQL instances",
        rationale: "Public IP access exposes databases to internet-based attacks",
    },
    ConstraintBaseline {
        constraint: "cloudbuild.useBuildServiceAccount",
        expected_enforced: false,
        allowlist_required: false,
        severity: Severity::High,
        description: "Disable Default Cloud Build Service Account",
        rationale: "Legacy Cloud Build service account has excessive privileges including \
                    arbitrary Storage operations",
    },
    ConstraintBaseline {
        constraint: "cloudbuild.useComputeServiceAccount",
        expected_enforced: false,
        allowlist_required: false,
        severity: Severity::High,
        description: "Disable Compute Engine Service Account by Default (Cloud Build)",
        rationale: "Prevents privilege escalation via Cloud Build using overprivileged Compute \
                    Engine default SA",
    },
    ConstraintBaseline {
        constraint: "iam.disableServiceAccountKeyCreation",
        expected_enforced: true,
        allowlist_required: false,
        severity: Severity::Medium,
        description: "Disable Service Account Key Creation",
        rationale: "Service account keys provide long-term access and are difficult to rotate",
    },
    ConstraintBaseline {
        constraint: "storage.publicAccessPrevention",
        expected_enforced: true,
        allowlist_required: false,
        severity: Severity::Critical,
        description: "Enforce Public Access Prevention",
        rationale:
            "Blocks ACLs and IAM permissions granting access to allUsers/allAuthenticatedUsers",
    },
    ConstraintBaseline {
        constraint: "iam.allowedPolicyMemberDomains",
        expected_enforced: false,
        allowlist_required: true,
        severity: Severity::Medium,
        description: "Domain Restricted Sharing",
        rationale: "Restricts IAM policy members to approved domains, preventing unauthorized \
                    external access",
    },
];

pub fn baseline_for(constraint_id: &str) -> Option<&'static ConstraintBaseline> {
    let short = constraint_id.trim_start_matches("constraints/");
    BASELINE.iter().find(|b| b.constraint == short)
}

/// Properties of an effective policy. The first rule decides `enforced`; a policy with
/// no spec is reported as inherited and not enforced.
pub fn policy_properties(policy: &Policy, constraint_id: &str, resource_name: &str) -> Properties {
    let mut props = properties([
        ("constraintId", json!(constraint_id)),
        ("resourceName", json!(resource_name)),
        ("policyName", json!(policy.name)),
    ]);
    let Some(spec) = &policy.spec else {
        props.insert("inherit".into(), json!(true));
        props.insert("enforced".into(), json!(false));
        return props;
    };
    props.insert("inherit".into(), json!(spec.inherit_from_parent));
    if let Some(rule) = spec.rules.first() {
        props.insert("enforced".into(), json!(rule.enforce.unwrap_or(false)));
        if rule.allow_all == Some(true) {
            props.insert("allowAll".into(), json!(true));
        }
        if rule.deny_all == Some(true) {
            props.insert("denyAll".into(), json!(true));
        }
        if let Some(values) = &rule.values {
            if !values.allowed_values.is_empty() {
                props.insert("allowedValues".into(), json!(values.allowed_values));
            }
            if !values.denied_values.is_empty() {
                props.insert("deniedValues".into(), json!(values.denied_values));
            }
        }
    }
    props
}

/// Policy resource path and record type for a hierarchy node.
fn policy_target(node: &Resource) -> Option<(String, ResourceType)> {
    match node.resource_type {
        ResourceType::Organization => Some((node.name.clone(), ResourceType::OrganizationPolicy)),
        ResourceType::Folder => {
            let active = node
                .prop_str("lifecycleState")
                .map_or(true, |s| s.is_empty() || s == LIFECYCLE_ACTIVE);
            active.then(|| (node.name.clone(), ResourceType::FolderPolicy))
        }
        ResourceType::Project => listable_project(node)
            .map(|id| (format!("projects/{}", id), ResourceType::ProjectPolicy)),
        _ => None,
    }
}

/// Effective policy of every baseline constraint, for each hierarchy node.
#[derive(Default)]
pub struct ConstraintCollector {
    base: GcpBase,
}

impl ConstraintCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ConstraintCollector {
    fn name(&self) -> &'static str {
        "gcp-org-policy-collector"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(HIERARCHY)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(node) = input.as_resource() else { return Ok(()) };
        let Some((resource, kind)) = policy_target(node) else { return Ok(()) };
        let org_policy = &self.base.services()?.org_policy;
        for baseline in BASELINE {
            let constraint_id = baseline.id();
            let effective = org_policy.get_effective_policy(&resource, baseline.constraint).await;
            let policy = match effective {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        resource = %resource,
                        constraint = %constraint_id,
                        error = %format!("{:#}", e),
                        "failed to get effective policy"
                    );
                    continue;
                }
            };
            let mut props = policy_properties(&policy, &constraint_id, &resource);
            let explicit = org_policy.get_policy(&resource, baseline.constraint).await.is_ok();
            props.insert("isExplicitlySet".into(), json!(explicit));
            let name = format!("{}/policies/{}", resource, baseline.constraint);
            match Resource::new(name, &resource, kind, props) {
                Ok(record) => out.send(record).await?,
                Err(e) => warn!(resource = %resource, error = %e, "failed to build policy record"),
            }
        }
        Ok(())
    }
}

/// Result of comparing one policy record against its baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compliance {
    pub is_compliant: bool,
    pub expected: String,
    pub actual: String,
}

fn string_list(record: &Resource, key: &str) -> Vec<String> {
    record
        .prop(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}

pub fn evaluate(record: &Resource, baseline: &ConstraintBaseline) -> Compliance {
    if baseline.allowlist_required {
        let expected = "allowedValues configured with domain restrictions".to_string();
        let allowed = string_list(record, "allowedValues");
        let denied = string_list(record, "deniedValues");
        let (is_compliant, actual) = if !allowed.is_empty() {
            (true, format!("allowedValues={:?}", allowed))
        } else if !denied.is_empty() {
            (true, format!("deniedValues={:?}", denied))
        } else {
            (false, "no domain restrictions configured".to_string())
        };
        return Compliance { is_compliant, expected, actual };
    }
    let enforced = record.prop_bool("enforced").unwrap_or(false);
    Compliance {
        is_compliant: enforced == baseline.expected_enforced,
        expected: format!("enforced={}", baseline.expected_enforced),
        actual: format!("enforced={}", enforced),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstraintViolation {
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub constraint_id: String,
    pub expected_config: String,
    pub actual_config: String,
    pub severity: Severity,
    pub description: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConstraintSummary {
    pub total_violations: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub resources_affected: usize,
}

impl ConstraintSummary {
    pub fn from_violations(violations: &[ConstraintViolation]) -> Self {
        let resources: BTreeSet<&str> =
            violations.iter().map(|v| v.resource_name.as_str()).collect();
        let at = |s: Severity| violations.iter().filter(|v| v.severity == s).count();
        Self {
            total_violations: violations.len(),
            critical: at(Severity::Critical),
            high: at(Severity::High),
            medium: at(Severity::Medium),
            resources_affected: resources.len(),
        }
    }
}

/// Organization policies always count; folder and project policies only when set at
/// that level, so inherited results are not reported once per descendant.
fn reportable(record: &Resource) -> bool {
    record.is(ResourceType::OrganizationPolicy)
        || record.prop_bool("isExplicitlySet").unwrap_or(false)
}

/// Annotates policy records with their compliance and forwards them; non-compliant ones
/// are summarized in one finding at the end.
#[derive(Default)]
pub struct ConstraintAnalyzer {
    violations: Vec<ConstraintViolation>,
}

impl ConstraintAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for ConstraintAnalyzer {
    fn name(&self) -> &'static str {
        "gcp-org-policy-analyzer"
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(POLICY_RECORDS)
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(mut record) = input else { return Ok(()) };
        let constraint_id = record.prop_str("constraintId").unwrap_or_default().to_string();
        let Some(baseline) = baseline_for(&constraint_id) else {
            debug!(constraint = %constraint_id, "no baseline for constraint");
            return Ok(());
        };
        let result = evaluate(&record, baseline);
        record.set("isCompliant", result.is_compliant);
        record.set("expectedConfig", &result.expected);
        record.set("actualConfig", &result.actual);
        record.set("severity", baseline.severity);
        record.set("description", baseline.description);
        record.set("rationale", baseline.rationale);
        if !result.is_compliant && reportable(&record) {
            self.violations.push(ConstraintViolation {
                resource_type: record.resource_type,
                resource_name: record.account_ref.clone(),
                constraint_id,
                expected_config: result.expected,
                actual_config: result.actual,
                severity: baseline.severity,
                description: baseline.description.to_string(),
                rationale: baseline.rationale.to_string(),
            });
        }
        out.send(record).await
    }

    async fn complete(&mut self, out: &Outlet) -> Result<()> {
        if self.violations.is_empty() {
            info!("All organization policy constraints compliant");
            return Ok(());
        }
        let violations = std::mem::take(&mut self.violations);
        let summary = ConstraintSummary::from_violations(&violations);
        info!(
            total_violations = summary.total_violations,
            resources_affected = summary.resources_affected,
            "generated org policy finding"
        );
        let severity = max_severity(violations.iter().map(|v| v.severity), Severity::Medium);
        let finding = Finding::new(
            FindingKind::OrgPolicyConstraints,
            severity,
            "GCP Organization Policy Constraints Not Enforced",
            format!(
                "{} security constraints deviate from the secure baseline across {} resource(s)",
                summary.total_violations, summary.resources_affected
            ),
            Evidence::OrgPolicyConstraints { violations, summary },
        )
        .with_remediation(
            "Set the listed constraints at the organization level and avoid weaker overrides on \
             folders and projects",
        );
        out.send(finding).await
    }
}

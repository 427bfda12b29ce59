use serde::{Deserialize, Serialize};
use std::fmt;

use crate::rules::default_sa::{DefaultSaSummary, DefaultSaViolation};
use crate::rules::org_policy::{ConstraintSummary, ConstraintViolation};
use crate::rules::overprivileged::{OverprivilegedSummary, OverprivilegedViolation};
use crate::rules::primitive_roles::{RoleSummary, RoleViolation};
use crate::rules::subdomain_takeover::TakeoverEvidence;

/// Severity of a finding; ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn priority(&self) -> u8 {
        match self {
            Severity::Critical => 5,
            Severity::High => 4,
            Severity::Medium => 3,
            Severity::Low => 2,
            Severity::Informational => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Informational => "informational",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::High => "HIGH",
            Severity::Medium => "MEDIUM",
            Severity::Low => "LOW",
            Severity::Informational => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "informational" | "info" => Some(Severity::Informational),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    PrimitiveRoles,
    DefaultServiceAccounts,
    OverprivilegedPrincipals,
    OrgPolicyConstraints,
    SubdomainTakeover,
}

impl FindingKind {
    pub fn label(&self) -> &'static str {
        match self {
            FindingKind::PrimitiveRoles => "Primitive IAM Roles",
            FindingKind::DefaultServiceAccounts => "Default Service Accounts",
            FindingKind::OverprivilegedPrincipals => "Overprivileged Principals",
            FindingKind::OrgPolicyConstraints => "Organization Policy Constraints",
            FindingKind::SubdomainTakeover => "Subdomain Takeover",
        }
    }
}

/// Typed evidence carried by a finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    PrimitiveRoles {
        violations: Vec<RoleViolation>,
        summary: RoleSummary,
    },
    DefaultServiceAccounts {
        violations: Vec<DefaultSaViolation>,
        summary: DefaultSaSummary,
    },
    OverprivilegedPrincipals {
        violations: Vec<OverprivilegedViolation>,
        summary: OverprivilegedSummary,
    },
    OrgPolicyConstraints {
        violations: Vec<ConstraintViolation>,
        summary: ConstraintSummary,
    },
    SubdomainTakeover(TakeoverEvidence),
}

impl Evidence {
    pub fn violation_count(&self) -> usize {
        match self {
            Evidence::PrimitiveRoles { violations, .. } => violations.len(),
            Evidence::DefaultServiceAccounts { violations, .. } => violations.len(),
            Evidence::OverprivilegedPrincipals { violations, .. } => violations.len(),
            Evidence::OrgPolicyConstraints { violations, .. } => violations.len(),
            Evidence::SubdomainTakeover(_) => 1,
        }
    }
}

/// A security finding, emitted by a rule or analyzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub title: String,
    pub severity: Severity,
    pub risk_level: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_ref: Option<String>,
    pub evidence: Evidence,
}

impl Finding {
    pub fn new(
        kind: FindingKind,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            severity,
            risk_level: severity,
            description: description.into(),
            remediation: None,
            principal: None,
            resource: None,
            account_ref: None,
            evidence,
        }
    }

    pub fn with_risk_level(mut self, risk: Severity) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_account(mut self, account_ref: impl Into<String>) -> Self {
        self.account_ref = Some(account_ref.into());
        self
    }
}

/// Highest severity in `levels`, or `fallback` when empty.
pub fn max_severity(levels: impl IntoIterator<Item = Severity>, fallback: Severity) -> Severity {
    levels.into_iter().max().unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_serde() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Informational);
        assert_eq!(serde_json::to_string(&Severity::Informational).unwrap(), "\"informational\"");
        assert_eq!(Severity::parse("HIGH"), Some(Severity::High));
        assert_eq!(Severity::parse("info"), Some(Severity::Informational));
        assert_eq!(Severity::parse("urgent"), None);
    }

    #[test]
    fn test_max_severity() {
        assert_eq!(max_severity([Severity::Medium, Severity::High], Severity::Low), Severity::High);
        assert_eq!(max_severity([], Severity::Low), Severity::Low);
    }
}

//! Anonymous-access extraction from IAM policies and legacy ACLs.

use serde::{Deserialize, Serialize};

use crate::clients::storage::BucketAccessControl;
use crate::clients::IamPolicy;
use crate::finding::Severity;
use crate::record::{Principal, Resource};

pub const ACCESS_IAM: &str = "IAM";
pub const ACCESS_ACL: &str = "ACL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousAccessInfo {
    pub has_all_users: bool,
    pub has_all_authenticated_users: bool,
    pub all_users_roles: Vec<String>,
    pub all_authenticated_users_roles: Vec<String>,
    pub total_public_bindings: usize,
    pub access_methods: Vec<String>,
}

impl AnonymousAccessInfo {
    pub fn is_public(&self) -> bool {
        self.has_all_users || self.has_all_authenticated_users
    }

    /// Critical for `allUsers`, high for `allAuthenticatedUsers` only, low otherwise.
    pub fn risk_level(&self) -> Severity {
        if self.has_all_users {
            Severity::Critical
        } else if self.has_all_authenticated_users {
            Severity::High
        } else {
            Severity::Low
        }
    }

    fn add_method(&mut self, method: &str) {
        if !self.access_methods.iter().any(|m| m == method) {
            self.access_methods.push(method.to_string());
        }
    }

    fn grant(&mut self, principal: &Principal, role: &str, method: &str) -> bool {
        let roles = match principal {
            Principal::AllUsers => {
                self.has_all_users = true;
                &mut self.all_users_roles
            }
            Principal::AllAuthenticatedUsers => {
                self.has_all_authenticated_users = true;
                &mut self.all_authenticated_users_roles
            }
            _ => return false,
        };
        if !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
        self.total_public_bindings += 1;
        self.add_method(method);
        true
    }

    /// Fold the public bindings of an IAM policy in.
    pub fn add_policy(&mut self, policy: &IamPolicy) {
        for binding in &policy.bindings {
            for member in &binding.members {
                self.grant(&Principal::parse(member), &binding.role, ACCESS_IAM);
            }
        }
    }

    /// Fold public ACL entries in (`allUsers` / `allAuthenticatedUsers` entities).
    pub fn add_acl(&mut self, acl: &[BucketAccessControl]) {
        for entry in acl {
            self.grant(&Principal::parse(&entry.entity), &entry.role, ACCESS_ACL);
        }
    }

    pub fn from_policy(policy: &IamPolicy) -> Self {
        let mut info = Self::default();
        info.add_policy(policy);
        info
    }

    /// Attach `anonymousAccessInfo`, `riskLevel` and, when public, `isPublic`.
    pub fn annotate(&self, record: &mut Resource) {
        record.set("anonymousAccessInfo", self);
        record.set("riskLevel", self.risk_level());
        if self.is_public() {
            record.set("isPublic", true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_users_viewer_binding() {
        let policy = IamPolicy {
            bindings: vec![IamPolicy::binding("roles/storage.objectViewer", &["allUsers"])],
            ..Default::default()
        };
        let info = AnonymousAccessInfo::from_policy(&policy);
        assert!(info.has_all_users);
        assert!(!info.has_all_authenticated_users);
        assert_eq!(info.all_users_roles, vec!["roles/storage.objectViewer"]);
        assert_eq!(info.total_public_bindings, 1);
        assert_eq!(info.access_methods, vec!["IAM"]);
        assert_eq!(info.risk_level(), Severity::Critical);
    }

    #[test]
    fn test_authenticated_users_through_acl_is_high() {
        let mut info = AnonymousAccessInfo::default();
        info.add_acl(&[
            BucketAccessControl { entity: "allAuthenticatedUsers".into(), role: "READER".into() },
            BucketAccessControl { entity: "user-a@x.com".into(), role: "OWNER".into() },
        ]);
        assert!(info.is_public());
        assert_eq!(info.risk_level(), Severity::High);
        assert_eq!(info.access_methods, vec!["ACL"]);
        assert_eq!(info.total_public_bindings, 1);
    }

    #[test]
    fn test_private_policy_is_low() {
        let policy = IamPolicy {
            bindings: vec![IamPolicy::binding("roles/storage.admin", &["user:a@x.com"])],
            ..Default::default()
        };
        let info = AnonymousAccessInfo::from_policy(&policy);
        assert!(!info.is_public());
        assert_eq!(info.risk_level(), Severity::Low);
        assert!(info.access_methods.is_empty());
    }

    #[test]
    fn test_serialized_keys() {
        let info = AnonymousAccessInfo { has_all_users: true, ..Default::default() };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["hasAllUsers"], true);
        assert!(v.get("totalPublicBindings").is_some());
    }
}

use serde::{Deserialize, Serialize};

/// One role binding in a project IAM policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamBinding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Point-in-time copy of a project's IAM policy, carried under `policy_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamPolicySnapshot {
    pub project_id: String,
    pub project_name: String,
    #[serde(default)]
    pub bindings: Vec<IamBinding>,
    pub account_ref: String,
}

impl IamPolicySnapshot {
    /// Roles granted to an exact member string.
    pub fn roles_for<'a>(&'a self, member: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.bindings
            .iter()
            .filter(move |b| b.members.iter().any(|m| m == member))
            .map(|b| b.role.as_str())
    }

    pub fn grants(&self, member: &str, role: &str) -> bool {
        self.roles_for(member).any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_matches_exact_member() {
        let snap = IamPolicySnapshot {
            project_id: "alpha".into(),
            project_name: "Alpha".into(),
            bindings: vec![
                IamBinding {
                    role: "roles/editor".into(),
                    members: vec!["serviceAccount:a@x".into()],
                },
                IamBinding { role: "roles/viewer".into(), members: vec!["user:b@x".into()] },
            ],
            account_ref: "organizations/1".into(),
        };
        assert!(snap.grants("serviceAccount:a@x", "roles/editor"));
        assert!(!snap.grants("serviceAccount:a@x", "roles/viewer"));
        assert_eq!(snap.roles_for("user:b@x").collect::<Vec<_>>(), vec!["roles/viewer"]);
    }
}

//! Security rules. Stateful analyzers accumulate over the whole input stream and emit a
//! single finding from `complete`, and only when something was found.

pub mod anonymous;
pub mod default_sa;
pub mod iam_policy;
pub mod org_policy;
pub mod overprivileged;
pub mod primitive_roles;
pub mod subdomain_takeover;

use crate::finding::Severity;

pub use anonymous::AnonymousAccessInfo;
pub use default_sa::DefaultServiceAccountAnalyzer;
pub use iam_policy::{iam_policy_record, policy_snapshot, ProjectIamPolicy};
pub use org_policy::{ConstraintAnalyzer, ConstraintCollector, BASELINE};
pub use overprivileged::OverprivilegedAnalyzer;
pub use primitive_roles::PrimitiveRolesAnalyzer;
pub use subdomain_takeover::SubdomainTakeoverAnalyzer;

pub const ROLE_OWNER: &str = "roles/owner";
pub const ROLE_EDITOR: &str = "roles/editor";
pub const ROLE_VIEWER: &str = "roles/viewer";

/// Legacy broad roles and their display names.
pub const BASIC_ROLES: &[(&str, &str)] =
    &[(ROLE_OWNER, "Owner"), (ROLE_EDITOR, "Editor"), (ROLE_VIEWER, "Viewer")];

pub fn basic_role_name(role: &str) -> Option<&'static str> {
    BASIC_ROLES.iter().find(|(r, _)| *r == role).map(|(_, name)| *name)
}

/// Owner and editor are high, viewer medium, anything else low.
pub fn basic_role_risk(role: &str) -> Severity {
    match role {
        ROLE_OWNER | ROLE_EDITOR => Severity::High,
        ROLE_VIEWER => Severity::Medium,
        _ => Severity::Low,
    }
}

/// The one principal every violation names, if there is exactly one.
pub(crate) fn sole_principal<'a>(principals: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut iter = principals.into_iter();
    let first = iter.next()?;
    iter.all(|p| p == first).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sole_principal() {
        assert_eq!(sole_principal(["user:a", "user:a"]), Some("user:a"));
        assert_eq!(sole_principal(["user:a", "user:b"]), None);
        assert_eq!(sole_principal(std::iter::empty()), None);
    }


    #[test]
    fn test_basic_role_table() {
        assert_eq!(basic_role_name("roles/editor"), Some("Editor"));
        assert_eq!(basic_role_name("roles/storage.admin"), None);
        assert_eq!(basic_role_risk("roles/owner"), Severity::High);
        assert_eq!(basic_role_risk("roles/viewer"), Severity::Medium);
        assert_eq!(basic_role_risk("roles/browser"), Severity::Low);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

const COMPUTE_DEFAULT_SUFFIX: &str = "-compute@developer.gserviceaccount.com";
const APPENGINE_DEFAULT_SUFFIX: &str = "@appspot.gserviceaccount.com";

/// An IAM member string, split into its kind and identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    User(String),
    ServiceAccount(String),
    Group(String),
    Domain(String),
    AllUsers,
    AllAuthenticatedUsers,
    Other(String),
}

impl Principal {
    pub fn parse(member: &str) -> Principal {
        match member {
            "allUsers" => return Principal::AllUsers,
            "allAuthenticatedUsers" => return Principal::AllAuthenticatedUsers,
            _ => {}
        }
        if let Some(v) = member.strip_prefix("user:") {
            Principal::User(v.to_string())
        } else if let Some(v) = member.strip_prefix("serviceAccount:") {
            Principal::ServiceAccount(v.to_string())
        } else if let Some(v) = member.strip_prefix("group:") {
            Principal::Group(v.to_string())
        } else if let Some(v) = member.strip_prefix("domain:") {
            Principal::Domain(v.to_string())
        } else {
            Principal::Other(member.to_string())
        }
    }

    /// Category reported in violations.
    pub fn kind(&self) -> &'static str {
        match self {
            Principal::User(_) => "user",
            Principal::ServiceAccount(_) => "service_account",
            Principal::Group(_) => "group",
            Principal::Domain(_) => "domain",
            Principal::AllUsers | Principal::AllAuthenticatedUsers => "public",
            Principal::Other(_) => "unknown",
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Principal::AllUsers | Principal::AllAuthenticatedUsers)
    }

    pub fn service_account_email(&self) -> Option<&str> {
        match self {
            Principal::ServiceAccount(email) => Some(email),
            _ => None,
        }
    }

    pub fn default_service_account(&self) -> Option<DefaultServiceAccount> {
        self.service_account_email().and_then(DefaultServiceAccount::classify)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::User(v) => write!(f, "user:{}", v),
            Principal::ServiceAccount(v) => write!(f, "serviceAccount:{}", v),
            Principal::Group(v) => write!(f, "group:{}", v),
            Principal::Domain(v) => write!(f, "domain:{}", v),
            Principal::AllUsers => f.write_str("allUsers"),
            Principal::AllAuthenticatedUsers => f.write_str("allAuthenticatedUsers"),
            Principal::Other(v) => f.write_str(v),
        }
    }
}

/// Auto-created service accounts recognised by email suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DefaultServiceAccount {
    #[serde(rename = "compute-default")]
    Compute,
    #[serde(rename = "appengine-default")]
    AppEngine,
}

impl DefaultServiceAccount {
    pub fn classify(email: &str) -> Option<DefaultServiceAccount> {
        if email.ends_with(COMPUTE_DEFAULT_SUFFIX) {
            Some(DefaultServiceAccount::Compute)
        } else if email.ends_with(APPENGINE_DEFAULT_SUFFIX) {
            Some(DefaultServiceAccount::AppEngine)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DefaultServiceAccount::Compute => "compute-default",
            DefaultServiceAccount::AppEngine => "appengine-default",
        }
    }

    /// Label used on instance service-account records.
    pub fn instance_label(&self) -> &'static str {
        match self {
            DefaultServiceAccount::Compute => "default-compute",
            DefaultServiceAccount::AppEngine => "default-appengine",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_kinds() {
        assert_eq!(Principal::parse("user:a@x.com").kind(), "user");
        assert_eq!(
            Principal::parse("serviceAccount:b@x.iam.gserviceaccount.com").kind(),
            "service_account"
        );
        assert_eq!(Principal::parse("group:g@x.com").kind(), "group");
        assert_eq!(Principal::parse("domain:x.com").kind(), "domain");
        assert_eq!(Principal::parse("allUsers").kind(), "public");
        assert_eq!(Principal::parse("allAuthenticatedUsers").kind(), "public");
        assert_eq!(Principal::parse("projectOwner:alpha").kind(), "unknown");
    }

    #[test]
    fn test_display_round_trips() {
        for m in ["user:a@x.com", "serviceAccount:s@x", "allUsers", "projectOwner:alpha"] {
            assert_eq!(Principal::parse(m).to_string(), m);
        }
    }

    #[test]
    fn test_default_service_account_suffixes() {
        assert_eq!(
            DefaultServiceAccount::classify("123-compute@developer.gserviceaccount.com"),
            Some(DefaultServiceAccount::Compute)
        );
        assert_eq!(
            DefaultServiceAccount::classify("alpha@appspot.gserviceaccount.com"),
            Some(DefaultServiceAccount::AppEngine)
        );
        assert_eq!(DefaultServiceAccount::classify("svc@alpha.iam.gserviceaccount.com"), None);
        assert_eq!(
            Principal::parse("serviceAccount:9-compute@developer.gserviceaccount.com")
                .default_service_account(),
            Some(DefaultServiceAccount::Compute)
        );
        let user = Principal::parse("user:9-compute@developer.gserviceaccount.com");
        assert_eq!(user.default_service_account(), None);
    }
}

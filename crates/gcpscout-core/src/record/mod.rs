pub mod np;
pub mod policy;
pub mod principal;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::ReconError;

pub use np::{ImageRef, NpInput, ObjectRef, Provenance};
pub use policy::{IamBinding, IamPolicySnapshot};
pub use principal::{DefaultServiceAccount, Principal};

pub const PROVIDER_GCP: &str = "gcp";

/// Free-form provider fields attached to a record. Ordered so that two runs over the
/// same snapshot serialize identically.
pub type Properties = BTreeMap<String, Value>;

/// Closed set of record kinds flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "cloudresourcemanager.googleapis.com/Organization")]
    Organization,
    #[serde(rename = "cloudresourcemanager.googleapis.com/Folder")]
    Folder,
    #[serde(rename = "cloudresourcemanager.googleapis.com/Project")]
    Project,
    #[serde(rename = "storage.googleapis.com/Bucket")]
    Bucket,
    #[serde(rename = "sqladmin.googleapis.com/Instance")]
    SqlInstance,
    #[serde(rename = "compute.googleapis.com/Instance")]
    ComputeInstance,
    #[serde(rename = "cloudfunctions.googleapis.com/CloudFunction")]
    Function,
    #[serde(rename = "run.googleapis.com/Service")]
    RunService,
    #[serde(rename = "appengine.googleapis.com/Version")]
    AppEngineApp,
    #[serde(rename = "artifactregistry.googleapis.com/DockerImage")]
    ContainerImage,
    #[serde(rename = "artifactregistry.googleapis.com/Repository")]
    ArtifactRepo,
    #[serde(rename = "dns.googleapis.com/ManagedZone")]
    DnsManagedZone,
    #[serde(rename = "compute.googleapis.com/ForwardingRule")]
    ForwardingRule,
    #[serde(rename = "compute.googleapis.com/GlobalForwardingRule")]
    GlobalForwardingRule,
    #[serde(rename = "compute.googleapis.com/Address")]
    Address,
    #[serde(rename = "compute.googleapis.com/GlobalAddress")]
    GlobalAddress,
    #[serde(rename = "firebasehosting.googleapis.com/Site")]
    FirebaseHostingSite,
    #[serde(rename = "IAMPolicy")]
    IamPolicy,
    #[serde(rename = "orgpolicy.googleapis.com/OrganizationPolicy")]
    OrganizationPolicy,
    #[serde(rename = "orgpolicy.googleapis.com/FolderPolicy")]
    FolderPolicy,
    #[serde(rename = "orgpolicy.googleapis.com/ProjectPolicy")]
    ProjectPolicy,
    #[serde(rename = "iam.googleapis.com/ServiceAccount")]
    ServiceAccount,
    #[serde(rename = "finding")]
    Finding,
}

impl ResourceType {
    pub const ALL: &'static [ResourceType] = &[
        ResourceType::Organization,
        ResourceType::Folder,
        ResourceType::Project,
        ResourceType::Bucket,
        ResourceType::SqlInstance,
        ResourceType::ComputeInstance,
        ResourceType::Function,
        ResourceType::RunService,
        ResourceType::AppEngineApp,
        ResourceType::ContainerImage,
        ResourceType::ArtifactRepo,
        ResourceType::DnsManagedZone,
        ResourceType::ForwardingRule,
        ResourceType::GlobalForwardingRule,
        ResourceType::Address,
        ResourceType::GlobalAddress,
        ResourceType::FirebaseHostingSite,
        ResourceType::IamPolicy,
        ResourceType::OrganizationPolicy,
        ResourceType::FolderPolicy,
        ResourceType::ProjectPolicy,
        ResourceType::ServiceAccount,
        ResourceType::Finding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Organization => "cloudresourcemanager.googleapis.com/Organization",
            ResourceType::Folder => "cloudresourcemanager.googleapis.com/Folder",
            ResourceType::Project => "cloudresourcemanager.googleapis.com/Project",
            ResourceType::Bucket => "storage.googleapis.com/Bucket",
            ResourceType::SqlInstance => "sqladmin.googleapis.com/Instance",
            ResourceType::ComputeInstance => "compute.googleapis.com/Instance",
            ResourceType::Function => "cloudfunctions.googleapis.com/CloudFunction",
            ResourceType::RunService => "run.googleapis.com/Service",
            ResourceType::AppEngineApp => "appengine.googleapis.com/Version",
            ResourceType::ContainerImage => "artifactregistry.googleapis.com/DockerImage",
            ResourceType::ArtifactRepo => "artifactregistry.googleapis.com/Repository",
            ResourceType::DnsManagedZone => "dns.googleapis.com/ManagedZone",
            ResourceType::ForwardingRule => "compute.googleapis.com/ForwardingRule",
            ResourceType::GlobalForwardingRule => "compute.googleapis.com/GlobalForwardingRule",
            ResourceType::Address => "compute.googleapis.com/Address",
            ResourceType::GlobalAddress => "compute.googleapis.com/GlobalAddress",
            ResourceType::FirebaseHostingSite => "firebasehosting.googleapis.com/Site",
            ResourceType::IamPolicy => "IAMPolicy",
            ResourceType::OrganizationPolicy => "orgpolicy.googleapis.com/OrganizationPolicy",
            ResourceType::FolderPolicy => "orgpolicy.googleapis.com/FolderPolicy",
            ResourceType::ProjectPolicy => "orgpolicy.googleapis.com/ProjectPolicy",
            ResourceType::ServiceAccount => "iam.googleapis.com/ServiceAccount",
            ResourceType::Finding => "finding",
        }
    }

    pub fn from_type_str(s: &str) -> Option<ResourceType> {
        ResourceType::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Short label used in console tables.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceType::Organization => "Organization",
            ResourceType::Folder => "Folder",
            ResourceType::Project => "Project",
            ResourceType::Bucket => "Storage Bucket",
            ResourceType::SqlInstance => "SQL Instance",
            ResourceType::ComputeInstance => "Compute Instance",
            ResourceType::Function => "Cloud Function",
            ResourceType::RunService => "Cloud Run Service",
            ResourceType::AppEngineApp => "App Engine Version",
            ResourceType::ContainerImage => "Container Image",
            ResourceType::ArtifactRepo => "Artifact Repository",
            ResourceType::DnsManagedZone => "DNS Managed Zone",
            ResourceType::ForwardingRule => "Forwarding Rule",
            ResourceType::GlobalForwardingRule => "Global Forwarding Rule",
            ResourceType::Address => "Address",
            ResourceType::GlobalAddress => "Global Address",
            ResourceType::FirebaseHostingSite => "Firebase Hosting Site",
            ResourceType::IamPolicy => "IAM Policy",
            ResourceType::OrganizationPolicy => "Organization Policy",
            ResourceType::FolderPolicy => "Folder Policy",
            ResourceType::ProjectPolicy => "Project Policy",
            ResourceType::ServiceAccount => "Service Account",
            ResourceType::Finding => "Finding",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform record for hierarchy nodes and cloud resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub provider: String,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    pub account_ref: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Resource {
    pub fn new(
        name: impl Into<String>,
        account_ref: impl Into<String>,
        resource_type: ResourceType,
        properties: Properties,
    ) -> Result<Self, ReconError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ReconError::InvalidRecord(format!(
                "{} record requires a non-empty name",
                resource_type.label()
            )));
        }
        Ok(Self {
            name,
            display_name: None,
            provider: PROVIDER_GCP.to_string(),
            resource_type,
            region: String::new(),
            account_ref: account_ref.into(),
            properties,
        })
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        if !display_name.is_empty() {
            self.display_name = Some(display_name);
        }
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Insert a property. Values that fail to serialize are dropped.
    pub fn set(&mut self, key: &str, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.properties.insert(key.to_string(), v);
        }
    }

    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    pub fn prop_bool(&self, key: &str) -> Option<bool> {
        self.properties.get(key).and_then(Value::as_bool)
    }

    /// The display name when the provider supplied one, otherwise the record name.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is(&self, resource_type: ResourceType) -> bool {
        self.resource_type == resource_type
    }
}

/// Build a property map from literal pairs, skipping null values.
pub fn properties<I, K>(pairs: I) -> Properties
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.into(), v))
        .collect()
}

/// Scope kind selected by a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Org,
    Folder,
    Project,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Org => "org",
            ScopeKind::Folder => "folder",
            ScopeKind::Project => "project",
        }
    }
}

/// Root of a traversal; set once during router initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(rename = "type")]
    pub kind: ScopeKind,
    pub value: String,
}

impl ScopeConfig {
    /// Parse the three mutually exclusive scope arguments.
    pub fn from_lists(
        orgs: &[String],
        folders: &[String],
        projects: &[String],
    ) -> Result<Self, ReconError> {
        let mut selected = Vec::new();
        for (flag, kind, values) in [
            ("--org", ScopeKind::Org, orgs),
            ("--folder", ScopeKind::Folder, folders),
            ("--project", ScopeKind::Project, projects),
        ] {
            match values {
                [] => {}
                [v] => selected.push(ScopeConfig { kind, value: v.clone() }),
                _ => {
                    return Err(ReconError::InvalidScope(format!(
                        "{} accepts a single value (got {}: {})",
                        flag,
                        values.len(),
                        values.join(", ")
                    )))
                }
            }
        }
        match selected.len() {
            0 => Err(ReconError::InvalidScope(
                "must provide exactly one of --org, --folder, or --project".to_string(),
            )),
            1 => Ok(selected.remove(0)),
            n => Err(ReconError::InvalidScope(format!(
                "must provide exactly one of --org, --folder, or --project (got {})",
                n
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_name_rejected() {
        let err = Resource::new("  ", "p", ResourceType::Bucket, Properties::new()).unwrap_err();
        assert!(err.to_string().contains("non-empty name"));
    }

    #[test]
    fn test_resource_type_round_trips_through_str() {
        for t in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_str(t.as_str()), Some(*t));
        }
        assert_eq!(ResourceType::from_type_str("nope"), None);
    }

    #[test]
    fn test_serialized_field_names() {
        let mut r = Resource::new("b1", "alpha", ResourceType::Bucket, Properties::new())
            .unwrap()
            .with_display_name("Bucket One");
        r.set("publicURL", "https://storage.googleapis.com/b1");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["resourceType"], json!("storage.googleapis.com/Bucket"));
        assert_eq!(v["accountRef"], json!("alpha"));
        assert_eq!(v["displayName"], json!("Bucket One"));
        assert_eq!(v["properties"]["publicURL"], json!("https://storage.googleapis.com/b1"));
        assert!(v.get("region").is_none());
    }

    #[test]
    fn test_properties_helper_drops_nulls() {
        let p = properties([("a", json!(1)), ("b", Value::Null)]);
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_scope_requires_exactly_one() {
        let none = ScopeConfig::from_lists(&[], &[], &[]).unwrap_err();
        assert_eq!(
            none.to_string(),
            "must provide exactly one of --org, --folder, or --project"
        );

        let two = ScopeConfig::from_lists(&["1".into()], &[], &["p".into()]).unwrap_err();
        assert_eq!(
            two.to_string(),
            "must provide exactly one of --org, --folder, or --project (got 2)"
        );

        let one = ScopeConfig::from_lists(&[], &["folders/9".into()], &[]).unwrap();
        assert_eq!(one.kind, ScopeKind::Folder);
        assert_eq!(one.value, "folders/9");
    }

    #[test]
    fn test_scope_rejects_repeated_values() {
        let err = ScopeConfig::from_lists(&[], &[], &["alpha".into(), "beta".into()]).unwrap_err();
        assert_eq!(err.to_string(), "--project accepts a single value (got 2: alpha, beta)");
    }
}

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A listing failure, emitted on the same stream as resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceError {
    pub timestamp: String,
    pub project: String,
    pub resource_type: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ResourceError {
    pub fn new(project: &str, resource_type: &str, operation: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            project: project.to_string(),
            resource_type: resource_type.to_string(),
            operation: operation.to_string(),
            error_code: None,
            error_message: message.to_string(),
            details: None,
        }
    }

    pub fn with_error_code(mut self, code: u16) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Permission verb to the resource family it gates. Order matters: the first match wins.
const PERMISSION_FAMILIES: &[(&str, &str)] = &[
    ("storage.buckets.list", "storage.buckets"),
    ("cloudsql.instances.list", "sql.instances"),
    ("compute.instances.list", "compute.instances"),
    ("compute.zones.list", "compute.zones"),
    ("compute.regions.list", "compute.regions"),
    ("compute.globalForwardingRules.list", "compute.globalForwardingRules"),
    ("compute.forwardingRules.list", "compute.forwardingRules"),
    ("compute.globalAddresses.list", "compute.globalAddresses"),
    ("compute.addresses.list", "compute.addresses"),
    ("cloudfunctions.functions.list", "cloudfunctions.functions"),
    ("run.services.list", "run.services"),
    ("appengine.applications.get", "appengine.applications"),
    ("artifactregistry.repositories.list", "artifactregistry.repositories"),
    ("dns.managedZones.list", "dns.managedZones"),
    ("firebasehosting.sites.list", "firebasehosting.sites"),
];

fn family_by_permission(line: &str) -> Option<&'static str> {
    PERMISSION_FAMILIES
        .iter()
        .find(|(perm, _)| line.contains(perm))
        .map(|(_, family)| *family)
}

/// Fall back to the service prefix of each permission (`storage`, `compute`, ...). The
/// prefix must appear as a whole token, as in `run.googleapis.com` or `compute forbidden`.
fn family_by_service(line: &str) -> Option<&'static str> {
    let tokens: Vec<&str> = line
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    PERMISSION_FAMILIES
        .iter()
        .find(|(perm, _)| {
            let service = perm.split('.').next().unwrap_or_default();
            !service.is_empty() && tokens.contains(&service)
        })
        .map(|(_, family)| *family)
}

/// Split an aggregated listing error into one structured record per classified line.
pub fn parse_aggregated_list_error(project: &str, text: &str) -> Vec<ResourceError> {
    let mut out = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record = if line.contains("does not have") && line.contains("access") {
            let family = family_by_permission(line)
                .or_else(|| family_by_service(line))
                .unwrap_or("unknown");
            Some(
                ResourceError::new(project, family, "list", "Permission denied")
                    .with_error_code(403),
            )
        } else if line.contains("API has not been used") || line.contains("SERVICE_DISABLED") {
            family_by_service(line).map(|family| {
                ResourceError::new(project, family, "list", "API disabled").with_error_code(403)
            })
        } else if line.contains("was not found") {
            Some(
                ResourceError::new(project, "unknown", "list", "Resource not found")
                    .with_error_code(404),
            )
        } else if line.contains("Error 403") || line.contains("Error 404") {
            let (code, message) = if line.contains("Error 403") {
                (403, "Forbidden")
            } else {
                (404, "Not found")
            };
            let family = family_by_service(line).unwrap_or("unknown");
            Some(ResourceError::new(project, family, "list", message).with_error_code(code))
        } else {
            None
        };

        if let Some(record) = record {
            out.push(record.with_details(line));
        }
    }

    out
}

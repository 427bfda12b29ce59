//! User-facing resource type aliases accepted by `--type`.

use std::collections::BTreeSet;

use crate::errors::ReconError;
use crate::record::ResourceType;

/// Keyword that disables type filtering.
pub const ALL_TYPES: &str = "all";

/// Aliases understood by the resource listing modules.
pub const LIST_ALIASES: &[(ResourceType, &[&str])] = &[
    (ResourceType::Bucket, &["bucket"]),
    (ResourceType::SqlInstance, &["sql", "sqlinstance"]),
    (ResourceType::ComputeInstance, &["vm", "instance"]),
    (ResourceType::ForwardingRule, &["forwardingrule"]),
    (ResourceType::GlobalForwardingRule, &["globalforwardingrule", "globalforwarding"]),
    (ResourceType::DnsManagedZone, &["dnszone", "managedzone"]),
    (ResourceType::Address, &["address"]),
    (ResourceType::GlobalAddress, &["globaladdress"]),
    (ResourceType::Function, &["function", "functionv2", "functionv1", "cloudfunction"]),
    (ResourceType::RunService, &["runservice", "cloudrunservice"]),
    (ResourceType::AppEngineApp, &["appengineservice", "appengine"]),
    (ResourceType::ArtifactRepo, &["artifactrepo"]),
    (ResourceType::ContainerImage, &["containerimage", "dockerimage", "artifactoryimage"]),
    (ResourceType::FirebaseHostingSite, &["firebase", "hostingsite", "firebasehosting"]),
    (ResourceType::Project, &["project"]),
    (ResourceType::Folder, &["folder"]),
    (ResourceType::Organization, &["organization", "org"]),
];

/// Aliases understood by the secrets modules; only types with secret-bearing content.
pub const SECRETS_ALIASES: &[(ResourceType, &[&str])] = &[
    (ResourceType::Bucket, &["bucket"]),
    (ResourceType::ComputeInstance, &["vm", "instance"]),
    (ResourceType::Function, &["function", "functionv2", "functionv1", "cloudfunction"]),
    (ResourceType::RunService, &["runservice", "cloudrunservice"]),
    (ResourceType::AppEngineApp, &["appengineservice", "appengine"]),
    (ResourceType::ContainerImage, &["containerimage", "dockerimage", "artifactoryimage"]),
];

fn table(secrets: bool) -> &'static [(ResourceType, &'static [&'static str])] {
    if secrets {
        SECRETS_ALIASES
    } else {
        LIST_ALIASES
    }
}

/// Resolve one alias (or canonical type string) case-insensitively.
pub fn lookup(name: &str, secrets: bool) -> Result<ResourceType, ReconError> {
    let wanted = name.trim().to_lowercase();
    for (kind, aliases) in table(secrets) {
        if aliases.iter().any(|a| *a == wanted) || kind.as_str().eq_ignore_ascii_case(&wanted) {
            return Ok(*kind);
        }
    }
    Err(ReconError::UnsupportedResourceType {
        name: name.trim().to_string(),
        secrets,
        suggestion: suggest(&wanted, secrets),
    })
}

/// Closest known alias by normalized Levenshtein similarity, if any is reasonably close.
fn suggest(wanted: &str, secrets: bool) -> Option<String> {
    table(secrets)
        .iter()
        .flat_map(|(_, aliases)| aliases.iter())
        .map(|alias| (alias, strsim::normalized_levenshtein(wanted, alias)))
        .filter(|(_, score)| *score >= 0.5)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(alias, _)| alias.to_string())
}

/// Resolve a `--type` list. `None` means every type; `all` anywhere in the list wins.
pub fn selected_kinds(
    names: &[String],
    secrets: bool,
) -> Result<Option<BTreeSet<ResourceType>>, ReconError> {
    if names.is_empty() || names.iter().any(|n| n.trim().eq_ignore_ascii_case(ALL_TYPES)) {
        return Ok(None);
    }
    names.iter().map(|n| lookup(n, secrets)).collect::<Result<BTreeSet<_>, _>>().map(Some)
}

/// True when `kind` passes the resolved filter.
pub fn wants(kinds: Option<&BTreeSet<ResourceType>>, kind: ResourceType) -> bool {
    kinds.map_or(true, |k| k.contains(&kind))
}

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::{send_records, ListScope, ProjectLister};
use crate::clients::ManagedZone;
use crate::errors::handle_gcp_error;
use crate::pipeline::Outlet;
use crate::record::{properties, Resource, ResourceType};

pub fn managed_zone_record(zone: &ManagedZone, project: &str) -> Result<Resource> {
    let public = zone.visibility.is_empty() || zone.visibility == "public";
    let props = properties([
        ("id", json!(zone.id)),
        ("dnsName", json!(zone.dns_name)),
        ("visibility", json!(zone.visibility)),
        ("description", json!(zone.description)),
        ("creationTime", json!(zone.creation_time)),
    ]);
    let mut record = Resource::new(&zone.name, project, ResourceType::DnsManagedZone, props)?
        .with_display_name(&zone.dns_name)
        .with_region("global");
    if public && !zone.dns_name.is_empty() {
        record.set("publicDomain", zone.dns_name.trim_end_matches('.'));
    }
    Ok(record)
}

#[derive(Default)]
pub struct ManagedZoneLister;

#[async_trait]
impl ProjectLister for ManagedZoneLister {
    fn name(&self) -> &'static str {
        "gcp-dns-zone-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let zones = scope.services.dns.list_managed_zones(scope.project).await.map_err(|e| {
            handle_gcp_error(e, &format!("failed to list DNS zones in project {}", scope.project))
        })?;
        send_records(&zones, out, |z| z.name.clone(), |z| {
            managed_zone_record(z, scope.project)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_zone_has_domain() {
        let zone = ManagedZone {
            name: "example".into(),
            dns_name: "example.com.".into(),
            visibility: "public".into(),
            ..Default::default()
        };
        let record = managed_zone_record(&zone, "alpha").unwrap();
        assert_eq!(record.prop_str("publicDomain"), Some("example.com"));
        assert_eq!(record.label(), "example.com.");

        let private = ManagedZone { visibility: "private".into(), ..zone };
        assert!(managed_zone_record(&private, "alpha").unwrap().prop("publicDomain").is_none());
    }
}

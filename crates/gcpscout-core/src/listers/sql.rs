use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::{send_records, set_public_ip, ListScope, ProjectLister};
use crate::clients::DatabaseInstance;
use crate::errors::handle_gcp_error;
use crate::pipeline::Outlet;
use crate::record::{properties, Resource, ResourceType};

pub fn sql_record(instance: &DatabaseInstance, project: &str) -> Result<Resource> {
    let settings = instance.settings.as_ref();
    let ip_config = settings.and_then(|s| s.ip_configuration.as_ref());
    let networks: Vec<&str> = ip_config
        .map(|c| c.authorized_networks.iter().map(|n| n.value.as_str()).collect())
        .unwrap_or_default();
    let props = properties([
        ("databaseVersion", json!(instance.database_version)),
        ("state", json!(instance.state)),
        ("connectionName", json!(instance.connection_name)),
        ("tier", json!(settings.map(|s| s.tier.as_str()))),
        ("requireSsl", json!(ip_config.map(|c| c.require_ssl))),
        ("authorizedNetworks", json!(networks)),
    ]);
    let mut record = Resource::new(&instance.name, project, ResourceType::SqlInstance, props)?
        .with_region(&instance.region);
    if let Some(ip) = instance.public_ip() {
        set_public_ip(&mut record, ip);
    }
    Ok(record)
}

#[derive(Default)]
pub struct SqlInstanceLister;

#[async_trait]
impl ProjectLister for SqlInstanceLister {
    fn name(&self) -> &'static str {
        "gcp-sql-instance-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let instances = scope.services.sql.list_instances(scope.project).await.map_err(|e| {
            let context = format!("failed to list SQL instances in project {}", scope.project);
            handle_gcp_error(e, &context)
        })?;
        let instances: Vec<_> = instances
            .into_iter()
            .filter(|i| scope.base.wants_region(&i.region))
            .collect();
        send_records(&instances, out, |i| i.name.clone(), |i| sql_record(i, scope.project)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::sql::{IpConfiguration, IpMapping, Settings};

    fn instance(ipv4_enabled: bool) -> DatabaseInstance {
        DatabaseInstance {
            name: "db-1".into(),
            database_version: "POSTGRES_15".into(),
            region: "us-central1".into(),
            settings: Some(Settings {
                tier: "db-f1-micro".into(),
                ip_configuration: Some(IpConfiguration { ipv4_enabled, ..Default::default() }),
            }),
            ip_addresses: vec![
                IpMapping { kind: "PRIMARY".into(), ip_address: "35.1.1.1".into() },
                IpMapping { kind: "PRIVATE".into(), ip_address: "10.0.0.3".into() },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_public_ip_requires_ipv4_enabled() {
        let public = sql_record(&instance(true), "alpha").unwrap();
        assert_eq!(public.prop_str("publicIP"), Some("35.1.1.1"));
        assert_eq!(public.prop_bool("isPublic"), Some(true));
        assert_eq!(public.region, "us-central1");

        let private = sql_record(&instance(false), "alpha").unwrap();
        assert!(private.prop("publicIP").is_none());
        assert_eq!(private.prop_str("tier"), Some("db-f1-micro"));
    }
}

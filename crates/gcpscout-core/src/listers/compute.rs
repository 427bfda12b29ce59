use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use super::{project_zones, set_public_ip, ListScope, ProjectLister};
use crate::clients::Instance;
use crate::errors::{handle_gcp_error, is_not_found, ReconError};
use crate::pipeline::{bounded_fan_out, Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase};
use crate::record::{properties, DefaultServiceAccount, Resource, ResourceType};

const INSTANCES: &[ResourceType] = &[ResourceType::ComputeInstance];

pub fn instance_record(instance: &Instance, project: &str) -> Result<Resource> {
    let private_ips: Vec<&str> = instance
        .network_interfaces
        .iter()
        .map(|n| n.network_ip.as_str())
        .filter(|ip| !ip.is_empty())
        .collect();
    let service_accounts: Vec<_> = instance
        .service_accounts
        .iter()
        .map(|sa| json!({ "email": sa.email, "scopes": sa.scopes }))
        .collect();
    let props = properties([
        ("id", json!(instance.id)),
        ("zone", json!(instance.zone_name())),
        ("status", json!(instance.status)),
        ("machineType", json!(crate::clients::short_name(&instance.machine_type))),
        ("privateIPs", json!(private_ips)),
        ("serviceAccounts", json!(service_accounts)),
        ("labels", json!(instance.labels)),
    ]);
    let zone = instance.zone_name();
    let region = zone.rsplit_once('-').map(|(r, _)| r).unwrap_or(zone);
    let mut record = Resource::new(&instance.name, project, ResourceType::ComputeInstance, props)?
        .with_region(region);
    for nic in &instance.network_interfaces {
        for ac in &nic.access_configs {
            if !ac.nat_ip.is_empty() {
                set_public_ip(&mut record, &ac.nat_ip);
            }
        }
        for ac in &nic.ipv6_access_configs {
            if !ac.external_ipv6.is_empty() {
                set_public_ip(&mut record, &ac.external_ipv6);
            }
        }
    }
    Ok(record)
}

/// Compute instances across every zone of the project, one worker per zone.
#[derive(Default)]
pub struct InstanceLister;

#[async_trait]
impl ProjectLister for InstanceLister {
    fn name(&self) -> &'static str {
        "gcp-instance-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let zones = project_zones(scope).await;
        debug!(project = scope.project, zones = zones.len(), "listing instances");
        let services = scope.services.clone();
        let project = scope.project.to_string();
        let out = out.clone();
        bounded_fan_out(zones, scope.base.concurrency(), scope.project, move |zone| {
            let services = services.clone();
            let project = project.clone();
            let out = out.clone();
            async move {
                let instances =
                    services.compute.list_instances(&project, &zone).await.map_err(|e| {
                        let context = format!("failed to list instances in {}/{}", project, zone);
                        handle_gcp_error(e, &context)
                    })?;
                for instance in &instances {
                    match instance_record(instance, &project) {
                        Ok(record) => out.send(record).await?,
                        Err(e) => error!(
                            instance = %instance.name,
                            error = %e,
                            "failed to build instance record"
                        ),
                    }
                }
                Ok(())
            }
        })
        .await;
        Ok(())
    }
}

/// One instance by name (input text or `--instance`) in `--project` and `--zone`.
#[derive(Default)]
pub struct InstanceInfo {
    base: GcpBase,
}

impl InstanceInfo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Link for InstanceInfo {
    fn name(&self) -> &'static str {
        "gcp-instance-info"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::project().required());
        params.push(options::zone().required());
        params.push(Param::string("instance", "Instance name"));
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Text
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Text(text) = input else { return Ok(()) };
        let args = self.base.args();
        let project = args.str("project").unwrap_or_default().to_string();
        let zone = args.str("zone").unwrap_or_default().to_string();
        let name = match text.trim() {
            "" => args
                .str("instance")
                .map(str::to_string)
                .ok_or_else(|| ReconError::MissingParam("instance".to_string()))?,
            n => n.to_string(),
        };
        let services = self.base.services()?;
        let instance = match services.compute.get_instance(&project, &zone, &name).await {
            Ok(i) => i,
            Err(e) if is_not_found(&e) => {
                let message = format!("instance not found: {}/{}", zone, name);
                return Err(ReconError::NotFound(message).into());
            }
            Err(e) => {
                let context = format!("failed to get instance {}", name);
                return Err(handle_gcp_error(e, &context));
            }
        };
        out.send(instance_record(&instance, &project)?).await
    }
}

#[derive(Deserialize)]
struct AttachedAccount {
    #[serde(default)]
    email: String,
    #[serde(default)]
    scopes: Vec<String>,
}

/// Service accounts attached to an instance record, as `service-account` records.
pub fn instance_service_accounts(instance: &Resource) -> Vec<Resource> {
    let attached: Vec<AttachedAccount> = instance
        .prop("serviceAccounts")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    let zone = instance.prop_str("zone").unwrap_or_default();
    attached
        .into_iter()
        .filter(|sa| !sa.email.is_empty())
        .filter_map(|sa| {
            let default = DefaultServiceAccount::classify(&sa.email);
            let sa_type = match default {
                Some(kind) => kind.instance_label(),
                None if sa.email.contains('@') => "user-managed",
                None => "unknown",
            };
            let props = properties([
                ("instance_id", json!(instance.prop_str("id"))),
                ("instance_name", json!(instance.name)),
                ("project_id", json!(instance.account_ref)),
                ("zone", json!(zone)),
                ("service_account_email", json!(sa.email)),
                ("scopes", json!(sa.scopes)),
                ("is_default_sa", json!(default.is_some())),
                ("service_account_type", json!(sa_type)),
            ]);
            Resource::new(&sa.email, &instance.account_ref, ResourceType::ServiceAccount, props)
                .map(|r| r.with_region(&instance.region))
                .ok()
        })
        .collect()
}

#[derive(Default)]
pub struct InstanceServiceAccounts;

impl InstanceServiceAccounts {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for InstanceServiceAccounts {
    fn name(&self) -> &'static str {
        "gcp-instance-service-accounts"
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(INSTANCES)
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Resource(instance) = input else { return Ok(()) };
        for sa in instance_service_accounts(&instance) {
            out.send(sa).await?;
        }
        Ok(())
    }
}

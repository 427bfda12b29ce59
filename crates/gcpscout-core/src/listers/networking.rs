use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use super::dns::ManagedZoneLister;
use super::{project_regions, send_records, set_public_ip, ListScope, ProjectLink, ProjectLister};
use crate::clients::{short_name, Address, ForwardingRule};
use crate::errors::handle_gcp_error;
use crate::pipeline::{bounded_fan_out, Chain, Multi, MultiLink, Outlet, Strictness};
use crate::record::{properties, Resource, ResourceType};

pub fn forwarding_rule_record(
    rule: &ForwardingRule,
    project: &str,
    global: bool,
) -> Result<Resource> {
    let props = properties([
        ("ipAddress", json!(rule.ip_address)),
        ("ipProtocol", json!(rule.ip_protocol)),
        ("portRange", json!(rule.port_range)),
        ("ports", json!(rule.ports)),
        ("loadBalancingScheme", json!(rule.load_balancing_scheme)),
        ("target", json!(short_name(&rule.target))),
        ("networkTier", json!(rule.network_tier)),
    ]);
    let kind = if global {
        ResourceType::GlobalForwardingRule
    } else {
        ResourceType::ForwardingRule
    };
    let region = if global { "global" } else { short_name(&rule.region) };
    let mut record = Resource::new(&rule.name, project, kind, props)?.with_region(region);
    if rule.is_external() && !rule.ip_address.is_empty() {
        set_public_ip(&mut record, &rule.ip_address);
    }
    Ok(record)
}

pub fn address_record(address: &Address, project: &str, global: bool) -> Result<Resource> {
    let users: Vec<&str> = address.users.iter().map(|u| short_name(u)).collect();
    let props = properties([
        ("address", json!(address.address)),
        ("addressType", json!(address.address_type)),
        ("status", json!(address.status)),
        ("ipVersion", json!(address.ip_version)),
        ("users", json!(users)),
    ]);
    let kind = if global { ResourceType::GlobalAddress } else { ResourceType::Address };
    let region = if global { "global" } else { short_name(&address.region) };
    let mut record = Resource::new(&address.name, project, kind, props)?.with_region(region);
    if address.address_type == "EXTERNAL" {
        set_public_ip(&mut record, &address.address);
    }
    Ok(record)
}

#[derive(Default)]
pub struct GlobalForwardingRuleLister;

#[async_trait]
impl ProjectLister for GlobalForwardingRuleLister {
    fn name(&self) -> &'static str {
        "gcp-global-forwarding-rule-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let rules = scope
            .services
            .compute
            .list_global_forwarding_rules(scope.project)
            .await
            .map_err(|e| {
                let context =
                    format!("failed to list global forwarding rules in project {}", scope.project);
                handle_gcp_error(e, &context)
            })?;
        send_records(&rules, out, |r| r.name.clone(), |r| {
            forwarding_rule_record(r, scope.project, true)
        })
        .await
    }
}

#[derive(Default)]
pub struct ForwardingRuleLister;

#[async_trait]
impl ProjectLister for ForwardingRuleLister {
    fn name(&self) -> &'static str {
        "gcp-forwarding-rule-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let regions = project_regions(scope).await;
        let services = scope.services.clone();
        let project = scope.project.to_string();
        let out = out.clone();
        bounded_fan_out(regions, scope.base.concurrency(), scope.project, move |region| {
            let services = services.clone();
            let project = project.clone();
            let out = out.clone();
            async move {
                let rules = services
                    .compute
                    .list_forwarding_rules(&project, &region)
                    .await
                    .map_err(|e| {
                        let context =
                            format!("failed to list forwarding rules in {}/{}", project, region);
                        handle_gcp_error(e, &context)
                    })?;
                send_records(&rules, &out, |r| r.name.clone(), |r| {
                    forwarding_rule_record(r, &project, false)
                })
                .await
            }
        })
        .await;
        Ok(())
    }
}

#[derive(Default)]
pub struct GlobalAddressLister;

#[async_trait]
impl ProjectLister for GlobalAddressLister {
    fn name(&self) -> &'static str {
        "gcp-global-address-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let addresses = scope
            .services
            .compute
            .list_global_addresses(scope.project)
            .await
            .map_err(|e| {
                let context =
                    format!("failed to list global addresses in project {}", scope.project);
                handle_gcp_error(e, &context)
            })?;
        send_records(&addresses, out, |a| a.name.clone(), |a| {
            address_record(a, scope.project, true)
        })
        .await
    }
}

#[derive(Default)]
pub struct AddressLister;

#[async_trait]
impl ProjectLister for AddressLister {
    fn name(&self) -> &'static str {
        "gcp-address-lister"
    }

    async fn list(&self, scope: &ListScope<'_>, out: &Outlet) -> Result<()> {
        let regions = project_regions(scope).await;
        let services = scope.services.clone();
        let project = scope.project.to_string();
        let out = out.clone();
        bounded_fan_out(regions, scope.base.concurrency(), scope.project, move |region| {
            let services = services.clone();
            let project = project.clone();
            let out = out.clone();
            async move {
                let addresses =
                    services.compute.list_addresses(&project, &region).await.map_err(|e| {
                        let context = format!("failed to list addresses in {}/{}", project, region);
                        handle_gcp_error(e, &context)
                    })?;
                send_records(&addresses, &out, |a| a.name.clone(), |a| {
                    address_record(a, &project, false)
                })
                .await
            }
        })
        .await;
        Ok(())
    }
}

/// Every networking lister side by side; one failing surface does not stop the others.
pub fn networking_fan_out() -> MultiLink {
    let multi = Multi::new(vec![
        Chain::of(ProjectLink::new(GlobalForwardingRuleLister)),
        Chain::of(ProjectLink::new(ForwardingRuleLister)),
        Chain::of(ProjectLink::new(GlobalAddressLister)),
        Chain::of(ProjectLink::new(AddressLister)),
        Chain::of(ProjectLink::new(ManagedZoneLister)),
    ])
    .with_strictness(Strictness::Lax);
    MultiLink::new("gcp-networking-fan-out", multi)
}

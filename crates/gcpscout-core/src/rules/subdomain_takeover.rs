use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::clients::{ManagedZone, ResourceRecordSet};
use crate::errors::{handle_gcp_error, is_not_found};
use crate::finding::{Evidence, Finding, FindingKind, Severity};
use crate::hierarchy::listable_project;
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param, HIERARCHY};
use crate::provider::{GcpBase, GcpServices};
use crate::record::{Resource, ResourceType};

/// Details of one dangling DNS record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeoverEvidence {
    pub domain: String,
    pub record_type: String,
    pub record_value: String,
    pub service: String,
    pub project: String,
    pub zone_name: String,
    pub dns_name: String,
    pub description: String,
    pub remediation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checker {
    Bucket,
    CloudRun,
    AppEngine,
}

struct ServicePattern {
    patterns: &'static [&'static str],
    /// Every entry must appear, on top of one of `patterns`.
    requires_all: &'static [&'static str],
    service: &'static str,
    severity: Severity,
    description: &'static str,
    remediation: &'static str,
    checker: Option<Checker>,
}

const CNAME_PATTERNS: &[ServicePattern] = &[
    ServicePattern {
        patterns: &[".storage.googleapis.com", "c.storage.googleapis.com"],
        requires_all: &[],
        service: "Cloud Storage",
        severity: Severity::Critical,
        description: "CNAME record points to non-existent Cloud Storage bucket",
        remediation: "Delete the CNAME record or create the bucket with appropriate permissions",
        checker: Some(Checker::Bucket),
    },
    ServicePattern {
        patterns: &[".run.app", ".a.run.app"],
        requires_all: &[],
        service: "Cloud Run",
        severity: Severity::High,
        description: "CNAME record points to potentially deleted Cloud Run service",
        remediation: "Delete the CNAME record or verify the Cloud Run service exists",
        checker: Some(Checker::CloudRun),
    },
    ServicePattern {
        patterns: &[".appspot.com", "ghs.googlehosted.com"],
        requires_all: &[],
        service: "App Engine",
        severity: Severity::High,
        description: "CNAME record points to potentially deleted App Engine application",
        remediation: "Delete the CNAME record or verify the App Engine application exists",
        checker: Some(Checker::AppEngine),
    },
    ServicePattern {
        patterns: &[".firebaseapp.com", ".web.app"],
        requires_all: &[],
        service: "Firebase Hosting",
        severity: Severity::Informational,
        description: "CNAME record points to Firebase hosting site; ownership is verified by \
                      TXT record and needs manual review",
        remediation: "Verify Firebase site ownership via TXT record validation or remove the \
                      CNAME if the site is abandoned",
        checker: None,
    },
    ServicePattern {
        patterns: &[".cloudfunctions.net"],
        requires_all: &[],
        service: "Cloud Functions",
        severity: Severity::Informational,
        description:
            "CNAME record points to Cloud Function; existence cannot be verified automatically",
        remediation: "Delete the CNAME record or manually verify the Cloud Function exists",
        checker: None,
    },
    ServicePattern {
        patterns: &[".endpoints.", ".cloud.goog"],
        requires_all: &[".endpoints.", ".cloud.goog"],
        service: "Cloud Endpoints",
        severity: Severity::Informational,
        description: "CNAME record points to Cloud Endpoints service; backend existence cannot \
                      be verified automatically",
        remediation: "Delete the CNAME record or manually verify the backend service exists",
        checker: None,
    },
];

impl ServicePattern {
    fn matches(&self, target: &str) -> bool {
        self.patterns.iter().any(|p| target.contains(p))
            && self.requires_all.iter().all(|p| target.contains(p))
    }
}

fn pattern_for(target: &str) -> Option<&'static ServicePattern> {
    CNAME_PATTERNS.iter().find(|p| p.matches(target))
}

pub fn bucket_name(target: &str) -> &str {
    target
        .strip_suffix(".c.storage.googleapis.com")
        .or_else(|| target.strip_suffix(".storage.googleapis.com"))
        .unwrap_or(target)
}

/// True for Cloud DNS nameservers (`ns-cloud-*.googledomains.com`).
pub fn is_cloud_dns_nameserver(target: &str) -> bool {
    target.contains("ns-cloud-") && target.contains(".googledomains.com")
}

/// Whether a zone in `zones` serves `subdomain` or something below it.
pub fn delegated_zone_exists(zones: &[ManagedZone], subdomain: &str) -> bool {
    let subdomain = subdomain.trim_end_matches('.');
    zones.iter().any(|z| {
        let zone = z.dns_name.trim_end_matches('.');
        zone == subdomain || zone.ends_with(&format!(".{}", subdomain))
    })
}

/// Walks the DNS zones of every active project under the input node and reports records
/// pointing at resources that no longer exist.
#[derive(Default)]
pub struct SubdomainTakeoverAnalyzer {
    base: GcpBase,
}

impl SubdomainTakeoverAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn projects(&self, node: &Resource) -> Result<Vec<String>> {
        let services = self.base.services()?;
        let parent = match node.resource_type {
            ResourceType::Project => {
                return Ok(listable_project(node).map(|p| vec![p.to_string()]).unwrap_or_default())
            }
            ResourceType::Organization | ResourceType::Folder => node.name.clone(),
            _ => return Ok(Vec::new()),
        };
        let projects = services
            .resource_manager
            .list_projects_by_parent(&parent)
            .await
            .map_err(|e| handle_gcp_error(e, &format!("failed to list projects in {}", parent)))?;
        Ok(projects.into_iter().filter(|p| p.is_active()).map(|p| p.project_id).collect())
    }
}

struct ZoneScan<'a> {
    services: &'a GcpServices,
    project: &'a str,
    zone: &'a ManagedZone,
    zones: &'a [ManagedZone],
}

impl ZoneScan<'_> {
    async fn resource_exists(&self, checker: Checker, target: &str) -> bool {
        let result = match checker {
            Checker::Bucket => {
                self.services.storage.get_bucket(bucket_name(target)).await.map(|_| true)
            }
            Checker::AppEngine => {
                self.services.appengine.get_application(self.project).await.map(|_| true)
            }
            Checker::CloudRun => return self.run_service_exists(target).await,
        };
        match result {
            Ok(_) => true,
            Err(e) if is_not_found(&e) => false,
            Err(e) => {
                debug!(
                    target = %target,
                    error = %format!("{:#}", e),
                    "existence check failed, assuming present"
                );
                true
            }
        }
    }

    /// Run hostnames look like `<service>-<hash>-<region>.a.run.app`; the service
    /// exists when its name prefixes the first label.
    async fn run_service_exists(&self, target: &str) -> bool {
        let labels: Vec<&str> = target.split('.').collect();
        if labels.len() < 3 {
            return true;
        }
        match self.services.run.list_services(self.project, "-").await {
            Ok(services) => services.iter().any(|s| {
                let name = s.name.rsplit('/').next().unwrap_or_default();
                !name.is_empty() && labels[0].starts_with(name)
            }),
            Err(e) => {
                debug!(
                    project = %self.project,
                    error = %format!("{:#}", e),
                    "cloud run check failed, assuming present"
                );
                true
            }
        }
    }

    async fn ip_in_use(&self, ip: &str) -> bool {
        match self.services.compute.aggregated_addresses(self.project).await {
            Ok(addresses) => addresses.iter().any(|a| a.address == ip && a.status == "IN_USE"),
            Err(e) => {
                debug!(
                    project = %self.project,
                    error = %format!("{:#}", e),
                    "address check failed, assuming in use"
                );
                true
            }
        }
    }

    async fn check(&self, rrset: &ResourceRecordSet) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rdata in &rrset.rrdatas {
            let target = rdata.trim_end_matches('.');
            match rrset.kind.as_str() {
                "CNAME" => {
                    let Some(pattern) = pattern_for(target) else { continue };
                    debug!(
                        domain = %rrset.name,
                        service = pattern.service,
                        "matched service pattern"
                    );
                    if let Some(checker) = pattern.checker {
                        if self.resource_exists(checker, target).await {
                            continue;
                        }
                    }
                    let description = match pattern.checker {
                        Some(Checker::Bucket) => {
                            format!("{}: {}", pattern.description, bucket_name(target))
                        }
                        _ => format!("{}: {}", pattern.description, target),
                    };
                    findings.push(self.finding(
                        rrset,
                        target,
                        pattern.service,
                        pattern.severity,
                        description,
                        pattern.remediation,
                    ));
                }
                "A" | "AAAA" => {
                    if !self.ip_in_use(rdata).await {
                        findings.push(self.finding(
                            rrset,
                            rdata,
                            "Compute Engine / Load Balancing",
                            Severity::Low,
                            format!(
                                "A/AAAA record points to potentially orphaned IP address: {}",
                                rdata
                            ),
                            "Delete the DNS record or verify the IP address is properly allocated",
                        ));
                    }
                }
                "NS" if rrset.name != self.zone.dns_name && is_cloud_dns_nameserver(target) => {
                    if !delegated_zone_exists(self.zones, &rrset.name) {
                        findings.push(self.finding(
                            rrset,
                            target,
                            "Cloud DNS",
                            Severity::Critical,
                            format!(
                                "NS record delegates to Cloud DNS nameserver but delegated zone \
                                 may not exist: {}",
                                target
                            ),
                            "Delete the NS delegation or create the corresponding Cloud DNS zone",
                        ));
                    }
                }
                _ => {}
            }
        }
        findings
    }

    fn finding(
        &self,
        rrset: &ResourceRecordSet,
        value: &str,
        service: &str,
        severity: Severity,
        description: String,
        remediation: &str,
    ) -> Finding {
        let evidence = TakeoverEvidence {
            domain: rrset.name.clone(),
            record_type: rrset.kind.clone(),
            record_value: value.to_string(),
            service: service.to_string(),
            project: self.project.to_string(),
            zone_name: self.zone.name.clone(),
            dns_name: self.zone.dns_name.clone(),
            description: description.clone(),
            remediation: remediation.to_string(),
        };
        Finding::new(
            FindingKind::SubdomainTakeover,
            severity,
            format!("Potential subdomain takeover: {}", rrset.name),
            description,
            Evidence::SubdomainTakeover(evidence),
        )
        .with_remediation(remediation)
        .with_resource(format!("{}/{}", self.zone.name, rrset.name))
        .with_account(self.project)
    }
}

#[async_trait]
impl Link for SubdomainTakeoverAnalyzer {
    fn name(&self) -> &'static str {
        "gcp-subdomain-takeover"
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(HIERARCHY)
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(node) = input.as_resource() else { return Ok(()) };
        let projects = self.projects(node).await?;
        debug!(count = projects.len(), "scanning projects for dangling DNS records");
        let services = self.base.services()?;
        for project in &projects {
            let zones = match services.dns.list_managed_zones(project).await {
                Ok(z) => z,
                Err(e) => {
                    let e = handle_gcp_error(e, "failed to list DNS managed zones");
                    error!(project = %project, error = %e, "failed to scan project DNS");
                    continue;
                }
            };
            for zone in &zones {
                let rrsets = match services.dns.list_record_sets(project, &zone.name).await {
                    Ok(r) => r,
                    Err(e) => {
                        error!(
                            zone = %zone.name,
                            error = %format!("{:#}", e),
                            "failed to list resource record sets"
                        );
                        continue;
                    }
                };
                let scan = ZoneScan { services, project, zone, zones: &zones };
                for rrset in &rrsets {
                    for finding in scan.check(rrset).await {
                        out.send(finding).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{Address, Bucket, RunService};
    use crate::hierarchy::project_record;
    use crate::pipeline::{Args, Chain};
    use crate::provider::MemoryCloud;
    use std::sync::Arc;

    fn zone() -> ManagedZone {
        ManagedZone {
            name: "example".into(),
            dns_name: "example.com.".into(),
            ..Default::default()
        }
    }

    fn rrset(name: &str, kind: &str, data: &str) -> ResourceRecordSet {
        ResourceRecordSet {
            name: name.into(),
            kind: kind.into(),
            ttl: 300,
            rrdatas: vec![data.into()],
        }
    }

    fn bucket_cname() -> ResourceRecordSet {
        rrset("foo.example.com.", "CNAME", "bucket-xyz.storage.googleapis.com.")
    }

    fn cloud(records: Vec<ResourceRecordSet>) -> MemoryCloud {
        MemoryCloud::default().with_project("alpha", "ACTIVE", "organizations/1234").with(|s| {
            s.managed_zones.insert("alpha".into(), vec![zone()]);
            s.record_sets.insert("alpha/example".into(), records);
        })
    }

    async fn scan(cloud: MemoryCloud) -> Vec<Finding> {
        let project = project_record(&cloud.snapshot().projects[0]).unwrap();
        let ctx = LinkContext::new(Args::new(), Arc::new(cloud));
        let (out, result) = Chain::of(SubdomainTakeoverAnalyzer::new())
            .run(&ctx, vec![Message::from(project)])
            .await;
        result.unwrap();
        out.into_iter()
            .filter_map(|m| match m {
                Message::Finding(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    fn evidence(f: &Finding) -> &TakeoverEvidence {
        match &f.evidence {
            Evidence::SubdomainTakeover(e) => e,
            other => panic!("unexpected evidence {:?}", other),
        }
    }

    #[test]
    fn test_pattern_table() {
        assert_eq!(pattern_for("foo.storage.googleapis.com").unwrap().service, "Cloud Storage");
        assert_eq!(pattern_for("svc-abc-uc.a.run.app").unwrap().service, "Cloud Run");
        assert_eq!(pattern_for("site.web.app").unwrap().service, "Firebase Hosting");
        let endpoints = pattern_for("api.endpoints.proj.cloud.goog").unwrap();
        assert_eq!(endpoints.service, "Cloud Endpoints");
        assert!(pattern_for("other.cloud.goog").is_none());
        assert!(pattern_for("example.org").is_none());
        assert_eq!(bucket_name("bucket-xyz.storage.googleapis.com"), "bucket-xyz");
        assert_eq!(bucket_name("bucket-xyz.c.storage.googleapis.com"), "bucket-xyz");
    }

    #[test]
    fn test_delegated_zone_matching() {
        let zones = vec![ManagedZone { dns_name: "dev.example.com.".into(), ..Default::default() }];
        assert!(delegated_zone_exists(&zones, "dev.example.com."));
        assert!(delegated_zone_exists(&zones, "example.com"));
        assert!(!delegated_zone_exists(&zones, "staging.example.com"));
    }

    #[tokio::test]
    async fn test_dangling_bucket_cname() {
        let findings = scan(cloud(vec![bucket_cname()])).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        let e = evidence(&findings[0]);
        assert_eq!(e.service, "Cloud Storage");
        assert_eq!(e.domain, "foo.example.com.");
        assert_eq!(e.record_value, "bucket-xyz.storage.googleapis.com");
    }

    #[tokio::test]
    async fn test_existing_bucket_is_not_reported() {
        let cloud = cloud(vec![bucket_cname()])
            .with_bucket("alpha", Bucket { name: "bucket-xyz".into(), ..Default::default() });
        assert!(scan(cloud).await.is_empty());
    }

    #[tokio::test]
    async fn test_checker_failure_assumes_present() {
        let denied = crate::errors::ApiError {
            status: 403,
            status_text: None,
            reason: None,
            message: "denied".into(),
        };
        let cloud = cloud(vec![bucket_cname()]).fail("storage.buckets.get", "*", denied);
        assert!(scan(cloud).await.is_empty());
    }

    #[tokio::test]
    async fn test_cloud_run_prefix_match() {
        let records = vec![
            rrset("app.example.com.", "CNAME", "web-abc123-uc.a.run.app."),
            rrset("old.example.com.", "CNAME", "gone-abc123-uc.a.run.app."),
        ];
        let cloud = cloud(records).with(|s| {
            s.run_services.insert(
                "alpha".into(),
                vec![RunService {
                    name: "projects/alpha/locations/us-central1/services/web".into(),
                    ..Default::default()
                }],
            );
        });
        let findings = scan(cloud).await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(evidence(&findings[0]).domain, "old.example.com.");
    }

    #[tokio::test]
    async fn test_orphaned_ip_and_delegation() {
        let records = vec![
            rrset("lb.example.com.", "A", "34.1.2.3"),
            rrset("used.example.com.", "A", "34.9.9.9"),
            rrset("dev.example.com.", "NS", "ns-cloud-a1.googledomains.com."),
            rrset("example.com.", "NS", "ns-cloud-a1.googledomains.com."),
        ];
        let cloud = cloud(records).with(|s| {
            s.global_addresses.insert(
                "alpha".into(),
                vec![Address {
                    address: "34.9.9.9".into(),
                    status: "IN_USE".into(),
                    ..Default::default()
                }],
            );
        });
        let findings = scan(cloud).await;
        let services: Vec<&str> = findings.iter().map(|f| evidence(f).service.as_str()).collect();
        assert_eq!(services, vec!["Compute Engine / Load Balancing", "Cloud DNS"]);
    }

    #[tokio::test]
    async fn test_delegation_to_existing_zone_is_not_reported() {
        let records = vec![rrset("dev.example.com.", "NS", "ns-cloud-a1.googledomains.com.")];
        let cloud = cloud(records).with(|s| {
            s.managed_zones.entry("alpha".into()).or_default().push(ManagedZone {
                name: "dev".into(),
                dns_name: "dev.example.com.".into(),
                ..Default::default()
            });
        });
        assert!(scan(cloud).await.is_empty());
    }
}

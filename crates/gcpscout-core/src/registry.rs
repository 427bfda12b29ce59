//! Module registry: every runnable module keyed by platform, category and id.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::hierarchy::{OrganizationInfo, OrganizationList, OrganizationProjectList, ProjectInfo};
use crate::listers::{
    networking_fan_out, AppEngineInfo, BucketInfo, BucketLister, CloudRunInfo, InstanceInfo,
    InstanceLister, InstanceServiceAccounts, ProjectLink, SqlInstanceLister,
};
use crate::pipeline::{
    Chain, LinkContext, Message, Multi, MultiLink, Param, RunningChain, Strictness,
};
use crate::router::{ProjectFanOut, Route, ScopeRouter};
use crate::rules::{
    ConstraintAnalyzer, ConstraintCollector, DefaultServiceAccountAnalyzer, OverprivilegedAnalyzer,
    PrimitiveRolesAnalyzer, ProjectIamPolicy, SubdomainTakeoverAnalyzer,
};
use crate::secrets::SecretScanLink;

pub const PLATFORM_GCP: &str = "gcp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleKey {
    pub platform: &'static str,
    pub category: &'static str,
    pub id: &'static str,
}

impl ModuleKey {
    pub const fn gcp(category: &'static str, id: &'static str) -> Self {
        Self { platform: PLATFORM_GCP, category, id }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.platform, self.category, self.id)
    }
}

/// How noisy a module is against the target's audit logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Opsec {
    None,
    Low,
    Moderate,
}

/// What a module's output stream carries, which picks the outputter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    Runtime,
    SecurityFindings,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module already registered: {0}")]
    Duplicate(ModuleKey),
    #[error("unknown module '{name}'{}", did_you_mean(.suggestion))]
    Unknown { name: String, suggestion: Option<String> },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    suggestion.as_ref().map(|s| format!(" (did you mean '{}'?)", s)).unwrap_or_default()
}

/// A runnable module: metadata plus the builder that assembles its chain.
#[derive(Clone)]
pub struct Module {
    pub key: ModuleKey,
    pub name: &'static str,
    pub description: &'static str,
    pub opsec: Opsec,
    pub references: &'static [&'static str],
    pub output: OutputKind,
    build: fn() -> Chain,
}

impl Module {
    pub fn new(
        key: ModuleKey,
        name: &'static str,
        description: &'static str,
        build: fn() -> Chain,
    ) -> Self {
        Self {
            key,
            name,
            description,
            opsec: Opsec::None,
            references: &[],
            output: OutputKind::Runtime,
            build,
        }
    }

    pub fn with_opsec(mut self, opsec: Opsec) -> Self {
        self.opsec = opsec;
        self
    }

    pub fn with_references(mut self, references: &'static [&'static str]) -> Self {
        self.references = references;
        self
    }

    pub fn findings(mut self) -> Self {
        self.output = OutputKind::SecurityFindings;
        self
    }

    pub fn id(&self) -> &'static str {
        self.key.id
    }

    /// A fresh chain; links are single-use so every run builds its own.
    pub fn chain(&self) -> Chain {
        (self.build)()
    }

    pub fn params(&self) -> Vec<Param> {
        self.chain().params()
    }

    /// Kick-off input. Scope and info links read their target from arguments when the
    /// text is empty.
    pub fn seed(&self) -> Vec<Message> {
        vec![Message::Text(String::new())]
    }

    /// Build the chain, feed the seed and close its input. The caller drains outputs
    /// and calls `finish`.
    pub async fn start(&self, ctx: &LinkContext) -> anyhow::Result<RunningChain> {
        let mut running = self.chain().start(ctx);
        for msg in self.seed() {
            running.send(msg).await?;
        }
        running.close();
        Ok(running)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("key", &self.key).field("output", &self.output).finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    modules: BTreeMap<ModuleKey, Module>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with every built-in module.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        register_builtin(&mut registry)?;
        Ok(registry)
    }

    pub fn register(&mut self, module: Module) -> Result<(), RegistryError> {
        if self.modules.contains_key(&module.key) {
            return Err(RegistryError::Duplicate(module.key));
        }
        self.modules.insert(module.key, module);
        Ok(())
    }

    pub fn get(&self, key: &ModuleKey) -> Option<&Module> {
        self.modules.get(key)
    }

    /// Look a module up by bare id, or by `category/id` when ids collide.
    pub fn find(&self, name: &str) -> Result<&Module, RegistryError> {
        let (category, id) = match name.split_once('/') {
            Some((c, i)) => (Some(c), i),
            None => (None, name),
        };
        self.modules
            .values()
            .find(|m| m.key.id == id && category.map_or(true, |c| c == m.key.category))
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_string(),
                suggestion: self.suggest(id),
            })
    }

    fn suggest(&self, id: &str) -> Option<String> {
        self.modules
            .keys()
            .map(|k| (k.id, strsim::jaro_winkler(id, k.id)))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.to_string())
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

const IAM_REFERENCES: &[&str] = &["https://cloud.google.com/iam/docs/understanding-roles#basic"];
const TAKEOVER_REFERENCES: &[&str] = &[
    "https://cloud.google.com/dns/docs/records",
    "https://developer.mozilla.org/en-US/docs/Web/Security/Subdomain_takeovers",
];
const ORG_POLICY_REFERENCES: &[&str] =
    &["https://cloud.google.com/resource-manager/docs/organization-policy/org-policy-constraints"];

fn org_projects() -> Chain {
    Chain::of(OrganizationInfo::new()).then(OrganizationProjectList::new())
}

pub fn register_builtin(registry: &mut Registry) -> Result<(), RegistryError> {
    let modules = [
        Module::new(
            ModuleKey::gcp("recon", "list-resources"),
            "List Resources",
            "Enumerate resources of the selected kinds across an organization, folder or project",
            || Chain::of(ScopeRouter::new(Route::Projects)).then(ProjectFanOut::listing()),
        )
        .with_opsec(Opsec::Low),
        Module::new(
            ModuleKey::gcp("secrets", "find-secrets"),
            "Find Secrets",
            "Collect secret-bearing content (metadata, env vars, source, objects) and scan it \
             for credentials",
            || {
                Chain::of(ScopeRouter::new(Route::Projects))
                    .then(ProjectFanOut::secrets())
                    .then(SecretScanLink::new())
            },
        )
        .with_opsec(Opsec::Moderate),
        Module::new(
            ModuleKey::gcp("analyze", "subdomain-takeover"),
            "Subdomain Takeover",
            "Find DNS records that point at deleted or unclaimed Google Cloud resources",
            || Chain::of(ScopeRouter::new(Route::Node)).then(SubdomainTakeoverAnalyzer::new()),
        )
        .with_opsec(Opsec::Low)
        .with_references(TAKEOVER_REFERENCES)
        .findings(),
        Module::new(
            ModuleKey::gcp("analyze", "primitive-roles"),
            "Primitive Roles",
            "Report owner, editor and viewer grants on projects",
            || org_projects().then(ProjectIamPolicy::new()).then(PrimitiveRolesAnalyzer::new()),
        )
        .with_references(IAM_REFERENCES)
        .findings(),
        Module::new(
            ModuleKey::gcp("analyze", "default-service-accounts"),
            "Default Service Accounts",
            "Report default compute and App Engine service accounts holding basic roles",
            || {
                org_projects()
                    .then(ProjectIamPolicy::new())
                    .then(DefaultServiceAccountAnalyzer::new())
            },
        )
        .with_references(IAM_REFERENCES)
        .findings(),
        Module::new(
            ModuleKey::gcp("analyze", "overprivileged-principals"),
            "Overprivileged Principals",
            "Join project IAM policies with instance service accounts to find broad grants",
            || {
                let inputs = Multi::new(vec![
                    Chain::of(ProjectIamPolicy::new()),
                    Chain::of(ProjectLink::new(InstanceLister))
                        .then(InstanceServiceAccounts::new()),
                ])
                .with_strictness(Strictness::Lax);
                org_projects()
                    .then(MultiLink::new("gcp-overprivileged-inputs", inputs))
                    .then(OverprivilegedAnalyzer::new())
            },
        )
        .with_opsec(Opsec::Low)
        .with_references(IAM_REFERENCES)
        .findings(),
        Module::new(
            ModuleKey::gcp("analyze", "org-policy-constraints"),
            "Organization Policy Constraints",
            "Compare effective organization policies against a security baseline",
            || {
                Chain::of(ScopeRouter::new(Route::Tree))
                    .then(ConstraintCollector::new())
                    .then(ConstraintAnalyzer::new())
            },
        )
        .with_references(ORG_POLICY_REFERENCES)
        .findings(),
        Module::new(
            ModuleKey::gcp("recon", "buckets-list"),
            "Buckets",
            "List the storage buckets of one project",
            || Chain::of(ProjectInfo::new()).then(ProjectLink::new(BucketLister)),
        ),
        Module::new(
            ModuleKey::gcp("recon", "sql-instances-list"),
            "SQL Instances",
            "List the Cloud SQL instances of one project",
            || Chain::of(ProjectInfo::new()).then(ProjectLink::new(SqlInstanceLister)),
        ),
        Module::new(
            ModuleKey::gcp("recon", "networking-list"),
            "Networking",
            "List forwarding rules, addresses and DNS zones of one project",
            || Chain::of(ProjectInfo::new()).then(networking_fan_out()),
        ),
        Module::new(
            ModuleKey::gcp("recon", "bucket-info"),
            "Bucket",
            "Fetch one storage bucket with its public access annotations",
            || Chain::of(BucketInfo::new()),
        ),
        Module::new(
            ModuleKey::gcp("recon", "instance-info"),
            "Compute Instance",
            "Fetch one compute instance with its addresses and service accounts",
            || Chain::of(InstanceInfo::new()),
        ),
        Module::new(
            ModuleKey::gcp("recon", "appengine-info"),
            "App Engine Version",
            "Fetch one App Engine version and its public URL",
            || Chain::of(AppEngineInfo::new()),
        ),
        Module::new(
            ModuleKey::gcp("recon", "cloud-run-info"),
            "Cloud Run Service",
            "Fetch one Cloud Run service with its invoker annotations",
            || Chain::of(CloudRunInfo::new()),
        ),
        Module::new(
            ModuleKey::gcp("recon", "organizations-list"),
            "Organizations",
            "List every organization visible to the caller",
            || Chain::of(OrganizationList::new()),
        ),
    ];
    for module in modules {
        registry.register(module)?;
    }
    Ok(())
}

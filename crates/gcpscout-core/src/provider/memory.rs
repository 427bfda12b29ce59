//! In-memory provider backed by a JSON snapshot. Drives offline runs (`--snapshot`) and
//! every pipeline test; records each call so tests can assert what was touched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use super::{ClientFactory, GcpServices};
use crate::clients::{
    short_name, Address, AppEngineApi, AppService, Application, ArtifactRegistryApi, Bucket,
    CloudFunction, ComputeApi, DatabaseInstance, DnsApi, DockerImage, Downloader,
    FirebaseHostingApi, Folder, ForwardingRule, FunctionsApi, IamPolicy, Instance, Location,
    ManagedZone, OrgPolicyApi, Organization, Policy, Project, Region, Repository,
    ResourceManagerApi, ResourceRecordSet, RunApi, RunService, Site, SqlApi, StorageApi,
    StorageObject, Version, Zone,
};
use crate::clients::resourcemanager::ProjectParent;
use crate::errors::ApiError;
use crate::pipeline::Args;

/// Everything the fake provider can answer, keyed the way the services address it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CloudSnapshot {
    pub organizations: Vec<Organization>,
    pub folders: Vec<Folder>,
    pub projects: Vec<Project>,
    /// project id → policy
    pub project_policies: BTreeMap<String, IamPolicy>,
    /// project id → buckets
    pub buckets: BTreeMap<String, Vec<Bucket>>,
    /// bucket → policy
    pub bucket_policies: BTreeMap<String, IamPolicy>,
    /// bucket → objects
    pub objects: BTreeMap<String, Vec<StorageObject>>,
    /// `bucket/object` → body
    pub object_contents: BTreeMap<String, String>,
    pub zones: BTreeMap<String, Vec<Zone>>,
    pub regions: BTreeMap<String, Vec<Region>>,
    pub instances: BTreeMap<String, Vec<Instance>>,
    pub global_forwarding_rules: BTreeMap<String, Vec<ForwardingRule>>,
    pub forwarding_rules: BTreeMap<String, Vec<ForwardingRule>>,
    pub global_addresses: BTreeMap<String, Vec<Address>>,
    pub addresses: BTreeMap<String, Vec<Address>>,
    pub managed_zones: BTreeMap<String, Vec<ManagedZone>>,
    /// `project/zone` → record sets
    pub record_sets: BTreeMap<String, Vec<ResourceRecordSet>>,
    pub sql_instances: BTreeMap<String, Vec<DatabaseInstance>>,
    pub functions: BTreeMap<String, Vec<CloudFunction>>,
    /// function name → policy
    pub function_policies: BTreeMap<String, IamPolicy>,
    pub run_services: BTreeMap<String, Vec<RunService>>,
    /// service name → policy
    pub run_policies: BTreeMap<String, IamPolicy>,
    pub applications: BTreeMap<String, Application>,
    pub app_services: BTreeMap<String, Vec<AppService>>,
    /// `project/service` → versions
    pub app_versions: BTreeMap<String, Vec<Version>>,
    pub artifact_locations: BTreeMap<String, Vec<Location>>,
    pub repositories: BTreeMap<String, Vec<Repository>>,
    /// repository name → images
    pub docker_images: BTreeMap<String, Vec<DockerImage>>,
    /// `resource/constraint` → effective policy
    pub effective_policies: BTreeMap<String, Policy>,
    /// `resource/constraint` → policy set at that level
    pub policies: BTreeMap<String, Policy>,
    pub sites: BTreeMap<String, Vec<Site>>,
    /// url → base64 body
    pub downloads: BTreeMap<String, String>,
}

#[derive(Clone, Default)]
pub struct MemoryCloud {
    state: Arc<RwLock<CloudSnapshot>>,
    failures: Arc<Mutex<HashMap<String, ApiError>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

fn not_found(what: &str) -> anyhow::Error {
    ApiError {
        status: 404,
        status_text: Some("NOT_FOUND".to_string()),
        reason: Some("notFound".to_string()),
        message: format!("The resource '{}' was not found", what),
    }
    .into()
}

impl MemoryCloud {
    pub fn new(snapshot: CloudSnapshot) -> Self {
        Self { state: Arc::new(RwLock::new(snapshot)), ..Default::default() }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let snapshot: CloudSnapshot =
            serde_json::from_str(content).context("Failed to parse cloud snapshot")?;
        Ok(Self::new(snapshot))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Mutate the snapshot in place.
    pub fn with(self, edit: impl FnOnce(&mut CloudSnapshot)) -> Self {
        if let Ok(mut state) = self.state.write() {
            edit(&mut state);
        }
        self
    }

    pub fn with_organization(self, id: &str, display_name: &str) -> Self {
        self.with(|s| {
            s.organizations.push(Organization {
                name: format!("organizations/{}", id),
                display_name: display_name.to_string(),
                lifecycle_state: "ACTIVE".to_string(),
                ..Default::default()
            })
        })
    }

    pub fn with_folder(self, id: &str, parent: &str, display_name: &str) -> Self {
        self.with(|s| {
            s.folders.push(Folder {
                name: format!("folders/{}", id),
                parent: parent.to_string(),
                display_name: display_name.to_string(),
                lifecycle_state: "ACTIVE".to_string(),
                ..Default::default()
            })
        })
    }

    /// `parent` is `organizations/<id>` or `folders/<id>`.
    pub fn with_project(self, id: &str, state: &str, parent: &str) -> Self {
        let parent = parent.split_once('/').map(|(kind, pid)| ProjectParent {
            kind: kind.trim_end_matches('s').to_string(),
            id: pid.to_string(),
        });
        self.with(|s| {
            s.projects.push(Project {
                project_id: id.to_string(),
                name: id.to_string(),
                project_number: format!("{}", 100_000 + s.projects.len()),
                lifecycle_state: state.to_string(),
                parent,
                ..Default::default()
            })
        })
    }

    pub fn with_project_policy(self, project: &str, policy: IamPolicy) -> Self {
        self.with(|s| {
            s.project_policies.insert(project.to_string(), policy);
        })
    }

    pub fn with_bucket(self, project: &str, bucket: Bucket) -> Self {
        self.with(|s| s.buckets.entry(project.to_string()).or_default().push(bucket))
    }

    /// Add an instance and make sure its zone (and region) are listed.
    pub fn with_instance(self, project: &str, zone: &str, mut instance: Instance) -> Self {
        instance.zone = zone.to_string();
        let region = zone.rsplit_once('-').map(|(r, _)| r.to_string()).unwrap_or_default();
        self.with(|s| {
            let zones = s.zones.entry(project.to_string()).or_default();
            if !zones.iter().any(|z| z.name == zone) {
                zones.push(Zone {
                    name: zone.to_string(),
                    region: region.clone(),
                    status: "UP".to_string(),
                });
            }
            s.instances.entry(project.to_string()).or_default().push(instance);
        })
    }

    pub fn with_download(self, url: &str, body: &[u8]) -> Self {
        let encoded = STANDARD.encode(body);
        self.with(|s| {
            s.downloads.insert(url.to_string(), encoded);
        })
    }

    /// Make `op` fail for `target` (`*` for every target).
    pub fn fail(self, op: &str, target: &str, error: ApiError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(format!("{} {}", op, target), error);
        }
        self
    }

    /// Every call so far as `"<op> <target>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> CloudSnapshot {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn call(&self, op: &str, target: &str) -> Result<()> {
        let key = format!("{} {}", op, target);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }
        let failures = match self.failures.lock() {
            Ok(f) => f,
            Err(_) => return Ok(()),
        };
        match failures.get(&key).or_else(|| failures.get(&format!("{} *", op))) {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&CloudSnapshot) -> T) -> Result<T> {
        let state = self
            .state
            .read()
            .map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?;
        Ok(f(&state))
    }

    fn listed<T: Clone>(map: &BTreeMap<String, Vec<T>>, key: &str) -> Vec<T> {
        map.get(key).cloned().unwrap_or_default()
    }

    fn services_for(&self) -> GcpServices {
        let this = Arc::new(self.clone());
        GcpServices {
            resource_manager: this.clone(),
            storage: this.clone(),
            compute: this.clone(),
            dns: this.clone(),
            sql: this.clone(),
            functions: this.clone(),
            run: this.clone(),
            appengine: this.clone(),
            artifacts: this.clone(),
            org_policy: this.clone(),
            firebase: this.clone(),
            downloader: this,
        }
    }
}

#[async_trait]
impl ClientFactory for MemoryCloud {
    async fn services(&self, _args: &Args) -> Result<GcpServices> {
        Ok(self.services_for())
    }
}

#[async_trait]
impl ResourceManagerApi for MemoryCloud {
    async fn get_organization(&self, org_id: &str) -> Result<Organization> {
        let name = format!("organizations/{}", org_id.trim_start_matches("organizations/"));
        self.call("resourcemanager.organizations.get", &name)?;
        self.read(|s| s.organizations.iter().find(|o| o.name == name).cloned())?
            .ok_or_else(|| not_found(&name))
    }

    async fn search_organizations(&self) -> Result<Vec<Organization>> {
        self.call("resourcemanager.organizations.search", "")?;
        self.read(|s| s.organizations.clone())
    }

    async fn get_folder(&self, folder_id: &str) -> Result<Folder> {
        let name = format!("folders/{}", folder_id.trim_start_matches("folders/"));
        self.call("resourcemanager.folders.get", &name)?;
        self.read(|s| s.folders.iter().find(|f| f.name == name).cloned())?
            .ok_or_else(|| not_found(&name))
    }

    async fn list_folders(&self, parent: &str) -> Result<Vec<Folder>> {
        self.call("resourcemanager.folders.list", parent)?;
        self.read(|s| s.folders.iter().filter(|f| f.parent == parent).cloned().collect())
    }

    async fn get_project(&self, project_id: &str) -> Result<Project> {
        self.call("resourcemanager.projects.get", project_id)?;
        self.read(|s| s.projects.iter().find(|p| p.project_id == project_id).cloned())?
            .ok_or_else(|| not_found(&format!("projects/{}", project_id)))
    }

    async fn list_projects(&self, _filter: Option<&str>) -> Result<Vec<Project>> {
        self.call("resourcemanager.projects.list", "")?;
        self.read(|s| s.projects.clone())
    }

    async fn list_projects_by_parent(&self, parent: &str) -> Result<Vec<Project>> {
        self.call("resourcemanager.projects.list", parent)?;
        self.read(|s| {
            s.projects
                .iter()
                .filter(|p| p.parent_path().as_deref() == Some(parent))
                .cloned()
                .collect()
        })
    }

    async fn get_project_iam_policy(&self, project_id: &str) -> Result<IamPolicy> {
        self.call("resourcemanager.projects.getIamPolicy", project_id)?;
        self.read(|s| s.project_policies.get(project_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl StorageApi for MemoryCloud {
    async fn list_buckets(&self, project_id: &str) -> Result<Vec<Bucket>> {
        self.call("storage.buckets.list", project_id)?;
        self.read(|s| Self::listed(&s.buckets, project_id))
    }

    async fn get_bucket(&self, bucket: &str) -> Result<Bucket> {
        self.call("storage.buckets.get", bucket)?;
        self.read(|s| s.buckets.values().flatten().find(|b| b.name == bucket).cloned())?
            .ok_or_else(|| not_found(&format!("b/{}", bucket)))
    }

    async fn get_bucket_iam_policy(&self, bucket: &str) -> Result<IamPolicy> {
        self.call("storage.buckets.getIamPolicy", bucket)?;
        self.read(|s| s.bucket_policies.get(bucket).cloned().unwrap_or_default())
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<StorageObject>> {
        self.call("storage.objects.list", bucket)?;
        self.read(|s| Self::listed(&s.objects, bucket))
    }

    async fn download_object(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        let key = format!("{}/{}", bucket, object);
        self.call("storage.objects.get", &key)?;
        self.read(|s| s.object_contents.get(&key).map(|c| c.as_bytes().to_vec()))?
            .ok_or_else(|| not_found(&key))
    }
}

#[async_trait]
impl ComputeApi for MemoryCloud {
    async fn list_zones(&self, project_id: &str) -> Result<Vec<Zone>> {
        self.call("compute.zones.list", project_id)?;
        self.read(|s| Self::listed(&s.zones, project_id))
    }

    async fn list_regions(&self, project_id: &str) -> Result<Vec<Region>> {
        self.call("compute.regions.list", project_id)?;
        self.read(|s| Self::listed(&s.regions, project_id))
    }

    async fn list_instances(&self, project_id: &str, zone: &str) -> Result<Vec<Instance>> {
        self.call("compute.instances.list", &format!("{}/{}", project_id, zone))?;
        self.read(|s| {
            Self::listed(&s.instances, project_id)
                .into_iter()
                .filter(|i| i.zone_name() == zone)
                .collect()
        })
    }

    async fn get_instance(&self, project_id: &str, zone: &str, name: &str) -> Result<Instance> {
        let key = format!("{}/{}/{}", project_id, zone, name);
        self.call("compute.instances.get", &key)?;
        self.read(|s| {
            Self::listed(&s.instances, project_id)
                .into_iter()
                .find(|i| i.zone_name() == zone && i.name == name)
        })?
        .ok_or_else(|| not_found(&key))
    }

    async fn list_global_forwarding_rules(&self, project_id: &str) -> Result<Vec<ForwardingRule>> {
        self.call("compute.globalForwardingRules.list", project_id)?;
        self.read(|s| Self::listed(&s.global_forwarding_rules, project_id))
    }

    async fn list_forwarding_rules(
        &self,
        project_id: &str,
        region: &str,
    ) -> Result<Vec<ForwardingRule>> {
        self.call("compute.forwardingRules.list", &format!("{}/{}", project_id, region))?;
        self.read(|s| {
            Self::listed(&s.forwarding_rules, project_id)
                .into_iter()
                .filter(|r| short_name(&r.region) == region)
                .collect()
        })
    }

    async fn list_global_addresses(&self, project_id: &str) -> Result<Vec<Address>> {
        self.call("compute.globalAddresses.list", project_id)?;
        self.read(|s| Self::listed(&s.global_addresses, project_id))
    }

    async fn list_addresses(&self, project_id: &str, region: &str) -> Result<Vec<Address>> {
        self.call("compute.addresses.list", &format!("{}/{}", project_id, region))?;
        self.read(|s| {
            Self::listed(&s.addresses, project_id)
                .into_iter()
                .filter(|a| short_name(&a.region) == region)
                .collect()
        })
    }

    async fn aggregated_addresses(&self, project_id: &str) -> Result<Vec<Address>> {
        self.call("compute.addresses.aggregatedList", project_id)?;
        self.read(|s| {
            let mut all = Self::listed(&s.global_addresses, project_id);
            all.extend(Self::listed(&s.addresses, project_id));
            all
        })
    }
}

#[async_trait]
impl DnsApi for MemoryCloud {
    async fn list_managed_zones(&self, project_id: &str) -> Result<Vec<ManagedZone>> {
        self.call("dns.managedZones.list", project_id)?;
        self.read(|s| Self::listed(&s.managed_zones, project_id))
    }

    async fn list_record_sets(
        &self,
        project_id: &str,
        zone: &str,
    ) -> Result<Vec<ResourceRecordSet>> {
        let key = format!("{}/{}", project_id, zone);
        self.call("dns.resourceRecordSets.list", &key)?;
        self.read(|s| Self::listed(&s.record_sets, &key))
    }
}

#[async_trait]
impl SqlApi for MemoryCloud {
    async fn list_instances(&self, project_id: &str) -> Result<Vec<DatabaseInstance>> {
        self.call("cloudsql.instances.list", project_id)?;
        self.read(|s| Self::listed(&s.sql_instances, project_id))
    }
}

#[async_trait]
impl FunctionsApi for MemoryCloud {
    async fn list_functions(&self, project_id: &str) -> Result<Vec<CloudFunction>> {
        self.call("cloudfunctions.functions.list", project_id)?;
        self.read(|s| Self::listed(&s.functions, project_id))
    }

    async fn get_function(&self, name: &str) -> Result<CloudFunction> {
        self.call("cloudfunctions.functions.get", name)?;
        self.read(|s| s.functions.values().flatten().find(|f| f.name == name).cloned())?
            .ok_or_else(|| not_found(name))
    }

    async fn get_function_iam_policy(&self, name: &str) -> Result<IamPolicy> {
        self.call("cloudfunctions.functions.getIamPolicy", name)?;
        self.read(|s| s.function_policies.get(name).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RunApi for MemoryCloud {
    async fn list_services(&self, project_id: &str, location: &str) -> Result<Vec<RunService>> {
        self.call("run.services.list", &format!("{}/{}", project_id, location))?;
        self.read(|s| {
            Self::listed(&s.run_services, project_id)
                .into_iter()
                .filter(|svc| location == "-" || svc.region() == location)
                .collect()
        })
    }

    async fn get_service(&self, name: &str) -> Result<RunService> {
        self.call("run.services.get", name)?;
        self.read(|s| s.run_services.values().flatten().find(|svc| svc.name == name).cloned())?
            .ok_or_else(|| not_found(name))
    }

    async fn get_service_iam_policy(&self, name: &str) -> Result<IamPolicy> {
        self.call("run.services.getIamPolicy", name)?;
        self.read(|s| s.run_policies.get(name).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AppEngineApi for MemoryCloud {
    async fn get_application(&self, project_id: &str) -> Result<Application> {
        self.call("appengine.applications.get", project_id)?;
        self.read(|s| s.applications.get(project_id).cloned())?
            .ok_or_else(|| not_found(&format!("apps/{}", project_id)))
    }

    async fn list_services(&self, project_id: &str) -> Result<Vec<AppService>> {
        self.call("appengine.services.list", project_id)?;
        self.read(|s| Self::listed(&s.app_services, project_id))
    }

    async fn list_versions(&self, project_id: &str, service: &str) -> Result<Vec<Version>> {
        let key = format!("{}/{}", project_id, service);
        self.call("appengine.versions.list", &key)?;
        self.read(|s| Self::listed(&s.app_versions, &key))
    }

    async fn get_version(&self, project_id: &str, service: &str, version: &str) -> Result<Version> {
        let key = format!("{}/{}", project_id, service);
        self.call("appengine.versions.get", &format!("{}/{}", key, version))?;
        self.read(|s| Self::listed(&s.app_versions, &key).into_iter().find(|v| v.id == version))?
            .ok_or_else(|| {
                not_found(&format!("apps/{}/services/{}/versions/{}", project_id, service, version))
            })
    }
}

#[async_trait]
impl ArtifactRegistryApi for MemoryCloud {
    async fn list_locations(&self, project_id: &str) -> Result<Vec<Location>> {
        self.call("artifactregistry.locations.list", project_id)?;
        self.read(|s| Self::listed(&s.artifact_locations, project_id))
    }

    async fn list_repositories(&self, project_id: &str, location: &str) -> Result<Vec<Repository>> {
        self.call("artifactregistry.repositories.list", &format!("{}/{}", project_id, location))?;
        let marker = format!("/locations/{}/", location);
        self.read(|s| {
            Self::listed(&s.repositories, project_id)
                .into_iter()
                .filter(|r| r.name.contains(&marker))
                .collect()
        })
    }

    async fn list_docker_images(&self, repository: &str) -> Result<Vec<DockerImage>> {
        self.call("artifactregistry.dockerimages.list", repository)?;
        self.read(|s| Self::listed(&s.docker_images, repository))
    }
}

#[async_trait]
impl OrgPolicyApi for MemoryCloud {
    async fn get_effective_policy(&self, resource: &str, constraint: &str) -> Result<Policy> {
        let key = format!("{}/{}", resource, constraint);
        self.call("orgpolicy.policies.getEffectivePolicy", &key)?;
        self.read(|s| s.effective_policies.get(&key).cloned().unwrap_or_default())
    }

    async fn get_policy(&self, resource: &str, constraint: &str) -> Result<Policy> {
        let key = format!("{}/{}", resource, constraint);
        self.call("orgpolicy.policies.get", &key)?;
        self.read(|s| s.policies.get(&key).cloned())?
            .ok_or_else(|| not_found(&format!("{}/policies/{}", resource, constraint)))
    }
}

#[async_trait]
impl FirebaseHostingApi for MemoryCloud {
    async fn list_sites(&self, project_id: &str) -> Result<Vec<Site>> {
        self.call("firebasehosting.sites.list", project_id)?;
        self.read(|s| Self::listed(&s.sites, project_id))
    }
}

#[async_trait]
impl Downloader for MemoryCloud {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.call("http.get", url)?;
        let encoded = self
            .read(|s| s.downloads.get(url).cloned())?
            .ok_or_else(|| not_found(url))?;
        STANDARD.decode(encoded).context("snapshot download is not valid base64")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::is_not_found;

    #[tokio::test]
    async fn test_lookup_and_call_log() {
        let cloud = MemoryCloud::default()
            .with_organization("1234", "Acme")
            .with_project("alpha", "ACTIVE", "organizations/1234");
        let org = cloud.get_organization("organizations/1234").await.unwrap();
        assert_eq!(org.display_name, "Acme");
        let projects = cloud.list_projects_by_parent("organizations/1234").await.unwrap();
        assert_eq!(projects.len(), 1);
        let err = cloud.get_project("nope").await.unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(
            cloud.calls(),
            vec![
                "resourcemanager.organizations.get organizations/1234",
                "resourcemanager.projects.list organizations/1234",
                "resourcemanager.projects.get nope",
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cloud = MemoryCloud::default().fail(
            "storage.buckets.list",
            "*",
            ApiError { status: 403, status_text: None, reason: None, message: "denied".into() },
        );
        let err = cloud.list_buckets("alpha").await.unwrap_err();
        assert!(err.to_string().contains("Error 403"));
    }

    #[test]
    fn test_snapshot_from_json() {
        let cloud = MemoryCloud::from_json(
            r#"{"projects":[{"projectId":"alpha","lifecycleState":"ACTIVE"}],
                "buckets":{"alpha":[{"name":"b1","location":"US"}]}}"#,
        )
        .unwrap();
        let snap = cloud.snapshot();
        assert_eq!(snap.projects[0].project_id, "alpha");
        assert_eq!(snap.buckets["alpha"][0].location, "US");
    }
}

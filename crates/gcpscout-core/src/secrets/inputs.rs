use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use tracing::{debug, error};

use super::{skip_archive_entry, skip_object};
use crate::clients::{Instance, RunService};
use crate::errors::handle_gcp_error;
use crate::pipeline::{Accepts, Link, LinkContext, Message, Outlet, Param};
use crate::provider::{options, GcpBase, GcpServices};
use crate::record::{ImageRef, NpInput, ObjectRef, Provenance, Resource, ResourceType};

/// Source-archive entries above this size are skipped.
pub const MAX_ARCHIVE_ENTRY: u64 = 1024 * 1024;

const OBJECT_TYPE: &str = "storage.googleapis.com/Object";

fn np_type(kind: ResourceType, facet: &str) -> String {
    format!("{}::{}", kind.as_str(), facet)
}

fn env_json(env: &BTreeMap<String, String>) -> Option<String> {
    if env.is_empty() {
        return None;
    }
    serde_json::to_string(env).ok()
}

/// Turns one resource record into scanner inputs.
#[async_trait]
pub trait SecretSource: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn kinds(&self) -> &'static [ResourceType];

    async fn inputs(&self, services: &GcpServices, record: &Resource) -> Result<Vec<NpInput>>;
}

/// Link adapter for a [`SecretSource`]. A failing record is logged and skipped.
pub struct SecretLink<S> {
    source: S,
    base: GcpBase,
}

impl<S: SecretSource> SecretLink<S> {
    pub fn new(source: S) -> Self {
        Self { source, base: GcpBase::default() }
    }
}

#[async_trait]
impl<S: SecretSource> Link for SecretLink<S> {
    fn name(&self) -> &'static str {
        self.source.name()
    }

    fn params(&self) -> Vec<Param> {
        GcpBase::params()
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(self.source.kinds())
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(record) = input.as_resource() else { return Ok(()) };
        let services = self.base.services()?;
        match self.source.inputs(services, record).await {
            Ok(inputs) => {
                debug!(resource = %record.name, count = inputs.len(), "extracted scanner inputs");
                for input in inputs {
                    out.send(input).await?;
                }
            }
            Err(e) => error!(
                resource = %record.name,
                error = %format!("{:#}", e),
                "failed to extract secrets"
            ),
        }
        Ok(())
    }
}

/// Metadata items with a value, one block per key.
pub fn metadata_content(instance: &Instance) -> String {
    let mut content = String::new();
    for item in instance.metadata.iter().flat_map(|m| &m.items) {
        if let Some(value) = item.value.as_deref().filter(|v| !v.is_empty()) {
            content.push_str(&format!("GCP Instance Metadata: {}\n{}\n\n", item.key, value));
        }
    }
    content
}

#[derive(Default)]
pub struct InstanceSecrets;

#[async_trait]
impl SecretSource for InstanceSecrets {
    fn name(&self) -> &'static str {
        "gcp-instance-secrets"
    }

    fn kinds(&self) -> &'static [ResourceType] {
        &[ResourceType::ComputeInstance]
    }

    async fn inputs(&self, services: &GcpServices, record: &Resource) -> Result<Vec<NpInput>> {
        let zone = record.prop_str("zone").unwrap_or_default();
        if zone.is_empty() {
            return Ok(Vec::new());
        }
        let instance = services
            .compute
            .get_instance(&record.account_ref, zone, &record.name)
            .await
            .map_err(|e| handle_gcp_error(e, "failed to get instance for secrets extraction"))?;
        let content = metadata_content(&instance);
        if content.is_empty() {
            return Ok(Vec::new());
        }
        let kind = np_type(ResourceType::ComputeInstance, "Metadata");
        let provenance = Provenance::cloud(kind, &record.name)
            .region(zone)
            .account(&record.account_ref);
        Ok(vec![NpInput::text(content, provenance)])
    }
}

/// Text files of a function source archive. Directories, compiled or binary files and
/// entries over [`MAX_ARCHIVE_ENTRY`] are skipped.
pub fn archive_inputs(archive: &[u8], record: &Resource, function: &str) -> Result<Vec<NpInput>> {
    let mut zip =
        zip::ZipArchive::new(Cursor::new(archive)).context("failed to open source archive")?;
    let mut inputs = Vec::new();
    for i in 0..zip.len() {
        let mut entry = match zip.by_index(i) {
            Ok(e) => e,
            Err(e) => {
                error!(function = %function, index = i, error = %e, "failed to open archive entry");
                continue;
            }
        };
        if entry.is_dir() || skip_archive_entry(entry.name()) || entry.size() > MAX_ARCHIVE_ENTRY {
            continue;
        }
        let path = entry.name().to_string();
        let mut content = Vec::new();
        if let Err(e) = entry.read_to_end(&mut content) {
            error!(function = %function, file = %path, error = %e, "failed to read archive entry");
            continue;
        }
        let kind = np_type(ResourceType::Function, "SourceCode");
        let provenance = Provenance::cloud(kind, format!("{}/{}", function, path))
            .region(&record.region)
            .account(&record.account_ref);
        inputs.push(NpInput::text(String::from_utf8_lossy(&content).into_owned(), provenance));
    }
    Ok(inputs)
}

#[derive(Default)]
pub struct FunctionSecrets;

#[async_trait]
impl SecretSource for FunctionSecrets {
    fn name(&self) -> &'static str {
        "gcp-function-secrets"
    }

    fn kinds(&self) -> &'static [ResourceType] {
        &[ResourceType::Function]
    }

    async fn inputs(&self, services: &GcpServices, record: &Resource) -> Result<Vec<NpInput>> {
        let full_name = record.prop_str("fullName").unwrap_or(&record.name);
        let function = services
            .functions
            .get_function(full_name)
            .await
            .map_err(|e| {
                handle_gcp_error(e, "failed to get cloud function for secrets extraction")
            })?;
        let mut inputs = Vec::new();
        if let Some(env) = env_json(&function.environment_variables) {
            let kind = np_type(ResourceType::Function, "EnvVariables");
            let provenance = Provenance::cloud(kind, full_name)
                .region(&record.region)
                .account(&record.account_ref);
            inputs.push(NpInput::text(env, provenance));
        }
        if !function.source_archive_url.is_empty() {
            let scanned = match services.downloader.fetch(&function.source_archive_url).await {
                Ok(archive) => archive_inputs(&archive, record, full_name),
                Err(e) => Err(e.context("failed to download source archive")),
            };
            match scanned {
                Ok(files) => inputs.extend(files),
                Err(e) => error!(
                    function = %full_name,
                    error = %format!("{:#}", e),
                    "failed to scan function source code"
                ),
            }
        }
        Ok(inputs)
    }
}

/// Env JSON and the joined command line of every container.
pub fn run_inputs(service: &RunService, record: &Resource) -> Vec<NpInput> {
    let provenance = |facet: &str| {
        Provenance::cloud(np_type(ResourceType::RunService, facet), &service.name)
            .region(&record.region)
            .account(&record.account_ref)
    };
    let mut inputs = Vec::new();
    for container in service.template.iter().flat_map(|t| &t.containers) {
        if !container.env.is_empty() {
            if let Ok(env) = serde_json::to_string(&container.env) {
                inputs.push(NpInput::text(env, provenance("EnvVariables")));
            }
        }
        let command: Vec<&str> = container
            .command
            .iter()
            .chain(&container.args)
            .map(String::as_str)
            .collect();
        if !command.is_empty() {
            inputs.push(NpInput::text(command.join(" "), provenance("Command")));
        }
    }
    inputs
}

#[derive(Default)]
pub struct RunSecrets;

#[async_trait]
impl SecretSource for RunSecrets {
    fn name(&self) -> &'static str {
        "gcp-cloud-run-secrets"
    }

    fn kinds(&self) -> &'static [ResourceType] {
        &[ResourceType::RunService]
    }

    async fn inputs(&self, services: &GcpServices, record: &Resource) -> Result<Vec<NpInput>> {
        let full_name = record.prop_str("fullName").unwrap_or(&record.name);
        let service = services
            .run
            .get_service(full_name)
            .await
            .map_err(|e| {
                handle_gcp_error(e, "failed to get cloud run service for secrets extraction")
            })?;
        Ok(run_inputs(&service, record))
    }
}

#[derive(Default)]
pub struct AppEngineSecrets;

#[async_trait]
impl SecretSource for AppEngineSecrets {
    fn name(&self) -> &'static str {
        "gcp-app-engine-secrets"
    }

    fn kinds(&self) -> &'static [ResourceType] {
        &[ResourceType::AppEngineApp]
    }

    async fn inputs(&self, services: &GcpServices, record: &Resource) -> Result<Vec<NpInput>> {
        let project = record.account_ref.as_str();
        let (Some(service), Some(version)) =
            (record.prop_str("service"), record.prop_str("version"))
        else {
            return Ok(Vec::new());
        };
        let found = services
            .appengine
            .get_version(project, service, version)
            .await
            .map_err(|e| {
                handle_gcp_error(e, "failed to get app engine version for secrets extraction")
            })?;
        let Some(env) = env_json(&found.env_variables) else { return Ok(Vec::new()) };
        let id = format!("projects/{}/services/{}/versions/{}", project, service, version);
        let provenance = Provenance::cloud(np_type(ResourceType::AppEngineApp, "EnvVariables"), id)
            .region(&record.region)
            .account(project);
        Ok(vec![NpInput::text(env, provenance)])
    }
}

/// Downloads bucket objects for scanning.
pub struct ObjectSecrets {
    base: GcpBase,
    max_file_size: u64,
}

impl Default for ObjectSecrets {
    fn default() -> Self {
        Self { base: GcpBase::default(), max_file_size: options::DEFAULT_MAX_FILE_SIZE as u64 }
    }
}

impl ObjectSecrets {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn object_provenance(object: &ObjectRef) -> Provenance {
    let id = format!("{}/{}", object.bucket, object.name);
    Provenance::file(OBJECT_TYPE, &id)
        .region(&object.location)
        .account(&object.project)
        .repo_path(format!("gs://{}", id))
}

#[async_trait]
impl Link for ObjectSecrets {
    fn name(&self) -> &'static str {
        "gcp-object-secrets"
    }

    fn params(&self) -> Vec<Param> {
        let mut params = GcpBase::params();
        params.push(options::max_file_size());
        params
    }

    fn accepts(&self) -> Accepts {
        Accepts::Objects
    }

    async fn initialize(&mut self, ctx: &LinkContext) -> Result<()> {
        self.base.initialize(ctx).await?;
        if let Some(size) = self.base.args().int("max-file-size").filter(|s| *s > 0) {
            self.max_file_size = size as u64;
        }
        Ok(())
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Message::Object(object) = input else { return Ok(()) };
        if object.size > self.max_file_size {
            debug!(
                bucket = %object.bucket,
                object = %object.name,
                size = object.size,
                "skipping large object"
            );
            return Ok(());
        }
        if skip_object(&object.name) {
            debug!(bucket = %object.bucket, object = %object.name, "skipping binary file");
            return Ok(());
        }
        let services = self.base.services()?;
        match services.storage.download_object(&object.bucket, &object.name).await {
            Ok(content) => {
                out.send(NpInput::from_bytes(&content, object_provenance(&object))).await
            }
            Err(e) => {
                error!(
                    bucket = %object.bucket,
                    object = %object.name,
                    error = %format!("{:#}", e),
                    "failed to download object"
                );
                Ok(())
            }
        }
    }
}

/// Container images are handed to an image scanner by reference.
#[derive(Default)]
pub struct ContainerImageSecrets;

impl ContainerImageSecrets {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Link for ContainerImageSecrets {
    fn name(&self) -> &'static str {
        "gcp-container-image-secrets"
    }

    fn accepts(&self) -> Accepts {
        Accepts::Resources(&[ResourceType::ContainerImage])
    }

    async fn process(&mut self, input: Message, out: &Outlet) -> Result<()> {
        let Some(record) = input.as_resource() else { return Ok(()) };
        let uri = record.prop_str("uri").filter(|u| !u.is_empty()).unwrap_or(&record.name);
        out.send(ImageRef::from_uri(uri, &record.account_ref)).await
    }
}

pub mod clients;
pub mod config;
pub mod errors;
pub mod finding;
pub mod hierarchy;
pub mod listers;
pub mod pipeline;
pub mod provider;
pub mod record;
pub mod registry;
pub mod router;
pub mod rules;
pub mod secrets;

pub use config::{LogFormat, ScoutConfig};
pub use errors::{ApiError, ReconError, ResourceError};
pub use finding::{Finding, FindingKind, Severity};
pub use pipeline::{Args, Chain, Link, LinkContext, Message};
pub use provider::{ClientFactory, MemoryCloud, RestClientFactory};
pub use record::{NpInput, Resource, ResourceType, ScopeConfig, ScopeKind};
pub use registry::{Module, ModuleKey, OutputKind, Registry};
pub use secrets::SecretMatch;

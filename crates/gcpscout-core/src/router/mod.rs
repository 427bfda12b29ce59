//! Routers: entry links that turn scope arguments into hierarchy records and fan each
//! project out to the listers a module needs.

pub mod fanout;
pub mod resource_map;
pub mod scope;

pub use fanout::{FanOut, ProjectFanOut};
pub use resource_map::{lookup, selected_kinds, ALL_TYPES, LIST_ALIASES, SECRETS_ALIASES};
pub use scope::{descendant_folders, projects_under, Route, ScopeRouter};

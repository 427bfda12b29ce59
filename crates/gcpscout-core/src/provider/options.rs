//! Parameters shared by the GCP links.

use crate::pipeline::{Args, Param, DEFAULT_CONCURRENCY};

pub const DEFAULT_MAX_FILE_SIZE: i64 = 10 * 1024 * 1024;

pub fn creds_file() -> Param {
    Param::string(
        "creds-file",
        "Path to a service account key; defaults to application default credentials",
    )
}

pub fn org() -> Param {
    Param::string("org", "Organization id (bare or organizations/<id>)").with_shortcode('o')
}

pub fn folder() -> Param {
    Param::string("folder", "Folder id (bare or folders/<id>)").with_shortcode('f')
}

pub fn project() -> Param {
    Param::string("project", "Project id").with_shortcode('p')
}

pub fn include_sys_projects() -> Param {
    Param::bool("include-sys-projects", "Include system projects (sys-, script-editor-, gcf-, ...)")
        .with_default(false)
}

/// Legacy inverse of `include-sys-projects`; only consulted when set explicitly.
pub fn filter_sys_projects() -> Param {
    Param::bool(
        "filter-sys-projects",
        "Exclude system projects (inverse of --include-sys-projects)",
    )
}

pub fn resource_type() -> Param {
    Param::list("type", "Resource kinds to list, canonical or alias; 'all' disables filtering")
        .with_default("all")
        .with_shortcode('t')
}

pub fn region() -> Param {
    Param::string("region", "Region")
}

pub fn zone() -> Param {
    Param::string("zone", "Zone")
}

pub fn service() -> Param {
    Param::string("service", "Service name")
}

pub fn version() -> Param {
    Param::string("version", "Version id")
}

pub fn max_file_size() -> Param {
    Param::int("max-file-size", "Skip objects larger than this many bytes")
        .with_default(DEFAULT_MAX_FILE_SIZE)
}

pub fn concurrency() -> Param {
    Param::int("concurrency", "Concurrent region/zone workers per project")
        .with_default(DEFAULT_CONCURRENCY)
}

/// Unified system-project toggle: `include-sys-projects` wins; otherwise an explicit
/// `filter-sys-projects` is honored; otherwise system projects are excluded.
pub fn system_projects_included(args: &Args) -> bool {
    if args.bool("include-sys-projects") == Some(true) {
        return true;
    }
    args.bool("filter-sys-projects").map(|filter| !filter).unwrap_or(false)
}

pub fn concurrency_limit(args: &Args) -> usize {
    args.int("concurrency")
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_CONCURRENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_projects_default_excluded() {
        assert!(!system_projects_included(&Args::new()));
        assert!(!system_projects_included(&Args::new().with("include-sys-projects", false)));
    }

    #[test]
    fn test_system_projects_flags() {
        assert!(system_projects_included(&Args::new().with("include-sys-projects", true)));
        assert!(system_projects_included(&Args::new().with("filter-sys-projects", false)));
        assert!(!system_projects_included(&Args::new().with("filter-sys-projects", true)));
        assert!(system_projects_included(
            &Args::new().with("include-sys-projects", true).with("filter-sys-projects", true)
        ));
    }

    #[test]
    fn test_concurrency_limit() {
        assert_eq!(concurrency_limit(&Args::new()), DEFAULT_CONCURRENCY);
        assert_eq!(concurrency_limit(&Args::new().with("concurrency", 3i64)), 3);
        assert_eq!(concurrency_limit(&Args::new().with("concurrency", 0i64)), DEFAULT_CONCURRENCY);
    }
}

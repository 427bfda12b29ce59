pub mod resource_error;

use std::fmt;
use thiserror::Error;

pub use resource_error::{parse_aggregated_list_error, ResourceError};

/// Structured error returned by the REST clients for non-success responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    /// Canonical status string from the error body, e.g. `PERMISSION_DENIED`.
    pub status_text: Option<String>,
    /// First `reason` from the error details, e.g. `SERVICE_DISABLED`.
    pub reason: Option<String>,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "googleapi: Error {}: {}", self.status, self.message)?;
        if let Some(reason) = &self.reason {
            write!(f, ", {}", reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Engine error taxonomy.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("{0}")]
    ServiceDisabled(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    QuotaExceeded(String),
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    BillingDisabled(String),
    #[error("{0}")]
    Unknown(String),
    #[error("{0}")]
    InvalidScope(String),
    #[error(
        "unsupported resource type{}: {name}{}",
        for_secrets_hint(.secrets),
        suggestion_hint(.suggestion)
    )]
    UnsupportedResourceType {
        name: String,
        secrets: bool,
        suggestion: Option<String>,
    },
    #[error("{0}")]
    InvalidRecord(String),
    #[error("missing required parameter: {0}")]
    MissingParam(String),
    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },
    #[error("credentials: {0}")]
    Credentials(String),
    #[error("operation cancelled")]
    Cancelled,
}

fn for_secrets_hint(secrets: &bool) -> &'static str {
    if *secrets {
        " for secrets scanning"
    } else {
        ""
    }
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{}'?)", s),
        None => String::new(),
    }
}

/// Coarse class of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    ServiceDisabled,
    PermissionDenied,
    NotFound,
    QuotaExceeded,
    Transient,
    Unauthenticated,
    BillingDisabled,
    Unknown,
}

impl ErrorClass {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::ServiceDisabled => "ServiceDisabled",
            ErrorClass::PermissionDenied => "PermissionDenied",
            ErrorClass::NotFound => "NotFound",
            ErrorClass::QuotaExceeded => "QuotaExceeded",
            ErrorClass::Transient => "Transient",
            ErrorClass::Unauthenticated => "Unauthenticated",
            ErrorClass::BillingDisabled => "BillingDisabled",
            ErrorClass::Unknown => "Unknown",
        }
    }
}

fn api_error(err: &anyhow::Error) -> Option<&ApiError> {
    err.chain().find_map(|e| e.downcast_ref::<ApiError>())
}

fn recon_error(err: &anyhow::Error) -> Option<&ReconError> {
    err.chain().find_map(|e| e.downcast_ref::<ReconError>())
}

fn full_text(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

pub fn is_service_disabled_text(text: &str) -> bool {
    text.contains("SERVICE_DISABLED")
        || (text.contains("service") && text.contains("disabled"))
        || text.contains("API has not been enabled")
        || text.contains("API has not been used in project")
        || text.contains("Access Not Configured")
}

pub fn is_billing_disabled_text(text: &str) -> bool {
    text.contains("BILLING_DISABLED") || text.contains("billing to be enabled")
        || text.contains("Billing account")
}

pub fn is_permission_denied_text(text: &str) -> bool {
    text.contains("PermissionDenied")
        || text.contains("PERMISSION_DENIED")
        || text.to_lowercase().contains("permission denied")
        || text.contains("does not have")
        || text.contains("AccessDeniedException")
}

pub fn is_not_found_text(text: &str) -> bool {
    text.contains("NotFound")
        || text.contains("NOT_FOUND")
        || text.to_lowercase().contains("not found")
}

pub fn is_unauthenticated_text(text: &str) -> bool {
    text.contains("UNAUTHENTICATED")
        || text.contains("Unauthenticated")
        || text.contains("invalid authentication credentials")
}

pub fn is_quota_exceeded_text(text: &str) -> bool {
    text.contains("RESOURCE_EXHAUSTED")
        || text.contains("rateLimitExceeded")
        || text.to_lowercase().contains("quota exceeded")
}

/// Classify an error, preferring typed information over message text.
pub fn classify(err: &anyhow::Error) -> ErrorClass {
    if let Some(e) = recon_error(err) {
        match e {
            ReconError::ServiceDisabled(_) => return ErrorClass::ServiceDisabled,
            ReconError::PermissionDenied(_) => return ErrorClass::PermissionDenied,
            ReconError::NotFound(_) => return ErrorClass::NotFound,
            ReconError::QuotaExceeded(_) => return ErrorClass::QuotaExceeded,
            ReconError::Transient(_) => return ErrorClass::Transient,
            ReconError::Unauthenticated(_) => return ErrorClass::Unauthenticated,
            ReconError::BillingDisabled(_) => return ErrorClass::BillingDisabled,
            _ => {}
        }
    }
    if let Some(api) = api_error(err) {
        let reason = api.reason.as_deref().unwrap_or_default();
        if reason == "SERVICE_DISABLED" || is_service_disabled_text(&api.message) {
            return ErrorClass::ServiceDisabled;
        }
        if reason == "BILLING_DISABLED" || is_billing_disabled_text(&api.message) {
            return ErrorClass::BillingDisabled;
        }
        match api.status {
            401 => return ErrorClass::Unauthenticated,
            403 => return ErrorClass::PermissionDenied,
            404 => return ErrorClass::NotFound,
            429 => return ErrorClass::QuotaExceeded,
            500 | 502 | 503 | 504 => return ErrorClass::Transient,
            _ => {}
        }
    }
    classify_text(&full_text(err))
}

pub fn classify_text(text: &str) -> ErrorClass {
    if is_service_disabled_text(text) {
        ErrorClass::ServiceDisabled
    } else if is_billing_disabled_text(text) {
        ErrorClass::BillingDisabled
    } else if is_permission_denied_text(text) {
        ErrorClass::PermissionDenied
    } else if is_unauthenticated_text(text) {
        ErrorClass::Unauthenticated
    } else if is_quota_exceeded_text(text) {
        ErrorClass::QuotaExceeded
    } else if is_not_found_text(text) {
        ErrorClass::NotFound
    } else {
        ErrorClass::Unknown
    }
}

pub fn is_service_disabled(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::ServiceDisabled
}

pub fn is_permission_denied(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::PermissionDenied
}

pub fn is_not_found(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::NotFound
}

pub fn is_billing_disabled(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::BillingDisabled
}

pub fn is_unauthenticated(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::Unauthenticated
}

pub fn is_quota_exceeded(err: &anyhow::Error) -> bool {
    classify(err) == ErrorClass::QuotaExceeded
}

/// Wrap a provider failure with context and its taxonomy class. The message stays on
/// one line so aggregated errors can be split per failure.
pub fn handle_gcp_error(err: anyhow::Error, context: &str) -> anyhow::Error {
    let class = classify(&err);
    let text = format!("{}: {}", context, full_text(&err)).replace(['\n', '\r'], " ");
    let typed = match class {
        ErrorClass::ServiceDisabled => ReconError::ServiceDisabled(text),
        ErrorClass::PermissionDenied => ReconError::PermissionDenied(text),
        ErrorClass::NotFound => ReconError::NotFound(text),
        ErrorClass::QuotaExceeded => ReconError::QuotaExceeded(text),
        ErrorClass::Transient => ReconError::Transient(text),
        ErrorClass::Unauthenticated => ReconError::Unauthenticated(text),
        ErrorClass::BillingDisabled => ReconError::BillingDisabled(text),
        ErrorClass::Unknown => ReconError::Unknown(text),
    };
    anyhow::Error::new(typed)
}

//! REST clients for the Google Cloud APIs the engine reads from. Each service exposes an
//! `async_trait` seam so pipelines can run against in-memory fakes.

pub mod appengine;
pub mod artifacts;
pub mod compute;
pub mod dns;
pub mod download;
pub mod firebase;
pub mod functions;
pub mod orgpolicy;
pub mod resourcemanager;
pub mod run;
pub mod sql;
pub mod storage;

use anyhow::{Context, Result};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::ApiError;
use crate::provider::auth::TokenSource;

pub use appengine::{AppEngineApi, AppService, Application, RestAppEngine, Version};
pub use artifacts::{ArtifactRegistryApi, DockerImage, Location, Repository, RestArtifactRegistry};
pub use compute::{
    AccessConfig, Address, ComputeApi, ForwardingRule, Instance, NetworkInterface, Region,
    RestCompute, Zone,
};
pub use dns::{DnsApi, ManagedZone, ResourceRecordSet, RestDns};
pub use download::{Downloader, HttpDownloader};
pub use firebase::{FirebaseHostingApi, RestFirebaseHosting, Site};
pub use functions::{CloudFunction, FunctionsApi, RestFunctions};
pub use orgpolicy::{OrgPolicyApi, Policy, PolicyRule, PolicySpec, RestOrgPolicy};
pub use resourcemanager::{Folder, Organization, Project, ResourceManagerApi, RestResourceManager};
pub use run::{RestRun, RunApi, RunService};
pub use sql::{DatabaseInstance, RestSql, SqlApi};
pub use storage::{Bucket, RestStorage, StorageApi, StorageObject};

const MAX_ATTEMPTS: u32 = 3;

/// IAM policy document shared by the project, bucket, function and service endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IamPolicy {
    pub version: i32,
    pub etag: String,
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Binding {
    pub role: String,
    pub members: Vec<String>,
}

impl IamPolicy {
    pub fn binding(role: &str, members: &[&str]) -> Binding {
        Binding {
            role: role.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    code: u16,
    message: String,
    status: String,
    errors: Vec<ErrorItem>,
    details: Vec<ErrorItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorItem {
    reason: String,
}

/// Build an `ApiError` from a non-success response body. `ErrorInfo` reasons from
/// `details` (e.g. `SERVICE_DISABLED`) win over the legacy `errors[].reason`.
pub fn api_error_from_body(status: StatusCode, body: &str) -> ApiError {
    let parsed: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let reason = parsed
        .error
        .details
        .iter()
        .chain(parsed.error.errors.iter())
        .map(|e| e.reason.clone())
        .find(|r| !r.is_empty());
    let message = if parsed.error.message.is_empty() {
        body.trim().chars().take(300).collect()
    } else {
        parsed.error.message
    };
    ApiError {
        status: if parsed.error.code == 0 { status.as_u16() } else { parsed.error.code },
        status_text: Some(parsed.error.status).filter(|s| !s.is_empty()),
        reason,
        message,
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Authenticated HTTP client shared by every REST service implementation.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl ApiClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("gcpscout/", env!("CARGO_PKG_VERSION"))),
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, tokens })
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        build: impl Fn(RequestBuilder) -> RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = self.tokens.token().await.context("Failed to obtain access token")?;
            let request = build(
                self.http
                    .request(method.clone(), url)
                    .header(AUTHORIZATION, format!("Bearer {}", token)),
            );
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) if attempt < MAX_ATTEMPTS && (e.is_timeout() || e.is_connect()) => {
                    backoff(attempt).await;
                    continue;
                }
                Err(e) => return Err(e).with_context(|| format!("request to {} failed", url)),
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if retryable(status) && attempt < MAX_ATTEMPTS {
                debug!(%url, status = status.as_u16(), attempt, "retrying request");
                backoff(attempt).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(api_error_from_body(status, &body).into());
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.execute(Method::GET, url, |r| r.query(query))
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let payload = serde_json::to_vec(body).context("Failed to encode request body")?;
        self.execute(Method::POST, url, |r| {
            r.header(CONTENT_TYPE, "application/json").body(payload.clone())
        })
        .await?
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))
    }

    pub async fn get_bytes(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let bytes = self
            .execute(Method::GET, url, |r| r.query(query))
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to read body from {}", url))?;
        Ok(bytes.to_vec())
    }

    /// Follow `pageToken` until the listing is exhausted. `split` pulls the items and the
    /// next token out of one page.
    pub async fn list_all<P, T>(
        &self,
        url: &str,
        query: &[(&str, String)],
        split: impl Fn(P) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut q: Vec<(&str, String)> = query.to_vec();
            if let Some(t) = &token {
                q.push(("pageToken", t.clone()));
            }
            let page: P = self.get_json(url, &q).await?;
            let (batch, next) = split(page);
            items.extend(batch);
            match next.filter(|t| !t.is_empty()) {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        Ok(items)
    }
}

async fn backoff(attempt: u32) {
    let base = 250u64 * 2u64.pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    tokio::time::sleep(Duration::from_millis(base + jitter)).await;
}

/// Last path segment of a self link or resource name.
pub fn short_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_prefers_error_info_reason() {
        let body = r#"{"error":{"code":403,
            "message":"Cloud Run Admin API has not been used in project 1",
            "status":"PERMISSION_DENIED",
            "errors":[{"reason":"forbidden"}],
            "details":[{
                "@type":"type.googleapis.com/google.rpc.ErrorInfo",
                "reason":"SERVICE_DISABLED"
            }]}}"#;
        let e = api_error_from_body(StatusCode::FORBIDDEN, body);
        assert_eq!(e.status, 403);
        assert_eq!(e.reason.as_deref(), Some("SERVICE_DISABLED"));
        assert_eq!(e.status_text.as_deref(), Some("PERMISSION_DENIED"));
    }

    #[test]
    fn test_error_body_falls_back_to_raw_text() {
        let e = api_error_from_body(StatusCode::BAD_GATEWAY, "upstream hiccup");
        assert_eq!(e.status, 502);
        assert_eq!(e.message, "upstream hiccup");
        assert!(e.reason.is_none());
    }

    #[test]
    fn test_short_name_and_encoding() {
        assert_eq!(short_name("https://x/compute/v1/projects/p/zones/us-east1-b"), "us-east1-b");
        assert_eq!(short_name("plain"), "plain");
        assert_eq!(encode_segment("dir/file name.txt"), "dir%2Ffile%20name.txt");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!retryable(StatusCode::FORBIDDEN));
    }
}

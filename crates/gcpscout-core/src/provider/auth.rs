//! OAuth2 access tokens for the REST clients: service-account keys (JWT bearer grant),
//! gcloud authorized-user files (refresh grant) and the GCE metadata server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::ReconError;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh this long before the provider-reported expiry.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed token, for callers that already hold one.
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub token_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

/// Where access tokens come from.
#[derive(Debug, Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
    Metadata { host: String },
}

impl Credentials {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid credentials file: {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let parsed: CredentialsFile = serde_json::from_str(content).map_err(|e| {
            ReconError::Credentials(format!(
                "expected a service_account or authorized_user key: {}",
                e
            ))
        })?;
        Ok(match parsed {
            CredentialsFile::ServiceAccount(k) => Credentials::ServiceAccount(k),
            CredentialsFile::AuthorizedUser(u) => Credentials::AuthorizedUser(u),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credentials::ServiceAccount(_) => "service_account",
            Credentials::AuthorizedUser(_) => "authorized_user",
            Credentials::Metadata { .. } => "metadata",
        }
    }

    /// Resolve credentials: explicit file, `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud
    /// application-default file, then the metadata server.
    pub async fn discover(creds_file: Option<&str>) -> Result<Self> {
        if let Some(path) = creds_file.filter(|p| !p.is_empty()) {
            return Self::from_file(Path::new(path));
        }
        if let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            if !path.is_empty() {
                debug!(path = %path, "using GOOGLE_APPLICATION_CREDENTIALS");
                return Self::from_file(Path::new(&path));
            }
        }
        if let Some(path) = well_known_adc_file().filter(|p| p.is_file()) {
            debug!(path = %path.display(), "using gcloud application default credentials");
            return Self::from_file(&path);
        }
        let host = metadata_host();
        if metadata_server_reachable(&host).await {
            debug!(host = %host, "using metadata server credentials");
            return Ok(Credentials::Metadata { host });
        }
        Err(ReconError::Credentials(
            "no application default credentials found; pass --creds-file or set \
             GOOGLE_APPLICATION_CREDENTIALS"
                .to_string(),
        )
        .into())
    }
}

fn well_known_adc_file() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config/gcloud/application_default_credentials.json"))
}

fn metadata_host() -> String {
    std::env::var("GCE_METADATA_HOST")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string())
}

async fn metadata_server_reachable(host: &str) -> bool {
    let Ok(client) = reqwest::Client::builder().timeout(Duration::from_secs(2)).build() else {
        return false;
    };
    client
        .get(format!("http://{}/computeMetadata/v1/", host))
        .header("Metadata-Flavor", "Google")
        .send()
        .await
        .map(|r| r.status().is_success())
        .unwrap_or(false)
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: SystemTime,
}

impl CachedToken {
    fn is_fresh(&self, now: SystemTime) -> bool {
        now + EXPIRY_SLACK < self.expires_at
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Signed JWT assertion for the service-account bearer grant.
pub fn service_account_assertion(key: &ServiceAccountKey, issued_at: u64) -> Result<String> {
    let mut header = Header::new(Algorithm::RS256);
    if !key.private_key_id.is_empty() {
        header.kid = Some(key.private_key_id.clone());
    }
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: token_uri(key),
        iat: issued_at,
        exp: issued_at + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| ReconError::Credentials(format!("invalid private key: {}", e)))?;
    jsonwebtoken::encode(&header, &claims, &signing_key).context("Failed to sign JWT assertion")
}

fn token_uri(key: &ServiceAccountKey) -> &str {
    if key.token_uri.is_empty() {
        DEFAULT_TOKEN_URI
    } else {
        &key.token_uri
    }
}

fn form_body(pairs: &[(&str, &str)]) -> String {
    let mut body = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        body.append_pair(k, v);
    }
    body.finish()
}

/// Token source over resolved credentials, caching the token until shortly before expiry.
pub struct CredentialsTokenSource {
    credentials: Credentials,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl CredentialsTokenSource {
    pub fn new(credentials: Credentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { credentials, http, cache: Mutex::new(None) })
    }

    async fn fetch(&self) -> Result<TokenResponse> {
        let request = match &self.credentials {
            Credentials::ServiceAccount(key) => {
                let assertion = service_account_assertion(key, unix_now())?;
                self.http
                    .post(token_uri(key))
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(form_body(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)]))
            }
            Credentials::AuthorizedUser(user) => self
                .http
                .post(DEFAULT_TOKEN_URI)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(form_body(&[
                    ("grant_type", "refresh_token"),
                    ("client_id", &user.client_id),
                    ("client_secret", &user.client_secret),
                    ("refresh_token", &user.refresh_token),
                ])),
            Credentials::Metadata { host } => self
                .http
                .get(format!(
                    "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                    host
                ))
                .header("Metadata-Flavor", "Google"),
        };

        let response = request.send().await.context("Token request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReconError::Unauthenticated(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body.trim()
            ))
            .into());
        }
        response.json().await.context("Failed to parse token response")
    }
}

#[async_trait]
impl TokenSource for CredentialsTokenSource {
    async fn token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh(SystemTime::now())) {
            return Ok(cached.value.clone());
        }
        let fresh = self.fetch().await?;
        debug!(
            kind = self.credentials.kind(),
            expires_in = fresh.expires_in,
            "obtained access token"
        );
        let expires_in = if fresh.expires_in == 0 { 3600 } else { fresh.expires_in };
        let lifetime = Duration::from_secs(expires_in);
        *cache = Some(CachedToken {
            value: fresh.access_token.clone(),
            expires_at: SystemTime::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

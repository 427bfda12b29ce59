use base64::Engine;
use serde::{Deserialize, Serialize};

/// Where a scanned blob came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Provenance {
    pub kind: String,
    pub platform: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
}

impl Provenance {
    pub fn cloud(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            kind: "cloud_resource".to_string(),
            platform: "gcp".to_string(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            region: String::new(),
            account_id: String::new(),
            repo_path: None,
        }
    }

    pub fn file(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self { kind: "file".to_string(), ..Self::cloud(resource_type, resource_id) }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    pub fn repo_path(mut self, path: impl Into<String>) -> Self {
        self.repo_path = Some(path.into());
        self
    }
}

/// Payload handed to the secret scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_base64: Option<String>,
    pub provenance: Provenance,
}

impl NpInput {
    pub fn text(content: impl Into<String>, provenance: Provenance) -> Self {
        Self { content: Some(content.into()), content_base64: None, provenance }
    }

    pub fn binary(bytes: &[u8], provenance: Provenance) -> Self {
        Self {
            content: None,
            content_base64: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            provenance,
        }
    }

    /// Picks text or base64 depending on whether the head of the blob holds a NUL byte.
    pub fn from_bytes(bytes: &[u8], provenance: Provenance) -> Self {
        if looks_binary(bytes) {
            Self::binary(bytes, provenance)
        } else {
            Self::text(String::from_utf8_lossy(bytes).into_owned(), provenance)
        }
    }

    /// Text view of the payload; base64 payloads are decoded lossily.
    pub fn text_view(&self) -> Option<String> {
        if let Some(c) = &self.content {
            return Some(c.clone());
        }
        let encoded = self.content_base64.as_ref()?;
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(512).any(|b| *b == 0)
}

/// A storage object discovered while walking a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub bucket: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
}

/// A container image reference for an external image scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image: String,
    pub registry: String,
    pub project: String,
}

impl ImageRef {
    pub fn from_uri(uri: &str, project: &str) -> Self {
        let registry = uri.split('/').next().unwrap_or_default().to_string();
        Self { image: uri.to_string(), registry, project: project.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nul_in_head_is_binary() {
        let prov = Provenance::file("t", "id");
        let input = NpInput::from_bytes(b"abc\0def", prov.clone());
        assert!(input.content.is_none());
        assert_eq!(input.text_view().as_deref(), Some("abc\0def"));

        let text = NpInput::from_bytes(b"API_KEY=123", prov);
        assert_eq!(text.content.as_deref(), Some("API_KEY=123"));
    }

    #[test]
    fn test_nul_after_head_is_text() {
        let mut bytes = vec![b'a'; 600];
        bytes[550] = 0;
        assert!(!looks_binary(&bytes));
    }

    #[test]
    fn test_image_registry_is_first_segment() {
        let img = ImageRef::from_uri("us-docker.pkg.dev/alpha/repo/app@sha256:abc", "alpha");
        assert_eq!(img.registry, "us-docker.pkg.dev");
    }
}

use async_trait::async_trait;
use audit_models::{AuditError, AuditResult, ContentHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::ContentStore;

const PINATA_ENDPOINT: &str = "https://api.pinata.cloud/pinning/pinJSONToIPFS";
const SERVICE: &str = "ipfs";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PinataConfig {
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
}

impl Default for PinataConfig {
    fn default() -> Self {
        Self {
            endpoint: PINATA_ENDPOINT.to_string(),
            api_key: None,
            api_secret: None,
        }
    }
}

impl PinataConfig {
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PinResponse {
    ipfs_hash: String,
}

/// Pins JSON documents through the Pinata pinning API.
pub struct PinataStore {
    config: PinataConfig,
    client: reqwest::Client,
}

impl PinataStore {
    pub fn new(config: PinataConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    async fn pin_json(&self, name: &str, content: &serde_json::Value) -> AuditResult<String> {
        let body = serde_json::json!({
            "pinataMetadata": { "name": name },
            "pinataContent": content,
        });

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let (Some(key), Some(secret)) = (&self.config.api_key, &self.config.api_secret) {
            request = request
                .header("pinata_api_key", key)
                .header("pinata_secret_api_key", secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuditError::external(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, detail = %detail, "pinning failed");
            return Err(AuditError::external(SERVICE, format!("HTTP {}: {}", status, detail)));
        }

        let pinned = response
            .json::<PinResponse>()
            .await
            .map_err(|e| AuditError::external(SERVICE, format!("unexpected pin response: {}", e)))?;

        info!(cid = %pinned.ipfs_hash, name, "pinned audit document");
        Ok(pinned.ipfs_hash)
    }
}

/// Local content store keyed by the Keccak digest of the serialized document.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    documents: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, locator: &str) -> Option<serde_json::Value> {
        self.documents.read().await.get(locator).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn pin_json(&self, _name: &str, content: &serde_json::Value) -> AuditResult<String> {
        let locator = format!("mem-{}", ContentHash::of(&content.to_string()));
        self.documents.write().await.insert(locator.clone(), content.clone());
        Ok(locator)
    }
}

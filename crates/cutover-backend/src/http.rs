//! HTTP client for the storage backend's JSON API
//!
//! Every answer is wrapped either as `{"data": ...}` or as
//! `{"error": {"name": ..., "descr": ...}}`.

use crate::api::{NameFilter, PlacementTemplate, StorageBackend};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use cutover_model::{BackendRecord, ObjectKind, Tags};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backend client configuration
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL, e.g. `http://10.0.0.5:81/ctrl/1.0`
    pub base_url: String,
    pub auth_token: String,
    pub timeout: Duration,
}

/// Storage backend reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpStorageBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    name: String,
    #[serde(default)]
    descr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireObject {
    name: String,
    size: u64,
    #[serde(default)]
    tags: Option<Tags>,
    #[serde(default)]
    template_name: Option<String>,
    #[serde(default)]
    global_id: Option<String>,
}

impl WireObject {
    fn into_record(self, kind: ObjectKind) -> BackendRecord {
        BackendRecord {
            name: self.name,
            kind,
            size_bytes: self.size,
            tags: self.tags.unwrap_or_default(),
            template: self.template_name,
            global_id: self.global_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct Rename<'a> {
    rename: &'a str,
}

impl HttpStorageBackend {
    /// Build a client with the backend's token header
    pub fn new(config: &HttpBackendConfig) -> BackendResult<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Storpool v1:{}", config.auth_token)).map_err(
            |e| BackendError::Transport {
                operation: "configure".to_string(),
                message: format!("invalid auth token: {e}"),
            },
        )?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| transport("configure", &e))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str) -> BackendResult<T> {
        let response = self
            .client
            .get(self.url(operation))
            .send()
            .await
            .map_err(|e| transport(operation, &e))?;
        unwrap_envelope(operation, response).await
    }

    async fn post<B: Serialize + Sync>(&self, operation: &str, body: &B) -> BackendResult<()> {
        let response = self
            .client
            .post(self.url(operation))
            .json(body)
            .send()
            .await
            .map_err(|e| transport(operation, &e))?;
        unwrap_envelope::<serde_json::Value>(operation, response).await?;
        Ok(())
    }

    async fn list_kind(&self, kind: ObjectKind, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        let operation = match kind {
            ObjectKind::Volume => "VolumesList",
            ObjectKind::Snapshot => "SnapshotsList",
        };
        let objects: Vec<WireObject> = self.get(operation).await?;
        Ok(objects
            .into_iter()
            .filter(|o| filter.matches(&o.name))
            .map(|o| o.into_record(kind))
            .collect())
    }
}

fn transport(operation: &str, err: &reqwest::Error) -> BackendError {
    BackendError::Transport {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

async fn unwrap_envelope<T: DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> BackendResult<T> {
    let status = response.status();
    let envelope: Envelope<T> = response.json().await.map_err(|e| BackendError::Decode {
        operation: operation.to_string(),
        message: format!("status {status}: {e}"),
    })?;
    match envelope {
        Envelope { error: Some(err), .. } => Err(BackendError::api(operation, err.name, err.descr)),
        Envelope { data: Some(data), .. } => Ok(data),
        Envelope { .. } => Err(BackendError::Decode {
            operation: operation.to_string(),
            message: format!("status {status}: neither data nor error present"),
        }),
    }
}

#[async_trait]
impl StorageBackend for HttpStorageBackend {
    async fn list_volumes(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        self.list_kind(ObjectKind::Volume, filter).await
    }

    async fn list_snapshots(&self, filter: &NameFilter) -> BackendResult<Vec<BackendRecord>> {
        self.list_kind(ObjectKind::Snapshot, filter).await
    }

    async fn rename(&self, kind: ObjectKind, name: &str, new_name: &str) -> BackendResult<()> {
        let operation = match kind {
            ObjectKind::Volume => format!("VolumeUpdate/{name}"),
            ObjectKind::Snapshot => format!("SnapshotUpdate/{name}"),
        };
        tracing::debug!(%kind, from = name, to = new_name, "renaming backend object");
        self.post(&operation, &Rename { rename: new_name }).await
    }

    async fn delete(&self, kind: ObjectKind, name: &str) -> BackendResult<()> {
        let operation = match kind {
            ObjectKind::Volume => format!("VolumeDelete/{name}"),
            ObjectKind::Snapshot => format!("SnapshotDelete/{name}"),
        };
        tracing::debug!(%kind, name, "deleting backend object");
        self.post(&operation, &serde_json::json!({})).await
    }

    async fn create_template(&self, template: &PlacementTemplate) -> BackendResult<()> {
        self.post("VolumeTemplateCreate", template).await
    }

    async fn delete_template(&self, name: &str) -> BackendResult<()> {
        self.post(&format!("VolumeTemplateDelete/{name}"), &serde_json::json!({})).await
    }
}

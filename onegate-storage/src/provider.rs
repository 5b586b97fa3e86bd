use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use onegate_core::Error;

/// Metadata for one stored object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Inputs for a put operation.
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub key: String,
    pub content_type: String,
    pub data: Bytes,
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    pub fn new(key: impl Into<String>, content_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            data,
            metadata: HashMap::new(),
        }
    }

    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The storage collaborator the framework consumes. Concrete backends
/// (MinIO, S3, ...) live outside the core.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn put_object(&self, options: PutOptions) -> Result<ObjectInfo, Error>;

    async fn get_object(&self, key: &str) -> Result<Bytes, Error>;

    async fn stat_object(&self, key: &str) -> Result<ObjectInfo, Error>;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, Error>;

    async fn remove_object(&self, key: &str) -> Result<(), Error>;

    async fn copy_object(&self, source: &str, destination: &str) -> Result<ObjectInfo, Error>;

    async fn presigned_get_url(&self, key: &str, expiry: Duration) -> Result<String, Error>;
}

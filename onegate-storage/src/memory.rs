use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

use onegate_core::Error;

use crate::provider::{ObjectInfo, PutOptions, StorageProvider};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    etag: String,
    last_modified: chrono::DateTime<chrono::Utc>,
    metadata: HashMap<String, String>,
}

impl StoredObject {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size: self.data.len() as u64,
            content_type: self.content_type.clone(),
            etag: self.etag.clone(),
            last_modified: self.last_modified,
            metadata: self.metadata.clone(),
        }
    }
}

/// In-process [`StorageProvider`]: objects live in a concurrent map, etags
/// are hex SHA-256 digests of the content.
#[derive(Default)]
pub struct MemoryStorageProvider {
    objects: DashMap<String, StoredObject>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn put_object(&self, options: PutOptions) -> Result<ObjectInfo, Error> {
        let etag = hex::encode(Sha256::digest(&options.data));
        let object = StoredObject {
            data: options.data,
            content_type: options.content_type,
            etag,
            last_modified: chrono::Utc::now(),
            metadata: options.metadata,
        };
        let info = object.info(&options.key);
        self.objects.insert(options.key, object);
        Ok(info)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, Error> {
        self.objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::record_not_found("object"))
    }

    async fn stat_object(&self, key: &str) -> Result<ObjectInfo, Error> {
        self.objects
            .get(key)
            .map(|o| o.info(key))
            .ok_or_else(|| Error::record_not_found("object"))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>, Error> {
        let mut infos: Vec<ObjectInfo> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }

    async fn remove_object(&self, key: &str) -> Result<(), Error> {
        self.objects.remove(key);
        Ok(())
    }

    async fn copy_object(&self, source: &str, destination: &str) -> Result<ObjectInfo, Error> {
        let object = self
            .objects
            .get(source)
            .map(|o| o.clone())
            .ok_or_else(|| Error::record_not_found("object"))?;
        let info = object.info(destination);
        self.objects.insert(destination.to_string(), object);
        Ok(info)
    }

    async fn presigned_get_url(&self, key: &str, expiry: Duration) -> Result<String, Error> {
        if !self.objects.contains_key(key) {
            return Err(Error::record_not_found("object"));
        }
        // No signer in-process; the URL only mimics the real providers'
        // shape closely enough for clients and tests.
        let expires = chrono::Utc::now().timestamp() + expiry.as_secs() as i64;
        Ok(format!("memory:///{key}?expires={expires}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_stat_list_roundtrip() {
        let provider = MemoryStorageProvider::new();
        let info = provider
            .put_object(PutOptions::new(
                "docs/a.txt",
                "text/plain",
                Bytes::from_static(b"hello"),
            ))
            .await
            .unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.etag.len(), 64);

        let stat = provider.stat_object("docs/a.txt").await.unwrap();
        assert_eq!(stat.etag, info.etag);

        provider
            .put_object(PutOptions::new(
                "docs/b.txt",
                "text/plain",
                Bytes::from_static(b"world"),
            ))
            .await
            .unwrap();
        let listed = provider.list_objects("docs/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "docs/a.txt");
    }

    #[tokio::test]
    async fn copy_then_remove_promotes() {
        let provider = MemoryStorageProvider::new();
        provider
            .put_object(PutOptions::new(
                "temp/2026/08/01/x.png",
                "image/png",
                Bytes::from_static(b"png"),
            ))
            .await
            .unwrap();

        provider
            .copy_object("temp/2026/08/01/x.png", "2026/08/01/x.png")
            .await
            .unwrap();
        provider.remove_object("temp/2026/08/01/x.png").await.unwrap();

        assert!(provider.stat_object("2026/08/01/x.png").await.is_ok());
        assert!(provider.stat_object("temp/2026/08/01/x.png").await.is_err());
    }

    #[tokio::test]
    async fn missing_object_is_1404() {
        let provider = MemoryStorageProvider::new();
        let err = provider.stat_object("nope").await.unwrap_err();
        assert_eq!(err.code(), onegate_core::code::RECORD_NOT_FOUND);
    }
}

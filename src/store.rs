//! Storage collaborators: blob storage for source files and artifacts, and
//! the record store tracking processing state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::schema::{DocumentRecord, RecordPatch};

const MEMORY_SCHEME: &str = "memory://";

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StoreError>;
    /// Store `body` under `path` and return the URL it can be fetched from.
    async fn upload_json(&self, path: &str, body: &Value) -> Result<String, StoreError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn read_record(&self, id: &str) -> Result<DocumentRecord, StoreError>;
    async fn write_record(&self, id: &str, patch: RecordPatch) -> Result<DocumentRecord, StoreError>;
}

/// In-memory blob and record store.
///
/// Blob URLs have format: `memory://{path}`. Any other URL is looked up
/// verbatim, so tests can seed sources under their real URLs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    records: Arc<RwLock<HashMap<String, DocumentRecord>>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Backend("store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob under `url`.
    pub fn put_blob(&self, url: &str, data: Vec<u8>) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        blobs.insert(url.to_string(), data);
        Ok(())
    }

    pub fn insert_record(&self, record: DocumentRecord) -> Result<DocumentRecord, StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Parse a stored JSON blob back.
    pub fn get_json(&self, url: &str) -> Option<Value> {
        let blobs = self.blobs.read().ok()?;
        serde_json::from_slice(blobs.get(url)?).ok()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        blobs
            .get(url)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound(url.to_string()))
    }

    async fn upload_json(&self, path: &str, body: &Value) -> Result<String, StoreError> {
        let data = serde_json::to_vec(body).map_err(|e| StoreError::Backend(e.to_string()))?;
        let url = format!("{}{}", MEMORY_SCHEME, path.trim_start_matches('/'));
        debug!("MemoryStore: stored '{}' ({} bytes)", url, data.len());
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        blobs.insert(url.clone(), data);
        Ok(url)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read_record(&self, id: &str) -> Result<DocumentRecord, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    async fn write_record(&self, id: &str, patch: RecordPatch) -> Result<DocumentRecord, StoreError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        record.apply(patch);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProcessingStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_upload_and_download() {
        let store = MemoryStore::new();
        let url = store
            .upload_json("/doc_1/confidence.json", &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(url, "memory://doc_1/confidence.json");

        let bytes = store.download(&url).await.unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(store.get_json(&url), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let store = MemoryStore::new();
        let err = store.download("https://nowhere/x.pdf").await.unwrap_err();
        assert!(matches!(err, StoreError::BlobNotFound(_)));
    }

    #[tokio::test]
    async fn test_record_patch_round() {
        let store = MemoryStore::new();
        let record = store
            .insert_record(DocumentRecord::new("u".into(), "invoice".into()))
            .unwrap();

        let updated = store
            .write_record(&record.id, RecordPatch::status(ProcessingStatus::Processing))
            .await
            .unwrap();
        assert_eq!(updated.status, ProcessingStatus::Processing);

        let read = store.read_record(&record.id).await.unwrap();
        assert_eq!(read.status, ProcessingStatus::Processing);

        let err = store
            .write_record("doc_missing", RecordPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RecordNotFound(_)));
    }
}

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chat_core::Timestamp;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, trace};
use url::Url;

use crate::{
    DocumentPath, DocumentStore, FieldUpdate, ObjectStore, ProgressSender, StoreError,
    UploadProgress, apply_field_updates,
};

/// Default number of bytes reported per upload progress sample.
pub const DEFAULT_UPLOAD_CHUNK: usize = 16 * 1024;

type DocumentSlot = watch::Sender<Option<Value>>;

fn empty_slot() -> DocumentSlot {
    watch::channel(None).0
}

/// Process-local document store. Each document lives in a `watch` slot so
/// subscribers always see the latest value.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<Mutex<HashMap<DocumentPath, DocumentSlot>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError> {
        let documents = self.documents.lock().await;
        Ok(documents
            .get(path)
            .and_then(|slot| slot.borrow().as_ref().cloned()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<(DocumentPath, Value)>, StoreError> {
        let documents = self.documents.lock().await;
        let mut listed: Vec<(DocumentPath, Value)> = documents
            .iter()
            .filter(|(path, _)| path.collection() == collection)
            .filter_map(|(path, slot)| {
                let value = slot.borrow().as_ref().cloned()?;
                Some((path.clone(), value))
            })
            .collect();
        listed.sort_by(|(a, _), (b, _)| a.cmp(b));
        trace!(collection, count = listed.len(), "collection listed");
        Ok(listed)
    }

    async fn set(&self, path: &DocumentPath, value: Value) -> Result<(), StoreError> {
        let mut documents = self.documents.lock().await;
        documents
            .entry(path.clone())
            .or_insert_with(empty_slot)
            .send_replace(Some(value));
        trace!(%path, "document written");
        Ok(())
    }

    async fn update(
        &self,
        path: &DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        let documents = self.documents.lock().await;
        let slot = documents
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let Some(mut document) = slot.borrow().as_ref().cloned() else {
            return Err(StoreError::NotFound(path.to_string()));
        };

        apply_field_updates(&mut document, &updates, Timestamp::now())?;
        slot.send_replace(Some(document));
        trace!(%path, update_count = updates.len(), "document updated");
        Ok(())
    }

    async fn subscribe(
        &self,
        path: &DocumentPath,
    ) -> Result<watch::Receiver<Option<Value>>, StoreError> {
        let mut documents = self.documents.lock().await;
        let receiver = documents
            .entry(path.clone())
            .or_insert_with(empty_slot)
            .subscribe();
        debug!(%path, "document subscription opened");
        Ok(receiver)
    }
}

/// Uploaded blob kept by `InMemoryObjectStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Process-local object store handing out URLs under `base_url`.
#[derive(Clone)]
pub struct InMemoryObjectStore {
    base_url: Url,
    chunk_size: usize,
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl InMemoryObjectStore {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            chunk_size: DEFAULT_UPLOAD_CHUNK,
            objects: Arc::default(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn object(&self, name: &str) -> Option<StoredObject> {
        self.objects.read().await.get(name).cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
        progress: Option<ProgressSender>,
    ) -> Result<Url, StoreError> {
        if name.is_empty() || name.contains('/') {
            return Err(StoreError::Backend(format!("invalid object name '{name}'")));
        }
        let url = self
            .base_url
            .join(name)
            .map_err(|err| StoreError::Backend(err.to_string()))?;

        if let Some(progress) = progress {
            let total = data.len() as u64;
            let mut transferred = 0_u64;
            for chunk in data.chunks(self.chunk_size) {
                transferred += chunk.len() as u64;
                let _ = progress.send(UploadProgress { transferred, total });
            }
            if data.is_empty() {
                let _ = progress.send(UploadProgress {
                    transferred: 0,
                    total: 0,
                });
            }
        }

        debug!(name, content_type, size = data.len(), %url, "object uploaded");
        self.objects.write().await.insert(
            name.to_owned(),
            StoredObject {
                content_type: content_type.to_owned(),
                data,
            },
        );
        Ok(url)
    }
}

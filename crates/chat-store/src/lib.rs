//! Document and object store abstractions backing the chat runtime.
//!
//! The document model is a keyed collection of JSON documents with field-path
//! updates and latest-value subscriptions. Object storage takes a named blob
//! and hands back a download URL.

use std::fmt;

use async_trait::async_trait;
use chat_core::{ChatError, Timestamp};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use url::Url;

/// In-memory store implementations.
pub mod memory;

pub use memory::{InMemoryDocumentStore, InMemoryObjectStore};

/// Conversation documents, keyed by combined key.
pub const CHATS: &str = "chats";
/// Per-participant chat list documents, keyed by participant ID.
pub const USER_CHATS: &str = "userChats";
/// Participant profiles, keyed by participant ID.
pub const USERS: &str = "users";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid field path '{0}'")]
    InvalidFieldPath(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Stable status code, as understood by `chat_core::classify_store_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not-found",
            Self::PermissionDenied(_) => "permission-denied",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidFieldPath(_) => "invalid-argument",
            Self::Serialization(_) => "data-loss",
            Self::Backend(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::from_store_code(err.code(), err.to_string())
    }
}

/// `collection/id` address of one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: String,
    id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self::new(CHATS, chat_id)
    }

    pub fn user_chats(uid: impl Into<String>) -> Self {
        Self::new(USER_CHATS, uid)
    }

    pub fn user(uid: impl Into<String>) -> Self {
        Self::new(USERS, uid)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Operation applied at one dotted field path.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Overwrite the field.
    Set(Value),
    /// Append each element not already present in the array field.
    ArrayUnion(Vec<Value>),
    /// Remove the field; missing fields are ignored.
    Delete,
    /// Store the commit time as a `Timestamp`.
    ServerTimestamp,
}

/// One field-path update. Paths use `.` to address nested map fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub path: String,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Set(value),
        }
    }

    /// Serialize `value` and set it at `path`.
    pub fn set_serialized<T: Serialize>(
        path: impl Into<String>,
        value: &T,
    ) -> Result<Self, StoreError> {
        Ok(Self::set(path, serde_json::to_value(value)?))
    }

    pub fn array_union(path: impl Into<String>, elements: Vec<Value>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::ArrayUnion(elements),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Delete,
        }
    }

    pub fn server_timestamp(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::ServerTimestamp,
        }
    }
}

/// Apply `updates` in order to `document`, stamping server timestamps with `now`.
pub fn apply_field_updates(
    document: &mut Value,
    updates: &[FieldUpdate],
    now: Timestamp,
) -> Result<(), StoreError> {
    for update in updates {
        let segments: Vec<&str> = update.path.split('.').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(StoreError::InvalidFieldPath(update.path.clone()));
        }
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(StoreError::InvalidFieldPath(update.path.clone()));
        };

        if update.op == FieldOp::Delete {
            if let Some(parent) = lookup_parent(document, parents) {
                parent.remove(*leaf);
            }
            continue;
        }

        let parent = ensure_parent(document, parents);
        match &update.op {
            FieldOp::Set(value) => {
                parent.insert((*leaf).to_owned(), value.clone());
            }
            FieldOp::ArrayUnion(elements) => {
                let slot = parent
                    .entry((*leaf).to_owned())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                if let Value::Array(items) = slot {
                    for element in elements {
                        if !items.contains(element) {
                            items.push(element.clone());
                        }
                    }
                }
            }
            FieldOp::ServerTimestamp => {
                parent.insert((*leaf).to_owned(), serde_json::to_value(now)?);
            }
            FieldOp::Delete => {}
        }
    }
    Ok(())
}

fn lookup_parent<'a>(
    document: &'a mut Value,
    parents: &[&str],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = document.as_object_mut()?;
    for segment in parents {
        current = current.get_mut(*segment)?.as_object_mut()?;
    }
    Some(current)
}

fn ensure_parent<'a>(document: &'a mut Value, parents: &[&str]) -> &'a mut Map<String, Value> {
    let mut current = coerce_object(document);
    for segment in parents {
        let child = current
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        current = coerce_object(child);
    }
    current
}

fn coerce_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

/// Keyed JSON document storage with latest-value subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current value of the document, `None` when it does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError>;

    /// Every existing document of `collection`, ordered by ID.
    async fn list(&self, collection: &str) -> Result<Vec<(DocumentPath, Value)>, StoreError>;

    /// Create or overwrite the document.
    async fn set(&self, path: &DocumentPath, value: Value) -> Result<(), StoreError>;

    /// Apply field-path updates to an existing document.
    ///
    /// Fails with `StoreError::NotFound` when the document does not exist.
    async fn update(
        &self,
        path: &DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), StoreError>;

    /// Latest-value stream of the document. The receiver observes the current
    /// value immediately and every later write.
    async fn subscribe(
        &self,
        path: &DocumentPath,
    ) -> Result<watch::Receiver<Option<Value>>, StoreError>;
}

/// Read and deserialize a document.
pub async fn read_document<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &DocumentPath,
) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write a whole document.
pub async fn write_document<T: Serialize>(
    store: &dyn DocumentStore,
    path: &DocumentPath,
    value: &T,
) -> Result<(), StoreError> {
    store.set(path, serde_json::to_value(value)?).await
}

/// Upload progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub transferred: u64,
    pub total: u64,
}

impl UploadProgress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.transferred as f64 / self.total as f64 * 100.0
    }
}

/// Optional progress sink passed to uploads.
pub type ProgressSender = mpsc::UnboundedSender<UploadProgress>;

/// Blob storage returning download URLs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
        progress: Option<ProgressSender>,
    ) -> Result<Url, StoreError>;
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for logging and user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input or unsupported request.
    Config,
    /// The store rejected the caller's credentials or access rules.
    Permission,
    /// Transient network or transport failure.
    Network,
    /// A referenced document or message does not exist.
    NotFound,
    /// Store quota or rate limiting.
    RateLimited,
    /// Object upload failure.
    Upload,
    /// Document encoding/decoding failure.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build an error from a store status code, classifying it on the way.
    pub fn from_store_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(classify_store_code(code), code, message)
    }

    pub fn message_not_found(message_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::NotFound,
            "message_not_found",
            format!("message '{message_id}' is not part of the conversation"),
        )
    }

    pub fn upload_failed(message: impl Into<String>) -> Self {
        Self::new(ChatErrorCategory::Upload, "upload_failed", message)
    }

    pub fn is_upload_failure(&self) -> bool {
        self.category == ChatErrorCategory::Upload
    }
}

/// Map document/object store status codes to error categories.
pub fn classify_store_code(code: &str) -> ChatErrorCategory {
    match code {
        "permission-denied" | "unauthenticated" => ChatErrorCategory::Permission,
        "unavailable" | "deadline-exceeded" | "cancelled" => ChatErrorCategory::Network,
        "not-found" => ChatErrorCategory::NotFound,
        "resource-exhausted" => ChatErrorCategory::RateLimited,
        "invalid-argument" | "failed-precondition" | "out-of-range" => ChatErrorCategory::Config,
        "data-loss" => ChatErrorCategory::Serialization,
        _ => ChatErrorCategory::Internal,
    }
}

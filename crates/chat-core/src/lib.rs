//! Core chat contract shared between the runtime and view consumers.
//!
//! This crate defines the command/event protocol, the message window and
//! selection reducers, pure message-array mutations, and the shared error
//! payload.

/// Participant directory and chat list ordering.
pub mod directory;
/// Stable chat error types and store code classification.
pub mod error;
/// Pure transforms applied to a conversation's message array.
pub mod mutation;
/// Event normalization helpers (for example send acknowledgements).
pub mod normalization;
/// Active-conversation selection reducer.
pub mod selection;
/// Protocol and document types (commands, events, payloads).
pub mod types;
/// View-side reducer driven by runtime events and user intents.
pub mod view;
/// Render-time filtering and sender grouping.
pub mod visibility;
/// Bounded, backward-expanding message window.
pub mod window;

pub use directory::{chat_list, directory};
pub use error::{ChatError, ChatErrorCategory, classify_store_code};
pub use mutation::{
    MutationError, UploadedMedia, apply_delete, apply_edit, apply_reaction, build_message,
    last_message_preview, quote_of,
};
pub use normalization::{SendOutcome, normalize_failure, normalize_send_outcome};
pub use selection::{ChatAction, ChatSelection, ChatSelectionStore, combined_key, reduce};
pub use types::{
    Attachment, AttachmentKind, ChatCommand, ChatEvent, ChatListEntry, ChatListItem,
    ConversationDocument, DELETED_FOR_ME, DeleteScope, DeletedInfo, LastMessage, Message,
    MessageDraft, QuotedMessage, SendAck, Timestamp, UserInfo, UserProfile,
};
pub use view::{ChatViewSnapshot, ChatViewState, MessageView};
pub use visibility::{GroupPosition, group_positions, is_visible_to, visible_to};
pub use window::{
    DEFAULT_LOAD_OLDER_DELAY, DEFAULT_PAGE_SIZE, MessageWindow, ScrollAnchor, ScrollMetrics,
    SnapshotEffect, SnapshotPolicy, WindowConfig,
};

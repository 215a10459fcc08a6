use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marker value stored under a participant ID when a message is hidden for that participant only.
pub const DELETED_FOR_ME: &str = "deleted-for-me";

/// Store timestamp with seconds + nanoseconds precision.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Timestamp {
    /// Whole seconds since Unix epoch.
    pub seconds: i64,
    /// Sub-second nanoseconds.
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanoseconds: u32) -> Self {
        Self {
            seconds,
            nanoseconds,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanoseconds: value.timestamp_subsec_nanos(),
        }
    }

    /// Convert to a `chrono` UTC datetime, `None` when out of range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.seconds, self.nanoseconds)
    }
}

/// Snapshot of a replied-to message. Not a live reference: later edits of the
/// original do not propagate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub sender: String,
}

/// Soft-delete marker attached to a message.
///
/// Wire shape is either `{"deletedForEveryone": true}` or
/// `{"<participant id>": "deleted-for-me"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DeletedInfo {
    /// Hidden for both participants.
    Everyone {
        #[serde(rename = "deletedForEveryone")]
        deleted_for_everyone: bool,
    },
    /// Per-participant markers.
    Participants(BTreeMap<String, String>),
}

impl DeletedInfo {
    pub fn for_me(participant_id: impl Into<String>) -> Self {
        Self::Participants(BTreeMap::from([(
            participant_id.into(),
            DELETED_FOR_ME.to_owned(),
        )]))
    }

    pub fn for_everyone() -> Self {
        Self::Everyone {
            deleted_for_everyone: true,
        }
    }

    pub fn is_deleted_for_everyone(&self) -> bool {
        matches!(
            self,
            Self::Everyone {
                deleted_for_everyone: true
            }
        )
    }

    pub fn is_deleted_for(&self, participant_id: &str) -> bool {
        match self {
            Self::Everyone { .. } => false,
            Self::Participants(markers) => {
                markers.get(participant_id).map(String::as_str) == Some(DELETED_FOR_ME)
            }
        }
    }
}

/// One element of a conversation's message array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque unique token, immutable once created.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Sender participant ID.
    pub sender: String,
    /// Legacy elements may lack a date; they sort as the epoch.
    #[serde(default)]
    pub date: Timestamp,
    #[serde(default)]
    pub read: bool,
    /// Image download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    /// Alternate image URL, refreshed together with `img` on image edits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Voice note download URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Participant ID to emoji, at most one entry per participant.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_message: Option<QuotedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_info: Option<DeletedInfo>,
    /// Legacy per-participant "chat deleted" flags. Read, never written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_chat_info: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<bool>,
    /// Fields this client does not model, kept so rewrites round-trip them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn is_edited(&self) -> bool {
        self.edited == Some(true)
    }

    pub fn reaction_of(&self, participant_id: &str) -> Option<&str> {
        self.reactions.get(participant_id).map(String::as_str)
    }
}

/// Document stored at `chats/{combined key}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationDocument {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub typing: BTreeMap<String, bool>,
}

/// Participant profile stored at `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub is_online: bool,
}

impl UserProfile {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            email: None,
            photo_url: None,
            color: None,
            is_online: false,
        }
    }
}

/// Counterpart summary kept in a chat list entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub uid: String,
    pub display_name: String,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl From<&UserProfile> for UserInfo {
    fn from(profile: &UserProfile) -> Self {
        Self {
            uid: profile.uid.clone(),
            display_name: profile.display_name.clone(),
            photo_url: profile.photo_url.clone(),
            color: profile.color.clone(),
        }
    }
}

/// Preview of the latest message shown in the chat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<bool>,
}

/// One entry of `userChats/{uid}`, keyed by combined key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatListEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_info: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_deleted: Option<bool>,
}

/// Chat list entry together with the conversation it points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatListItem {
    pub chat_id: String,
    pub entry: ChatListEntry,
}

/// Kind of binary attachment carried by a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttachmentKind {
    /// Stored in `Message::img`.
    Image,
    /// Stored in `Message::voice`.
    Voice,
}

/// Binary attachment awaiting upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// MIME content type, for example `image/png` or `audio/webm`.
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Soft-delete scope chosen by the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeleteScope {
    /// Hide only for the acting participant.
    ForMe,
    /// Hide for both participants.
    ForEveryone,
}

/// Outgoing message content before ID/timestamp assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageDraft {
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<QuotedMessage>,
}

impl MessageDraft {
    /// A draft can be sent when it carries non-empty text or an attachment.
    pub fn is_sendable(&self) -> bool {
        self.attachment.is_some() || self.text.as_deref().is_some_and(|text| !text.is_empty())
    }
}

/// Command channel input accepted by the chat runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatCommand {
    /// Ensure the conversation with `peer` exists and subscribe to it.
    OpenConversation { peer: UserProfile },
    /// Tear down the active conversation subscription.
    CloseConversation,
    /// Append a new message.
    SendMessage {
        chat_id: String,
        /// Recipient participant ID, used for chat list bookkeeping.
        peer_uid: String,
        /// Frontend-provided transaction ID echoed in `SendAck`.
        client_txn_id: String,
        draft: MessageDraft,
    },
    /// Overwrite the text (and optionally the image) of an existing message.
    EditMessage {
        chat_id: String,
        client_txn_id: String,
        message_id: String,
        text: String,
        attachment: Option<Attachment>,
    },
    /// Soft-delete an existing message.
    DeleteMessage {
        chat_id: String,
        message_id: String,
        scope: DeleteScope,
    },
    /// Set the acting participant's reaction on a message.
    React {
        chat_id: String,
        message_id: String,
        emoji: String,
    },
    /// Read every other participant's profile.
    LoadDirectory,
    /// Read the acting participant's chat list.
    LoadChatList,
}

/// Acknowledgement for send and edit commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Original frontend transaction ID.
    pub client_txn_id: String,
    /// Affected message ID on success.
    pub message_id: Option<String>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
}

impl SendAck {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}

/// Event channel output emitted by the chat runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatEvent {
    /// The conversation document exists and its subscription is live.
    ConversationOpened { chat_id: String, peer: UserProfile },
    /// Latest server-confirmed state of the active conversation.
    ConversationSnapshot {
        chat_id: String,
        messages: Vec<Message>,
        /// Whether the peer is currently flagged as typing.
        peer_typing: bool,
    },
    /// The active conversation subscription was torn down.
    ConversationClosed { chat_id: String },
    SendAck(SendAck),
    /// An attachment upload failed. Only emitted for voice notes.
    UploadFailed {
        client_txn_id: String,
        kind: AttachmentKind,
    },
    /// Diagnostic record of a swallowed store/runtime error.
    Failure { code: String, message: String },
    /// Other participants, online first, then by display name.
    DirectoryLoaded { users: Vec<UserProfile> },
    /// Chat list, newest first, without chats the participant deleted.
    ChatListLoaded { chats: Vec<ChatListItem> },
}

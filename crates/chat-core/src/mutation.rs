//! In-place transforms applied to a fetched message array before it is written
//! back whole.

use thiserror::Error;

use crate::{
    error::ChatError,
    types::{
        AttachmentKind, DeleteScope, DeletedInfo, LastMessage, Message, MessageDraft, QuotedMessage,
        Timestamp,
    },
};

/// Errors that can occur while mutating a message array.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// No element of the array carries the requested ID.
    #[error("message with id '{0}' was not found")]
    MessageNotFound(String),
}

impl From<MutationError> for ChatError {
    fn from(err: MutationError) -> Self {
        match err {
            MutationError::MessageNotFound(message_id) => ChatError::message_not_found(&message_id),
        }
    }
}

/// Upload result attached to a new or edited message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub kind: AttachmentKind,
    pub url: String,
}

/// Build the element appended by a send.
pub fn build_message(
    id: impl Into<String>,
    sender: impl Into<String>,
    date: Timestamp,
    draft: &MessageDraft,
    media: Option<UploadedMedia>,
) -> Message {
    let (img, voice) = match media {
        Some(UploadedMedia {
            kind: AttachmentKind::Image,
            url,
        }) => (Some(url), None),
        Some(UploadedMedia {
            kind: AttachmentKind::Voice,
            url,
        }) => (None, Some(url)),
        None => (None, None),
    };

    Message {
        id: id.into(),
        text: draft.text.clone().filter(|text| !text.is_empty()),
        sender: sender.into(),
        date,
        read: false,
        img,
        voice,
        reactions: Default::default(),
        quoted_message: draft.reply_to.clone(),
        deleted_info: None,
        delete_chat_info: None,
        edited: None,
        alt: None,
        extra: Default::default(),
    }
}

/// Snapshot of `message` used as the quote of a reply.
pub fn quote_of(message: &Message) -> QuotedMessage {
    QuotedMessage {
        text: message.text.clone(),
        sender: message.sender.clone(),
    }
}

/// Chat list preview written after a send.
pub fn last_message_preview(draft: &MessageDraft) -> LastMessage {
    let has_image = draft
        .attachment
        .as_ref()
        .is_some_and(|attachment| attachment.kind == AttachmentKind::Image);
    LastMessage {
        text: draft.text.clone(),
        img: has_image.then_some(true),
    }
}

/// Overwrite the text of a message.
///
/// A text-only edit marks the message as edited; an edit carrying a new image
/// replaces both image URLs instead.
pub fn apply_edit(
    messages: &mut [Message],
    message_id: &str,
    text: &str,
    new_image_url: Option<String>,
) -> Result<(), MutationError> {
    let message = find_mut(messages, message_id)?;
    message.text = Some(text.to_owned());
    match new_image_url {
        Some(url) => {
            message.alt = Some(url.clone());
            message.img = Some(url);
        }
        None => message.edited = Some(true),
    }
    Ok(())
}

/// Write the soft-delete marker for `scope`.
pub fn apply_delete(
    messages: &mut [Message],
    message_id: &str,
    scope: DeleteScope,
    participant_id: &str,
) -> Result<(), MutationError> {
    let message = find_mut(messages, message_id)?;
    message.deleted_info = Some(match scope {
        DeleteScope::ForMe => DeletedInfo::for_me(participant_id),
        DeleteScope::ForEveryone => DeletedInfo::for_everyone(),
    });
    Ok(())
}

/// Set `reactor`'s reaction, replacing any previous one.
///
/// Returns `Ok(false)` without touching the array when the reactor is the
/// message's own sender.
pub fn apply_reaction(
    messages: &mut [Message],
    message_id: &str,
    reactor: &str,
    emoji: &str,
) -> Result<bool, MutationError> {
    let message = find_mut(messages, message_id)?;
    if message.sender == reactor {
        return Ok(false);
    }
    message
        .reactions
        .insert(reactor.to_owned(), emoji.to_owned());
    Ok(true)
}

fn find_mut<'a>(
    messages: &'a mut [Message],
    message_id: &str,
) -> Result<&'a mut Message, MutationError> {
    messages
        .iter_mut()
        .find(|message| message.id == message_id)
        .ok_or_else(|| MutationError::MessageNotFound(message_id.to_owned()))
}

use std::{collections::BTreeMap, slice, sync::Arc};

use chat_core::{
    Attachment, ChatError, ChatListEntry, ChatListItem, ConversationDocument, DeleteScope,
    Message, MessageDraft, MutationError, Timestamp, UploadedMedia, UserInfo, UserProfile,
    apply_delete, apply_edit, apply_reaction, build_message, chat_list, combined_key, directory,
    last_message_preview,
};
use chat_store::{
    DocumentPath, DocumentStore, FieldUpdate, ObjectStore, StoreError, USERS, read_document,
    write_document,
};
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Store-facing half of the runtime: every document and object write lives here.
pub struct ChatBackend {
    me: UserProfile,
    documents: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
}

impl ChatBackend {
    pub fn new(
        me: UserProfile,
        documents: Arc<dyn DocumentStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            me,
            documents,
            objects,
        }
    }

    pub fn me(&self) -> &UserProfile {
        &self.me
    }

    /// Make sure the conversation with `peer` exists and is listed for both
    /// participants. Returns its combined key.
    pub async fn open_conversation(&self, peer: &UserProfile) -> Result<String, ChatError> {
        let chat_id = combined_key(&self.me.uid, &peer.uid);
        let chat_path = DocumentPath::chat(&chat_id);

        if self.documents.get(&chat_path).await?.is_none() {
            write_document(
                self.documents.as_ref(),
                &chat_path,
                &ConversationDocument::default(),
            )
            .await?;

            self.ensure_chat_list(&self.me.uid).await?;
            self.ensure_chat_list(&peer.uid).await?;
            self.write_chat_list_entry(&self.me.uid, &chat_id, peer)
                .await?;
            self.write_chat_list_entry(&peer.uid, &chat_id, &self.me)
                .await?;
            info!(%chat_id, peer = %peer.uid, "conversation created");
        } else {
            self.ensure_chat_list(&self.me.uid).await?;
            self.documents
                .update(
                    &DocumentPath::user_chats(&self.me.uid),
                    vec![FieldUpdate::delete(format!("{chat_id}.chatDeleted"))],
                )
                .await?;
            debug!(%chat_id, "conversation reopened");
        }

        Ok(chat_id)
    }

    pub async fn subscribe_conversation(
        &self,
        chat_id: &str,
    ) -> Result<watch::Receiver<Option<Value>>, ChatError> {
        Ok(self.documents.subscribe(&DocumentPath::chat(chat_id)).await?)
    }

    /// Upload `attachment` under a fresh UUID name, logging progress.
    pub async fn upload_attachment(
        &self,
        attachment: &Attachment,
    ) -> Result<UploadedMedia, ChatError> {
        let name = Uuid::new_v4().to_string();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();

        let upload = self.objects.upload(
            &name,
            &attachment.content_type,
            attachment.data.clone(),
            Some(progress_tx),
        );
        let report = async {
            while let Some(progress) = progress_rx.recv().await {
                trace!(
                    name = %name,
                    kind = ?attachment.kind,
                    percent = progress.percent(),
                    "upload progress"
                );
            }
        };
        let (result, ()) = tokio::join!(upload, report);

        let url = result.map_err(|err| ChatError::upload_failed(err.to_string()))?;
        debug!(name = %name, kind = ?attachment.kind, %url, "attachment uploaded");
        Ok(UploadedMedia {
            kind: attachment.kind,
            url: url.to_string(),
        })
    }

    /// Append a new message to the conversation, uploading its attachment
    /// first. Returns the new message ID.
    pub async fn send_message(
        &self,
        chat_id: &str,
        draft: &MessageDraft,
    ) -> Result<String, ChatError> {
        let media = match &draft.attachment {
            Some(attachment) => Some(self.upload_attachment(attachment).await?),
            None => None,
        };

        let message_id = Uuid::new_v4().to_string();
        let message = build_message(&message_id, &self.me.uid, Timestamp::now(), draft, media);
        let element = serde_json::to_value(&message).map_err(StoreError::from)?;

        self.documents
            .update(
                &DocumentPath::chat(chat_id),
                vec![FieldUpdate::array_union("messages", vec![element])],
            )
            .await?;
        debug!(%chat_id, %message_id, "message appended");
        Ok(message_id)
    }

    /// Chat list bookkeeping after a send.
    pub async fn record_last_message(
        &self,
        chat_id: &str,
        peer_uid: &str,
        draft: &MessageDraft,
    ) -> Result<(), ChatError> {
        let preview = last_message_preview(draft);

        self.documents
            .update(
                &DocumentPath::user_chats(&self.me.uid),
                vec![
                    FieldUpdate::set_serialized(format!("{chat_id}.lastMessage"), &preview)?,
                    FieldUpdate::server_timestamp(format!("{chat_id}.date")),
                ],
            )
            .await?;
        self.documents
            .update(
                &DocumentPath::user_chats(peer_uid),
                vec![
                    FieldUpdate::set_serialized(format!("{chat_id}.lastMessage"), &preview)?,
                    FieldUpdate::server_timestamp(format!("{chat_id}.date")),
                    FieldUpdate::delete(format!("{chat_id}.chatDeleted")),
                ],
            )
            .await?;
        Ok(())
    }

    /// Overwrite a message's text, optionally replacing its image.
    pub async fn edit_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<(), ChatError> {
        let new_image_url = match attachment {
            Some(attachment) => Some(self.upload_attachment(attachment).await?.url),
            None => None,
        };

        self.rewrite_message(chat_id, message_id, |messages| {
            apply_edit(messages, message_id, text, new_image_url).map(|()| true)
        })
        .await?;
        debug!(%chat_id, %message_id, "message edited");
        Ok(())
    }

    pub async fn delete_message(
        &self,
        chat_id: &str,
        message_id: &str,
        scope: DeleteScope,
    ) -> Result<(), ChatError> {
        let participant_id = self.me.uid.as_str();
        self.rewrite_message(chat_id, message_id, |messages| {
            apply_delete(messages, message_id, scope, participant_id).map(|()| true)
        })
        .await?;
        debug!(%chat_id, %message_id, ?scope, "message deleted");
        Ok(())
    }

    /// Set this participant's reaction. Returns `false` when nothing was
    /// written because the message is the participant's own.
    pub async fn react(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<bool, ChatError> {
        let reactor = self.me.uid.as_str();
        let applied = self
            .rewrite_message(chat_id, message_id, |messages| {
                apply_reaction(messages, message_id, reactor, emoji)
            })
            .await?;
        debug!(%chat_id, %message_id, applied, "reaction processed");
        Ok(applied)
    }

    /// Every other participant, online first, then by display name.
    /// Profiles that fail to decode are skipped.
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ChatError> {
        let documents = self.documents.list(USERS).await?;
        let profiles = documents
            .into_iter()
            .filter_map(|(path, value)| match serde_json::from_value::<UserProfile>(value) {
                Ok(profile) => Some(profile),
                Err(err) => {
                    warn!(%path, error = %err, "skipping undecodable profile");
                    None
                }
            });
        Ok(directory(profiles, &self.me.uid))
    }

    /// This participant's chat list, newest first, without deleted chats.
    pub async fn chat_list(&self) -> Result<Vec<ChatListItem>, ChatError> {
        let entries: Option<BTreeMap<String, ChatListEntry>> = read_document(
            self.documents.as_ref(),
            &DocumentPath::user_chats(&self.me.uid),
        )
        .await?;
        Ok(chat_list(entries.unwrap_or_default()))
    }

    /// Fetch the message array, mutate the element with `message_id`, and
    /// write the array back when the mutation reports a change. Every other
    /// element is written back exactly as read. Concurrent writers race; the
    /// last one wins.
    async fn rewrite_message<F>(
        &self,
        chat_id: &str,
        message_id: &str,
        mutate: F,
    ) -> Result<bool, ChatError>
    where
        F: FnOnce(&mut [Message]) -> Result<bool, MutationError> + Send,
    {
        let path = DocumentPath::chat(chat_id);
        let mut document = self
            .documents
            .get(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        let not_found = || ChatError::from(MutationError::MessageNotFound(message_id.to_owned()));
        let elements = document
            .get_mut("messages")
            .and_then(Value::as_array_mut)
            .ok_or_else(not_found)?;
        let slot = elements
            .iter_mut()
            .find(|element| element.get("id").and_then(Value::as_str) == Some(message_id))
            .ok_or_else(not_found)?;

        let mut message: Message =
            serde_json::from_value(slot.clone()).map_err(StoreError::from)?;
        let changed = mutate(slice::from_mut(&mut message))?;
        if !changed {
            return Ok(false);
        }
        *slot = serde_json::to_value(&message).map_err(StoreError::from)?;
        let messages = Value::Array(elements.clone());

        self.documents
            .update(&path, vec![FieldUpdate::set("messages", messages)])
            .await?;
        Ok(true)
    }

    async fn ensure_chat_list(&self, uid: &str) -> Result<(), ChatError> {
        let path = DocumentPath::user_chats(uid);
        if self.documents.get(&path).await?.is_none() {
            self.documents.set(&path, json!({})).await?;
            trace!(%path, "chat list created");
        }
        Ok(())
    }

    async fn write_chat_list_entry(
        &self,
        owner_uid: &str,
        chat_id: &str,
        counterpart: &UserProfile,
    ) -> Result<(), ChatError> {
        self.documents
            .update(
                &DocumentPath::user_chats(owner_uid),
                vec![
                    FieldUpdate::set_serialized(
                        format!("{chat_id}.userInfo"),
                        &UserInfo::from(counterpart),
                    )?,
                    FieldUpdate::server_timestamp(format!("{chat_id}.date")),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Decode a conversation snapshot into its messages and the peer's typing flag.
///
/// A missing document decodes as an empty conversation. Elements that fail to
/// decode are logged and left out so one bad element does not hide the rest.
pub fn decode_snapshot(
    value: Option<&Value>,
    peer_uid: &str,
) -> Result<(Vec<Message>, bool), ChatError> {
    let Some(value) = value else {
        return Ok((Vec::new(), false));
    };
    let messages = match value.get("messages") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(elements)) => elements.iter().filter_map(decode_element).collect(),
        Some(other) => {
            return Err(StoreError::Serialization(format!(
                "messages must be an array, found {other}"
            ))
            .into());
        }
    };
    let peer_typing = value
        .get("typing")
        .and_then(|typing| typing.get(peer_uid))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok((messages, peer_typing))
}

fn decode_element(element: &Value) -> Option<Message> {
    match serde_json::from_value(element.clone()) {
        Ok(message) => Some(message),
        Err(err) => {
            warn!(
                id = element.get("id").and_then(serde_json::Value::as_str).unwrap_or("<missing>"),
                error = %err,
                "skipping undecodable message"
            );
            None
        }
    }
}

//! Async chat runtime: consumes `ChatCommand`s, performs store I/O, and
//! broadcasts `ChatEvent`s.

use std::sync::Arc;

use chat_core::{
    Attachment, AttachmentKind, ChatCommand, ChatError, ChatErrorCategory, ChatEvent,
    MessageDraft, SendOutcome, UserProfile, normalize_failure, normalize_send_outcome,
};
use chat_store::{DocumentStore, ObjectStore};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

mod backend;
mod channel;

pub use backend::{ChatBackend, decode_snapshot};
pub use channel::{ChatChannelError, ChatRuntimeHandle, EventPublisher, EventStream};

const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Signed-in participant.
    pub me: UserProfile,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl RuntimeConfig {
    pub fn new(me: UserProfile) -> Self {
        Self {
            me,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Spawn the runtime loop on the current tokio runtime.
///
/// The loop stops once every handle clone has been dropped.
pub fn spawn_runtime(
    config: RuntimeConfig,
    documents: Arc<dyn DocumentStore>,
    objects: Arc<dyn ObjectStore>,
) -> ChatRuntimeHandle {
    let (handle, command_rx, events) =
        channel::runtime_channels(config.command_buffer, config.event_buffer);
    let backend = ChatBackend::new(config.me, documents, objects);
    let runtime = ChatRuntime::new(events, command_rx, backend);
    tokio::spawn(async move {
        runtime.run().await;
    });

    handle
}

#[derive(Debug)]
struct ActiveConversation {
    chat_id: String,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct ChatRuntime {
    events: EventPublisher,
    command_rx: mpsc::Receiver<ChatCommand>,
    backend: ChatBackend,
    active: Option<ActiveConversation>,
}

impl ChatRuntime {
    fn new(
        events: EventPublisher,
        command_rx: mpsc::Receiver<ChatCommand>,
        backend: ChatBackend,
    ) -> Self {
        Self {
            events,
            command_rx,
            backend,
            active: None,
        }
    }

    async fn run(mut self) {
        info!(uid = %self.backend.me().uid, "chat runtime started");
        while let Some(command) = self.command_rx.recv().await {
            if let Err(err) = self.handle_command(command).await {
                self.report(err);
            }
        }
        self.close_active().await;
        info!("chat runtime stopped");
    }

    async fn handle_command(&mut self, command: ChatCommand) -> Result<(), ChatError> {
        match command {
            ChatCommand::OpenConversation { peer } => self.handle_open_conversation(peer).await,
            ChatCommand::CloseConversation => {
                self.close_active().await;
                Ok(())
            }
            ChatCommand::SendMessage {
                chat_id,
                peer_uid,
                client_txn_id,
                draft,
            } => {
                self.handle_send_message(chat_id, peer_uid, client_txn_id, draft)
                    .await;
                Ok(())
            }
            ChatCommand::EditMessage {
                chat_id,
                client_txn_id,
                message_id,
                text,
                attachment,
            } => {
                self.handle_edit_message(chat_id, client_txn_id, message_id, text, attachment)
                    .await;
                Ok(())
            }
            ChatCommand::DeleteMessage {
                chat_id,
                message_id,
                scope,
            } => {
                self.backend
                    .delete_message(&chat_id, &message_id, scope)
                    .await
            }
            ChatCommand::React {
                chat_id,
                message_id,
                emoji,
            } => {
                let applied = self.backend.react(&chat_id, &message_id, &emoji).await?;
                if !applied {
                    debug!(%chat_id, %message_id, "ignored reaction to own message");
                }
                Ok(())
            }
            ChatCommand::LoadDirectory => {
                let users = self.backend.list_users().await?;
                self.events.emit(ChatEvent::DirectoryLoaded { users });
                Ok(())
            }
            ChatCommand::LoadChatList => {
                let chats = self.backend.chat_list().await?;
                self.events.emit(ChatEvent::ChatListLoaded { chats });
                Ok(())
            }
        }
    }

    async fn handle_open_conversation(&mut self, peer: UserProfile) -> Result<(), ChatError> {
        let chat_id = self.backend.open_conversation(&peer).await?;
        let receiver = self.backend.subscribe_conversation(&chat_id).await?;
        self.close_active().await;

        self.events.emit(ChatEvent::ConversationOpened {
            chat_id: chat_id.clone(),
            peer: peer.clone(),
        });

        let stop = CancellationToken::new();
        let task = tokio::spawn(forward_snapshots(
            chat_id.clone(),
            peer.uid,
            receiver,
            self.events.clone(),
            stop.child_token(),
        ));
        info!(%chat_id, "conversation subscription started");
        self.active = Some(ActiveConversation {
            chat_id,
            stop,
            task,
        });
        Ok(())
    }

    async fn close_active(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.stop.cancel();
        let _ = active.task.await;
        debug!(chat_id = %active.chat_id, "conversation subscription stopped");
        self.events.emit(ChatEvent::ConversationClosed {
            chat_id: active.chat_id,
        });
    }

    async fn handle_send_message(
        &mut self,
        chat_id: String,
        peer_uid: String,
        client_txn_id: String,
        draft: MessageDraft,
    ) {
        if !draft.is_sendable() {
            self.events.emit(normalize_send_outcome(
                client_txn_id,
                SendOutcome::Failure {
                    error: ChatError::new(
                        ChatErrorCategory::Config,
                        "empty_message",
                        "message needs text or an attachment",
                    ),
                },
            ));
            return;
        }

        let outcome = match self.backend.send_message(&chat_id, &draft).await {
            Ok(message_id) => {
                if let Err(err) = self
                    .backend
                    .record_last_message(&chat_id, &peer_uid, &draft)
                    .await
                {
                    self.report(err);
                }
                SendOutcome::Success { message_id }
            }
            Err(error) => {
                self.notify_upload_failure(&client_txn_id, &error, draft.attachment.as_ref());
                warn!(%chat_id, %client_txn_id, code = %error.code, "send failed");
                SendOutcome::Failure { error }
            }
        };

        self.events.emit(normalize_send_outcome(client_txn_id, outcome));
    }

    async fn handle_edit_message(
        &mut self,
        chat_id: String,
        client_txn_id: String,
        message_id: String,
        text: String,
        attachment: Option<Attachment>,
    ) {
        let outcome = match self
            .backend
            .edit_message(&chat_id, &message_id, &text, attachment.as_ref())
            .await
        {
            Ok(()) => SendOutcome::Success { message_id },
            Err(error) => {
                self.notify_upload_failure(&client_txn_id, &error, attachment.as_ref());
                warn!(%chat_id, %client_txn_id, code = %error.code, "edit failed");
                SendOutcome::Failure { error }
            }
        };

        self.events.emit(normalize_send_outcome(client_txn_id, outcome));
    }

    /// Voice notes are the only uploads whose failure is surfaced to the user.
    fn notify_upload_failure(
        &self,
        client_txn_id: &str,
        error: &ChatError,
        attachment: Option<&Attachment>,
    ) {
        let Some(attachment) = attachment else {
            return;
        };
        if error.is_upload_failure() && attachment.kind == AttachmentKind::Voice {
            self.events.emit(ChatEvent::UploadFailed {
                client_txn_id: client_txn_id.to_owned(),
                kind: AttachmentKind::Voice,
            });
        }
    }

    fn report(&self, err: ChatError) {
        warn!(
            category = ?err.category,
            code = %err.code,
            message = %err.message,
            "chat operation failed"
        );
        self.events.emit(normalize_failure(err));
    }
}

async fn forward_snapshots(
    chat_id: String,
    peer_uid: String,
    mut receiver: watch::Receiver<Option<Value>>,
    events: EventPublisher,
    stop: CancellationToken,
) {
    loop {
        let value = receiver.borrow_and_update().as_ref().cloned();
        match decode_snapshot(value.as_ref(), &peer_uid) {
            Ok((messages, peer_typing)) => {
                trace!(
                    %chat_id,
                    message_count = messages.len(),
                    peer_typing,
                    "conversation snapshot"
                );
                events.emit(ChatEvent::ConversationSnapshot {
                    chat_id: chat_id.clone(),
                    messages,
                    peer_typing,
                });
            }
            Err(err) => {
                warn!(%chat_id, code = %err.code, message = %err.message, "undecodable snapshot");
                events.emit(normalize_failure(err));
            }
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            changed = receiver.changed() => {
                if changed.is_err() {
                    debug!(%chat_id, "snapshot source closed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chat_core::{
        ChatListEntry, ConversationDocument, DeleteScope, DeletedInfo, LastMessage, Message,
        QuotedMessage,
    };
    use chat_store::{
        DocumentPath, InMemoryDocumentStore, InMemoryObjectStore, ProgressSender, StoreError,
        read_document,
    };
    use serde_json::json;
    use tokio::time::timeout;
    use url::Url;

    use super::*;

    const CHAT_ID: &str = "bobalice";

    fn alice() -> UserProfile {
        UserProfile::new("alice", "Alice")
    }

    fn bob() -> UserProfile {
        UserProfile::new("bob", "Bob")
    }

    struct Harness {
        handle: ChatRuntimeHandle,
        events: EventStream,
        documents: Arc<InMemoryDocumentStore>,
        objects: Arc<InMemoryObjectStore>,
    }

    fn harness() -> Harness {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let objects = Arc::new(InMemoryObjectStore::new(
            Url::parse("memory://objects/").expect("base url"),
        ));
        let handle = spawn_runtime(RuntimeConfig::new(alice()), documents.clone(), objects.clone());
        let events = handle.subscribe();
        Harness {
            handle,
            events,
            documents,
            objects,
        }
    }

    async fn collect_until(
        events: &mut EventStream,
        mut done: impl FnMut(&[ChatEvent]) -> bool,
    ) -> Vec<ChatEvent> {
        let mut seen = Vec::new();
        timeout(Duration::from_secs(2), async {
            while !done(&seen) {
                let event = events.recv().await.expect("event receive");
                seen.push(event);
            }
        })
        .await
        .expect("event timeout");
        seen
    }

    fn snapshot_len(event: &ChatEvent) -> Option<usize> {
        match event {
            ChatEvent::ConversationSnapshot { messages, .. } => Some(messages.len()),
            _ => None,
        }
    }

    fn has_snapshot_with(seen: &[ChatEvent], count: usize) -> bool {
        seen.iter().any(|event| snapshot_len(event) == Some(count))
    }

    fn find_ack(seen: &[ChatEvent]) -> Option<&chat_core::SendAck> {
        seen.iter().find_map(|event| match event {
            ChatEvent::SendAck(ack) => Some(ack),
            _ => None,
        })
    }

    async fn conversation(documents: &InMemoryDocumentStore) -> ConversationDocument {
        read_document(documents, &DocumentPath::chat(CHAT_ID))
            .await
            .expect("read conversation")
            .expect("conversation exists")
    }

    async fn chat_list_entry(documents: &InMemoryDocumentStore, uid: &str) -> ChatListEntry {
        let list: std::collections::BTreeMap<String, ChatListEntry> =
            read_document(documents, &DocumentPath::user_chats(uid))
                .await
                .expect("read chat list")
                .expect("chat list exists");
        list.get(CHAT_ID).cloned().expect("entry exists")
    }

    async fn open(harness: &mut Harness) {
        harness
            .handle
            .send(ChatCommand::OpenConversation { peer: bob() })
            .await
            .expect("command should enqueue");
        collect_until(&mut harness.events, |seen| has_snapshot_with(seen, 0)).await;
    }

    async fn send_text(harness: &mut Harness, txn: &str, text: &str) -> String {
        harness
            .handle
            .send(ChatCommand::SendMessage {
                chat_id: CHAT_ID.to_owned(),
                peer_uid: "bob".to_owned(),
                client_txn_id: txn.to_owned(),
                draft: MessageDraft {
                    text: Some(text.to_owned()),
                    ..MessageDraft::default()
                },
            })
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| find_ack(seen).is_some()).await;
        find_ack(&seen)
            .and_then(|ack| ack.message_id.clone())
            .expect("send should succeed")
    }

    fn seeded_message(id: &str, sender: &str) -> Message {
        Message {
            id: id.to_owned(),
            text: Some(format!("from {sender}")),
            sender: sender.to_owned(),
            date: chat_core::Timestamp::new(1_700_000_000, 0),
            read: false,
            img: None,
            voice: None,
            reactions: Default::default(),
            quoted_message: None,
            deleted_info: None,
            delete_chat_info: None,
            edited: None,
            alt: None,
            extra: Default::default(),
        }
    }

    async fn seed(harness: &mut Harness, messages: Vec<Message>) {
        let count = messages.len();
        let document = ConversationDocument {
            messages,
            typing: Default::default(),
        };
        chat_store::write_document(
            harness.documents.as_ref(),
            &DocumentPath::chat(CHAT_ID),
            &document,
        )
        .await
        .expect("seed conversation");
        collect_until(&mut harness.events, |seen| has_snapshot_with(seen, count)).await;
    }

    #[tokio::test]
    async fn opening_creates_conversation_and_chat_lists() {
        let mut harness = harness();
        harness
            .handle
            .send(ChatCommand::OpenConversation { peer: bob() })
            .await
            .expect("command should enqueue");

        let seen = collect_until(&mut harness.events, |seen| has_snapshot_with(seen, 0)).await;
        assert_eq!(
            seen[0],
            ChatEvent::ConversationOpened {
                chat_id: CHAT_ID.to_owned(),
                peer: bob(),
            }
        );

        assert!(conversation(&harness.documents).await.messages.is_empty());
        let mine = chat_list_entry(&harness.documents, "alice").await;
        assert_eq!(mine.user_info.map(|info| info.uid).as_deref(), Some("bob"));
        assert!(mine.date.is_some());
        let theirs = chat_list_entry(&harness.documents, "bob").await;
        assert_eq!(
            theirs.user_info.map(|info| info.display_name).as_deref(),
            Some("Alice")
        );
    }

    #[tokio::test]
    async fn reopening_clears_own_chat_deleted_flag() {
        let mut harness = harness();
        harness
            .documents
            .set(&DocumentPath::chat(CHAT_ID), json!({"messages": []}))
            .await
            .expect("seed chat");
        harness
            .documents
            .set(
                &DocumentPath::user_chats("alice"),
                json!({CHAT_ID: {"chatDeleted": true}}),
            )
            .await
            .expect("seed chat list");

        open(&mut harness).await;

        let entry = chat_list_entry(&harness.documents, "alice").await;
        assert_eq!(entry.chat_deleted, None);
    }

    #[tokio::test]
    async fn send_appends_message_and_updates_chat_lists() {
        let mut harness = harness();
        open(&mut harness).await;
        harness
            .documents
            .update(
                &DocumentPath::user_chats("bob"),
                vec![chat_store::FieldUpdate::set(
                    format!("{CHAT_ID}.chatDeleted"),
                    json!(true),
                )],
            )
            .await
            .expect("flag peer entry");

        let message_id = send_text(&mut harness, "txn-1", "hi bob").await;
        collect_until(&mut harness.events, |seen| has_snapshot_with(seen, 1)).await;

        let stored = conversation(&harness.documents).await.messages;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, message_id);
        assert_eq!(stored[0].sender, "alice");
        assert_eq!(stored[0].text.as_deref(), Some("hi bob"));
        assert!(!stored[0].read);

        let expected = Some(LastMessage {
            text: Some("hi bob".to_owned()),
            img: None,
        });
        assert_eq!(chat_list_entry(&harness.documents, "alice").await.last_message, expected);
        let peer = chat_list_entry(&harness.documents, "bob").await;
        assert_eq!(peer.last_message, expected);
        assert_eq!(peer.chat_deleted, None);
    }

    #[tokio::test]
    async fn image_send_stores_download_url() {
        let mut harness = harness();
        open(&mut harness).await;

        harness
            .handle
            .send(ChatCommand::SendMessage {
                chat_id: CHAT_ID.to_owned(),
                peer_uid: "bob".to_owned(),
                client_txn_id: "txn-img".to_owned(),
                draft: MessageDraft {
                    text: Some(String::new()),
                    attachment: Some(Attachment {
                        kind: AttachmentKind::Image,
                        content_type: "image/png".to_owned(),
                        data: vec![7; 64],
                    }),
                    reply_to: Some(QuotedMessage {
                        text: Some("earlier".to_owned()),
                        sender: "bob".to_owned(),
                    }),
                },
            })
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| find_ack(seen).is_some()).await;
        assert!(find_ack(&seen).expect("ack").is_success());

        let stored = conversation(&harness.documents).await.messages;
        let url = stored[0].img.clone().expect("image url stored");
        assert!(url.starts_with("memory://objects/"));
        assert_eq!(stored[0].text, None);
        assert_eq!(stored[0].quoted_message.as_ref().map(|q| q.sender.as_str()), Some("bob"));

        let name = url.trim_start_matches("memory://objects/");
        let object = harness.objects.object(name).await.expect("object uploaded");
        assert_eq!(object.content_type, "image/png");
        assert_eq!(
            chat_list_entry(&harness.documents, "alice")
                .await
                .last_message
                .and_then(|last| last.img),
            Some(true)
        );
    }

    struct FailingObjectStore;

    #[async_trait]
    impl ObjectStore for FailingObjectStore {
        async fn upload(
            &self,
            _name: &str,
            _content_type: &str,
            _data: Vec<u8>,
            _progress: Option<ProgressSender>,
        ) -> Result<Url, StoreError> {
            Err(StoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[tokio::test]
    async fn voice_upload_failure_notifies_and_fails_ack() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let handle = spawn_runtime(
            RuntimeConfig::new(alice()),
            documents.clone(),
            Arc::new(FailingObjectStore),
        );
        let mut events = handle.subscribe();
        handle
            .send(ChatCommand::OpenConversation { peer: bob() })
            .await
            .expect("command should enqueue");
        collect_until(&mut events, |seen| has_snapshot_with(seen, 0)).await;

        handle
            .send(ChatCommand::SendMessage {
                chat_id: CHAT_ID.to_owned(),
                peer_uid: "bob".to_owned(),
                client_txn_id: "txn-voice".to_owned(),
                draft: MessageDraft {
                    text: None,
                    attachment: Some(Attachment {
                        kind: AttachmentKind::Voice,
                        content_type: "audio/webm".to_owned(),
                        data: vec![1, 2, 3],
                    }),
                    reply_to: None,
                },
            })
            .await
            .expect("command should enqueue");

        let seen = collect_until(&mut events, |seen| find_ack(seen).is_some()).await;
        assert!(seen.contains(&ChatEvent::UploadFailed {
            client_txn_id: "txn-voice".to_owned(),
            kind: AttachmentKind::Voice,
        }));
        let ack = find_ack(&seen).expect("ack");
        assert_eq!(ack.error_code.as_deref(), Some("upload_failed"));

        let stored: ConversationDocument =
            read_document(documents.as_ref(), &DocumentPath::chat(CHAT_ID))
                .await
                .expect("read")
                .expect("exists");
        assert!(stored.messages.is_empty());
    }

    #[tokio::test]
    async fn image_upload_failure_only_fails_ack() {
        let handle = spawn_runtime(
            RuntimeConfig::new(alice()),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(FailingObjectStore),
        );
        let mut events = handle.subscribe();
        handle
            .send(ChatCommand::OpenConversation { peer: bob() })
            .await
            .expect("command should enqueue");
        collect_until(&mut events, |seen| has_snapshot_with(seen, 0)).await;

        handle
            .send(ChatCommand::SendMessage {
                chat_id: CHAT_ID.to_owned(),
                peer_uid: "bob".to_owned(),
                client_txn_id: "txn-img".to_owned(),
                draft: MessageDraft {
                    text: Some("look".to_owned()),
                    attachment: Some(Attachment {
                        kind: AttachmentKind::Image,
                        content_type: "image/png".to_owned(),
                        data: vec![1],
                    }),
                    reply_to: None,
                },
            })
            .await
            .expect("command should enqueue");

        let seen = collect_until(&mut events, |seen| find_ack(seen).is_some()).await;
        assert!(
            !seen
                .iter()
                .any(|event| matches!(event, ChatEvent::UploadFailed { .. }))
        );
        assert!(!find_ack(&seen).expect("ack").is_success());
    }

    #[tokio::test]
    async fn send_to_missing_conversation_fails_ack() {
        let mut harness = harness();
        harness
            .handle
            .send(ChatCommand::SendMessage {
                chat_id: CHAT_ID.to_owned(),
                peer_uid: "bob".to_owned(),
                client_txn_id: "txn-1".to_owned(),
                draft: MessageDraft {
                    text: Some("hello?".to_owned()),
                    ..MessageDraft::default()
                },
            })
            .await
            .expect("command should enqueue");

        let seen = collect_until(&mut harness.events, |seen| find_ack(seen).is_some()).await;
        let ack = find_ack(&seen).expect("ack");
        assert_eq!(ack.client_txn_id, "txn-1");
        assert_eq!(ack.error_code.as_deref(), Some("not-found"));
    }

    #[tokio::test]
    async fn empty_draft_is_rejected() {
        let mut harness = harness();
        harness
            .handle
            .send(ChatCommand::SendMessage {
                chat_id: CHAT_ID.to_owned(),
                peer_uid: "bob".to_owned(),
                client_txn_id: "txn-empty".to_owned(),
                draft: MessageDraft::default(),
            })
            .await
            .expect("command should enqueue");

        let seen = collect_until(&mut harness.events, |seen| find_ack(seen).is_some()).await;
        assert_eq!(
            find_ack(&seen).and_then(|ack| ack.error_code.as_deref()),
            Some("empty_message")
        );
    }

    #[tokio::test]
    async fn edit_rewrites_text_and_marks_edited() {
        let mut harness = harness();
        open(&mut harness).await;
        let message_id = send_text(&mut harness, "txn-1", "helo").await;

        harness
            .handle
            .send(ChatCommand::EditMessage {
                chat_id: CHAT_ID.to_owned(),
                client_txn_id: "txn-2".to_owned(),
                message_id: message_id.clone(),
                text: "hello".to_owned(),
                attachment: None,
            })
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| {
            seen.iter().any(|event| {
                matches!(event, ChatEvent::SendAck(ack) if ack.client_txn_id == "txn-2")
            })
        })
        .await;
        let ack = seen
            .iter()
            .find_map(|event| match event {
                ChatEvent::SendAck(ack) if ack.client_txn_id == "txn-2" => Some(ack),
                _ => None,
            })
            .expect("edit ack");
        assert_eq!(ack.message_id.as_deref(), Some(message_id.as_str()));

        let stored = conversation(&harness.documents).await.messages;
        assert_eq!(stored[0].id, message_id);
        assert_eq!(stored[0].text.as_deref(), Some("hello"));
        assert!(stored[0].is_edited());
    }

    #[tokio::test]
    async fn reaction_overwrites_previous_reaction() {
        let mut harness = harness();
        open(&mut harness).await;
        seed(&mut harness, vec![seeded_message("m1", "bob")]).await;

        for emoji in ["👍", "😂"] {
            harness
                .handle
                .send(ChatCommand::React {
                    chat_id: CHAT_ID.to_owned(),
                    message_id: "m1".to_owned(),
                    emoji: emoji.to_owned(),
                })
                .await
                .expect("command should enqueue");
            collect_until(&mut harness.events, |seen| {
                seen.iter().any(|event| match event {
                    ChatEvent::ConversationSnapshot { messages, .. } => {
                        messages.first().and_then(|m| m.reaction_of("alice")) == Some(emoji)
                    }
                    _ => false,
                })
            })
            .await;
        }

        let stored = conversation(&harness.documents).await.messages;
        assert_eq!(stored[0].reactions.len(), 1);
        assert_eq!(stored[0].reaction_of("alice"), Some("😂"));
    }

    #[tokio::test]
    async fn reacting_to_own_message_is_ignored() {
        let mut harness = harness();
        open(&mut harness).await;
        seed(&mut harness, vec![seeded_message("m1", "alice")]).await;

        harness
            .handle
            .send(ChatCommand::React {
                chat_id: CHAT_ID.to_owned(),
                message_id: "m1".to_owned(),
                emoji: "👍".to_owned(),
            })
            .await
            .expect("command should enqueue");
        // Commands are processed in order; the send ack marks the reaction as handled.
        send_text(&mut harness, "txn-after", "after").await;

        let stored = conversation(&harness.documents).await.messages;
        assert!(stored[0].reactions.is_empty());
    }

    #[tokio::test]
    async fn delete_writes_scope_markers() {
        let mut harness = harness();
        open(&mut harness).await;
        seed(
            &mut harness,
            vec![seeded_message("m1", "bob"), seeded_message("m2", "alice")],
        )
        .await;

        for (message_id, scope) in [("m1", DeleteScope::ForMe), ("m2", DeleteScope::ForEveryone)] {
            harness
                .handle
                .send(ChatCommand::DeleteMessage {
                    chat_id: CHAT_ID.to_owned(),
                    message_id: message_id.to_owned(),
                    scope,
                })
                .await
                .expect("command should enqueue");
        }
        collect_until(&mut harness.events, |seen| {
            seen.iter().any(|event| match event {
                ChatEvent::ConversationSnapshot { messages, .. } => {
                    messages.iter().all(|message| message.deleted_info.is_some())
                }
                _ => false,
            })
        })
        .await;

        let stored = conversation(&harness.documents).await.messages;
        assert_eq!(stored[0].deleted_info, Some(DeletedInfo::for_me("alice")));
        assert_eq!(stored[1].deleted_info, Some(DeletedInfo::for_everyone()));
    }

    #[tokio::test]
    async fn unknown_message_is_reported_as_failure() {
        let mut harness = harness();
        open(&mut harness).await;

        harness
            .handle
            .send(ChatCommand::DeleteMessage {
                chat_id: CHAT_ID.to_owned(),
                message_id: "m404".to_owned(),
                scope: DeleteScope::ForMe,
            })
            .await
            .expect("command should enqueue");

        let seen = collect_until(&mut harness.events, |seen| {
            seen.iter()
                .any(|event| matches!(event, ChatEvent::Failure { .. }))
        })
        .await;
        match seen.last() {
            Some(ChatEvent::Failure { code, .. }) => assert_eq!(code, "message_not_found"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_carries_peer_typing_flag() {
        let mut harness = harness();
        open(&mut harness).await;

        harness
            .documents
            .update(
                &DocumentPath::chat(CHAT_ID),
                vec![chat_store::FieldUpdate::set("typing.bob", json!(true))],
            )
            .await
            .expect("set typing");

        collect_until(&mut harness.events, |seen| {
            seen.iter().any(|event| {
                matches!(event, ChatEvent::ConversationSnapshot { peer_typing: true, .. })
            })
        })
        .await;
    }

    #[tokio::test]
    async fn switching_conversation_closes_previous_subscription() {
        let mut harness = harness();
        open(&mut harness).await;

        harness
            .handle
            .send(ChatCommand::OpenConversation {
                peer: UserProfile::new("carol", "Carol"),
            })
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| {
            seen.iter().any(|event| {
                matches!(
                    event,
                    ChatEvent::ConversationSnapshot { chat_id, .. } if chat_id == "carolalice"
                )
            })
        })
        .await;

        let closed = seen
            .iter()
            .position(|event| {
                *event
                    == ChatEvent::ConversationClosed {
                        chat_id: CHAT_ID.to_owned(),
                    }
            })
            .expect("previous conversation closed");
        let opened = seen
            .iter()
            .position(|event| {
                matches!(
                    event,
                    ChatEvent::ConversationOpened { chat_id, .. } if chat_id == "carolalice"
                )
            })
            .expect("next conversation opened");
        assert!(closed < opened);

        harness
            .handle
            .send(ChatCommand::CloseConversation)
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| {
            seen.iter()
                .any(|event| matches!(event, ChatEvent::ConversationClosed { .. }))
        })
        .await;
        assert!(seen.contains(&ChatEvent::ConversationClosed {
            chat_id: "carolalice".to_owned(),
        }));
    }

    #[tokio::test]
    async fn image_edit_swaps_picture_without_edited_flag() {
        let mut harness = harness();
        open(&mut harness).await;
        seed(&mut harness, vec![seeded_message("m1", "alice")]).await;

        harness
            .handle
            .send(ChatCommand::EditMessage {
                chat_id: CHAT_ID.to_owned(),
                client_txn_id: "txn-edit-img".to_owned(),
                message_id: "m1".to_owned(),
                text: "new caption".to_owned(),
                attachment: Some(Attachment {
                    kind: AttachmentKind::Image,
                    content_type: "image/jpeg".to_owned(),
                    data: vec![1; 16],
                }),
            })
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| find_ack(seen).is_some()).await;
        assert!(find_ack(&seen).expect("ack").is_success());

        let stored = conversation(&harness.documents).await.messages;
        let url = stored[0].img.clone().expect("replacement image stored");
        assert!(url.starts_with("memory://objects/"));
        assert_eq!(stored[0].alt.as_deref(), Some(url.as_str()));
        assert_eq!(stored[0].text.as_deref(), Some("new caption"));
        assert!(!stored[0].is_edited());
    }

    async fn seed_raw(harness: &mut Harness, messages: serde_json::Value, visible: usize) {
        harness
            .documents
            .set(&DocumentPath::chat(CHAT_ID), json!({ "messages": messages }))
            .await
            .expect("seed conversation");
        collect_until(&mut harness.events, |seen| has_snapshot_with(seen, visible)).await;
    }

    async fn raw_messages(documents: &InMemoryDocumentStore) -> Vec<serde_json::Value> {
        let document = documents
            .get(&DocumentPath::chat(CHAT_ID))
            .await
            .expect("read conversation")
            .expect("conversation exists");
        document["messages"].as_array().cloned().expect("message array")
    }

    async fn react_and_wait(harness: &mut Harness, message_id: &str, emoji: &str) {
        harness
            .handle
            .send(ChatCommand::React {
                chat_id: CHAT_ID.to_owned(),
                message_id: message_id.to_owned(),
                emoji: emoji.to_owned(),
            })
            .await
            .expect("command should enqueue");
        collect_until(&mut harness.events, |seen| {
            seen.iter().any(|event| match event {
                ChatEvent::ConversationSnapshot { messages, .. } => messages
                    .iter()
                    .any(|m| m.id == message_id && m.reaction_of("alice") == Some(emoji)),
                _ => false,
            })
        })
        .await;
    }

    #[tokio::test]
    async fn reaction_keeps_fields_the_client_does_not_model() {
        let mut harness = harness();
        open(&mut harness).await;
        let other = json!({
            "id": "m2",
            "sender": "alice",
            "text": "untouched",
            "date": {"seconds": 1_700_000_001, "nanoseconds": 0},
            "forwardedFrom": "carol"
        });
        seed_raw(
            &mut harness,
            json!([
                {
                    "id": "m1",
                    "sender": "bob",
                    "date": {"seconds": 1_700_000_000, "nanoseconds": 0},
                    "img": "memory://objects/a",
                    "alt": "memory://objects/a",
                    "pinned": {"by": "bob"}
                },
                other.clone()
            ]),
            2,
        )
        .await;

        react_and_wait(&mut harness, "m1", "👍").await;

        let stored = raw_messages(&harness.documents).await;
        assert_eq!(stored[0]["alt"], json!("memory://objects/a"));
        assert_eq!(stored[0]["pinned"], json!({"by": "bob"}));
        assert_eq!(stored[0]["reactions"]["alice"], json!("👍"));
        assert_eq!(stored[1], other);
    }

    #[tokio::test]
    async fn malformed_element_does_not_hide_the_rest() {
        let mut harness = harness();
        open(&mut harness).await;
        let broken = json!({"id": "m0", "text": "no sender"});
        seed_raw(
            &mut harness,
            json!([
                broken.clone(),
                {"id": "m1", "sender": "bob", "text": "legacy, no date"},
                {
                    "id": "m2",
                    "sender": "bob",
                    "text": "fine",
                    "date": {"seconds": 1_700_000_000, "nanoseconds": 0}
                }
            ]),
            2,
        )
        .await;

        react_and_wait(&mut harness, "m2", "❤️").await;

        let stored = raw_messages(&harness.documents).await;
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0], broken);
        assert_eq!(stored[2]["reactions"]["alice"], json!("❤️"));
    }

    #[tokio::test]
    async fn directory_lists_others_online_first() {
        let mut harness = harness();
        for (uid, name, online) in [
            ("alice", "Alice", true),
            ("bob", "Bob", false),
            ("carol", "Carol", true),
            ("dave", "dave", false),
        ] {
            let profile = UserProfile {
                is_online: online,
                ..UserProfile::new(uid, name)
            };
            chat_store::write_document(
                harness.documents.as_ref(),
                &DocumentPath::user(uid),
                &profile,
            )
            .await
            .expect("seed profile");
        }
        harness
            .documents
            .set(&DocumentPath::user("mallory"), json!({"uid": 7}))
            .await
            .expect("seed broken profile");

        harness
            .handle
            .send(ChatCommand::LoadDirectory)
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| {
            seen.iter()
                .any(|event| matches!(event, ChatEvent::DirectoryLoaded { .. }))
        })
        .await;
        let users = seen
            .iter()
            .find_map(|event| match event {
                ChatEvent::DirectoryLoaded { users } => Some(users),
                _ => None,
            })
            .expect("directory loaded");
        let uids: Vec<&str> = users.iter().map(|user| user.uid.as_str()).collect();
        assert_eq!(uids, vec!["carol", "bob", "dave"]);
    }

    #[tokio::test]
    async fn chat_list_hides_deleted_chats() {
        let mut harness = harness();
        let newer = ChatListEntry {
            user_info: Some((&bob()).into()),
            date: Some(chat_core::Timestamp::new(200, 0)),
            ..ChatListEntry::default()
        };
        let older = ChatListEntry {
            date: Some(chat_core::Timestamp::new(100, 0)),
            ..ChatListEntry::default()
        };
        let deleted = ChatListEntry {
            date: Some(chat_core::Timestamp::new(300, 0)),
            chat_deleted: Some(true),
            ..ChatListEntry::default()
        };
        chat_store::write_document(
            harness.documents.as_ref(),
            &DocumentPath::user_chats("alice"),
            &std::collections::BTreeMap::from([
                ("carolalice", older),
                (CHAT_ID, newer),
                ("davealice", deleted),
            ]),
        )
        .await
        .expect("seed chat list");

        harness
            .handle
            .send(ChatCommand::LoadChatList)
            .await
            .expect("command should enqueue");
        let seen = collect_until(&mut harness.events, |seen| {
            seen.iter()
                .any(|event| matches!(event, ChatEvent::ChatListLoaded { .. }))
        })
        .await;
        let chats = seen
            .iter()
            .find_map(|event| match event {
                ChatEvent::ChatListLoaded { chats } => Some(chats),
                _ => None,
            })
            .expect("chat list loaded");
        let ids: Vec<&str> = chats.iter().map(|item| item.chat_id.as_str()).collect();
        assert_eq!(ids, vec![CHAT_ID, "carolalice"]);
        assert_eq!(
            chats[0].entry.user_info.as_ref().map(|info| info.uid.as_str()),
            Some("bob")
        );
    }
}

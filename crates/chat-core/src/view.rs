//! View-side reducer combining chat selection, the message window and the
//! compose draft.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::{
    mutation::quote_of,
    selection::{ChatAction, ChatSelectionStore},
    types::{
        Attachment, AttachmentKind, ChatCommand, ChatEvent, ChatListItem, DeleteScope, Message,
        MessageDraft, QuotedMessage, SendAck, UserProfile,
    },
    visibility::{group_positions, visible_to},
    window::{MessageWindow, ScrollAnchor, ScrollMetrics, SnapshotEffect, WindowConfig},
};

const VOICE_UPLOAD_FAILED_NOTICE: &str = "Voice note upload failed. Please try again.";

/// Rendered message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub message: Message,
    pub is_own: bool,
    pub is_first_in_group: bool,
    pub is_last_in_group: bool,
}

/// Immutable view snapshot emitted after state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatViewSnapshot {
    pub chat_id: Option<String>,
    pub peer: Option<UserProfile>,
    pub messages: Vec<MessageView>,
    /// Older messages exist above the window.
    pub has_older: bool,
    pub is_loading_more: bool,
    pub peer_typing: bool,
    pub compose_text: String,
    pub has_attachment: bool,
    pub reply_to: Option<QuotedMessage>,
    pub editing_message_id: Option<String>,
    pub notice: Option<String>,
    pub can_send: bool,
    /// Participants available to start a conversation with.
    pub directory: Vec<UserProfile>,
    pub chats: Vec<ChatListItem>,
}

#[derive(Debug, Clone, Default)]
struct ComposeDraft {
    text: String,
    attachment: Option<Attachment>,
    reply_to: Option<QuotedMessage>,
    editing: Option<String>,
}

/// Mutable view state fed by runtime events and user intents.
#[derive(Debug, Clone)]
pub struct ChatViewState {
    window_config: WindowConfig,
    selection: ChatSelectionStore,
    window: MessageWindow,
    peer_typing: bool,
    compose: ComposeDraft,
    /// Client transaction ID to the chat it was submitted from.
    pending_sends: HashMap<String, String>,
    notice: Option<String>,
    directory: Vec<UserProfile>,
    chats: Vec<ChatListItem>,
    next_txn_id: u64,
}

impl ChatViewState {
    pub fn new(own_uid: impl Into<String>, window_config: WindowConfig) -> Self {
        Self {
            window_config,
            selection: ChatSelectionStore::new(own_uid),
            window: MessageWindow::new(window_config),
            peer_typing: false,
            compose: ComposeDraft::default(),
            pending_sends: HashMap::new(),
            notice: None,
            directory: Vec::new(),
            chats: Vec::new(),
            next_txn_id: 1,
        }
    }

    pub fn own_uid(&self) -> &str {
        self.selection.current_uid()
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.selection.chat_id()
    }

    pub fn window(&self) -> &MessageWindow {
        &self.window
    }

    /// Select a conversation partner and return the command opening it.
    pub fn select_user(&mut self, user: UserProfile) -> ChatCommand {
        let previous = self.selection.chat_id().map(ToOwned::to_owned);
        self.selection.dispatch(ChatAction::ChangeUser(user.clone()));

        if previous.as_deref() != self.selection.chat_id() {
            self.window = MessageWindow::new(self.window_config);
            self.peer_typing = false;
            self.compose = ComposeDraft::default();
        }

        ChatCommand::OpenConversation { peer: user }
    }

    /// Drop the active selection, returning the command tearing down its subscription.
    pub fn clear_selection(&mut self) -> Option<ChatCommand> {
        self.selection.chat_id()?;
        self.selection.dispatch(ChatAction::Clear);
        self.window = MessageWindow::new(self.window_config);
        self.peer_typing = false;
        self.compose = ComposeDraft::default();
        Some(ChatCommand::CloseConversation)
    }

    /// Feed one runtime event into the reducer.
    ///
    /// Returns the scroll effect when a snapshot for the active conversation
    /// was applied.
    pub fn handle_event(&mut self, event: ChatEvent) -> Option<SnapshotEffect> {
        match event {
            ChatEvent::ConversationOpened { chat_id, .. } => {
                if self.selection.chat_id() != Some(chat_id.as_str()) {
                    debug!(%chat_id, "ignoring open acknowledgement for stale conversation");
                }
                None
            }
            ChatEvent::ConversationSnapshot {
                chat_id,
                messages,
                peer_typing,
            } => {
                if self.selection.chat_id() != Some(chat_id.as_str()) {
                    trace!(%chat_id, "dropping snapshot for inactive conversation");
                    return None;
                }
                trace!(%chat_id, message_count = messages.len(), "received conversation snapshot");
                self.peer_typing = peer_typing;
                Some(self.window.on_snapshot(messages))
            }
            ChatEvent::ConversationClosed { chat_id } => {
                debug!(%chat_id, "conversation subscription closed");
                None
            }
            ChatEvent::SendAck(ack) => {
                self.handle_send_ack(ack);
                None
            }
            ChatEvent::UploadFailed {
                client_txn_id,
                kind,
            } => {
                warn!(%client_txn_id, ?kind, "attachment upload failed");
                if kind == AttachmentKind::Voice {
                    self.notice = Some(VOICE_UPLOAD_FAILED_NOTICE.to_owned());
                }
                None
            }
            ChatEvent::Failure { code, message } => {
                warn!(%code, %message, "chat operation failed");
                None
            }
            ChatEvent::DirectoryLoaded { users } => {
                debug!(count = users.len(), "directory loaded");
                self.directory = users;
                None
            }
            ChatEvent::ChatListLoaded { chats } => {
                debug!(count = chats.len(), "chat list loaded");
                self.chats = chats;
                None
            }
        }
    }

    /// Handle a send/edit acknowledgement. The draft is cleared only on
    /// success, and only while its conversation is still the active one.
    pub fn handle_send_ack(&mut self, ack: SendAck) {
        let Some(chat_id) = self.pending_sends.remove(&ack.client_txn_id) else {
            trace!(client_txn_id = %ack.client_txn_id, "ack for unknown transaction");
            return;
        };
        if self.selection.chat_id() != Some(chat_id.as_str()) {
            debug!(
                client_txn_id = %ack.client_txn_id,
                %chat_id,
                success = ack.is_success(),
                "ack for inactive conversation; draft untouched"
            );
            return;
        }

        match ack.error_code {
            Some(error_code) => {
                warn!(
                    client_txn_id = %ack.client_txn_id,
                    %error_code,
                    "send failed; keeping compose draft"
                );
            }
            None => {
                debug!(client_txn_id = %ack.client_txn_id, "send acknowledged");
                self.compose = ComposeDraft::default();
            }
        }
    }

    pub fn begin_load_older(&mut self, metrics: ScrollMetrics) -> Option<ScrollAnchor> {
        self.window.begin_load_older(metrics)
    }

    pub fn finish_load_older(&mut self) -> usize {
        self.window.finish_load_older()
    }

    pub fn set_compose_text(&mut self, text: impl Into<String>) {
        self.compose.text = text.into();
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.compose.attachment = Some(attachment);
    }

    pub fn clear_attachment(&mut self) {
        self.compose.attachment = None;
    }

    /// Quote a message of the active conversation in the next send.
    pub fn reply_to(&mut self, message_id: &str) -> bool {
        let Some(message) = self.find_message(message_id) else {
            return false;
        };
        self.compose.reply_to = Some(quote_of(message));
        true
    }

    /// Start editing one of the participant's own messages.
    pub fn start_edit(&mut self, message_id: &str) -> bool {
        let Some(message) = self.find_message(message_id) else {
            return false;
        };
        if message.sender != self.own_uid() {
            return false;
        }
        let (text, id) = (message.text.clone().unwrap_or_default(), message.id.clone());
        self.compose.text = text;
        self.compose.editing = Some(id);
        true
    }

    pub fn cancel_compose(&mut self) {
        self.compose = ComposeDraft::default();
    }

    /// Build the send or edit command for the current draft.
    pub fn submit(&mut self) -> Option<ChatCommand> {
        let chat_id = self.selection.chat_id()?.to_owned();
        let peer_uid = self.selection.peer()?.uid.clone();
        if self.compose.text.trim().is_empty() && self.compose.attachment.is_none() {
            return None;
        }

        let client_txn_id = self.next_txn_id();
        self.pending_sends.insert(client_txn_id.clone(), chat_id.clone());

        let command = match &self.compose.editing {
            Some(message_id) => ChatCommand::EditMessage {
                chat_id,
                client_txn_id,
                message_id: message_id.clone(),
                text: self.compose.text.clone(),
                attachment: self.compose.attachment.clone(),
            },
            None => ChatCommand::SendMessage {
                chat_id,
                peer_uid,
                client_txn_id,
                draft: MessageDraft {
                    text: Some(self.compose.text.clone()),
                    attachment: self.compose.attachment.clone(),
                    reply_to: self.compose.reply_to.clone(),
                },
            },
        };
        Some(command)
    }

    /// Reaction command, `None` for unknown or own messages.
    pub fn react(&self, message_id: &str, emoji: &str) -> Option<ChatCommand> {
        let chat_id = self.selection.chat_id()?;
        let message = self.find_message(message_id)?;
        if message.sender == self.own_uid() {
            return None;
        }
        Some(ChatCommand::React {
            chat_id: chat_id.to_owned(),
            message_id: message_id.to_owned(),
            emoji: emoji.to_owned(),
        })
    }

    /// Delete command. Deleting for everyone is limited to own messages.
    pub fn delete(&self, message_id: &str, scope: DeleteScope) -> Option<ChatCommand> {
        let chat_id = self.selection.chat_id()?;
        let message = self.find_message(message_id)?;
        if scope == DeleteScope::ForEveryone && message.sender != self.own_uid() {
            return None;
        }
        Some(ChatCommand::DeleteMessage {
            chat_id: chat_id.to_owned(),
            message_id: message_id.to_owned(),
            scope,
        })
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    /// Current immutable snapshot for rendering.
    pub fn snapshot(&self) -> ChatViewSnapshot {
        let own_uid = self.own_uid();
        let rendered: Vec<&Message> = visible_to(self.window.visible(), own_uid).collect();
        let positions = group_positions(&rendered);
        let messages = rendered
            .into_iter()
            .zip(positions)
            .map(|(message, position)| MessageView {
                is_own: message.sender == own_uid,
                message: message.clone(),
                is_first_in_group: position.is_first_in_group,
                is_last_in_group: position.is_last_in_group,
            })
            .collect();

        ChatViewSnapshot {
            chat_id: self.selection.chat_id().map(ToOwned::to_owned),
            peer: self.selection.peer().cloned(),
            messages,
            has_older: self.window.hidden_count() > 0,
            is_loading_more: self.window.is_loading_more(),
            peer_typing: self.peer_typing,
            compose_text: self.compose.text.clone(),
            has_attachment: self.compose.attachment.is_some(),
            reply_to: self.compose.reply_to.clone(),
            editing_message_id: self.compose.editing.clone(),
            notice: self.notice.clone(),
            can_send: self.selection.chat_id().is_some(),
            directory: self.directory.clone(),
            chats: self.chats.clone(),
        }
    }

    fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.window
            .full()
            .iter()
            .find(|message| message.id == message_id)
    }

    fn next_txn_id(&mut self) -> String {
        let id = self.next_txn_id;
        self.next_txn_id += 1;
        format!("txn-{id}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::types::{DeletedInfo, Timestamp};

    const CHAT_ID: &str = "bobalice";

    fn message(index: usize, sender: &str) -> Message {
        Message {
            id: format!("m{index}"),
            text: Some(format!("text {index}")),
            sender: sender.to_owned(),
            date: Timestamp::new(1_700_000_000 + index as i64, 0),
            read: false,
            img: None,
            voice: None,
            reactions: BTreeMap::new(),
            quoted_message: None,
            deleted_info: None,
            delete_chat_info: None,
            edited: None,
            alt: None,
            extra: Default::default(),
        }
    }

    fn alternating(count: usize) -> Vec<Message> {
        (0..count)
            .map(|i| message(i, if i % 2 == 0 { "alice" } else { "bob" }))
            .collect()
    }

    fn snapshot_event(messages: Vec<Message>) -> ChatEvent {
        ChatEvent::ConversationSnapshot {
            chat_id: CHAT_ID.to_owned(),
            messages,
            peer_typing: false,
        }
    }

    fn selected_state() -> ChatViewState {
        let mut state = ChatViewState::new("alice", WindowConfig::default());
        state.select_user(UserProfile::new("bob", "Bob"));
        state
    }

    fn submitted_txn(command: &ChatCommand) -> String {
        match command {
            ChatCommand::SendMessage { client_txn_id, .. }
            | ChatCommand::EditMessage { client_txn_id, .. } => client_txn_id.clone(),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn selecting_user_emits_open_command_and_sets_chat_id() {
        let mut state = ChatViewState::new("alice", WindowConfig::default());
        let command = state.select_user(UserProfile::new("bob", "Bob"));

        assert_eq!(
            command,
            ChatCommand::OpenConversation {
                peer: UserProfile::new("bob", "Bob")
            }
        );
        let snapshot = state.snapshot();
        assert_eq!(snapshot.chat_id.as_deref(), Some(CHAT_ID));
        assert!(snapshot.can_send);
    }

    #[test]
    fn snapshots_for_other_conversations_are_ignored() {
        let mut state = selected_state();
        let effect = state.handle_event(ChatEvent::ConversationSnapshot {
            chat_id: "carolalice".to_owned(),
            messages: alternating(3),
            peer_typing: true,
        });

        assert_eq!(effect, None);
        assert!(state.snapshot().messages.is_empty());
        assert!(!state.snapshot().peer_typing);
    }

    #[test]
    fn renders_latest_page_and_reveals_history() {
        let mut state = selected_state();
        let effect = state.handle_event(snapshot_event(alternating(250)));
        assert_eq!(effect, Some(SnapshotEffect::ScrollToBottom));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages.len(), 100);
        assert!(snapshot.has_older);

        let top = ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 2_000.0,
        };
        state.begin_load_older(top).expect("reveal should start");
        assert!(state.snapshot().is_loading_more);
        assert_eq!(state.finish_load_older(), 150);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.messages.len(), 250);
        assert!(!snapshot.has_older);
        assert!(!snapshot.is_loading_more);
    }

    #[test]
    fn filters_and_groups_rendered_messages() {
        let mut state = selected_state();
        let mut hidden = message(1, "bob");
        hidden.deleted_info = Some(DeletedInfo::for_me("alice"));
        state.handle_event(snapshot_event(vec![
            message(0, "alice"),
            hidden,
            message(2, "alice"),
            message(3, "bob"),
        ]));

        let rows = state.snapshot().messages;
        let ids: Vec<&str> = rows.iter().map(|row| row.message.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m2", "m3"]);
        assert!(rows[0].is_own && rows[0].is_first_in_group && !rows[0].is_last_in_group);
        assert!(rows[1].is_own && !rows[1].is_first_in_group && rows[1].is_last_in_group);
        assert!(!rows[2].is_own && rows[2].is_first_in_group && rows[2].is_last_in_group);
    }

    #[test]
    fn failed_send_keeps_draft_and_success_clears_it() {
        let mut state = selected_state();
        state.set_compose_text("hello bob");

        let command = state.submit().expect("draft should submit");
        let txn = submitted_txn(&command);
        state.handle_event(ChatEvent::SendAck(SendAck {
            client_txn_id: txn,
            message_id: None,
            error_code: Some("unavailable".to_owned()),
        }));
        assert_eq!(state.snapshot().compose_text, "hello bob");

        let command = state.submit().expect("retry should submit");
        let txn = submitted_txn(&command);
        state.handle_event(ChatEvent::SendAck(SendAck {
            client_txn_id: txn,
            message_id: Some("m-new".to_owned()),
            error_code: None,
        }));
        assert_eq!(state.snapshot().compose_text, "");
    }

    fn ack(client_txn_id: String, error_code: Option<&str>) -> ChatEvent {
        ChatEvent::SendAck(SendAck {
            message_id: error_code.is_none().then(|| "m-new".to_owned()),
            client_txn_id,
            error_code: error_code.map(ToOwned::to_owned),
        })
    }

    #[test]
    fn late_ack_from_previous_conversation_keeps_new_draft() {
        let mut state = selected_state();
        state.set_compose_text("to bob");
        let txn = submitted_txn(&state.submit().expect("draft should submit"));

        state.select_user(UserProfile::new("carol", "Carol"));
        state.set_compose_text("draft for carol");
        state.handle_event(ack(txn, None));
        assert_eq!(state.snapshot().compose_text, "draft for carol");

        state.select_user(UserProfile::new("bob", "Bob"));
        state.set_compose_text("back with bob");
        let txn = submitted_txn(&state.submit().expect("draft should submit"));
        state.handle_event(ack(txn, None));
        assert_eq!(state.snapshot().compose_text, "");
    }

    #[test]
    fn failed_edit_ack_keeps_edit_target() {
        let mut state = selected_state();
        state.handle_event(snapshot_event(alternating(2)));
        assert!(state.start_edit("m0"));
        state.set_compose_text("text zero");

        let txn = submitted_txn(&state.submit().expect("edit should submit"));
        state.handle_event(ack(txn, Some("message_not_found")));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.editing_message_id.as_deref(), Some("m0"));
        assert_eq!(snapshot.compose_text, "text zero");
    }

    #[test]
    fn directory_and_chat_list_are_exposed() {
        let mut state = selected_state();
        state.handle_event(ChatEvent::DirectoryLoaded {
            users: vec![UserProfile::new("carol", "Carol")],
        });
        state.handle_event(ChatEvent::ChatListLoaded {
            chats: vec![ChatListItem {
                chat_id: CHAT_ID.to_owned(),
                entry: Default::default(),
            }],
        });

        let snapshot = state.snapshot();
        assert_eq!(snapshot.directory[0].uid, "carol");
        assert_eq!(snapshot.chats[0].chat_id, CHAT_ID);
    }

    #[test]
    fn empty_draft_does_not_submit() {
        let mut state = selected_state();
        assert_eq!(state.submit(), None);
        state.set_compose_text("  \n\t ");
        assert_eq!(state.submit(), None);

        let mut unselected = ChatViewState::new("alice", WindowConfig::default());
        unselected.set_compose_text("hi");
        assert_eq!(unselected.submit(), None);
    }

    #[test]
    fn reply_quotes_target_message() {
        let mut state = selected_state();
        state.handle_event(snapshot_event(alternating(2)));
        assert!(state.reply_to("m1"));
        state.set_compose_text("agreed");

        match state.submit().expect("reply should submit") {
            ChatCommand::SendMessage { draft, peer_uid, .. } => {
                assert_eq!(peer_uid, "bob");
                let quote = draft.reply_to.expect("quote should be attached");
                assert_eq!(quote.sender, "bob");
                assert_eq!(quote.text.as_deref(), Some("text 1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn editing_is_limited_to_own_messages() {
        let mut state = selected_state();
        state.handle_event(snapshot_event(alternating(2)));

        assert!(!state.start_edit("m1"));
        assert!(state.start_edit("m0"));
        assert_eq!(state.snapshot().compose_text, "text 0");
        state.set_compose_text("text zero");

        match state.submit().expect("edit should submit") {
            ChatCommand::EditMessage {
                message_id, text, ..
            } => {
                assert_eq!(message_id, "m0");
                assert_eq!(text, "text zero");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn reactions_and_deletes_respect_ownership() {
        let mut state = selected_state();
        state.handle_event(snapshot_event(alternating(2)));

        assert_eq!(state.react("m0", "👍"), None);
        assert!(state.react("m1", "👍").is_some());
        assert_eq!(state.delete("m1", DeleteScope::ForEveryone), None);
        assert!(state.delete("m1", DeleteScope::ForMe).is_some());
        assert!(state.delete("m0", DeleteScope::ForEveryone).is_some());
        assert_eq!(state.react("m404", "👍"), None);
    }

    #[test]
    fn voice_upload_failure_sets_notice() {
        let mut state = selected_state();
        state.handle_event(ChatEvent::UploadFailed {
            client_txn_id: "txn-1".to_owned(),
            kind: AttachmentKind::Image,
        });
        assert_eq!(state.snapshot().notice, None);

        state.handle_event(ChatEvent::UploadFailed {
            client_txn_id: "txn-2".to_owned(),
            kind: AttachmentKind::Voice,
        });
        assert_eq!(
            state.snapshot().notice.as_deref(),
            Some(VOICE_UPLOAD_FAILED_NOTICE)
        );
        state.dismiss_notice();
        assert_eq!(state.snapshot().notice, None);
    }

    #[test]
    fn failures_are_swallowed() {
        let mut state = selected_state();
        state.set_compose_text("draft");
        let before = state.snapshot();
        state.handle_event(ChatEvent::Failure {
            code: "permission-denied".to_owned(),
            message: "nope".to_owned(),
        });
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn typing_flag_follows_snapshot() {
        let mut state = selected_state();
        state.handle_event(ChatEvent::ConversationSnapshot {
            chat_id: CHAT_ID.to_owned(),
            messages: Vec::new(),
            peer_typing: true,
        });
        assert!(state.snapshot().peer_typing);
    }

    #[test]
    fn switching_conversation_resets_window_and_draft() {
        let mut state = selected_state();
        state.handle_event(snapshot_event(alternating(5)));
        state.set_compose_text("half-written");

        state.select_user(UserProfile::new("carol", "Carol"));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.chat_id.as_deref(), Some("carolalice"));
        assert!(snapshot.messages.is_empty());
        assert_eq!(snapshot.compose_text, "");

        assert_eq!(state.clear_selection(), Some(ChatCommand::CloseConversation));
        assert_eq!(state.clear_selection(), None);
    }
}

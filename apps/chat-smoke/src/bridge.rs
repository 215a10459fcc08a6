//! View bridge that wires chat runtime events into view snapshots and drives
//! the scroll surface.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chat_core::{
    Attachment, ChatCommand, ChatEvent, ChatViewSnapshot, ChatViewState, DeleteScope,
    ScrollMetrics, SnapshotEffect, UserProfile, WindowConfig,
};
use chat_runtime::ChatRuntimeHandle;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, info, trace, warn};

use crate::viewport::ScrollSurface;

/// Callback used to publish new view snapshots.
pub type SnapshotCallback = Arc<dyn Fn(ChatViewSnapshot) + Send + Sync + 'static>;

type SharedSurface = Arc<Mutex<Box<dyn ScrollSurface>>>;

/// Bridges user intents and runtime events through one `ChatViewState`.
pub struct ViewBridge {
    command_tx: mpsc::UnboundedSender<ChatCommand>,
    state: Arc<Mutex<ChatViewState>>,
    viewport: SharedSurface,
    on_snapshot: SnapshotCallback,
    load_older_delay: Duration,
    command_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

impl ViewBridge {
    /// Start command/event workers for the given runtime.
    pub fn spawn(
        own_uid: &str,
        window: WindowConfig,
        runtime: ChatRuntimeHandle,
        viewport: Box<dyn ScrollSurface>,
        on_snapshot: SnapshotCallback,
    ) -> Arc<Self> {
        info!(
            own_uid,
            page_size = window.page_size,
            load_older_delay_ms = window.load_older_delay.as_millis() as u64,
            policy = ?window.snapshot_policy,
            "spawning view bridge"
        );

        let state = Arc::new(Mutex::new(ChatViewState::new(own_uid, window)));
        let viewport: SharedSurface = Arc::new(Mutex::new(viewport));
        let mut events = runtime.subscribe();

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<ChatCommand>();
        let command_task = tokio::spawn(async move {
            debug!("view command worker started");
            while let Some(command) = command_rx.recv().await {
                debug!(command = command_kind(&command), "forwarding chat command");
                if let Err(err) = runtime.send(command).await {
                    error!(error = %err, "failed to forward chat command");
                    break;
                }
            }
            debug!("view command worker exiting");
        });

        let state_for_events = Arc::clone(&state);
        let viewport_for_events = Arc::clone(&viewport);
        let on_snapshot_for_events = Arc::clone(&on_snapshot);
        let event_task = tokio::spawn(async move {
            debug!("view event worker started");
            while let Ok(event) = recv_event(&mut events).await {
                trace!(event = event_kind(&event), "received chat event");
                let (snapshot, effect) = {
                    let mut state = state_for_events
                        .lock()
                        .expect("view state lock poisoned while handling chat event");
                    let effect = state.handle_event(event);
                    (state.snapshot(), effect)
                };
                render(&viewport_for_events, &snapshot);
                (on_snapshot_for_events)(snapshot);

                if effect == Some(SnapshotEffect::ScrollToBottom) {
                    // Let the rendered list settle before jumping to the newest row.
                    tokio::task::yield_now().await;
                    viewport_for_events
                        .lock()
                        .expect("viewport lock poisoned while scrolling to bottom")
                        .scroll_to_bottom();
                }
            }
            warn!("view event worker exiting: chat event stream closed");
        });

        let bridge = Arc::new(Self {
            command_tx,
            state,
            viewport,
            on_snapshot,
            load_older_delay: window.load_older_delay,
            command_task,
            event_task,
        });
        bridge.publish_snapshot();
        bridge
    }

    /// Make `user` the active conversation partner.
    pub fn select_user(&self, user: UserProfile) {
        debug!(uid = %user.uid, "select_user called");
        let command = self.update_state(|state| Some(state.select_user(user)));
        if let Some(command) = command {
            self.enqueue_command(command);
        }
    }

    /// Ask for the participant directory; the reply lands in `snapshot().directory`.
    pub fn load_directory(&self) {
        self.enqueue_command(ChatCommand::LoadDirectory);
    }

    pub fn load_chat_list(&self) {
        self.enqueue_command(ChatCommand::LoadChatList);
    }

    pub fn close_conversation(&self) {
        if let Some(command) = self.update_state(ChatViewState::clear_selection) {
            self.enqueue_command(command);
        }
    }

    pub fn set_compose_text(&self, text: impl Into<String>) {
        let text = text.into();
        self.update_state(|state| {
            state.set_compose_text(text);
            None
        });
    }

    pub fn attach(&self, attachment: Attachment) {
        self.update_state(|state| {
            state.attach(attachment);
            None
        });
    }

    pub fn reply_to(&self, message_id: &str) -> bool {
        self.update_flag(|state| state.reply_to(message_id))
    }

    pub fn start_edit(&self, message_id: &str) -> bool {
        self.update_flag(|state| state.start_edit(message_id))
    }

    pub fn cancel_compose(&self) {
        self.update_state(|state| {
            state.cancel_compose();
            None
        });
    }

    /// Send or edit the current draft. Returns `false` when nothing was submitted.
    pub fn submit(&self) -> bool {
        self.dispatch(ChatViewState::submit)
    }

    pub fn react(&self, message_id: &str, emoji: &str) -> bool {
        self.dispatch(|state| state.react(message_id, emoji))
    }

    pub fn delete(&self, message_id: &str, scope: DeleteScope) -> bool {
        self.dispatch(|state| state.delete(message_id, scope))
    }

    pub fn dismiss_notice(&self) {
        self.update_state(|state| {
            state.dismiss_notice();
            None
        });
    }

    /// Move the scroll surface, as a user drag would.
    pub fn scroll_to(&self, scroll_top: f64) {
        self.viewport
            .lock()
            .expect("viewport lock poisoned while scrolling")
            .set_scroll_top(scroll_top);
    }

    /// Called after scroll updates. Reveals older history when the surface
    /// sits at the top, keeping the previously first row in place.
    ///
    /// Returns `true` when older messages were revealed.
    pub async fn on_scrolled(&self) -> bool {
        let metrics = self.viewport_metrics();
        let started = {
            let mut state = self
                .state
                .lock()
                .expect("view state lock poisoned while handling scroll");
            state
                .begin_load_older(metrics)
                .map(|anchor| (anchor, state.snapshot()))
        };
        let Some((anchor, snapshot)) = started else {
            return false;
        };

        debug!(scroll_height = metrics.scroll_height, "loading older messages");
        (self.on_snapshot)(snapshot);
        tokio::time::sleep(self.load_older_delay).await;

        let (revealed, snapshot) = {
            let mut state = self
                .state
                .lock()
                .expect("view state lock poisoned while revealing history");
            (state.finish_load_older(), state.snapshot())
        };
        if revealed == 0 {
            // The window was replaced while waiting; its anchor no longer applies.
            debug!("load older abandoned");
            return false;
        }
        {
            let mut viewport = self
                .viewport
                .lock()
                .expect("viewport lock poisoned while restoring scroll");
            viewport.render(snapshot.messages.len());
            let new_height = viewport.metrics().scroll_height;
            viewport.set_scroll_top(anchor.restored_scroll_top(new_height));
        }
        debug!(revealed, "older messages revealed");
        (self.on_snapshot)(snapshot);
        true
    }

    pub fn snapshot(&self) -> ChatViewSnapshot {
        self.state
            .lock()
            .expect("view state lock poisoned while reading snapshot")
            .snapshot()
    }

    pub fn viewport_metrics(&self) -> ScrollMetrics {
        self.viewport
            .lock()
            .expect("viewport lock poisoned while reading metrics")
            .metrics()
    }

    fn dispatch<F>(&self, intent: F) -> bool
    where
        F: FnOnce(&mut ChatViewState) -> Option<ChatCommand>,
    {
        match self.update_state(intent) {
            Some(command) => {
                self.enqueue_command(command);
                true
            }
            None => false,
        }
    }

    fn update_flag<F>(&self, intent: F) -> bool
    where
        F: FnOnce(&mut ChatViewState) -> bool,
    {
        let mut changed = false;
        self.update_state(|state| {
            changed = intent(state);
            None
        });
        changed
    }

    /// Apply `intent` to the view state and publish the resulting snapshot.
    fn update_state<F>(&self, intent: F) -> Option<ChatCommand>
    where
        F: FnOnce(&mut ChatViewState) -> Option<ChatCommand>,
    {
        let (command, snapshot) = {
            let mut state = self
                .state
                .lock()
                .expect("view state lock poisoned while applying intent");
            let command = intent(&mut state);
            (command, state.snapshot())
        };
        render(&self.viewport, &snapshot);
        (self.on_snapshot)(snapshot);
        command
    }

    fn enqueue_command(&self, command: ChatCommand) {
        trace!(command = command_kind(&command), "enqueue_command");
        if self.command_tx.send(command).is_err() {
            error!("chat command channel closed");
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = self.snapshot();
        trace!(
            messages = snapshot.messages.len(),
            chat_id = snapshot.chat_id.as_deref().unwrap_or(""),
            "publishing initial snapshot"
        );
        (self.on_snapshot)(snapshot);
    }
}

impl Drop for ViewBridge {
    fn drop(&mut self) {
        info!("shutting down view bridge tasks");
        self.command_task.abort();
        self.event_task.abort();
    }
}

fn render(viewport: &SharedSurface, snapshot: &ChatViewSnapshot) {
    viewport
        .lock()
        .expect("viewport lock poisoned while rendering")
        .render(snapshot.messages.len());
}

async fn recv_event(events: &mut broadcast::Receiver<ChatEvent>) -> Result<ChatEvent, ()> {
    loop {
        match events.recv().await {
            Ok(event) => return Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "view bridge lagged behind chat events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Err(()),
        }
    }
}

fn command_kind(command: &ChatCommand) -> &'static str {
    match command {
        ChatCommand::OpenConversation { .. } => "OpenConversation",
        ChatCommand::CloseConversation => "CloseConversation",
        ChatCommand::SendMessage { .. } => "SendMessage",
        ChatCommand::EditMessage { .. } => "EditMessage",
        ChatCommand::DeleteMessage { .. } => "DeleteMessage",
        ChatCommand::React { .. } => "React",
        ChatCommand::LoadDirectory => "LoadDirectory",
        ChatCommand::LoadChatList => "LoadChatList",
    }
}

fn event_kind(event: &ChatEvent) -> &'static str {
    match event {
        ChatEvent::ConversationOpened { .. } => "ConversationOpened",
        ChatEvent::ConversationSnapshot { .. } => "ConversationSnapshot",
        ChatEvent::ConversationClosed { .. } => "ConversationClosed",
        ChatEvent::SendAck(_) => "SendAck",
        ChatEvent::UploadFailed { .. } => "UploadFailed",
        ChatEvent::Failure { .. } => "Failure",
        ChatEvent::DirectoryLoaded { .. } => "DirectoryLoaded",
        ChatEvent::ChatListLoaded { .. } => "ChatListLoaded",
    }
}

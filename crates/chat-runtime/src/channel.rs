//! Command/event plumbing between runtime handles and the runtime loop.

use chat_core::{ChatCommand, ChatEvent};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Receiver side of the runtime's event broadcast.
pub type EventStream = broadcast::Receiver<ChatEvent>;

#[derive(Debug, Error)]
pub enum ChatChannelError {
    /// The runtime loop has stopped and no longer accepts commands.
    #[error("chat runtime command channel is closed")]
    CommandChannelClosed,
}

/// Broadcast side of the event channel. Held by the runtime loop and its
/// snapshot forwarders; holding it never keeps the command loop alive.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    events: broadcast::Sender<ChatEvent>,
}

impl EventPublisher {
    /// Publish to every current subscriber. Events sent while nobody listens
    /// are dropped.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }
}

/// Cloneable front door of a spawned runtime.
#[derive(Debug, Clone)]
pub struct ChatRuntimeHandle {
    commands: mpsc::Sender<ChatCommand>,
    events: EventPublisher,
}

impl ChatRuntimeHandle {
    pub async fn send(&self, command: ChatCommand) -> Result<(), ChatChannelError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatChannelError::CommandChannelClosed)
    }

    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }
}

/// Build the handle plus the loop's command receiver and event publisher.
pub(crate) fn runtime_channels(
    command_buffer: usize,
    event_buffer: usize,
) -> (
    ChatRuntimeHandle,
    mpsc::Receiver<ChatCommand>,
    EventPublisher,
) {
    let (commands, command_rx) = mpsc::channel(command_buffer.max(1));
    let (events, _) = broadcast::channel(event_buffer.max(1));
    let publisher = EventPublisher { events };
    let handle = ChatRuntimeHandle {
        commands,
        events: publisher.clone(),
    };
    (handle, command_rx, publisher)
}

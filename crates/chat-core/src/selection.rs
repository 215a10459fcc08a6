use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::UserProfile;

/// Deterministic conversation key for two participants: the lexicographically
/// larger identifier first, then the other one.
pub fn combined_key(a: &str, b: &str) -> String {
    if a > b {
        format!("{a}{b}")
    } else {
        format!("{b}{a}")
    }
}

/// Which conversation is currently active.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSelection {
    pub chat_id: Option<String>,
    pub user: Option<UserProfile>,
}

/// Actions accepted by the selection reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    /// Make the conversation with this participant active.
    ChangeUser(UserProfile),
    /// Drop any active selection.
    Clear,
}

/// Pure reducer: every action replaces the state wholesale.
pub fn reduce(current_uid: &str, action: &ChatAction) -> ChatSelection {
    match action {
        ChatAction::ChangeUser(user) => ChatSelection {
            chat_id: Some(combined_key(current_uid, &user.uid)),
            user: Some(user.clone()),
        },
        ChatAction::Clear => ChatSelection::default(),
    }
}

/// Selection state owned by one signed-in participant.
#[derive(Debug, Clone)]
pub struct ChatSelectionStore {
    current_uid: String,
    state: ChatSelection,
}

impl ChatSelectionStore {
    pub fn new(current_uid: impl Into<String>) -> Self {
        Self {
            current_uid: current_uid.into(),
            state: ChatSelection::default(),
        }
    }

    pub fn current_uid(&self) -> &str {
        &self.current_uid
    }

    pub fn state(&self) -> &ChatSelection {
        &self.state
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.state.chat_id.as_deref()
    }

    pub fn peer(&self) -> Option<&UserProfile> {
        self.state.user.as_ref()
    }

    pub fn dispatch(&mut self, action: ChatAction) -> &ChatSelection {
        self.state = reduce(&self.current_uid, &action);
        debug!(chat_id = ?self.state.chat_id, "chat selection changed");
        &self.state
    }
}

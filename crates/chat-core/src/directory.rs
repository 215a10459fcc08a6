//! Ordering for the participant directory and the chat list.

use std::{cmp::Ordering, collections::BTreeMap};

use crate::types::{ChatListEntry, ChatListItem, UserProfile};

/// Everyone except `own_uid`, online participants first, then by display name.
pub fn directory(users: impl IntoIterator<Item = UserProfile>, own_uid: &str) -> Vec<UserProfile> {
    let mut users: Vec<UserProfile> = users
        .into_iter()
        .filter(|user| user.uid != own_uid)
        .collect();
    users.sort_by(compare_directory_entries);
    users
}

fn compare_directory_entries(a: &UserProfile, b: &UserProfile) -> Ordering {
    b.is_online
        .cmp(&a.is_online)
        .then_with(|| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        })
        .then_with(|| a.display_name.cmp(&b.display_name))
}

/// Chat list entries, most recent first. Chats flagged `chatDeleted` by the
/// owner are left out; entries without a date sink to the end.
pub fn chat_list(entries: BTreeMap<String, ChatListEntry>) -> Vec<ChatListItem> {
    let mut items: Vec<ChatListItem> = entries
        .into_iter()
        .filter(|(_, entry)| entry.chat_deleted != Some(true))
        .map(|(chat_id, entry)| ChatListItem { chat_id, entry })
        .collect();
    items.sort_by(|a, b| b.entry.date.cmp(&a.entry.date));
    items
}

//! Render-time filtering of soft-deleted messages and sender grouping.

use crate::types::Message;

/// Whether `message` should be rendered for `participant_id`.
pub fn is_visible_to(message: &Message, participant_id: &str) -> bool {
    if let Some(deleted) = &message.deleted_info
        && (deleted.is_deleted_for_everyone() || deleted.is_deleted_for(participant_id))
    {
        return false;
    }

    !message
        .delete_chat_info
        .as_ref()
        .and_then(|flags| flags.get(participant_id))
        .copied()
        .unwrap_or(false)
}

/// Messages of `messages` that `participant_id` may see, in order.
pub fn visible_to<'a>(
    messages: &'a [Message],
    participant_id: &'a str,
) -> impl Iterator<Item = &'a Message> + 'a {
    messages
        .iter()
        .filter(move |message| is_visible_to(message, participant_id))
}

/// Position of a message inside a run of consecutive messages from one sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPosition {
    pub is_first_in_group: bool,
    pub is_last_in_group: bool,
}

/// Compute group positions for an already filtered sequence.
pub fn group_positions(messages: &[&Message]) -> Vec<GroupPosition> {
    messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let previous = index
                .checked_sub(1)
                .and_then(|prev| messages.get(prev));
            let next = messages.get(index + 1);
            GroupPosition {
                is_first_in_group: previous.is_none_or(|prev| prev.sender != message.sender),
                is_last_in_group: next.is_none_or(|next| next.sender != message.sender),
            }
        })
        .collect()
}

//! Seeds the in-memory stores with a conversation history.

use std::collections::BTreeMap;

use chat_core::{
    ChatListEntry, ConversationDocument, Message, Timestamp, UserInfo, UserProfile, combined_key,
};
use chat_store::{DocumentPath, DocumentStore, StoreError, write_document};
use tracing::info;

const SEED_EPOCH_SECONDS: i64 = 1_700_000_000;

/// Write `count` alternating messages between `me` and `peer`, plus both chat
/// list entries. Returns the conversation's combined key.
pub async fn seed_conversation(
    documents: &dyn DocumentStore,
    me: &UserProfile,
    peer: &UserProfile,
    count: usize,
) -> Result<String, StoreError> {
    let chat_id = combined_key(&me.uid, &peer.uid);
    let messages = (0..count)
        .map(|index| seeded_message(index, if index % 2 == 0 { peer } else { me }))
        .collect();
    write_document(
        documents,
        &DocumentPath::chat(&chat_id),
        &ConversationDocument {
            messages,
            typing: BTreeMap::new(),
        },
    )
    .await?;

    let date = Some(Timestamp::new(SEED_EPOCH_SECONDS + count as i64, 0));
    for (owner, counterpart) in [(me, peer), (peer, me)] {
        let entries = BTreeMap::from([(
            chat_id.clone(),
            ChatListEntry {
                user_info: Some(UserInfo::from(counterpart)),
                last_message: None,
                date,
                chat_deleted: None,
            },
        )]);
        write_document(documents, &DocumentPath::user_chats(&owner.uid), &entries).await?;
        write_document(documents, &DocumentPath::user(&owner.uid), owner).await?;
    }

    info!(%chat_id, count, "seeded conversation");
    Ok(chat_id)
}

fn seeded_message(index: usize, sender: &UserProfile) -> Message {
    Message {
        id: format!("seed-{index}"),
        text: Some(format!("Seeded message #{index} from {}", sender.display_name)),
        sender: sender.uid.clone(),
        date: Timestamp::new(SEED_EPOCH_SECONDS + index as i64, 0),
        read: true,
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

#[cfg(test)]
mod tests {
    use chat_store::{InMemoryDocumentStore, read_document};

    use super::*;

    #[tokio::test]
    async fn seeds_messages_in_order_and_lists_both_sides() {
        let store = InMemoryDocumentStore::new();
        let alice = UserProfile::new("alice", "Alice");
        let bob = UserProfile::new("bob", "Bob");

        let chat_id = seed_conversation(&store, &alice, &bob, 3)
            .await
            .expect("seed should work");
        assert_eq!(chat_id, "bobalice");

        let doc: ConversationDocument = read_document(&store, &DocumentPath::chat(&chat_id))
            .await
            .expect("read")
            .expect("exists");
        let senders: Vec<&str> = doc.messages.iter().map(|m| m.sender.as_str()).collect();
        assert_eq!(senders, vec!["bob", "alice", "bob"]);
        assert!(doc.messages.windows(2).all(|pair| pair[0].date < pair[1].date));

        let list: BTreeMap<String, ChatListEntry> =
            read_document(&store, &DocumentPath::user_chats("bob"))
                .await
                .expect("read")
                .expect("exists");
        assert_eq!(
            list[&chat_id].user_info.as_ref().map(|info| info.uid.as_str()),
            Some("alice")
        );
    }
}

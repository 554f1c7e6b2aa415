use std::collections::HashMap;

use async_trait::async_trait;
use betalift_core::{Conversation, ConversationId, Message, MessageId, ParticipantPair, UserId};
use tokio::sync::RwLock;

use super::{ChatStore, MessagePage, StoreError};

#[derive(Default)]
struct ChatTables {
    conversations: HashMap<ConversationId, Conversation>,
    pairs: HashMap<ParticipantPair, ConversationId>,
    /// Oldest first, in append order.
    messages: HashMap<ConversationId, Vec<Message>>,
}

/// Process-local store used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryChatStore {
    tables: RwLock<ChatTables>,
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Conversation>, StoreError> {
        let tables = self.tables.read().await;
        let mut conversations: Vec<Conversation> = tables
            .conversations
            .values()
            .filter(|conversation| conversation.has_participant(user_id))
            .cloned()
            .collect();
        conversations.sort_by(|left, right| {
            right
                .updated_at
                .cmp(&left.updated_at)
                .then_with(|| right.id.as_str().cmp(left.id.as_str()))
        });
        Ok(conversations)
    }

    async fn find_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(conversation_id)
            .cloned())
    }

    async fn find_conversation_between(
        &self,
        pair: &ParticipantPair,
    ) -> Result<Option<Conversation>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .pairs
            .get(pair)
            .and_then(|conversation_id| tables.conversations.get(conversation_id))
            .cloned())
    }

    async fn create_conversation(
        &self,
        pair: ParticipantPair,
        now_millis: i64,
    ) -> Result<(Conversation, bool), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables
            .pairs
            .get(&pair)
            .and_then(|conversation_id| tables.conversations.get(conversation_id))
        {
            return Ok((existing.clone(), false));
        }
        let conversation = Conversation::new(pair.clone(), now_millis);
        tables.pairs.insert(pair, conversation.id.clone());
        tables
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok((conversation, true))
    }

    async fn messages_page(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, StoreError> {
        let tables = self.tables.read().await;
        let Some(messages) = tables.messages.get(conversation_id) else {
            return Ok(MessagePage {
                messages: Vec::new(),
                total: 0,
            });
        };
        let page = messages
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(MessagePage {
            messages: page,
            total: messages.len() as u64,
        })
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(StoreError::ConversationNotFound);
        }
        tables
            .messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn touch_conversation(
        &self,
        conversation_id: &ConversationId,
        last_message: &MessageId,
        now_millis: i64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let conversation = tables
            .conversations
            .get_mut(conversation_id)
            .ok_or(StoreError::ConversationNotFound)?;
        conversation.last_message = Some(last_message.clone());
        conversation.updated_at = conversation.updated_at.max(now_millis);
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(messages) = tables.messages.get_mut(conversation_id) else {
            return Ok(0);
        };
        let mut updated = 0;
        for message in messages.iter_mut() {
            if message.mark_read(user_id) {
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use betalift_core::{
        Message, MessageContent, MessageDraft, MessageKind, ParticipantPair, UserId,
    };

    use super::InMemoryChatStore;
    use crate::server::store::{ChatStore, StoreError};

    fn user(value: &str) -> UserId {
        UserId::try_from(value.to_owned()).unwrap()
    }

    fn pair(a: &str, b: &str) -> ParticipantPair {
        ParticipantPair::new(user(a), user(b)).unwrap()
    }

    fn draft(content: &str) -> MessageDraft {
        MessageDraft {
            content: MessageContent::try_from(content.to_owned()).unwrap(),
            kind: MessageKind::Text,
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_conversation_is_idempotent_per_pair() {
        let store = InMemoryChatStore::default();
        let (first, created) = store.create_conversation(pair("alice", "bob"), 1).await.unwrap();
        assert!(created);
        let (second, created) = store.create_conversation(pair("bob", "alice"), 2).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(
            store
                .find_conversation_between(&pair("alice", "bob"))
                .await
                .unwrap()
                .map(|conversation| conversation.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn conversations_are_listed_most_recently_updated_first() {
        let store = InMemoryChatStore::default();
        let (older, _) = store.create_conversation(pair("alice", "bob"), 10).await.unwrap();
        let (newer, _) = store.create_conversation(pair("alice", "carol"), 20).await.unwrap();
        let _ = store.create_conversation(pair("bob", "carol"), 30).await.unwrap();

        let listed = store.conversations_for_user(&user("alice")).await.unwrap();
        assert_eq!(
            listed.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
            vec![newer.id.clone(), older.id.clone()]
        );

        let message = Message::new(older.id.clone(), user("alice"), draft("hi"), 40);
        store.append_message(&message).await.unwrap();
        store
            .touch_conversation(&older.id, &message.id, 40)
            .await
            .unwrap();
        let listed = store.conversations_for_user(&user("alice")).await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[0].last_message.as_ref(), Some(&message.id));
    }

    #[tokio::test]
    async fn messages_page_is_newest_first_with_offset() {
        let store = InMemoryChatStore::default();
        let (conversation, _) = store.create_conversation(pair("alice", "bob"), 1).await.unwrap();
        for (index, body) in ["one", "two", "three"].iter().enumerate() {
            let message = Message::new(
                conversation.id.clone(),
                user("alice"),
                draft(body),
                i64::try_from(index).unwrap(),
            );
            store.append_message(&message).await.unwrap();
        }

        let page = store.messages_page(&conversation.id, 2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(
            page.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["three", "two"]
        );
        let page = store.messages_page(&conversation.id, 2, 2).await.unwrap();
        assert_eq!(
            page.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one"]
        );
    }

    #[tokio::test]
    async fn mark_read_counts_only_messages_not_yet_read() {
        let store = InMemoryChatStore::default();
        let (conversation, _) = store.create_conversation(pair("alice", "bob"), 1).await.unwrap();
        for body in ["one", "two"] {
            let message = Message::new(conversation.id.clone(), user("alice"), draft(body), 2);
            store.append_message(&message).await.unwrap();
        }

        assert_eq!(
            store
                .mark_conversation_read(&conversation.id, &user("bob"))
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .mark_conversation_read(&conversation.id, &user("bob"))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .mark_conversation_read(&conversation.id, &user("alice"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn append_to_unknown_conversation_fails() {
        let store = InMemoryChatStore::default();
        let orphan = Message::new(
            betalift_core::ConversationId::new(),
            user("alice"),
            draft("hello"),
            1,
        );
        assert!(matches!(
            store.append_message(&orphan).await,
            Err(StoreError::ConversationNotFound)
        ));
    }
}

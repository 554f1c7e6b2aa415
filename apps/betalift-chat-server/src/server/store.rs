mod in_memory;
mod postgres;

use async_trait::async_trait;
use betalift_core::{Conversation, ConversationId, Message, MessageId, ParticipantPair, UserId};

pub use in_memory::InMemoryChatStore;
pub use postgres::PgChatStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found")]
    ConversationNotFound,
    #[error("stored record is malformed: {0}")]
    Corrupt(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Backend(value.to_string())
    }
}

/// One page of history, newest message first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: u64,
}

/// Persistence for conversations and their messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Conversations `user_id` participates in, most recently updated first.
    async fn conversations_for_user(&self, user_id: &UserId)
        -> Result<Vec<Conversation>, StoreError>;

    async fn find_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn find_conversation_between(
        &self,
        pair: &ParticipantPair,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Inserts a conversation for `pair` unless one already exists, returning the
    /// stored record and whether it was created by this call.
    async fn create_conversation(
        &self,
        pair: ParticipantPair,
        now_millis: i64,
    ) -> Result<(Conversation, bool), StoreError>;

    async fn messages_page(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, StoreError>;

    async fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Points the conversation at its newest message and bumps `updatedAt`.
    async fn touch_conversation(
        &self,
        conversation_id: &ConversationId,
        last_message: &MessageId,
        now_millis: i64,
    ) -> Result<(), StoreError>;

    /// Adds `user_id` to the read set of every message in the conversation,
    /// returning how many messages changed.
    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, StoreError>;
}

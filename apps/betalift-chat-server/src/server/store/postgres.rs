use async_trait::async_trait;
use betalift_core::{
    Attachment, Conversation, ConversationId, Message, MessageId, MessageKind, ParticipantPair,
    UserId,
};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use tokio::sync::OnceCell;

use super::{ChatStore, MessagePage, StoreError};

const SCHEMA_INIT_LOCK_ID: i64 = 0x4245_5441_4c49_4654;
const CONVERSATION_COLUMNS: &str =
    "conversation_id, participant_low, participant_high, last_message_id, created_at_ms, updated_at_ms";
const MESSAGE_COLUMNS: &str =
    "message_id, conversation_id, sender_id, content, kind, attachments, read_by, created_at_ms";

pub struct PgChatStore {
    pool: PgPool,
    schema: OnceCell<()>,
}

impl PgChatStore {
    /// Creates a pool without opening a connection; the schema is created on
    /// first use.
    ///
    /// # Errors
    /// Returns an error if `database_url` cannot be parsed.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_lazy(database_url)?;
        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    async fn pool(&self) -> Result<&PgPool, StoreError> {
        self.schema
            .get_or_try_init(|| async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_INIT_LOCK_ID)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS conversations (
                        conversation_id TEXT PRIMARY KEY,
                        participant_low TEXT NOT NULL,
                        participant_high TEXT NOT NULL,
                        last_message_id TEXT NULL,
                        created_at_ms BIGINT NOT NULL,
                        updated_at_ms BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair_unique
                        ON conversations(participant_low, participant_high)",
                )
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS messages (
                        seq BIGSERIAL PRIMARY KEY,
                        message_id TEXT NOT NULL UNIQUE,
                        conversation_id TEXT NOT NULL
                            REFERENCES conversations(conversation_id) ON DELETE CASCADE,
                        sender_id TEXT NOT NULL,
                        content TEXT NOT NULL,
                        kind TEXT NOT NULL,
                        attachments TEXT NOT NULL,
                        read_by TEXT[] NOT NULL,
                        created_at_ms BIGINT NOT NULL
                    )",
                )
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_messages_conversation_seq
                        ON messages(conversation_id, seq DESC)",
                )
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|error| {
                tracing::error!(event = "store.schema_init_failed", error = %error);
                StoreError::from(error)
            })?;
        Ok(&self.pool)
    }
}

fn conversation_from_row(row: &PgRow) -> Result<Conversation, StoreError> {
    let id: String = row.try_get("conversation_id")?;
    let low: String = row.try_get("participant_low")?;
    let high: String = row.try_get("participant_high")?;
    let last_message: Option<String> = row.try_get("last_message_id")?;
    Ok(Conversation {
        id: ConversationId::try_from(id).map_err(corrupt)?,
        participants: vec![
            UserId::try_from(low).map_err(corrupt)?,
            UserId::try_from(high).map_err(corrupt)?,
        ],
        last_message: last_message
            .map(MessageId::try_from)
            .transpose()
            .map_err(corrupt)?,
        created_at: row.try_get("created_at_ms")?,
        updated_at: row.try_get("updated_at_ms")?,
    })
}

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    let id: String = row.try_get("message_id")?;
    let conversation_id: String = row.try_get("conversation_id")?;
    let sender_id: String = row.try_get("sender_id")?;
    let kind: String = row.try_get("kind")?;
    let attachments: String = row.try_get("attachments")?;
    let read_by: Vec<String> = row.try_get("read_by")?;
    Ok(Message {
        id: MessageId::try_from(id).map_err(corrupt)?,
        conversation_id: ConversationId::try_from(conversation_id).map_err(corrupt)?,
        sender_id: UserId::try_from(sender_id).map_err(corrupt)?,
        content: row.try_get("content")?,
        kind: MessageKind::try_from(kind).map_err(corrupt)?,
        attachments: serde_json::from_str::<Vec<Attachment>>(&attachments).map_err(corrupt)?,
        read_by: read_by
            .into_iter()
            .map(UserId::try_from)
            .collect::<Result<_, _>>()
            .map_err(corrupt)?,
        created_at: row.try_get("created_at_ms")?,
    })
}

fn corrupt(error: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(error.to_string())
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn conversations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Conversation>, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant_low = $1 OR participant_high = $1
             ORDER BY updated_at_ms DESC, conversation_id DESC"
        ))
        .bind(user_id.as_str())
        .fetch_all(pool)
        .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn find_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = $1"
        ))
        .bind(conversation_id.as_str())
        .fetch_optional(pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn find_conversation_between(
        &self,
        pair: &ParticipantPair,
    ) -> Result<Option<Conversation>, StoreError> {
        let pool = self.pool().await?;
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant_low = $1 AND participant_high = $2"
        ))
        .bind(pair.low().as_str())
        .bind(pair.high().as_str())
        .fetch_optional(pool)
        .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn create_conversation(
        &self,
        pair: ParticipantPair,
        now_millis: i64,
    ) -> Result<(Conversation, bool), StoreError> {
        let pool = self.pool().await?;
        let conversation = Conversation::new(pair.clone(), now_millis);
        let inserted = sqlx::query(
            "INSERT INTO conversations
                (conversation_id, participant_low, participant_high, last_message_id, created_at_ms, updated_at_ms)
             VALUES ($1, $2, $3, NULL, $4, $4)
             ON CONFLICT (participant_low, participant_high) DO NOTHING",
        )
        .bind(conversation.id.as_str())
        .bind(pair.low().as_str())
        .bind(pair.high().as_str())
        .bind(now_millis)
        .execute(pool)
        .await?
        .rows_affected();
        if inserted == 1 {
            return Ok((conversation, true));
        }
        let existing = self
            .find_conversation_between(&pair)
            .await?
            .ok_or(StoreError::ConversationNotFound)?;
        Ok((existing, false))
    }

    async fn messages_page(
        &self,
        conversation_id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage, StoreError> {
        let pool = self.pool().await?;
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = $1
             ORDER BY seq DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(conversation_id.as_str())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(pool)
        .await?;
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM messages WHERE conversation_id = $1")
            .bind(conversation_id.as_str())
            .fetch_one(pool)
            .await?
            .try_get("total")?;
        Ok(MessagePage {
            messages: rows.iter().map(message_from_row).collect::<Result<_, _>>()?,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let attachments = serde_json::to_string(&message.attachments).map_err(corrupt)?;
        let read_by: Vec<&str> = message.read_by.iter().map(UserId::as_str).collect();
        let result = sqlx::query(
            "INSERT INTO messages
                (message_id, conversation_id, sender_id, content, kind, attachments, read_by, created_at_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(message.id.as_str())
        .bind(message.conversation_id.as_str())
        .bind(message.sender_id.as_str())
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(attachments)
        .bind(read_by)
        .bind(message.created_at)
        .execute(pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_foreign_key_violation() => {
                Err(StoreError::ConversationNotFound)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn touch_conversation(
        &self,
        conversation_id: &ConversationId,
        last_message: &MessageId,
        now_millis: i64,
    ) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let updated = sqlx::query(
            "UPDATE conversations
             SET last_message_id = $2, updated_at_ms = GREATEST(updated_at_ms, $3)
             WHERE conversation_id = $1",
        )
        .bind(conversation_id.as_str())
        .bind(last_message.as_str())
        .bind(now_millis)
        .execute(pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(StoreError::ConversationNotFound);
        }
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<u64, StoreError> {
        let pool = self.pool().await?;
        let updated = sqlx::query(
            "UPDATE messages
             SET read_by = array_append(read_by, $2)
             WHERE conversation_id = $1 AND NOT ($2 = ANY(read_by))",
        )
        .bind(conversation_id.as_str())
        .bind(user_id.as_str())
        .execute(pool)
        .await?
        .rows_affected();
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use betalift_core::{
        Message, MessageContent, MessageDraft, MessageKind, ParticipantPair, UserId,
    };
    use uuid::Uuid;

    use super::PgChatStore;
    use crate::server::store::ChatStore;

    fn postgres_url() -> Option<String> {
        std::env::var("BETALIFT_TEST_DATABASE_URL").ok()
    }

    fn unique_user(prefix: &str) -> UserId {
        UserId::try_from(format!("{prefix}-{}", Uuid::new_v4().simple())).unwrap()
    }

    #[tokio::test]
    async fn postgres_store_round_trips_a_conversation() {
        let Some(database_url) = postgres_url() else {
            return;
        };
        let store = PgChatStore::connect_lazy(&database_url).unwrap();
        let alice = unique_user("alice");
        let bob = unique_user("bob");

        let (conversation, created) = store
            .create_conversation(ParticipantPair::new(alice.clone(), bob.clone()).unwrap(), 1)
            .await
            .unwrap();
        assert!(created);
        let (again, created) = store
            .create_conversation(ParticipantPair::new(bob.clone(), alice.clone()).unwrap(), 2)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, conversation.id);

        for (index, content) in ["one", "two"].into_iter().enumerate() {
            let draft = MessageDraft {
                content: MessageContent::try_from(content.to_owned()).unwrap(),
                kind: MessageKind::Text,
                attachments: Vec::new(),
            };
            let now = 10 + i64::try_from(index).unwrap();
            let message = Message::new(conversation.id.clone(), alice.clone(), draft, now);
            store.append_message(&message).await.unwrap();
            store
                .touch_conversation(&conversation.id, &message.id, message.created_at)
                .await
                .unwrap();
        }

        let page = store.messages_page(&conversation.id, 10, 0).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.messages[0].content, "two");
        assert_eq!(store.mark_conversation_read(&conversation.id, &bob).await.unwrap(), 2);
        assert_eq!(store.mark_conversation_read(&conversation.id, &bob).await.unwrap(), 0);
        assert_eq!(
            store.conversations_for_user(&alice).await.unwrap()[0].id,
            conversation.id
        );
    }
}

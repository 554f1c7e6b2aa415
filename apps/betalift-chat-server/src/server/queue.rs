mod redis_bridge;

use async_trait::async_trait;
use betalift_core::{Message, MessageKind, UserId};
use serde::{Deserialize, Serialize};

use super::core::NOTIFICATION_PREVIEW_CHARS;

pub use redis_bridge::RedisQueueBridge;

/// Durable work queue used for push and email notification jobs.
///
/// Publishing is best effort: callers never fail a user request because the
/// queue is unavailable.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Opens the connection. On failure the implementation keeps retrying in
    /// the background.
    async fn connect(&self);

    /// Appends `payload` to `queue`, returning whether it was accepted.
    async fn publish(&self, queue: &str, payload: &serde_json::Value) -> bool;

    fn is_connected(&self) -> bool;
}

/// Used when no queue url is configured; every publish reports unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledQueue;

#[async_trait]
impl NotificationQueue for DisabledQueue {
    async fn connect(&self) {
        tracing::info!(event = "queue.disabled");
    }

    async fn publish(&self, _queue: &str, _payload: &serde_json::Value) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl NotificationJob {
    /// Job telling `recipient` about `message`.
    pub(crate) fn new_message(
        recipient: UserId,
        sender_name: Option<&str>,
        message: &Message,
    ) -> Self {
        let title = sender_name.map_or_else(
            || String::from("New message"),
            |name| format!("New message from {name}"),
        );
        Self {
            user_id: recipient,
            title,
            body: message_preview(message),
            data: serde_json::json!({
                "type": "new_message",
                "conversationId": message.conversation_id,
                "messageId": message.id,
                "senderId": message.sender_id,
            }),
        }
    }
}

fn message_preview(message: &Message) -> String {
    match message.kind {
        MessageKind::Text => truncate_preview(&message.content, NOTIFICATION_PREVIEW_CHARS),
        MessageKind::Image => String::from("Sent an image"),
        MessageKind::File => String::from("Sent a file"),
    }
}

pub(crate) fn truncate_preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_owned();
    }
    let mut truncated: String = content.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use betalift_core::{
        ConversationId, Message, MessageContent, MessageDraft, MessageKind, UserId,
    };

    use super::{truncate_preview, DisabledQueue, NotificationJob, NotificationQueue};

    fn user(value: &str) -> UserId {
        UserId::try_from(value.to_owned()).unwrap()
    }

    fn message(content: &str, kind: MessageKind) -> Message {
        Message::new(
            ConversationId::new(),
            user("alice"),
            MessageDraft {
                content: MessageContent::try_from(content.to_owned()).unwrap(),
                kind,
                attachments: Vec::new(),
            },
            1,
        )
    }

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(truncate_preview("short", 10), "short");
        assert_eq!(truncate_preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn new_message_job_uses_wire_field_names() {
        let message = message("hello bob", MessageKind::Text);
        let job = NotificationJob::new_message(user("bob"), Some("Alice"), &message);
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["userId"], "bob");
        assert_eq!(value["title"], "New message from Alice");
        assert_eq!(value["body"], "hello bob");
        assert_eq!(value["data"]["type"], "new_message");
        assert_eq!(value["data"]["conversationId"], message.conversation_id.as_str());
        assert_eq!(value["data"]["senderId"], "alice");
    }

    #[test]
    fn non_text_messages_get_a_generic_body() {
        let message = message("https://cdn/pic.png", MessageKind::Image);
        let job = NotificationJob::new_message(user("bob"), None, &message);
        assert_eq!(job.title, "New message");
        assert_eq!(job.body, "Sent an image");
    }

    #[tokio::test]
    async fn disabled_queue_never_accepts() {
        let queue = DisabledQueue;
        queue.connect().await;
        assert!(!queue.is_connected());
        assert!(!queue.publish("notification_queue", &serde_json::json!({})).await);
    }
}

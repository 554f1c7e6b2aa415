use serde::{Deserialize, Serialize};

/// Request events a client may send. Every request carries a correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    GetConversations,
    CreateConversation,
    GetMessages,
    SendMessage,
    MarkRead,
}

impl ClientEvent {
    pub const ALL: [Self; 5] = [
        Self::GetConversations,
        Self::CreateConversation,
        Self::GetMessages,
        Self::SendMessage,
        Self::MarkRead,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetConversations => "get_conversations",
            Self::CreateConversation => "create_conversation",
            Self::GetMessages => "get_messages",
            Self::SendMessage => "send_message",
            Self::MarkRead => "mark_read",
        }
    }

    #[must_use]
    pub fn from_name(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == value)
    }
}

/// Events the gateway emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    Ready,
    Ack,
    NewMessage,
    ConversationJoined,
    MessagesRead,
}

impl ServerEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Ack => "ack",
            Self::NewMessage => "new_message",
            Self::ConversationJoined => "conversation_joined",
            Self::MessagesRead => "messages_read",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_owned(),
            message: message.to_owned(),
        }
    }
}

/// Body of the single `ack` frame that answers a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub event: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl Ack {
    #[must_use]
    pub fn ok(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_owned(),
            success: true,
            data: Some(data),
            message: None,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(event: &str, message: &str, errors: Vec<FieldError>) -> Self {
        Self {
            event: event.to_owned(),
            success: false,
            data: None,
            message: Some(message.to_owned()),
            errors,
        }
    }
}

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub const MAX_IDENTIFIER_CHARS: usize = 64;
pub const MAX_MESSAGE_CONTENT_CHARS: usize = 5_000;
pub const MAX_ATTACHMENTS_PER_MESSAGE: usize = 10;
pub const MAX_ATTACHMENT_URL_CHARS: usize = 2_048;
pub const MAX_ATTACHMENT_NAME_CHARS: usize = 255;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("conversation id is invalid")]
    InvalidConversationId,
    #[error("message id is invalid")]
    InvalidMessageId,
    #[error("message content is invalid")]
    InvalidMessageContent,
    #[error("message type is invalid")]
    InvalidMessageKind,
    #[error("attachment is invalid")]
    InvalidAttachment,
    #[error("too many attachments")]
    TooManyAttachments,
    #[error("a conversation needs two distinct participants")]
    SelfConversation,
}

fn validate_identifier(value: &str) -> bool {
    (1..=MAX_IDENTIFIER_CHARS).contains(&value.len())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

/// Identity of a user as asserted by the identity service's tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !validate_identifier(&value) {
            return Err(DomainError::InvalidUserId);
        }
        Ok(Self(value))
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for ConversationId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !validate_identifier(&value) {
            return Err(DomainError::InvalidConversationId);
        }
        Ok(Self(value))
    }
}

impl From<ConversationId> for String {
    fn from(value: ConversationId) -> Self {
        value.0
    }
}

impl core::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<String> for MessageId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !validate_identifier(&value) {
            return Err(DomainError::InvalidMessageId);
        }
        Ok(Self(value))
    }
}

impl From<MessageId> for String {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unordered pair of distinct participants, stored in sorted order so
/// `(a, b)` and `(b, a)` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantPair(UserId, UserId);

impl ParticipantPair {
    /// # Errors
    /// Returns [`DomainError::SelfConversation`] when both ids are the same user.
    pub fn new(first: UserId, second: UserId) -> Result<Self, DomainError> {
        if first == second {
            return Err(DomainError::SelfConversation);
        }
        if first < second {
            Ok(Self(first, second))
        } else {
            Ok(Self(second, first))
        }
    }

    #[must_use]
    pub fn low(&self) -> &UserId {
        &self.0
    }

    #[must_use]
    pub fn high(&self) -> &UserId {
        &self.1
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<UserId> {
        vec![self.0, self.1]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty()
            || value.chars().count() > MAX_MESSAGE_CONTENT_CHARS
            || value.contains('\0')
        {
            return Err(DomainError::InvalidMessageContent);
        }
        Ok(Self(value))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

impl TryFrom<String> for MessageKind {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            _ => Err(DomainError::InvalidMessageKind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl Attachment {
    /// # Errors
    /// Returns [`DomainError::InvalidAttachment`] for empty or oversized urls and names.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.url.trim().is_empty() || self.url.len() > MAX_ATTACHMENT_URL_CHARS {
            return Err(DomainError::InvalidAttachment);
        }
        if self
            .name
            .as_ref()
            .is_some_and(|name| name.chars().count() > MAX_ATTACHMENT_NAME_CHARS)
        {
            return Err(DomainError::InvalidAttachment);
        }
        Ok(())
    }
}

/// # Errors
/// Returns [`DomainError::TooManyAttachments`] above the per-message cap, or the
/// first attachment validation failure.
pub fn validate_attachments(attachments: &[Attachment]) -> Result<(), DomainError> {
    if attachments.len() > MAX_ATTACHMENTS_PER_MESSAGE {
        return Err(DomainError::TooManyAttachments);
    }
    attachments.iter().try_for_each(Attachment::validate)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub last_message: Option<MessageId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    #[must_use]
    pub fn new(pair: ParticipantPair, now_millis: i64) -> Self {
        Self {
            id: ConversationId::new(),
            participants: pair.into_vec(),
            last_message: None,
            created_at: now_millis,
            updated_at: now_millis,
        }
    }

    #[must_use]
    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.contains(user_id)
    }

    pub fn other_participants<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> impl Iterator<Item = &'a UserId> + 'a {
        self.participants
            .iter()
            .filter(move |participant| *participant != user_id)
    }
}

/// Validated input for a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: MessageContent,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub read_by: Vec<UserId>,
    pub created_at: i64,
}

impl Message {
    /// Builds a message whose read set starts with its sender.
    #[must_use]
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        draft: MessageDraft,
        now_millis: i64,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            read_by: vec![sender_id.clone()],
            sender_id,
            content: draft.content.into_string(),
            kind: draft.kind,
            attachments: draft.attachments,
            created_at: now_millis,
        }
    }

    /// Returns `true` when `user_id` was not already in the read set.
    pub fn mark_read(&mut self, user_id: &UserId) -> bool {
        if self.read_by.contains(user_id) {
            return false;
        }
        self.read_by.push(user_id.clone());
        true
    }
}

use betalift_core::{
    validate_attachments, Attachment, ConversationId, DomainError, MessageContent, MessageDraft,
    MessageKind, UserId, MAX_ATTACHMENTS_PER_MESSAGE, MAX_MESSAGE_CONTENT_CHARS,
};
use betalift_protocol::FieldError;
use serde_json::{Map, Value};

use super::core::{DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GetMessagesCommand {
    pub(crate) conversation_id: ConversationId,
    pub(crate) limit: u32,
    pub(crate) offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SendMessageCommand {
    pub(crate) conversation_id: ConversationId,
    pub(crate) draft: MessageDraft,
}

type Decoded<T> = Result<T, Vec<FieldError>>;

fn payload_object(payload: &Value) -> Decoded<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| vec![FieldError::new("payload", "must be an object")])
}

fn required_string<'a>(
    fields: &'a Map<String, Value>,
    name: &str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    match fields.get(name) {
        None | Some(Value::Null) => {
            errors.push(FieldError::new(name, "is required"));
            None
        }
        Some(Value::String(value)) => Some(value),
        Some(_) => {
            errors.push(FieldError::new(name, "must be a string"));
            None
        }
    }
}

fn conversation_id_field(
    fields: &Map<String, Value>,
    errors: &mut Vec<FieldError>,
) -> Option<ConversationId> {
    let raw = required_string(fields, "conversationId", errors)?;
    match ConversationId::try_from(raw.to_owned()) {
        Ok(id) => Some(id),
        Err(_) => {
            errors.push(FieldError::new(
                "conversationId",
                "must be a valid conversation id",
            ));
            None
        }
    }
}

/// Accepts a JSON integer or a decimal string (query parameters arrive as text).
fn optional_integer(value: Option<&Value>) -> Result<Option<u64>, ()> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number.as_u64().map(Some).ok_or(()),
        Some(Value::String(text)) => text.trim().parse::<u64>().map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

pub(crate) fn decode_create_conversation(payload: &Value) -> Decoded<UserId> {
    let fields = payload_object(payload)?;
    let mut errors = Vec::new();
    let Some(raw) = required_string(fields, "participantId", &mut errors) else {
        return Err(errors);
    };
    UserId::try_from(raw.to_owned())
        .map_err(|_| vec![FieldError::new("participantId", "must be a valid user id")])
}

pub(crate) fn decode_get_messages(payload: &Value) -> Decoded<GetMessagesCommand> {
    let fields = payload_object(payload)?;
    let mut errors = Vec::new();
    let conversation_id = conversation_id_field(fields, &mut errors);

    let limit = match optional_integer(fields.get("limit")) {
        Ok(None) => Some(DEFAULT_HISTORY_LIMIT),
        Ok(Some(limit)) if (1..=u64::from(MAX_HISTORY_LIMIT)).contains(&limit) => {
            u32::try_from(limit).ok()
        }
        _ => {
            errors.push(FieldError::new(
                "limit",
                &format!("must be an integer between 1 and {MAX_HISTORY_LIMIT}"),
            ));
            None
        }
    };
    let offset = match optional_integer(fields.get("offset")) {
        Ok(None) => Some(0),
        Ok(Some(offset)) => u32::try_from(offset).ok().or_else(|| {
            errors.push(FieldError::new("offset", "is too large"));
            None
        }),
        Err(()) => {
            errors.push(FieldError::new("offset", "must be a non-negative integer"));
            None
        }
    };

    match (conversation_id, limit, offset) {
        (Some(conversation_id), Some(limit), Some(offset)) if errors.is_empty() => {
            Ok(GetMessagesCommand {
                conversation_id,
                limit,
                offset,
            })
        }
        _ => Err(errors),
    }
}

pub(crate) fn decode_send_message(payload: &Value) -> Decoded<SendMessageCommand> {
    let fields = payload_object(payload)?;
    let mut errors = Vec::new();
    let conversation_id = conversation_id_field(fields, &mut errors);

    let content = required_string(fields, "content", &mut errors).and_then(|raw| {
        MessageContent::try_from(raw.to_owned())
            .map_err(|_| {
                errors.push(FieldError::new(
                    "content",
                    &format!("must be between 1 and {MAX_MESSAGE_CONTENT_CHARS} characters"),
                ));
            })
            .ok()
    });

    let kind = match fields.get("type") {
        None | Some(Value::Null) => Some(MessageKind::default()),
        Some(Value::String(raw)) => MessageKind::try_from(raw.clone())
            .map_err(|_| errors.push(FieldError::new("type", "must be text, image or file")))
            .ok(),
        Some(_) => {
            errors.push(FieldError::new("type", "must be text, image or file"));
            None
        }
    };

    let attachments = match fields.get("attachments") {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(value) => match serde_json::from_value::<Vec<Attachment>>(value.clone()) {
            Ok(attachments) => match validate_attachments(&attachments) {
                Ok(()) => Some(attachments),
                Err(DomainError::TooManyAttachments) => {
                    errors.push(FieldError::new(
                        "attachments",
                        &format!("must contain at most {MAX_ATTACHMENTS_PER_MESSAGE} items"),
                    ));
                    None
                }
                Err(_) => {
                    errors.push(FieldError::new("attachments", "contains an invalid attachment"));
                    None
                }
            },
            Err(_) => {
                errors.push(FieldError::new(
                    "attachments",
                    "must be a list of {type, url, name?, size?} objects",
                ));
                None
            }
        },
    };

    match (conversation_id, content, kind, attachments) {
        (Some(conversation_id), Some(content), Some(kind), Some(attachments))
            if errors.is_empty() =>
        {
            Ok(SendMessageCommand {
                conversation_id,
                draft: MessageDraft {
                    content,
                    kind,
                    attachments,
                },
            })
        }
        _ => Err(errors),
    }
}

pub(crate) fn decode_mark_read(payload: &Value) -> Decoded<ConversationId> {
    let fields = payload_object(payload)?;
    let mut errors = Vec::new();
    conversation_id_field(fields, &mut errors).ok_or(errors)
}

#[cfg(test)]
mod tests {
    use betalift_core::{ConversationId, MessageKind};
    use serde_json::json;

    use super::{
        decode_create_conversation, decode_get_messages, decode_mark_read,
        decode_send_message,
    };

    fn fields(errors: &[betalift_protocol::FieldError]) -> Vec<&str> {
        errors.iter().map(|error| error.field.as_str()).collect()
    }

    #[test]
    fn create_conversation_requires_a_valid_participant() {
        assert_eq!(
            decode_create_conversation(&json!({"participantId":"bob"}))
                .unwrap()
                .as_str(),
            "bob"
        );
        assert_eq!(
            fields(&decode_create_conversation(&json!({})).unwrap_err()),
            vec!["participantId"]
        );
        assert_eq!(
            fields(&decode_create_conversation(&json!({"participantId":"not valid"})).unwrap_err()),
            vec!["participantId"]
        );
        assert_eq!(
            fields(&decode_create_conversation(&json!(null)).unwrap_err()),
            vec!["payload"]
        );
    }

    #[test]
    fn get_messages_applies_defaults_and_bounds() {
        let conversation = ConversationId::new();
        let command =
            decode_get_messages(&json!({"conversationId": conversation.as_str()})).unwrap();
        assert_eq!((command.limit, command.offset), (50, 0));

        let command = decode_get_messages(
            &json!({"conversationId": conversation.as_str(), "limit": "100", "offset": 20}),
        )
        .unwrap();
        assert_eq!((command.limit, command.offset), (100, 20));

        for limit in [json!(0), json!(101), json!("ten"), json!(-1)] {
            let errors = decode_get_messages(
                &json!({"conversationId": conversation.as_str(), "limit": limit}),
            )
            .unwrap_err();
            assert_eq!(fields(&errors), vec!["limit"]);
        }
    }

    #[test]
    fn send_message_collects_every_field_error() {
        let errors = decode_send_message(&json!({
            "content": "   ",
            "type": "audio",
            "attachments": [{"type":"image"}],
        }))
        .unwrap_err();
        assert_eq!(
            fields(&errors),
            vec!["conversationId", "content", "type", "attachments"]
        );
    }

    #[test]
    fn send_message_defaults_to_text_without_attachments() {
        let conversation = ConversationId::new();
        let command = decode_send_message(
            &json!({"conversationId": conversation.as_str(), "content": "hello"}),
        )
        .unwrap();
        assert_eq!(command.conversation_id, conversation);
        assert_eq!(command.draft.kind, MessageKind::Text);
        assert!(command.draft.attachments.is_empty());
    }

    #[test]
    fn send_message_rejects_oversized_content_and_attachment_lists() {
        let conversation = ConversationId::new();
        let long = "x".repeat(5001);
        let errors = decode_send_message(
            &json!({"conversationId": conversation.as_str(), "content": long}),
        )
        .unwrap_err();
        assert_eq!(fields(&errors), vec!["content"]);

        let attachments: Vec<_> = (0..11)
            .map(|index| json!({"type":"file","url":format!("https://cdn/{index}")}))
            .collect();
        let errors = decode_send_message(&json!({
            "conversationId": conversation.as_str(),
            "content": "files",
            "type": "file",
            "attachments": attachments,
        }))
        .unwrap_err();
        assert_eq!(fields(&errors), vec!["attachments"]);
    }

    #[test]
    fn mark_read_needs_conversation_id() {
        assert!(decode_mark_read(&json!({"conversationId": ConversationId::new().as_str()})).is_ok());
        assert_eq!(
            fields(&decode_mark_read(&json!({"conversationId": 7})).unwrap_err()),
            vec!["conversationId"]
        );
    }
}

mod envelope;

use betalift_core::{Conversation, ConversationId, Message, UserId};
use betalift_protocol::{Ack, CorrelationId, ServerEvent};
use serde::Serialize;

pub(crate) use envelope::GatewayEvent;
use envelope::build_event;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyPayload<'a> {
    user_id: &'a UserId,
    conversation_ids: &'a [ConversationId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesReadPayload<'a> {
    conversation_id: &'a ConversationId,
    user_id: &'a UserId,
    count: u64,
}

pub(crate) fn ready(user_id: &UserId, conversation_ids: &[ConversationId]) -> GatewayEvent {
    build_event(
        ServerEvent::Ready,
        None,
        ReadyPayload {
            user_id,
            conversation_ids,
        },
    )
}

pub(crate) fn ack(id: &CorrelationId, ack: &Ack) -> GatewayEvent {
    build_event(ServerEvent::Ack, Some(id), ack)
}

pub(crate) fn new_message(message: &Message) -> GatewayEvent {
    build_event(ServerEvent::NewMessage, None, message)
}

pub(crate) fn conversation_joined(conversation: &Conversation) -> GatewayEvent {
    build_event(ServerEvent::ConversationJoined, None, conversation)
}

pub(crate) fn messages_read(
    conversation_id: &ConversationId,
    user_id: &UserId,
    count: u64,
) -> GatewayEvent {
    build_event(
        ServerEvent::MessagesRead,
        None,
        MessagesReadPayload {
            conversation_id,
            user_id,
            count,
        },
    )
}

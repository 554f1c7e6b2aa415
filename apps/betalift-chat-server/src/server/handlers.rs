use betalift_core::{Conversation, ConversationId, Message, ParticipantPair};
use betalift_protocol::{Ack, ClientEvent, FieldError};
use serde_json::{json, Value};

use super::{
    auth::{now_unix_millis, AuthContext},
    core::AppState,
    gateway_events,
    ingress::{decode_create_conversation, decode_get_messages, decode_mark_read, decode_send_message},
    metrics::record_rate_limit_hit,
    queue::NotificationJob,
    rate_limit::ActionClass,
    store::StoreError,
    types::Pagination,
};

pub(crate) const VALIDATION_FAILED_MESSAGE: &str = "Validation failed";
pub(crate) const NOT_FOUND_MESSAGE: &str = "Conversation not found";
pub(crate) const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded, please try again later";
pub(crate) const UNKNOWN_EVENT_MESSAGE: &str = "Unknown event";

#[derive(Debug, thiserror::Error)]
pub(crate) enum HandlerError {
    #[error("validation failed")]
    Validation(Vec<FieldError>),
    #[error("conversation not found")]
    NotFound,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("store failure: failed to {action}")]
    Store { action: &'static str },
}

impl HandlerError {
    pub(crate) fn message(&self) -> String {
        match self {
            Self::Validation(_) => String::from(VALIDATION_FAILED_MESSAGE),
            Self::NotFound => String::from(NOT_FOUND_MESSAGE),
            Self::RateLimited => String::from(RATE_LIMITED_MESSAGE),
            Self::Store { action } => format!("Failed to {action}"),
        }
    }

    pub(crate) fn into_ack(self, event: ClientEvent) -> Ack {
        let message = self.message();
        let errors = match self {
            Self::Validation(errors) => errors,
            Self::NotFound | Self::RateLimited | Self::Store { .. } => Vec::new(),
        };
        Ack::failed(event.as_str(), &message, errors)
    }
}

fn store_failure(action: &'static str) -> impl FnOnce(StoreError) -> HandlerError {
    move |error| {
        tracing::error!(event = "store.failure", action, error = %error);
        HandlerError::Store { action }
    }
}

async fn consume_budget(
    state: &AppState,
    auth: &AuthContext,
    action: ActionClass,
) -> Result<(), HandlerError> {
    let decision = state
        .services
        .rate_limiter
        .try_consume(&auth.user_id, action)
        .await;
    if decision.allowed {
        return Ok(());
    }
    record_rate_limit_hit(action.as_str());
    tracing::warn!(event = "chat.rate_limited", action = action.as_str(), user_id = %auth.user_id);
    Err(HandlerError::RateLimited)
}

/// Loads the conversation and checks membership; non-members see not-found.
async fn participant_conversation(
    state: &AppState,
    auth: &AuthContext,
    conversation_id: &ConversationId,
    action: &'static str,
) -> Result<Conversation, HandlerError> {
    let conversation = state
        .services
        .store
        .find_conversation(conversation_id)
        .await
        .map_err(store_failure(action))?
        .ok_or(HandlerError::NotFound)?;
    if !conversation.has_participant(&auth.user_id) {
        return Err(HandlerError::NotFound);
    }
    Ok(conversation)
}

pub(crate) async fn get_conversations(
    state: &AppState,
    auth: &AuthContext,
) -> Result<Vec<Conversation>, HandlerError> {
    state
        .services
        .store
        .conversations_for_user(&auth.user_id)
        .await
        .map_err(store_failure("fetch conversations"))
}

pub(crate) async fn create_conversation(
    state: &AppState,
    auth: &AuthContext,
    payload: &Value,
) -> Result<Conversation, HandlerError> {
    const ACTION: &str = "create conversation";
    consume_budget(state, auth, ActionClass::CreateConversation).await?;

    let participant_id = decode_create_conversation(payload).map_err(HandlerError::Validation)?;
    let pair = ParticipantPair::new(auth.user_id.clone(), participant_id).map_err(|_| {
        HandlerError::Validation(vec![FieldError::new(
            "participantId",
            "cannot start a conversation with yourself",
        )])
    })?;

    let existing = state
        .services
        .store
        .find_conversation_between(&pair)
        .await
        .map_err(store_failure(ACTION))?;
    let (conversation, created) = match existing {
        Some(conversation) => (conversation, false),
        None => state
            .services
            .store
            .create_conversation(pair, now_unix_millis())
            .await
            .map_err(store_failure(ACTION))?,
    };
    if !created {
        // The caller may have missed the room at connect time.
        state
            .rooms
            .join_user_connections(&auth.user_id, &conversation.id)
            .await;
        return Ok(conversation);
    }

    tracing::info!(
        event = "chat.conversation_created",
        conversation_id = %conversation.id,
        user_id = %auth.user_id
    );
    let event = gateway_events::conversation_joined(&conversation);
    for participant in &conversation.participants {
        let joined = state
            .rooms
            .join_user_connections(participant, &conversation.id)
            .await;
        state.rooms.send_to_connections(&joined, &event).await;
    }
    Ok(conversation)
}

pub(crate) struct MessageHistory {
    pub(crate) messages: Vec<Message>,
    pub(crate) pagination: Pagination,
}

pub(crate) async fn get_messages(
    state: &AppState,
    auth: &AuthContext,
    payload: &Value,
) -> Result<MessageHistory, HandlerError> {
    const ACTION: &str = "fetch messages";
    let command = decode_get_messages(payload).map_err(HandlerError::Validation)?;
    participant_conversation(state, auth, &command.conversation_id, ACTION).await?;

    let page = state
        .services
        .store
        .messages_page(&command.conversation_id, command.limit, command.offset)
        .await
        .map_err(store_failure(ACTION))?;
    let mut messages = page.messages;
    messages.reverse();
    let pagination = Pagination {
        limit: command.limit,
        offset: command.offset,
        total: page.total,
        has_more: u64::from(command.offset) + (messages.len() as u64) < page.total,
    };
    Ok(MessageHistory {
        messages,
        pagination,
    })
}

pub(crate) async fn send_message(
    state: &AppState,
    auth: &AuthContext,
    payload: &Value,
) -> Result<Message, HandlerError> {
    const ACTION: &str = "send message";
    consume_budget(state, auth, ActionClass::SendMessage).await?;

    let command = decode_send_message(payload).map_err(HandlerError::Validation)?;
    let conversation =
        participant_conversation(state, auth, &command.conversation_id, ACTION).await?;

    let now = now_unix_millis();
    let message = Message::new(
        conversation.id.clone(),
        auth.user_id.clone(),
        command.draft,
        now,
    );
    let store = &state.services.store;
    store
        .append_message(&message)
        .await
        .map_err(store_failure(ACTION))?;
    // The message is already stored, so the send still succeeds.
    if let Err(error) = store
        .touch_conversation(&conversation.id, &message.id, now)
        .await
    {
        tracing::error!(
            event = "store.touch_failed",
            conversation_id = %conversation.id,
            message_id = %message.id,
            error = %error
        );
    }

    let delivered = state
        .rooms
        .broadcast(&conversation.id, &gateway_events::new_message(&message))
        .await;
    tracing::debug!(
        event = "chat.message_sent",
        conversation_id = %conversation.id,
        message_id = %message.id,
        delivered
    );

    for recipient in conversation.other_participants(&auth.user_id) {
        publish_notification(
            state,
            NotificationJob::new_message(recipient.clone(), auth.display_name.as_deref(), &message),
        )
        .await;
    }
    Ok(message)
}

async fn publish_notification(state: &AppState, job: NotificationJob) {
    let queue = state.runtime.notification_queue.as_str();
    let payload = match serde_json::to_value(&job) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::error!(event = "chat.notification_serialize_failed", error = %error);
            return;
        }
    };
    if !state.services.queue.publish(queue, &payload).await {
        tracing::warn!(
            event = "chat.notification_not_queued",
            queue,
            user_id = %job.user_id
        );
    }
}

pub(crate) async fn mark_read(
    state: &AppState,
    auth: &AuthContext,
    payload: &Value,
) -> Result<u64, HandlerError> {
    const ACTION: &str = "mark messages as read";
    let conversation_id = decode_mark_read(payload).map_err(HandlerError::Validation)?;
    participant_conversation(state, auth, &conversation_id, ACTION).await?;

    let updated = state
        .services
        .store
        .mark_conversation_read(&conversation_id, &auth.user_id)
        .await
        .map_err(store_failure(ACTION))?;
    state
        .rooms
        .broadcast(
            &conversation_id,
            &gateway_events::messages_read(&conversation_id, &auth.user_id, updated),
        )
        .await;
    Ok(updated)
}

fn to_data<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Runs one request event and builds its single acknowledgment.
pub(crate) async fn dispatch_request(
    state: &AppState,
    auth: &AuthContext,
    event: ClientEvent,
    payload: &Value,
) -> Ack {
    let outcome = match event {
        ClientEvent::GetConversations => get_conversations(state, auth)
            .await
            .map(|conversations| to_data(&conversations)),
        ClientEvent::CreateConversation => create_conversation(state, auth, payload)
            .await
            .map(|conversation| to_data(&conversation)),
        ClientEvent::GetMessages => get_messages(state, auth, payload)
            .await
            .map(|history| to_data(&history.messages)),
        ClientEvent::SendMessage => send_message(state, auth, payload)
            .await
            .map(|message| to_data(&message)),
        ClientEvent::MarkRead => mark_read(state, auth, payload)
            .await
            .map(|updated| json!({ "updated": updated })),
    };
    match outcome {
        Ok(data) => Ack::ok(event.as_str(), data),
        Err(error) => error.into_ack(event),
    }
}

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use betalift_core::{Conversation, Message};
use serde_json::Value;

use super::{
    auth::authenticate,
    core::AppState,
    handlers::{self, HandlerError},
    types::{ApiFailureBody, ApiResponse, HistoryQuery, PaginatedResponse},
};

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.message();
        let errors = match self {
            Self::Validation(errors) => errors,
            Self::NotFound | Self::RateLimited | Self::Store { .. } => Vec::new(),
        };
        (
            status,
            Json(ApiFailureBody {
                success: false,
                message,
                errors,
            }),
        )
            .into_response()
    }
}

/// Copies the path conversation id into the body so REST and socket requests
/// share one decoder.
fn with_conversation_id(conversation_id: String, body: Value) -> Value {
    let mut body = match body {
        Value::Object(fields) => fields,
        Value::Null => serde_json::Map::new(),
        other => return other,
    };
    body.insert(String::from("conversationId"), Value::String(conversation_id));
    Value::Object(body)
}

pub(crate) async fn list_conversations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, Response> {
    let auth = authenticate(&state, &headers).map_err(IntoResponse::into_response)?;
    let conversations = handlers::get_conversations(&state, &auth)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(ApiResponse::ok(conversations)))
}

pub(crate) async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<ApiResponse<Conversation>>, Response> {
    let auth = authenticate(&state, &headers).map_err(IntoResponse::into_response)?;
    let conversation = handlers::create_conversation(&state, &auth, &body)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(ApiResponse::ok(conversation)))
}

pub(crate) async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<PaginatedResponse<Vec<Message>>>, Response> {
    let auth = authenticate(&state, &headers).map_err(IntoResponse::into_response)?;
    let mut payload = serde_json::Map::new();
    if let Some(limit) = query.limit {
        payload.insert(String::from("limit"), Value::String(limit));
    }
    if let Some(offset) = query.offset {
        payload.insert(String::from("offset"), Value::String(offset));
    }
    let payload = with_conversation_id(conversation_id, Value::Object(payload));
    let history = handlers::get_messages(&state, &auth, &payload)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(PaginatedResponse {
        success: true,
        data: history.messages,
        pagination: history.pagination,
    }))
}

pub(crate) async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<Message>>), Response> {
    let auth = authenticate(&state, &headers).map_err(IntoResponse::into_response)?;
    let payload = with_conversation_id(conversation_id, body);
    let message = handlers::send_message(&state, &auth, &payload)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::with_conversation_id;

    #[test]
    fn path_conversation_id_overrides_body_field() {
        let merged = with_conversation_id(
            String::from("from-path"),
            json!({"conversationId":"from-body","content":"hi"}),
        );
        assert_eq!(merged, json!({"conversationId":"from-path","content":"hi"}));
        assert_eq!(
            with_conversation_id(String::from("c1"), json!(null)),
            json!({"conversationId":"c1"})
        );
        assert_eq!(with_conversation_id(String::from("c1"), json!([1])), json!([1]));
    }
}

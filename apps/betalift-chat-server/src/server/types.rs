use axum::{
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    Json,
};
use betalift_protocol::FieldError;
use serde::{Deserialize, Serialize};

use super::{
    core::{AppState, METRICS_TEXT_CONTENT_TYPE},
    metrics::render_metrics,
};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    /// `degraded` while notifications cannot be queued; chat keeps working.
    pub(crate) queue: &'static str,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let queue = if state.services.queue.is_connected() {
        "connected"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status: "ok",
        queue,
    })
}

pub(crate) async fn metrics() -> Response {
    (
        [(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)],
        render_metrics(),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthError {
    pub(crate) error: &'static str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GatewayAuthQuery {
    pub(crate) token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct HistoryQuery {
    pub(crate) limit: Option<String>,
    pub(crate) offset: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiResponse<T> {
    pub(crate) success: bool,
    pub(crate) data: T,
}

impl<T> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Pagination {
    pub(crate) limit: u32,
    pub(crate) offset: u32,
    pub(crate) total: u64,
    pub(crate) has_more: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct PaginatedResponse<T> {
    pub(crate) success: bool,
    pub(crate) data: T,
    pub(crate) pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiFailureBody {
    pub(crate) success: bool,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) errors: Vec<FieldError>,
}

use axum::{http::StatusCode, response::IntoResponse, Json};

use super::{metrics::record_auth_failure, types::AuthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum AuthFailure {
    #[error("no token in query or authorization header")]
    MissingToken,
    #[error("token failed verification")]
    InvalidToken,
}

impl AuthFailure {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
        }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> axum::response::Response {
        record_auth_failure(self.as_str());
        (
            StatusCode::UNAUTHORIZED,
            Json(AuthError {
                error: self.as_str(),
            }),
        )
            .into_response()
    }
}

/// Installs the JSON log subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}

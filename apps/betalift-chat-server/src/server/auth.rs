use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use betalift_core::UserId;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use super::{core::AppState, errors::AuthFailure};

/// Claim names checked, in order, for the authenticated user id.
const USER_ID_CLAIMS: [&str; 3] = ["userId", "id", "sub"];
const DISPLAY_NAME_CLAIMS: [&str; 2] = ["name", "username"];

#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub(crate) user_id: UserId,
    pub(crate) display_name: Option<String>,
}

pub(crate) struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub(crate) fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is enforced when present but not required.
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub(crate) fn verify(&self, token: &str) -> Result<AuthContext, AuthFailure> {
        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation).map_err(
            |error| {
                tracing::debug!(event = "gateway.auth.token_rejected", error = %error);
                AuthFailure::InvalidToken
            },
        )?;
        let user_id = user_id_from_claims(&data.claims).ok_or(AuthFailure::InvalidToken)?;
        let display_name = DISPLAY_NAME_CLAIMS
            .iter()
            .find_map(|claim| data.claims.get(*claim).and_then(Value::as_str))
            .filter(|name| !name.trim().is_empty())
            .map(ToOwned::to_owned);
        Ok(AuthContext {
            user_id,
            display_name,
        })
    }
}

fn user_id_from_claims(claims: &Map<String, Value>) -> Option<UserId> {
    let raw = USER_ID_CLAIMS.iter().find_map(|claim| match claims.get(*claim)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })?;
    UserId::try_from(raw).ok()
}

pub(crate) fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, AuthFailure> {
    let access_token = bearer_token(headers).ok_or(AuthFailure::MissingToken)?;
    authenticate_with_token(state, access_token)
}

pub(crate) fn authenticate_with_token(
    state: &AppState,
    access_token: &str,
) -> Result<AuthContext, AuthFailure> {
    if access_token.trim().is_empty() {
        return Err(AuthFailure::MissingToken);
    }
    state.jwt.verify(access_token)
}

/// Handshake token: the `token` query parameter wins over the bearer header.
pub(crate) fn handshake_token<'a>(
    query_token: Option<&'a str>,
    headers: &'a HeaderMap,
) -> Option<&'a str> {
    query_token
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    header.strip_prefix("Bearer ")
}

pub(crate) fn now_unix_millis() -> i64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    i64::try_from(millis).unwrap_or(i64::MAX)
}

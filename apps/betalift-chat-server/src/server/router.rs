use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::anyhow;
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit},
    http::{request::Request, HeaderName, StatusCode},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    errors::GovernorError, governor::GovernorConfigBuilder, key_extractor::KeyExtractor,
    GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    connection::gateway_ws,
    core::{AppConfig, AppState, ChatServices},
    rest::{create_conversation, list_conversations, list_messages, send_message},
    types::{health, metrics},
};

/// Keys the HTTP governor on the socket peer address. Requests without
/// connect info (in-process tests) share one bucket.
#[derive(Clone, Copy, Debug, Default)]
struct PeerIpKeyExtractor;

impl KeyExtractor for PeerIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let peer_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|value| value.0.ip())
            .or_else(|| req.extensions().get::<SocketAddr>().map(SocketAddr::ip));
        Ok(peer_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }
}

fn validate_config(config: &AppConfig) -> anyhow::Result<()> {
    if config.max_gateway_event_bytes > betalift_protocol::MAX_EVENT_BYTES {
        return Err(anyhow!(
            "gateway event limit cannot exceed protocol max of {} bytes",
            betalift_protocol::MAX_EVENT_BYTES
        ));
    }
    if config.gateway_outbound_queue == 0 {
        return Err(anyhow!("gateway outbound queue must hold at least 1 event"));
    }
    if config.gateway_ingress_events_per_window == 0 || config.gateway_ingress_window.is_zero() {
        return Err(anyhow!(
            "gateway ingress limit must allow at least 1 event per non-empty window"
        ));
    }
    for (name, rule) in [
        ("message", config.message_rate_limit),
        ("conversation", config.conversation_rate_limit),
    ] {
        if rule.budget == 0 || rule.window.is_zero() {
            return Err(anyhow!(
                "{name} rate limit must allow at least 1 action per non-empty window"
            ));
        }
    }
    Ok(())
}

/// Build the axum router with production collaborators derived from `config`.
///
/// # Errors
/// Returns an error if configured limits are invalid, the jwt secret is
/// missing, or the database or queue url cannot be parsed.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    let services = ChatServices::from_config(config)?;
    build_router_with_services(config, services)
}

/// Build the axum router around caller-supplied collaborators.
///
/// # Errors
/// Returns an error if configured limits are invalid or the jwt secret is missing.
pub fn build_router_with_services(
    config: &AppConfig,
    services: ChatServices,
) -> anyhow::Result<Router> {
    validate_config(config)?;

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config, services)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/gateway/ws", get(gateway_ws))
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(list_messages).post(send_message),
        )
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
                .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{body::Body, http::Request, http::StatusCode};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{build_router, build_router_with_services};
    use crate::server::{
        core::{AppConfig, ChatServices},
        queue::NotificationQueue,
        rate_limit::RateLimitRule,
    };

    struct ConnectedQueue;

    #[async_trait::async_trait]
    impl NotificationQueue for ConnectedQueue {
        async fn connect(&self) {}

        async fn publish(&self, _queue: &str, _payload: &Value) -> bool {
            true
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    const SECRET: &str = "router-test-secret";

    fn test_config() -> AppConfig {
        AppConfig {
            jwt_secret: Some(String::from(SECRET)),
            rate_limit_requests_per_minute: 200,
            ..AppConfig::default()
        }
    }

    fn token_for(user: &str) -> String {
        encode(
            &Header::default(),
            &json!({"userId": user, "name": user}),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn authed(method: &str, uri: &str, user: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {}", token_for(user)));
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[test]
    fn router_requires_a_jwt_secret() {
        assert!(build_router(&AppConfig::default()).is_err());
        let empty = AppConfig {
            jwt_secret: Some(String::new()),
            ..AppConfig::default()
        };
        assert!(build_router(&empty).is_err());
    }

    #[test]
    fn router_rejects_invalid_limits() {
        let oversized = AppConfig {
            max_gateway_event_bytes: betalift_protocol::MAX_EVENT_BYTES + 1,
            ..test_config()
        };
        assert!(build_router(&oversized).is_err());

        let zero_budget = AppConfig {
            message_rate_limit: RateLimitRule {
                budget: 0,
                window: Duration::from_secs(10),
            },
            ..test_config()
        };
        assert!(build_router(&zero_budget).is_err());

        let zero_queue = AppConfig {
            gateway_outbound_queue: 0,
            ..test_config()
        };
        assert!(build_router(&zero_queue).is_err());
    }

    #[tokio::test]
    async fn health_reports_a_connected_queue() {
        let config = test_config();
        let services = ChatServices::in_memory(&config, std::sync::Arc::new(ConnectedQueue));
        let app = build_router_with_services(&config, services).unwrap();

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"status":"ok","queue":"connected"})
        );
    }

    #[tokio::test]
    async fn health_and_metrics_are_public() {
        let app = build_router(&test_config()).unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(
            body_json(response).await,
            json!({"status":"ok","queue":"degraded"})
        );

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn rest_requires_a_valid_bearer_token() {
        let app = build_router(&test_config()).unwrap();

        let response = app
            .clone()
            .oneshot(Request::get("/conversations").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({"error":"missing_token"}));

        let response = app
            .oneshot(
                Request::get("/conversations")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await, json!({"error":"invalid_token"}));
    }

    #[tokio::test]
    async fn gateway_handshake_without_token_is_unauthorized() {
        let app = build_router(&test_config()).unwrap();
        let response = app
            .oneshot(Request::get("/gateway/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rest_conversation_and_message_flow() {
        let app = build_router(&test_config()).unwrap();

        let response = app
            .clone()
            .oneshot(authed(
                "POST",
                "/conversations",
                "alice",
                Some(json!({"participantId":"bob"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        assert_eq!(created["success"], true);
        let conversation_id = created["data"]["id"].as_str().unwrap().to_owned();

        let response = app
            .clone()
            .oneshot(authed(
                "POST",
                &format!("/conversations/{conversation_id}/messages"),
                "bob",
                Some(json!({"content":"hi alice"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let sent = body_json(response).await;
        assert_eq!(sent["data"]["senderId"], "bob");
        assert_eq!(sent["data"]["readBy"], json!(["bob"]));

        let response = app
            .clone()
            .oneshot(authed(
                "GET",
                &format!("/conversations/{conversation_id}/messages?limit=10"),
                "alice",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        assert_eq!(page["data"][0]["content"], "hi alice");
        assert_eq!(
            page["pagination"],
            json!({"limit":10,"offset":0,"total":1,"hasMore":false})
        );

        let response = app
            .clone()
            .oneshot(authed(
                "GET",
                &format!("/conversations/{conversation_id}/messages"),
                "mallory",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["success"], false);

        let response = app
            .oneshot(authed(
                "POST",
                &format!("/conversations/{conversation_id}/messages"),
                "alice",
                Some(json!({"content":""})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let failure = body_json(response).await;
        assert_eq!(failure["message"], "Validation failed");
        assert_eq!(failure["errors"][0]["field"], "content");
    }
}

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use betalift_chat_server::{
    build_router_with_services, init_tracing, AppConfig, ChatServices, NotificationQueue as _,
    RateLimitRule,
};
use tokio::net::TcpListener;

/// Parses `<budget>/<window_secs>`, e.g. `10/10`.
fn rate_limit_from_env(name: &str, default: RateLimitRule) -> anyhow::Result<RateLimitRule> {
    let Ok(value) = std::env::var(name) else {
        return Ok(default);
    };
    let (budget, window) = value
        .split_once('/')
        .ok_or_else(|| anyhow::anyhow!("invalid {name} value {value:?}: expected budget/secs"))?;
    let budget = budget
        .trim()
        .parse::<u32>()
        .map_err(|e| anyhow::anyhow!("invalid {name} budget {budget:?}: {e}"))?;
    let window = window
        .trim()
        .parse::<u64>()
        .map_err(|e| anyhow::anyhow!("invalid {name} window {window:?}: {e}"))?;
    Ok(RateLimitRule {
        budget,
        window: Duration::from_secs(window),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let jwt_secret = std::env::var("BETALIFT_JWT_SECRET")
        .map_err(|_| anyhow::anyhow!("BETALIFT_JWT_SECRET is required for runtime"))?;
    let defaults = AppConfig::default();
    let app_config = AppConfig {
        jwt_secret: Some(jwt_secret),
        database_url: std::env::var("BETALIFT_DATABASE_URL").ok(),
        queue_url: std::env::var("BETALIFT_QUEUE_URL").ok(),
        notification_queue: std::env::var("BETALIFT_NOTIFICATION_QUEUE")
            .unwrap_or_else(|_| defaults.notification_queue.clone()),
        email_queue: std::env::var("BETALIFT_EMAIL_QUEUE")
            .unwrap_or_else(|_| defaults.email_queue.clone()),
        message_rate_limit: rate_limit_from_env(
            "BETALIFT_MESSAGE_RATE_LIMIT",
            defaults.message_rate_limit,
        )?,
        conversation_rate_limit: rate_limit_from_env(
            "BETALIFT_CONVERSATION_RATE_LIMIT",
            defaults.conversation_rate_limit,
        )?,
        ..defaults
    };
    if app_config.database_url.is_none() {
        tracing::warn!("BETALIFT_DATABASE_URL not set; conversations are kept in memory");
    }

    let services = ChatServices::from_config(&app_config)?;
    services.queue.connect().await;
    let app = build_router_with_services(&app_config, services)?;

    let addr = std::env::var("BETALIFT_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid BETALIFT_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "betalift-chat-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

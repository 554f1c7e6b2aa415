use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use tokio::sync::mpsc;

use super::{
    auth::JwtVerifier,
    queue::{DisabledQueue, NotificationQueue, RedisQueueBridge},
    rate_limit::{ActionRateLimiter, InMemoryRateLimiter, RateLimitRule},
    rooms::RoomRegistry,
    store::{ChatStore, InMemoryChatStore, PgChatStore},
};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 120;
pub const DEFAULT_GATEWAY_INGRESS_EVENTS_PER_WINDOW: u32 = 40;
pub const DEFAULT_GATEWAY_INGRESS_WINDOW_SECS: u64 = 10;
pub const DEFAULT_GATEWAY_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_GATEWAY_EVENT_BYTES: usize = betalift_protocol::MAX_EVENT_BYTES;
pub const DEFAULT_MESSAGE_SEND_BUDGET: u32 = 10;
pub const DEFAULT_MESSAGE_SEND_WINDOW_SECS: u64 = 10;
pub const DEFAULT_CONVERSATION_CREATE_BUDGET: u32 = 5;
pub const DEFAULT_CONVERSATION_CREATE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_QUEUE_RECONNECT_DELAY_SECS: u64 = 5;
pub const DEFAULT_NOTIFICATION_QUEUE: &str = "notification_queue";
pub const DEFAULT_EMAIL_QUEUE: &str = "email_queue";
pub(crate) const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub(crate) const MAX_HISTORY_LIMIT: u32 = 100;
pub(crate) const NOTIFICATION_PREVIEW_CHARS: usize = 100;
pub(crate) const GATEWAY_PING_INTERVAL_SECS: u64 = 30;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub gateway_ingress_events_per_window: u32,
    pub gateway_ingress_window: Duration,
    pub gateway_outbound_queue: usize,
    pub max_gateway_event_bytes: usize,
    pub message_rate_limit: RateLimitRule,
    pub conversation_rate_limit: RateLimitRule,
    pub jwt_secret: Option<String>,
    pub database_url: Option<String>,
    pub queue_url: Option<String>,
    pub notification_queue: String,
    pub email_queue: String,
    pub queue_reconnect_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            gateway_ingress_events_per_window: DEFAULT_GATEWAY_INGRESS_EVENTS_PER_WINDOW,
            gateway_ingress_window: Duration::from_secs(DEFAULT_GATEWAY_INGRESS_WINDOW_SECS),
            gateway_outbound_queue: DEFAULT_GATEWAY_OUTBOUND_QUEUE,
            max_gateway_event_bytes: DEFAULT_MAX_GATEWAY_EVENT_BYTES,
            message_rate_limit: RateLimitRule {
                budget: DEFAULT_MESSAGE_SEND_BUDGET,
                window: Duration::from_secs(DEFAULT_MESSAGE_SEND_WINDOW_SECS),
            },
            conversation_rate_limit: RateLimitRule {
                budget: DEFAULT_CONVERSATION_CREATE_BUDGET,
                window: Duration::from_secs(DEFAULT_CONVERSATION_CREATE_WINDOW_SECS),
            },
            jwt_secret: None,
            database_url: None,
            queue_url: None,
            notification_queue: String::from(DEFAULT_NOTIFICATION_QUEUE),
            email_queue: String::from(DEFAULT_EMAIL_QUEUE),
            queue_reconnect_delay: Duration::from_secs(DEFAULT_QUEUE_RECONNECT_DELAY_SECS),
        }
    }
}

/// Collaborators the gateway depends on. Built once by the composition root
/// and shared by every connection and REST handler.
#[derive(Clone)]
pub struct ChatServices {
    pub store: Arc<dyn ChatStore>,
    pub queue: Arc<dyn NotificationQueue>,
    pub rate_limiter: Arc<dyn ActionRateLimiter>,
}

impl ChatServices {
    /// Builds the production collaborators described by `config`: Postgres when a
    /// database url is set (in-memory otherwise) and a Redis queue bridge when a
    /// queue url is set (publishing disabled otherwise). The queue is not
    /// connected yet; call [`NotificationQueue::connect`].
    ///
    /// # Errors
    /// Returns an error if the database or queue url cannot be parsed.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ChatStore> = match &config.database_url {
            Some(database_url) => Arc::new(PgChatStore::connect_lazy(database_url)?),
            None => Arc::new(InMemoryChatStore::default()),
        };
        let queue: Arc<dyn NotificationQueue> = match &config.queue_url {
            Some(queue_url) => Arc::new(RedisQueueBridge::new(
                queue_url,
                vec![config.notification_queue.clone(), config.email_queue.clone()],
                config.queue_reconnect_delay,
            )?),
            None => Arc::new(DisabledQueue),
        };
        Ok(Self {
            store,
            queue,
            rate_limiter: Arc::new(InMemoryRateLimiter::new(
                config.message_rate_limit,
                config.conversation_rate_limit,
            )),
        })
    }

    /// In-memory store, in-memory limiter and the supplied queue.
    #[must_use]
    pub fn in_memory(config: &AppConfig, queue: Arc<dyn NotificationQueue>) -> Self {
        Self {
            store: Arc::new(InMemoryChatStore::default()),
            queue,
            rate_limiter: Arc::new(InMemoryRateLimiter::new(
                config.message_rate_limit,
                config.conversation_rate_limit,
            )),
        }
    }
}

#[derive(Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) gateway_ingress_events_per_window: u32,
    pub(crate) gateway_ingress_window: Duration,
    pub(crate) gateway_outbound_queue: usize,
    pub(crate) max_gateway_event_bytes: usize,
    pub(crate) notification_queue: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) services: ChatServices,
    pub(crate) rooms: RoomRegistry,
    pub(crate) jwt: Arc<JwtVerifier>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(config: &AppConfig, services: ChatServices) -> anyhow::Result<Self> {
        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| anyhow!("jwt secret must be configured for gateway authentication"))?;
        Ok(Self {
            services,
            rooms: RoomRegistry::default(),
            jwt: Arc::new(JwtVerifier::new(secret)),
            runtime: Arc::new(RuntimeConfig {
                gateway_ingress_events_per_window: config.gateway_ingress_events_per_window,
                gateway_ingress_window: config.gateway_ingress_window,
                gateway_outbound_queue: config.gateway_outbound_queue,
                max_gateway_event_bytes: config.max_gateway_event_bytes,
                notification_queue: config.notification_queue.clone(),
            }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionControl {
    Open,
    Close,
}

pub(crate) type OutboundSender = mpsc::Sender<String>;

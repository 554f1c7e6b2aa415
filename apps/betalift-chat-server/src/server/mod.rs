pub(crate) mod auth;
pub(crate) mod connection;
pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod gateway_events;
pub(crate) mod handlers;
pub(crate) mod ingress;
pub(crate) mod ingress_rate_limit;
pub(crate) mod metrics;
pub(crate) mod queue;
pub(crate) mod rate_limit;
pub(crate) mod rest;
pub(crate) mod rooms;
pub(crate) mod router;
pub(crate) mod store;
pub(crate) mod types;

pub use self::core::{
    AppConfig, ChatServices, DEFAULT_CONVERSATION_CREATE_BUDGET,
    DEFAULT_CONVERSATION_CREATE_WINDOW_SECS, DEFAULT_EMAIL_QUEUE,
    DEFAULT_GATEWAY_INGRESS_EVENTS_PER_WINDOW, DEFAULT_GATEWAY_INGRESS_WINDOW_SECS,
    DEFAULT_GATEWAY_OUTBOUND_QUEUE, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_MAX_GATEWAY_EVENT_BYTES, DEFAULT_MESSAGE_SEND_BUDGET,
    DEFAULT_MESSAGE_SEND_WINDOW_SECS, DEFAULT_NOTIFICATION_QUEUE,
    DEFAULT_QUEUE_RECONNECT_DELAY_SECS, DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use errors::init_tracing;
pub use queue::{DisabledQueue, NotificationJob, NotificationQueue, RedisQueueBridge};
pub use rate_limit::{
    ActionClass, ActionRateLimiter, InMemoryRateLimiter, RateLimitDecision, RateLimitRule,
};
pub use router::{build_router, build_router_with_services};
pub use store::{ChatStore, InMemoryChatStore, MessagePage, PgChatStore, StoreError};

#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, build_router_with_services, init_tracing, ActionClass, ActionRateLimiter,
    AppConfig, ChatServices, ChatStore, DisabledQueue, InMemoryChatStore, InMemoryRateLimiter,
    MessagePage, NotificationJob, NotificationQueue, PgChatStore, RateLimitDecision,
    RateLimitRule, RedisQueueBridge, StoreError, DEFAULT_CONVERSATION_CREATE_BUDGET,
    DEFAULT_CONVERSATION_CREATE_WINDOW_SECS, DEFAULT_EMAIL_QUEUE,
    DEFAULT_GATEWAY_INGRESS_EVENTS_PER_WINDOW, DEFAULT_GATEWAY_INGRESS_WINDOW_SECS,
    DEFAULT_GATEWAY_OUTBOUND_QUEUE, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_MAX_GATEWAY_EVENT_BYTES, DEFAULT_MESSAGE_SEND_BUDGET,
    DEFAULT_MESSAGE_SEND_WINDOW_SECS, DEFAULT_NOTIFICATION_QUEUE,
    DEFAULT_QUEUE_RECONNECT_DELAY_SECS, DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use betalift_core::UserId;
use tokio::{sync::Mutex, time::Instant};

const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    SendMessage,
    CreateConversation,
}

impl ActionClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::CreateConversation => "create_conversation",
        }
    }
}

/// `budget` actions per fixed `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub budget: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
}

/// Per-user, per-action budget. Implementations decide whether the action may
/// proceed and consume one unit when it does.
#[async_trait]
pub trait ActionRateLimiter: Send + Sync {
    async fn try_consume(&self, user_id: &UserId, action: ActionClass) -> RateLimitDecision;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_started: Instant,
    used: u32,
}

struct BucketTable {
    buckets: HashMap<(UserId, ActionClass), Bucket>,
    last_sweep: Instant,
}

pub struct InMemoryRateLimiter {
    send_message: RateLimitRule,
    create_conversation: RateLimitRule,
    table: Mutex<BucketTable>,
}

impl InMemoryRateLimiter {
    #[must_use]
    pub fn new(send_message: RateLimitRule, create_conversation: RateLimitRule) -> Self {
        Self {
            send_message,
            create_conversation,
            table: Mutex::new(BucketTable {
                buckets: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn rule(&self, action: ActionClass) -> RateLimitRule {
        match action {
            ActionClass::SendMessage => self.send_message,
            ActionClass::CreateConversation => self.create_conversation,
        }
    }

    #[cfg(test)]
    async fn tracked_buckets(&self) -> usize {
        self.table.lock().await.buckets.len()
    }
}

#[async_trait]
impl ActionRateLimiter for InMemoryRateLimiter {
    async fn try_consume(&self, user_id: &UserId, action: ActionClass) -> RateLimitDecision {
        let now = Instant::now();
        let mut table = self.table.lock().await;
        if now.duration_since(table.last_sweep) >= RATE_LIMIT_SWEEP_INTERVAL {
            let (send_message, create_conversation) = (self.send_message, self.create_conversation);
            table.buckets.retain(|(_, action), bucket| {
                let window = match action {
                    ActionClass::SendMessage => send_message.window,
                    ActionClass::CreateConversation => create_conversation.window,
                };
                now.duration_since(bucket.window_started) < window
            });
            table.last_sweep = now;
        }

        let rule = self.rule(action);
        let bucket = table
            .buckets
            .entry((user_id.clone(), action))
            .or_insert(Bucket {
                window_started: now,
                used: 0,
            });
        consume_bucket(bucket, rule, now)
    }
}

fn consume_bucket(bucket: &mut Bucket, rule: RateLimitRule, now: Instant) -> RateLimitDecision {
    if now.duration_since(bucket.window_started) >= rule.window {
        bucket.window_started = now;
        bucket.used = 0;
    }
    if bucket.used >= rule.budget {
        return RateLimitDecision { allowed: false };
    }
    bucket.used += 1;
    RateLimitDecision { allowed: true }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use betalift_core::UserId;

    use super::{ActionClass, ActionRateLimiter, InMemoryRateLimiter, RateLimitRule};

    fn limiter() -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(
            RateLimitRule {
                budget: 10,
                window: Duration::from_secs(10),
            },
            RateLimitRule {
                budget: 5,
                window: Duration::from_secs(60),
            },
        )
    }

    fn user(value: &str) -> UserId {
        UserId::try_from(value.to_owned()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_send_inside_window_is_rejected() {
        let limiter = limiter();
        let alice = user("alice");
        for _ in 0..10 {
            assert!(limiter.try_consume(&alice, ActionClass::SendMessage).await.allowed);
        }
        assert!(!limiter.try_consume(&alice, ActionClass::SendMessage).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_refreshes_after_window_elapses() {
        let limiter = limiter();
        let alice = user("alice");
        for _ in 0..5 {
            assert!(limiter.try_consume(&alice, ActionClass::CreateConversation).await.allowed);
        }
        assert!(!limiter.try_consume(&alice, ActionClass::CreateConversation).await.allowed);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.try_consume(&alice, ActionClass::CreateConversation).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn budgets_are_independent_per_user_and_action() {
        let limiter = limiter();
        let alice = user("alice");
        let bob = user("bob");
        for _ in 0..10 {
            assert!(limiter.try_consume(&alice, ActionClass::SendMessage).await.allowed);
        }
        assert!(!limiter.try_consume(&alice, ActionClass::SendMessage).await.allowed);
        assert!(limiter.try_consume(&bob, ActionClass::SendMessage).await.allowed);
        assert!(limiter.try_consume(&alice, ActionClass::CreateConversation).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_expired_buckets() {
        let limiter = limiter();
        for index in 0..50 {
            let _ = limiter
                .try_consume(&user(&format!("user-{index}")), ActionClass::SendMessage)
                .await;
        }
        assert_eq!(limiter.tracked_buckets().await, 50);

        tokio::time::advance(Duration::from_secs(61)).await;
        let _ = limiter.try_consume(&user("fresh"), ActionClass::SendMessage).await;
        assert_eq!(limiter.tracked_buckets().await, 1);
    }
}

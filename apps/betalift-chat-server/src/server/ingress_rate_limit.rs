use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

/// Sliding-window flood guard over every inbound frame of one connection.
#[derive(Debug)]
pub(crate) struct IngressWindow {
    arrivals: VecDeque<Instant>,
    limit: usize,
    window: Duration,
}

impl IngressWindow {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Self {
            arrivals: VecDeque::with_capacity(limit.min(64)),
            limit,
            window,
        }
    }

    /// Records a frame arriving now, or returns `false` when the window is full.
    pub(crate) fn admit(&mut self) -> bool {
        let now = Instant::now();
        while let Some(oldest) = self.arrivals.front() {
            if now.duration_since(*oldest) <= self.window {
                break;
            }
            self.arrivals.pop_front();
        }
        if self.arrivals.len() >= self.limit {
            return false;
        }
        self.arrivals.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::IngressWindow;

    #[tokio::test(start_paused = true)]
    async fn frames_past_the_limit_are_refused_inside_the_window() {
        let mut window = IngressWindow::new(2, Duration::from_millis(250));
        assert!(window.admit());
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(window.admit());
        assert!(!window.admit());
    }

    #[tokio::test(start_paused = true)]
    async fn old_arrivals_expire_and_free_capacity() {
        let mut window = IngressWindow::new(1, Duration::from_millis(100));
        assert!(window.admit());
        assert!(!window.admit());
        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(window.admit());
        assert_eq!(window.arrivals.len(), 1);
    }

    #[test]
    fn zero_limit_refuses_everything() {
        let mut window = IngressWindow::new(0, Duration::from_secs(1));
        assert!(!window.admit());
    }
}

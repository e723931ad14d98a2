use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for the limiter, swappable in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Request quota gate. `acquire` returns once a request may be sent.
///
/// Implementations backed by a shared store can replace the in-process window when
/// several processes share one upstream quota.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn acquire(&self);
}

/// At most `max_requests` acquisitions in any rolling `window`.
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Claim a slot if one is free, otherwise report how long until the oldest expires.
    fn try_claim(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut timestamps = match self.timestamps.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            return Ok(());
        }

        let oldest = timestamps.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    pub fn in_window(&self) -> usize {
        match self.timestamps.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn acquire(&self) {
        loop {
            match self.try_claim() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::debug!("Rate limit reached, waiting {}ms", wait.as_millis());
                    self.clock.sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}

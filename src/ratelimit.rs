use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    tokens: u32,
    window_start: Instant,
}

/// Per-source token bucket: `max_tokens` capacity, refilling to full once
/// per `refill_window`. Limiters are per-source, not global — each
/// `RateLimiter` instance owns one source's budget.
pub struct RateLimiter {
    max_tokens: u32,
    refill_window: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(max_tokens: u32, refill_window_ms: u64) -> Self {
        Self {
            max_tokens,
            refill_window: Duration::from_millis(refill_window_ms),
            bucket: Mutex::new(Bucket {
                tokens: max_tokens,
                window_start: Instant::now(),
            }),
        }
    }

    fn refill_if_due(bucket: &mut Bucket, max_tokens: u32, refill_window: Duration) {
        if bucket.window_start.elapsed() >= refill_window {
            bucket.tokens = max_tokens;
            bucket.window_start = Instant::now();
        }
    }

    /// Non-blocking: returns `true` and consumes a token iff one is
    /// available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        Self::refill_if_due(&mut bucket, self.max_tokens, self.refill_window);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Suspension point: waits until a token is available, then consumes
    /// one. Callers block here, not the rate limiter's internal lock.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                Self::refill_if_due(&mut bucket, self.max_tokens, self.refill_window);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    None
                } else {
                    Some(self.refill_window.saturating_sub(bucket.window_start.elapsed()))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

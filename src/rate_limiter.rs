//! Token-bucket bandwidth throttle shared across all workers (§4.2).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Global rate limiter. Capacity is `2 × rate` bytes; `rate = 0` disables
/// throttling entirely (every `consume` returns immediately).
///
/// Unlike a lock-free token bucket, the balance here is a single
/// mutex-guarded float (§4.2 "under a mutex"): consumption is O(µs) except
/// when throttled, so serializing callers on the lock is cheap, and a
/// float balance makes fractional refills exact instead of rounding down
/// every poll.
pub struct RateLimiter {
    rate_bps: AtomicU64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Construct a limiter for the given rate (0 disables it).
    pub fn new(rate_bps: u64) -> Self {
        Self {
            rate_bps: AtomicU64::new(rate_bps),
            bucket: Mutex::new(Bucket {
                tokens: (rate_bps * 2) as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Current rate in bytes/sec (0 = unlimited).
    pub fn rate_bps(&self) -> u64 {
        self.rate_bps.load(Ordering::Relaxed)
    }

    /// Change the rate at runtime (§6 `speed_limit_bps` is runtime-updatable).
    pub fn set_rate_bps(&self, rate_bps: u64) {
        self.rate_bps.store(rate_bps, Ordering::Relaxed);
    }

    fn capacity(&self) -> f64 {
        (self.rate_bps() * 2) as f64
    }

    fn refill_locked(&self, bucket: &mut Bucket, rate: u64) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        if rate == 0 {
            return;
        }
        bucket.tokens = (bucket.tokens + rate as f64 * elapsed).min(self.capacity());
    }

    /// Consume `n` bytes worth of tokens, blocking (in 10ms polls) until
    /// enough have refilled. Returns `false` if `cancel` fired first,
    /// leaving the caller's in-progress transfer to wind down rather than
    /// block forever (§5 "every worker suspends at ... token consume").
    pub async fn consume(&self, n: u64, cancel: &CancellationToken) -> bool {
        if n == 0 {
            return true;
        }
        loop {
            let rate = self.rate_bps();
            if rate == 0 {
                return true;
            }
            {
                let mut bucket = self.bucket.lock().unwrap();
                self.refill_locked(&mut bucket, rate);
                if bucket.tokens >= n as f64 {
                    bucket.tokens -= n as f64;
                    return true;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_returns_immediately() {
        let limiter = RateLimiter::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(limiter.consume(10_000_000, &cancel).await);
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn zero_bytes_returns_immediately() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(limiter.consume(0, &cancel).await);
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn consumes_within_initial_capacity_immediately() {
        // capacity = 2 * rate; consuming <= capacity without prior drain is instant.
        let limiter = RateLimiter::new(1_000);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(limiter.consume(2_000, &cancel).await);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn blocks_until_refill() {
        let limiter = RateLimiter::new(1_000); // 1000 B/s, capacity 2000
        let cancel = CancellationToken::new();
        // Drain the bucket.
        limiter.consume(2_000, &cancel).await;
        let start = Instant::now();
        // 500 bytes at 1000 B/s = ~500ms.
        assert!(limiter.consume(500, &cancel).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(250), "elapsed={elapsed:?}");
        assert!(elapsed <= Duration::from_secs(2), "elapsed={elapsed:?}");
    }

    #[tokio::test]
    async fn cancellation_unblocks_consume() {
        let limiter = RateLimiter::new(1); // effectively never refills enough
        let cancel = CancellationToken::new();
        limiter.consume(2, &cancel).await;
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { limiter.consume(1_000_000, &cancel_clone).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("consume should return promptly after cancellation")
            .unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn dynamic_rate_increase_speeds_up_waiting_consume() {
        let limiter = RateLimiter::new(10); // very slow
        let cancel = CancellationToken::new();
        limiter.consume(20, &cancel).await;

        let start = Instant::now();
        let handle = {
            // consume under the limiter directly; rate bump happens concurrently
            tokio::time::sleep(Duration::from_millis(50)).await;
            limiter.set_rate_bps(1_000_000);
            limiter.consume(10_000, &cancel).await
        };
        assert!(handle);
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Token bucket shared by the relay endpoints. Holds at most `rps` tokens and refills at
/// `rps` tokens per second.
#[derive(Clone)]
pub struct RateLimiter {
    rps: u32,
    bucket: Arc<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refilled_at: now,
        }
    }

    fn take(&mut self, now: Instant) -> Result<(), Duration> {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.capacity).min(self.capacity);
        self.refilled_at = now;

        if self.tokens < 1.0 {
            let missing = 1.0 - self.tokens;
            return Err(Duration::from_secs_f64(missing / self.capacity));
        }
        self.tokens -= 1.0;
        Ok(())
    }
}

impl RateLimiter {
    pub fn new(rps: u32) -> Option<Self> {
        if rps == 0 {
            return None;
        }
        let bucket = Bucket::full(f64::from(rps), Instant::now());
        Some(Self {
            rps,
            bucket: Arc::new(Mutex::new(bucket)),
        })
    }

    /// `RATE_LIMIT_RPS`; unset, unparsable or 0 disables limiting.
    pub fn from_env() -> Option<Self> {
        std::env::var("RATE_LIMIT_RPS")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .and_then(Self::new)
    }

    pub fn rps(&self) -> u32 {
        self.rps
    }

    /// Takes one token, or returns how long until one is available.
    pub async fn check(&self) -> Result<(), Duration> {
        self.bucket.lock().await.take(Instant::now())
    }
}

//! Token-bucket pacing for sequential sweeps.
//!
//! Batch and auto-release sweeps call rails one item at a time. The pacer
//! lets `burst` calls through immediately and then one call per `interval`,
//! keeping provider request rates bounded without a hard-coded sleep.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    burst: u32,
    bucket: Mutex<Bucket>,
}

impl Pacer {
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            interval,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// No pacing at all
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for a token
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                self.refill(&mut bucket, now);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                self.interval
                    .saturating_sub(now.saturating_duration_since(bucket.last_refill))
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let earned = (elapsed.as_nanos() / self.interval.as_nanos()) as u64;
        if earned == 0 {
            return;
        }
        let tokens = (u64::from(bucket.tokens) + earned).min(u64::from(self.burst)) as u32;
        bucket.tokens = tokens;
        if tokens == self.burst {
            bucket.last_refill = now;
        } else {
            bucket.last_refill += self.interval * earned as u32;
        }
    }
}

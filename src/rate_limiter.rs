//! Client-side quota limiting for the Gmail API.
//!
//! Gmail meters each user at 250 quota units per second, and each method
//! has its own cost (`messages.send` is 100 units, most reads are 5). The
//! limiter is a token bucket shared by every clone; callers wait for units
//! instead of provoking 429s.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::config::QuotaConfig;

/// Gmail API methods this crate calls, with their quota cost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCost {
    /// users.getProfile
    Profile,
    /// users.messages.list
    List,
    /// users.messages.get
    Get,
    /// users.messages.modify
    Modify,
    /// users.messages.trash
    Trash,
    /// users.messages.send
    Send,
    /// users.labels.list
    Labels,
}

impl QuotaCost {
    pub fn units(self) -> u32 {
        match self {
            QuotaCost::Profile | QuotaCost::Labels => 1,
            QuotaCost::List | QuotaCost::Get | QuotaCost::Modify | QuotaCost::Trash => 5,
            QuotaCost::Send => 100,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    consumed: u64,
    operations: u64,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take `units` if available, otherwise report how long until they are
    fn take(&mut self, units: f64) -> std::result::Result<(), Duration> {
        self.refill();
        if self.available >= units {
            self.available -= units;
            self.consumed += units as u64;
            self.operations += 1;
            Ok(())
        } else {
            let deficit = units - self.available;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

/// Token bucket over Gmail quota units. Clones share one bucket.
#[derive(Debug, Clone)]
pub struct QuotaLimiter {
    bucket: Option<Arc<Mutex<Bucket>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStats {
    pub available_units: u32,
    pub capacity: u32,
    pub total_consumed: u64,
    pub total_operations: u64,
}

impl QuotaLimiter {
    pub fn new(refill_per_sec: u32, burst: u32) -> Self {
        Self {
            bucket: Some(Arc::new(Mutex::new(Bucket {
                available: burst as f64,
                capacity: burst as f64,
                refill_per_sec: refill_per_sec as f64,
                last_refill: Instant::now(),
                consumed: 0,
                operations: 0,
            }))),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        if config.enabled {
            Self::new(config.refill_per_sec, config.burst)
        } else {
            Self::unlimited()
        }
    }

    /// Wait until `cost` units are available, then consume them
    pub async fn acquire(&self, cost: QuotaCost) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        let units = cost.units() as f64;

        loop {
            let wait = {
                let mut state = bucket.lock().await;
                match state.take(units) {
                    Ok(()) => {
                        trace!(
                            "Acquired {} quota units for {:?}, {:.1} remaining",
                            units,
                            cost,
                            state.available
                        );
                        return;
                    }
                    Err(wait) => wait,
                }
            };

            // Sleep outside the lock so other callers can refill-check
            debug!(
                "Quota exhausted, waiting {:.2}s for {} units ({:?})",
                wait.as_secs_f64(),
                units,
                cost
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Consume `cost` units only if they are available right now
    pub async fn try_acquire(&self, cost: QuotaCost) -> bool {
        match &self.bucket {
            Some(bucket) => bucket.lock().await.take(cost.units() as f64).is_ok(),
            None => true,
        }
    }

    pub async fn stats(&self) -> Option<QuotaStats> {
        let bucket = self.bucket.as_ref()?;
        let mut state = bucket.lock().await;
        state.refill();
        Some(QuotaStats {
            available_units: state.available as u32,
            capacity: state.capacity as u32,
            total_consumed: state.consumed,
            total_operations: state.operations,
        })
    }
}

impl Default for QuotaLimiter {
    fn default() -> Self {
        Self::from_config(&QuotaConfig::default())
    }
}

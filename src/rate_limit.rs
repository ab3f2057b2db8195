//! Per-caller token buckets for the duplicate-check and venue-match
//! endpoints. Exhaustion yields a structured retry-after hint, never a
//! silent failure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[cfg(test)]
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

impl RateLimiter {
    pub fn new(requests_per_min: u32) -> Self {
        let capacity = requests_per_min.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Spends one token from the caller's bucket, refilling on elapsed
    /// time first.
    pub fn check(&self, caller: &str) -> RateDecision {
        self.check_at(caller, Instant::now())
    }

    fn check_at(&self, caller: &str, now: Instant) -> RateDecision {
        let mut buckets = self.buckets.lock().unwrap();

        // A bucket idle past a full refill holds capacity tokens, which
        // is indistinguishable from a fresh entry; drop it so the map
        // stays bounded by recently active callers.
        let refill_horizon = self.capacity / self.refill_per_sec;
        buckets.retain(|_, (_, last_refill)| {
            now.duration_since(*last_refill).as_secs_f64() < refill_horizon
        });

        let (tokens, last_refill) = buckets
            .entry(caller.to_string())
            .or_insert((self.capacity, now));

        let elapsed = now.duration_since(*last_refill).as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last_refill = now;

        if *tokens >= 1.0 {
            *tokens -= 1.0;
            RateDecision::Allowed
        } else {
            let deficit = 1.0 - *tokens;
            let retry_after_secs = (deficit / self.refill_per_sec).ceil() as u64;
            RateDecision::Limited {
                retry_after_secs: retry_after_secs.max(1),
            }
        }
    }
}

// Trustgate
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Sliding window rate limiting
//!
//! Each identifier keeps the timestamps of its admitted requests inside the
//! trailing window. Old timestamps are dropped before every decision, so a
//! burst straddling a window boundary is throttled instead of doubling up.

use crate::clock::{SharedClock, to_chrono};
use crate::error::{GuardError, GuardResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

/// Default cap on distinct identifiers tracked at once
pub const DEFAULT_MAX_IDENTIFIERS: usize = 10_000;

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the time window
    pub max_requests: u32,

    /// Time window for rate limiting
    #[serde(with = "serde_duration")]
    pub window: Duration,

    /// Distinct identifiers tracked before the least recently seen is evicted
    pub max_identifiers: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            max_identifiers: DEFAULT_MAX_IDENTIFIERS,
        }
    }
}

/// Admission decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Maximum requests allowed
    pub limit: u32,

    /// Remaining requests in current window
    pub remaining: u32,

    /// When the oldest request in the window falls out of it
    pub reset_time: DateTime<Utc>,

    /// How long a denied caller should wait; zero when allowed
    #[serde(with = "serde_duration_ms")]
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Bucket {
    requests: VecDeque<DateTime<Utc>>,
    window: chrono::Duration,
    last_seen: DateTime<Utc>,
}

impl Bucket {
    fn new(window: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            requests: VecDeque::new(),
            window,
            last_seen: now,
        }
    }

    /// Drop timestamps at or before `now - window`
    fn prune(&mut self, now: DateTime<Utc>) {
        let window_start = now - self.window;
        while self.requests.front().is_some_and(|&timestamp| timestamp <= window_start) {
            self.requests.pop_front();
        }
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        self.requests.back().is_none_or(|&newest| newest <= now - self.window)
    }
}

/// Sliding window rate limiter keyed by caller identity
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    buckets: DashMap<String, Bucket>,
    config: RateLimitConfig,
    clock: SharedClock,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject one request for `identifier`
    pub fn enforce(&self, identifier: &str, max_requests: u32, window: Duration) -> GuardResult<RateLimitDecision> {
        if identifier.is_empty() {
            return Err(GuardError::validation("rate limit identifier must not be empty"));
        }
        if max_requests == 0 || window.is_zero() {
            return Err(GuardError::validation("rate limit requires a positive limit and window"));
        }

        let now = self.clock.now();
        let window = to_chrono(window);

        if !self.buckets.contains_key(identifier) && self.buckets.len() >= self.config.max_identifiers {
            self.make_room();
        }

        let mut bucket = self.buckets.entry(identifier.to_string()).or_insert_with(|| Bucket::new(window, now));
        bucket.window = window;
        bucket.last_seen = now;
        bucket.prune(now);

        let count = bucket.requests.len() as u32;
        let decision = if count >= max_requests {
            let reset_time = bucket.requests.front().map(|&oldest| oldest + window).unwrap_or(now);
            RateLimitDecision {
                allowed: false,
                limit: max_requests,
                remaining: 0,
                reset_time,
                retry_after: (reset_time - now).to_std().unwrap_or(Duration::ZERO),
            }
        } else {
            bucket.requests.push_back(now);
            let reset_time = bucket.requests.front().map(|&oldest| oldest + window).unwrap_or(now + window);
            RateLimitDecision {
                allowed: true,
                limit: max_requests,
                remaining: max_requests - (count + 1),
                reset_time,
                retry_after: Duration::ZERO,
            }
        };
        drop(bucket);

        // Concurrent first requests can race past the cap check above.
        while self.buckets.len() > self.config.max_identifiers {
            if !self.evict_least_recent(Some(identifier)) {
                break;
            }
        }

        if decision.allowed {
            counter!("trustgate_rate_limit_allowed_total", 1);
        } else {
            counter!("trustgate_rate_limit_denied_total", 1);
            warn!(identifier = %identifier, retry_after_ms = decision.retry_after.as_millis() as u64, "Rate limit exceeded");
        }

        Ok(decision)
    }

    /// Enforce with the configured default limit and window
    pub fn enforce_default(&self, identifier: &str) -> GuardResult<RateLimitDecision> {
        self.enforce(identifier, self.config.max_requests, self.config.window)
    }

    /// Like [`Self::enforce_default`], but a rejection becomes `RateLimitExceeded`
    pub fn check(&self, identifier: &str) -> GuardResult<RateLimitDecision> {
        let decision = self.enforce_default(identifier)?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(GuardError::RateLimitExceeded {
                limit: decision.limit,
                retry_after: decision.retry_after,
            })
        }
    }

    /// Report the current state without consuming a request
    pub fn peek(&self, identifier: &str, max_requests: u32, window: Duration) -> RateLimitDecision {
        let now = self.clock.now();
        let window = to_chrono(window);
        let window_start = now - window;

        let (count, oldest) = self
            .buckets
            .get(identifier)
            .map(|bucket| {
                let live: Vec<DateTime<Utc>> = bucket.requests.iter().copied().filter(|&timestamp| timestamp > window_start).collect();
                (live.len() as u32, live.first().copied())
            })
            .unwrap_or((0, None));

        let reset_time = oldest.map(|timestamp| timestamp + window).unwrap_or(now);
        let allowed = count < max_requests;
        RateLimitDecision {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(count),
            reset_time,
            retry_after: if allowed { Duration::ZERO } else { (reset_time - now).to_std().unwrap_or(Duration::ZERO) },
        }
    }

    /// Remove buckets with no request left inside their window
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
        let remaining = self.buckets.len();
        let removed = before.saturating_sub(remaining);
        gauge!("trustgate_rate_limit_identifiers", remaining as f64);
        if removed > 0 {
            debug!(removed, "Swept idle rate limit buckets");
        }
        removed
    }

    /// Sweep, then evict the least recently seen bucket if still full
    fn make_room(&self) {
        self.sweep();
        if self.buckets.len() >= self.config.max_identifiers {
            self.evict_least_recent(None);
        }
    }

    /// Remove the least recently seen bucket other than `keep`
    fn evict_least_recent(&self, keep: Option<&str>) -> bool {
        let oldest = self
            .buckets
            .iter()
            .filter(|entry| keep != Some(entry.key().as_str()))
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| entry.key().clone());
        match oldest {
            Some(key) => {
                self.buckets.remove(&key);
                debug!(identifier = %key, "Evicted least recently seen rate limit bucket");
                true
            }
            None => false,
        }
    }

    pub fn tracked_identifiers(&self) -> usize {
        self.buckets.len()
    }
}

/// Serde helper for Duration serialization
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Millisecond precision for back-off hints
mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn limiter(max_identifiers: usize) -> (SlidingWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = RateLimitConfig {
            max_requests: 3,
            window: Duration::from_millis(1000),
            max_identifiers,
        };
        (SlidingWindowLimiter::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_sliding_window() {
        let (limiter, clock) = limiter(100);
        let window = Duration::from_millis(1000);

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.enforce("client", 3, window).unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = limiter.enforce("client", 3, window).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Duration::from_millis(1000));

        clock.advance(chrono::Duration::milliseconds(1001));
        assert!(limiter.enforce("client", 3, window).unwrap().allowed);
    }

    #[test]
    fn test_retry_after_tracks_oldest_request() {
        let (limiter, clock) = limiter(100);
        let window = Duration::from_millis(1000);

        limiter.enforce("client", 2, window).unwrap();
        clock.advance(chrono::Duration::milliseconds(400));
        limiter.enforce("client", 2, window).unwrap();
        clock.advance(chrono::Duration::milliseconds(100));

        let denied = limiter.enforce("client", 2, window).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(500));

        // Only the first request has left the window.
        clock.advance(chrono::Duration::milliseconds(500));
        let decision = limiter.enforce("client", 2, window).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_boundary_burst_is_throttled() {
        let (limiter, clock) = limiter(100);
        let window = Duration::from_millis(1000);

        clock.advance(chrono::Duration::milliseconds(990));
        for _ in 0..3 {
            assert!(limiter.enforce("client", 3, window).unwrap().allowed);
        }
        // A fixed window would reset here; the sliding window must not.
        clock.advance(chrono::Duration::milliseconds(20));
        assert!(!limiter.enforce("client", 3, window).unwrap().allowed);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (limiter, _) = limiter(100);
        let window = Duration::from_secs(1);

        assert!(limiter.enforce("a", 1, window).unwrap().allowed);
        assert!(!limiter.enforce("a", 1, window).unwrap().allowed);
        assert!(limiter.enforce("b", 1, window).unwrap().allowed);
    }

    #[test]
    fn test_check_maps_to_error() {
        let (limiter, _) = limiter(100);

        for _ in 0..3 {
            limiter.check("client").unwrap();
        }
        match limiter.check("client") {
            Err(GuardError::RateLimitExceeded { limit, retry_after }) => {
                assert_eq!(limit, 3);
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (limiter, _) = limiter(100);
        let window = Duration::from_secs(1);

        limiter.enforce("client", 3, window).unwrap();
        let peeked = limiter.peek("client", 3, window);
        assert_eq!(peeked.remaining, 2);
        assert_eq!(limiter.peek("client", 3, window), peeked);
    }

    #[test]
    fn test_invalid_arguments() {
        let (limiter, _) = limiter(100);
        assert!(limiter.enforce("", 3, Duration::from_secs(1)).is_err());
        assert!(limiter.enforce("client", 0, Duration::from_secs(1)).is_err());
        assert!(limiter.enforce("client", 3, Duration::ZERO).is_err());
    }

    #[test]
    fn test_identifier_cap_holds_under_concurrency() {
        let (limiter, _) = limiter(16);
        let window = Duration::from_secs(1);

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let limiter = &limiter;
                scope.spawn(move || {
                    for n in 0..50 {
                        limiter.enforce(&format!("caller-{worker}-{n}"), 5, window).unwrap();
                    }
                });
            }
        });

        assert!(limiter.tracked_identifiers() <= 16);
    }

    #[test]
    fn test_identifier_cap_and_sweep() {
        let (limiter, clock) = limiter(2);
        let window = Duration::from_secs(1);

        limiter.enforce("a", 5, window).unwrap();
        clock.advance(chrono::Duration::milliseconds(10));
        limiter.enforce("b", 5, window).unwrap();
        clock.advance(chrono::Duration::milliseconds(10));
        limiter.enforce("c", 5, window).unwrap();
        assert_eq!(limiter.tracked_identifiers(), 2);
        // "a" was the least recently seen and has been evicted.
        assert_eq!(limiter.peek("a", 5, window).remaining, 5);

        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(limiter.sweep(), 2);
        assert_eq!(limiter.tracked_identifiers(), 0);
    }
}

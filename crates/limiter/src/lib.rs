//! Per-user submission rate limiting.
//!
//! Tracks how many submissions each user has sent inside a sliding time
//! window and places abusive users into a time-boxed cooldown. State lives in
//! a process-lifetime map keyed by user id; there is no background sweeper —
//! expired windows are reset lazily on the next check.
//!
//! ## Contract
//!
//! - [`RateLimiter::check`] decides whether a user may submit right now. It
//!   never blocks and never fails; the decision is a plain enum.
//! - [`RateLimiter::record`] is called once per accepted submission, after
//!   the caller has acted on an `Allowed` decision.
//! - An active cooldown strictly dominates the message-count check: a user in
//!   cooldown is rejected regardless of their count.
//!
//! ## Window semantics
//!
//! `record` resets the window start on every accepted message, so the count
//! only expires after a quiet period of `time_window` — a rolling debounce
//! rather than a textbook fixed window. This matches the long-observed
//! production behavior and is kept deliberately.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum accepted messages inside one time window.
    pub max_messages: u32,
    /// Length of the sliding window.
    pub time_window: Duration,
    /// Cooldown imposed once `max_messages` is exceeded.
    pub cooldown_time: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            time_window: Duration::from_secs(600),
            cooldown_time: Duration::from_secs(900),
        }
    }
}

impl LimiterConfig {
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window = window;
        self
    }

    pub fn with_cooldown_time(mut self, cooldown: Duration) -> Self {
        self.cooldown_time = cooldown;
        self
    }
}

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    /// The user may submit.
    Allowed,
    /// The user is inside an active cooldown; `remaining` is the time left.
    Cooldown { remaining: Duration },
    /// The user just exceeded the window budget and entered a fresh cooldown.
    Throttled { cooldown: Duration },
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitDecision::Allowed)
    }
}

#[derive(Debug, Clone, Copy)]
struct UserRecord {
    message_count: u32,
    window_start: Instant,
    cooldown_until: Option<Instant>,
}

impl UserRecord {
    fn fresh(now: Instant) -> Self {
        Self {
            message_count: 0,
            window_start: now,
            cooldown_until: None,
        }
    }
}

/// Per-user rate limiter with sliding windows and cooldowns.
///
/// Safe to share across tasks; each user's record is mutated under its own
/// map shard, so checks for distinct users never serialize against each
/// other.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    records: DashMap<i64, UserRecord>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Decide whether `user_id` may submit right now.
    pub fn check(&self, user_id: i64) -> LimitDecision {
        self.check_at(user_id, Instant::now())
    }

    /// Deterministic-time variant of [`check`](Self::check).
    pub fn check_at(&self, user_id: i64, now: Instant) -> LimitDecision {
        let mut record = self
            .records
            .entry(user_id)
            .or_insert_with(|| UserRecord::fresh(now));

        // Cooldown dominates everything else.
        if let Some(until) = record.cooldown_until {
            if now < until {
                return LimitDecision::Cooldown {
                    remaining: until - now,
                };
            }
            // Cooldown served; the user is evaluated fresh.
            *record = UserRecord::fresh(now);
        }

        // Lazy window expiry.
        if now.duration_since(record.window_start) > self.config.time_window {
            record.message_count = 0;
        }

        if record.message_count >= self.config.max_messages {
            record.cooldown_until = Some(now + self.config.cooldown_time);
            warn!(
                user_id,
                cooldown_secs = self.config.cooldown_time.as_secs(),
                "user_throttled"
            );
            return LimitDecision::Throttled {
                cooldown: self.config.cooldown_time,
            };
        }

        LimitDecision::Allowed
    }

    /// Record one accepted submission for `user_id`.
    pub fn record(&self, user_id: i64) {
        self.record_at(user_id, Instant::now());
    }

    /// Deterministic-time variant of [`record`](Self::record).
    pub fn record_at(&self, user_id: i64, now: Instant) {
        let mut record = self
            .records
            .entry(user_id)
            .or_insert_with(|| UserRecord::fresh(now));
        record.message_count += 1;
        record.window_start = now;
        debug!(user_id, count = record.message_count, "submission_recorded");
    }

    /// Number of users with tracked state.
    pub fn tracked_users(&self) -> usize {
        self.records.len()
    }
}

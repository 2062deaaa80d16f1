//! Media-group reassembly.
//!
//! Messaging transports deliver a multi-photo/video post as separate
//! messages sharing one `media_group_id`, with the caption attached to an
//! arbitrary part. The [`MediaAggregator`] buffers those parts per group id
//! until the group is complete, then hands back one assembled submission
//! with attachments ordered by arrival sequence number — arrival order is
//! the only reliable ordering signal, wall-clock is not.
//!
//! ## Completeness
//!
//! A group is ready once it holds `max_group_size` parts (the transport's
//! batch maximum, default 10). Groups that never get there are evicted by
//! [`MediaAggregator::sweep_expired`]: once no part has arrived for
//! `inactivity_timeout`, or the buffer is older than `max_buffer_age`, the
//! group is flushed and reported so the caller can notify the user. Without
//! the sweep an abandoned group would wait forever and its memory would
//! never be reclaimed.
//!
//! ## Invariants
//!
//! - At most one buffer per group id at any time.
//! - A buffer is removed exactly once: either on completion or on eviction,
//!   never both. Concurrent part arrivals are serialized per key by the map
//!   shard; the removal itself is the single decision point.
//! - The first non-empty caption wins; later captions are ignored.
//! - No operation suspends while holding a buffer guard.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Supported attachment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// One media attachment: an opaque transport reference plus its arrival
/// sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: MediaKind,
    /// Opaque media reference understood by the transport.
    pub file_ref: String,
    /// Arrival sequence number, assigned by the transport layer.
    pub sequence: u64,
}

/// An inbound unit of work as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: i64,
    /// Raw body, possibly from a caption.
    pub text: Option<String>,
    /// Grouping key shared by the parts of one media group.
    pub media_group_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// A fully assembled submission, ready for validation and forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySubmission {
    pub user_id: i64,
    pub text: Option<String>,
    /// Ordered by arrival sequence number, ascending.
    pub attachments: Vec<Attachment>,
}

/// Outcome of feeding one submission into the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Part buffered; more parts of the group are expected.
    Pending,
    /// The submission is complete.
    Ready(ReadySubmission),
}

/// A buffered group that was evicted before completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredGroup {
    pub group_id: String,
    pub user_id: i64,
    /// Parts held when the group was flushed.
    pub parts: usize,
}

/// Configuration for media-group aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateConfig {
    /// Parts at which a group is considered complete.
    pub max_group_size: usize,
    /// Evict a group once no part has arrived for this long.
    pub inactivity_timeout: Duration,
    /// Evict a group regardless of activity once it is this old.
    pub max_buffer_age: Duration,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            max_group_size: 10,
            inactivity_timeout: Duration::from_secs(30),
            max_buffer_age: Duration::from_secs(300),
        }
    }
}

impl AggregateConfig {
    pub fn with_max_group_size(mut self, size: usize) -> Self {
        self.max_group_size = size;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_max_buffer_age(mut self, age: Duration) -> Self {
        self.max_buffer_age = age;
        self
    }

    pub fn validate(&self) -> Result<(), AggregateError> {
        if self.max_group_size == 0 {
            return Err(AggregateError::InvalidConfig(
                "max_group_size must be >= 1".to_string(),
            ));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(AggregateError::InvalidConfig(
                "inactivity_timeout must be non-zero".to_string(),
            ));
        }
        if self.max_buffer_age < self.inactivity_timeout {
            return Err(AggregateError::InvalidConfig(
                "max_buffer_age must be >= inactivity_timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors produced by the aggregation layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AggregateError {
    #[error("invalid aggregate config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug)]
struct GroupBuffer {
    user_id: i64,
    parts: Vec<Attachment>,
    captured_text: Option<String>,
    created_at: Instant,
    last_part_at: Instant,
}

impl GroupBuffer {
    fn new(user_id: i64, now: Instant) -> Self {
        Self {
            user_id,
            parts: Vec::new(),
            captured_text: None,
            created_at: now,
            last_part_at: now,
        }
    }

    fn expired(&self, cfg: &AggregateConfig, now: Instant) -> bool {
        now.duration_since(self.last_part_at) >= cfg.inactivity_timeout
            || now.duration_since(self.created_at) >= cfg.max_buffer_age
    }
}

/// Buffers media-group parts per group id until complete.
///
/// Shared mutable state keyed by group id; mutation happens under the map's
/// per-shard lock, so two parts of the same group arriving nearly
/// simultaneously are serialized without global locking.
#[derive(Debug)]
pub struct MediaAggregator {
    config: AggregateConfig,
    buffers: DashMap<String, GroupBuffer>,
}

impl MediaAggregator {
    pub fn new(config: AggregateConfig) -> Self {
        Self {
            config,
            buffers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AggregateConfig {
        &self.config
    }

    /// Feed one submission in; see [`AggregationOutcome`].
    ///
    /// Ungrouped submissions (no `media_group_id`) are immediately ready
    /// with their own text — a single attachment, or none, stands alone.
    pub fn ingest(&self, submission: Submission) -> AggregationOutcome {
        self.ingest_at(submission, Instant::now())
    }

    /// Deterministic-time variant of [`ingest`](Self::ingest).
    pub fn ingest_at(&self, submission: Submission, now: Instant) -> AggregationOutcome {
        let Submission {
            user_id,
            text,
            media_group_id,
            mut attachments,
        } = submission;

        let Some(group_id) = media_group_id else {
            attachments.sort_by_key(|a| a.sequence);
            return AggregationOutcome::Ready(ReadySubmission {
                user_id,
                text,
                attachments,
            });
        };

        let complete = {
            let mut buffer = self
                .buffers
                .entry(group_id.clone())
                .or_insert_with(|| GroupBuffer::new(user_id, now));
            if buffer.captured_text.is_none() {
                // First non-empty caption wins.
                if let Some(caption) = text.filter(|t| !t.trim().is_empty()) {
                    buffer.captured_text = Some(caption);
                }
            }
            buffer.parts.append(&mut attachments);
            buffer.last_part_at = now;
            debug!(
                group_id = %group_id,
                parts = buffer.parts.len(),
                "media_group_part_buffered"
            );
            buffer.parts.len() >= self.config.max_group_size
        };

        if !complete {
            return AggregationOutcome::Pending;
        }

        // Guard dropped above; removal is the exactly-once decision point.
        match self.buffers.remove(&group_id) {
            Some((_, buffer)) => {
                let mut parts = buffer.parts;
                parts.sort_by_key(|a| a.sequence);
                info!(
                    group_id = %group_id,
                    parts = parts.len(),
                    "media_group_ready"
                );
                AggregationOutcome::Ready(ReadySubmission {
                    user_id: buffer.user_id,
                    text: buffer.captured_text,
                    attachments: parts,
                })
            }
            // A concurrent part completed the group first.
            None => AggregationOutcome::Pending,
        }
    }

    /// Evict groups whose inactivity timeout or maximum age has elapsed.
    ///
    /// Each flushed group is returned exactly once so the caller can notify
    /// the user; the parts are dropped, never forwarded partially.
    pub fn sweep_expired(&self, now: Instant) -> Vec<ExpiredGroup> {
        let candidates: Vec<String> = self
            .buffers
            .iter()
            .filter(|entry| entry.value().expired(&self.config, now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut flushed = Vec::new();
        for group_id in candidates {
            // Re-check under the lock: a part may have arrived since the scan.
            if let Some((group_id, buffer)) = self
                .buffers
                .remove_if(&group_id, |_, buffer| buffer.expired(&self.config, now))
            {
                warn!(
                    group_id = %group_id,
                    parts = buffer.parts.len(),
                    "media_group_expired"
                );
                flushed.push(ExpiredGroup {
                    group_id,
                    user_id: buffer.user_id,
                    parts: buffer.parts.len(),
                });
            }
        }
        flushed
    }

    /// Number of groups currently buffered.
    pub fn pending_groups(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(seq: u64) -> Attachment {
        Attachment {
            kind: MediaKind::Photo,
            file_ref: format!("file-{seq}"),
            sequence: seq,
        }
    }

    fn part(
        user_id: i64,
        group: &str,
        text: Option<&str>,
        attachments: Vec<Attachment>,
    ) -> Submission {
        Submission {
            user_id,
            text: text.map(str::to_string),
            media_group_id: Some(group.to_string()),
            attachments,
        }
    }

    fn aggregator(max: usize) -> MediaAggregator {
        MediaAggregator::new(AggregateConfig::default().with_max_group_size(max))
    }

    #[test]
    fn ungrouped_submission_is_immediately_ready() {
        let agg = aggregator(10);
        let outcome = agg.ingest(Submission {
            user_id: 1,
            text: Some("hello".to_string()),
            media_group_id: None,
            attachments: vec![photo(3)],
        });

        match outcome {
            AggregationOutcome::Ready(ready) => {
                assert_eq!(ready.text.as_deref(), Some("hello"));
                assert_eq!(ready.attachments.len(), 1);
            }
            other => panic!("expected ready, got {other:?}"),
        }
        assert_eq!(agg.pending_groups(), 0);
    }

    #[test]
    fn group_completes_at_max_size_in_sequence_order() {
        let agg = aggregator(3);
        let now = Instant::now();

        // Parts arrive interleaved; caption on the middle part.
        assert_eq!(
            agg.ingest_at(part(1, "g", None, vec![photo(2)]), now),
            AggregationOutcome::Pending
        );
        assert_eq!(
            agg.ingest_at(part(1, "g", Some("caption"), vec![photo(1)]), now),
            AggregationOutcome::Pending
        );

        match agg.ingest_at(part(1, "g", None, vec![photo(3)]), now) {
            AggregationOutcome::Ready(ready) => {
                assert_eq!(ready.user_id, 1);
                assert_eq!(ready.text.as_deref(), Some("caption"));
                let sequences: Vec<u64> =
                    ready.attachments.iter().map(|a| a.sequence).collect();
                assert_eq!(sequences, vec![1, 2, 3]);
            }
            other => panic!("expected ready, got {other:?}"),
        }
        assert_eq!(agg.pending_groups(), 0);
    }

    #[test]
    fn first_nonempty_caption_wins() {
        let agg = aggregator(3);
        let now = Instant::now();

        agg.ingest_at(part(1, "g", Some("  "), vec![photo(1)]), now);
        agg.ingest_at(part(1, "g", Some("first"), vec![photo(2)]), now);
        match agg.ingest_at(part(1, "g", Some("second"), vec![photo(3)]), now) {
            AggregationOutcome::Ready(ready) => {
                assert_eq!(ready.text.as_deref(), Some("first"));
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn inactivity_timeout_flushes_group_once() {
        let agg = MediaAggregator::new(
            AggregateConfig::default()
                .with_max_group_size(10)
                .with_inactivity_timeout(Duration::from_secs(30))
                .with_max_buffer_age(Duration::from_secs(300)),
        );
        let now = Instant::now();

        agg.ingest_at(part(7, "g", Some("caption"), vec![photo(1)]), now);
        agg.ingest_at(part(7, "g", None, vec![photo(2)]), now + Duration::from_secs(5));

        // Not yet expired.
        assert!(agg.sweep_expired(now + Duration::from_secs(20)).is_empty());

        let flushed = agg.sweep_expired(now + Duration::from_secs(36));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].group_id, "g");
        assert_eq!(flushed[0].user_id, 7);
        assert_eq!(flushed[0].parts, 2);

        // Exactly once.
        assert!(agg.sweep_expired(now + Duration::from_secs(100)).is_empty());
        assert_eq!(agg.pending_groups(), 0);
    }

    #[test]
    fn max_age_flushes_active_group() {
        let agg = MediaAggregator::new(
            AggregateConfig::default()
                .with_max_group_size(100)
                .with_inactivity_timeout(Duration::from_secs(30))
                .with_max_buffer_age(Duration::from_secs(60)),
        );
        let start = Instant::now();

        // Keep the group active so only the age bound can trigger.
        let mut at = start;
        for seq in 0..5 {
            agg.ingest_at(part(1, "g", None, vec![photo(seq)]), at);
            at += Duration::from_secs(13);
        }

        let flushed = agg.sweep_expired(start + Duration::from_secs(61));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].parts, 5);
    }

    #[test]
    fn fresh_part_rescues_group_from_sweep() {
        let agg = MediaAggregator::new(
            AggregateConfig::default()
                .with_max_group_size(10)
                .with_inactivity_timeout(Duration::from_secs(30)),
        );
        let now = Instant::now();

        agg.ingest_at(part(1, "g", None, vec![photo(1)]), now);
        agg.ingest_at(part(1, "g", None, vec![photo(2)]), now + Duration::from_secs(25));

        // 31s after creation but only 6s after the last part.
        assert!(agg.sweep_expired(now + Duration::from_secs(31)).is_empty());
        assert_eq!(agg.pending_groups(), 1);
    }

    #[test]
    fn distinct_groups_do_not_interfere() {
        let agg = aggregator(2);
        let now = Instant::now();

        agg.ingest_at(part(1, "a", None, vec![photo(1)]), now);
        agg.ingest_at(part(2, "b", None, vec![photo(1)]), now);
        assert_eq!(agg.pending_groups(), 2);

        match agg.ingest_at(part(1, "a", None, vec![photo(2)]), now) {
            AggregationOutcome::Ready(ready) => assert_eq!(ready.user_id, 1),
            other => panic!("expected ready, got {other:?}"),
        }
        assert_eq!(agg.pending_groups(), 1);
    }

    #[test]
    fn config_validation_rejects_degenerate_values() {
        assert!(AggregateConfig::default().validate().is_ok());

        let zero_size = AggregateConfig::default().with_max_group_size(0);
        assert!(matches!(
            zero_size.validate(),
            Err(AggregateError::InvalidConfig(msg)) if msg.contains("max_group_size")
        ));

        let inverted = AggregateConfig::default()
            .with_inactivity_timeout(Duration::from_secs(60))
            .with_max_buffer_age(Duration::from_secs(30));
        assert!(matches!(
            inverted.validate(),
            Err(AggregateError::InvalidConfig(msg)) if msg.contains("max_buffer_age")
        ));
    }
}

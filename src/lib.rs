//! Umbrella crate for the modpipe submission pipeline.
//!
//! Stitches the stage crates together so the transport layer drives one API:
//! rate limiting ([`limiter`]), media-group reassembly ([`aggregate`]),
//! template validation and classification ([`template`]), forbidden-word
//! screening ([`screen`]), and channel routing/dispatch (here).
//!
//! ## Processing model
//!
//! Each inbound message runs through [`Pipeline::process`]:
//!
//! ```text
//! Received → RateChecked → Aggregating → Ready → Validated → Screened
//!          ↘ RateLimited            ↘ Pending  ↘ ValidationFailed
//!                                              ↘ ForbiddenContent
//!          → Routed → Forwarded | TransportError
//! ```
//!
//! Every terminal outcome is a [`SubmissionOutcome`] value, never an
//! exception path; each rejection category renders a distinct user-facing
//! reply so users can self-correct. Outcomes are terminal for the attempt —
//! the pipeline never retries on its own.
//!
//! Sending to a channel is an external primitive behind [`ChannelSink`]; the
//! pipeline never holds aggregation state across that await. Incomplete
//! media groups are bounded by [`Pipeline::flush_expired`], which the
//! transport layer calls on a timer and which yields one notification per
//! abandoned group.

pub use aggregate::{
    AggregateConfig, AggregateError, AggregationOutcome, Attachment, ExpiredGroup,
    MediaAggregator, MediaKind, ReadySubmission, Submission,
};
pub use limiter::{LimitDecision, LimiterConfig, RateLimiter};
pub use screen::WordList;
pub use template::{classify, validate, SubmissionKind, ValidationResult, REPORT_MARKER};

mod config;
pub use crate::config::{
    AggregateYamlConfig, ConfigLoadError, LimiterYamlConfig, ModpipeConfig, RoutingConfig,
    ScreenYamlConfig,
};

use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn, Level};

/// A channel dispatch failure reported by the transport.
#[derive(Debug, Error)]
#[error("channel dispatch failed: {message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The externally provided send primitives.
///
/// Implementations wrap the actual messaging transport. Both calls are
/// suspension points; the pipeline guarantees no aggregation or limiter
/// state is locked while they are awaited.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send_text(&self, channel: &str, text: &str) -> Result<(), SinkError>;

    async fn send_media_group(
        &self,
        channel: &str,
        caption: &str,
        attachments: &[Attachment],
    ) -> Result<(), SinkError>;
}

/// Terminal (or pending) outcome for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Forwarded to the destination channel for `kind`.
    Forwarded {
        kind: SubmissionKind,
        channel: String,
    },
    /// Part of a media group buffered; awaiting more parts. No user reply.
    Pending,
    /// Rejected by the rate limiter.
    RateLimited { decision: LimitDecision },
    /// Rejected by template validation.
    ValidationFailed { result: ValidationResult },
    /// Rejected by the forbidden-word screen.
    ForbiddenContent { words: Vec<String> },
    /// The sink call failed; not retried here.
    TransportError { message: String },
    /// A media group never completed and was flushed.
    AggregationTimeout,
}

impl SubmissionOutcome {
    /// The user-facing reply for this outcome, if any.
    ///
    /// Every category has distinct wording so users can tell what to fix.
    pub fn user_reply(&self) -> Option<String> {
        match self {
            SubmissionOutcome::Forwarded { channel, .. } => {
                Some(format!("✅ 您的投稿已成功转发到频道 {channel}！"))
            }
            SubmissionOutcome::Pending => None,
            SubmissionOutcome::RateLimited { decision } => match decision {
                LimitDecision::Cooldown { remaining } => Some(format!(
                    "❌ 您需要等待 {} 秒后才能继续投稿",
                    remaining.as_secs()
                )),
                LimitDecision::Throttled { cooldown } => Some(format!(
                    "❌ 发送过于频繁，已被限制 {} 分钟",
                    cooldown.as_secs() / 60
                )),
                LimitDecision::Allowed => None,
            },
            SubmissionOutcome::ValidationFailed { result } => {
                if result.empty_body {
                    Some("❌ 投稿内容不能为空".to_string())
                } else if !result.missing_fields.is_empty() {
                    Some(format!(
                        "❌ 缺少必填字段: {}",
                        result.missing_fields.join(", ")
                    ))
                } else {
                    Some(format!(
                        "❌ 以下字段不能为空: {}",
                        result.empty_fields.join(", ")
                    ))
                }
            }
            SubmissionOutcome::ForbiddenContent { .. } => Some(
                "❌ 投稿内容包含违禁词！\n请修改后重新提交。\n注意: 请勿发布违规内容。"
                    .to_string(),
            ),
            SubmissionOutcome::TransportError { .. } => {
                Some("❌ 投稿失败，请稍后重试！".to_string())
            }
            SubmissionOutcome::AggregationTimeout => {
                Some("❌ 媒体组投稿超时，未收到完整内容，请重新发送".to_string())
            }
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, SubmissionOutcome::Forwarded { .. })
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            SubmissionOutcome::Forwarded { .. } | SubmissionOutcome::Pending
        )
    }
}

/// The submission pipeline: limiter → aggregator → validator → screen →
/// routing → dispatch.
///
/// State maps are owned here (injected config, no ambient globals) so tests
/// and multi-instance deployments can each run their own pipeline.
pub struct Pipeline<S: ChannelSink> {
    limiter: RateLimiter,
    aggregator: MediaAggregator,
    words: WordList,
    routing: RoutingConfig,
    sink: S,
}

impl<S: ChannelSink> Pipeline<S> {
    /// Build a pipeline from a validated configuration and a sink.
    pub fn new(config: &ModpipeConfig, sink: S) -> Self {
        Self {
            limiter: RateLimiter::new(config.limiter.to_limiter_config()),
            aggregator: MediaAggregator::new(config.aggregate.to_aggregate_config()),
            words: config.screen.word_list(),
            routing: config.routing.clone(),
            sink,
        }
    }

    /// Process one inbound message end-to-end.
    pub async fn process(&self, submission: Submission) -> SubmissionOutcome {
        let span = tracing::span!(
            Level::INFO,
            "pipeline.process",
            user_id = submission.user_id
        );
        let _guard = span.enter();
        let user_id = submission.user_id;

        let decision = self.limiter.check(user_id);
        if !decision.is_allowed() {
            warn!(user_id, ?decision, "submission_rate_limited");
            return SubmissionOutcome::RateLimited { decision };
        }
        // Every rate-accepted message counts, including individual media
        // parts, before validation runs.
        self.limiter.record(user_id);

        match self.aggregator.ingest(submission) {
            AggregationOutcome::Pending => SubmissionOutcome::Pending,
            AggregationOutcome::Ready(ready) => self.dispatch(ready).await,
        }
    }

    /// Validate, screen, route, and forward an assembled submission.
    async fn dispatch(&self, ready: ReadySubmission) -> SubmissionOutcome {
        let user_id = ready.user_id;
        let text = ready.text.as_deref().unwrap_or("");

        let result = template::validate(text);
        if !result.is_valid {
            warn!(
                user_id,
                missing = result.missing_fields.len(),
                empty = result.empty_fields.len(),
                "submission_validation_failed"
            );
            return SubmissionOutcome::ValidationFailed { result };
        }

        let words: Vec<String> = self
            .words
            .find_forbidden(text)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !words.is_empty() {
            warn!(user_id, words = ?words, "submission_forbidden_content");
            return SubmissionOutcome::ForbiddenContent { words };
        }

        // One classification drives both grammar choice (inside `validate`)
        // and routing, so the two can never disagree.
        let kind = template::classify(text);
        let channel = match kind {
            SubmissionKind::Report => self.routing.report_channel.as_str(),
            SubmissionKind::Recommendation => self.routing.recommend_channel.as_str(),
        };

        let sent = if ready.attachments.is_empty() {
            self.sink.send_text(channel, text).await
        } else {
            self.sink
                .send_media_group(channel, text, &ready.attachments)
                .await
        };

        match sent {
            Ok(()) => {
                info!(
                    user_id,
                    channel,
                    kind = ?kind,
                    attachments = ready.attachments.len(),
                    "submission_forwarded"
                );
                SubmissionOutcome::Forwarded {
                    kind,
                    channel: channel.to_string(),
                }
            }
            Err(err) => {
                warn!(user_id, error = %err, "submission_transport_error");
                SubmissionOutcome::TransportError {
                    message: err.message,
                }
            }
        }
    }

    /// Flush media groups whose timeout elapsed.
    ///
    /// Returns one `(user_id, AggregationTimeout)` pair per flushed group so
    /// the caller can notify each user instead of silently discarding their
    /// partial submission.
    pub fn flush_expired(&self) -> Vec<(i64, SubmissionOutcome)> {
        self.flush_expired_at(Instant::now())
    }

    /// Deterministic-time variant of [`flush_expired`](Self::flush_expired).
    pub fn flush_expired_at(&self, now: Instant) -> Vec<(i64, SubmissionOutcome)> {
        self.aggregator
            .sweep_expired(now)
            .into_iter()
            .map(|expired| (expired.user_id, SubmissionOutcome::AggregationTimeout))
            .collect()
    }

    /// Number of media groups currently buffered.
    pub fn pending_groups(&self) -> usize {
        self.aggregator.pending_groups()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

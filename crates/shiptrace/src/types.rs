//! Core data types for capture attempts, outcomes, and tracking summaries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Marker used for any location or text field the payload did not supply.
pub const UNKNOWN: &str = "Unknown";

/// Identifies one capture technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    /// Read the buffer filled by the in-page fetch/XHR hook.
    PageBuffer,
    /// Replay the protocol-level network event log and fetch the body by request id.
    ProtocolLog,
    /// Re-issue the request in the page with a cache-preferring directive.
    CacheReplay,
}

impl StrategyId {
    pub const ALL: [StrategyId; 3] = [
        StrategyId::PageBuffer,
        StrategyId::ProtocolLog,
        StrategyId::CacheReplay,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageBuffer => "page_buffer",
            Self::ProtocolLog => "protocol_log",
            Self::CacheReplay => "cache_replay",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "page_buffer" | "buffer" => Ok(Self::PageBuffer),
            "protocol_log" | "protocol" | "cdp" => Ok(Self::ProtocolLog),
            "cache_replay" | "replay" => Ok(Self::CacheReplay),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Parameters of one tracking attempt. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Matched against observed request/response URLs.
    pub target_url_substring: String,
    /// Wall-clock budget for the whole attempt.
    pub max_wait: Duration,
    /// Sleep between polling rounds.
    pub poll_interval: Duration,
    /// Upper bound for a single strategy call, always clipped to what is
    /// left of `max_wait`. Zero leaves `max_wait` as the only bound.
    pub attempt_timeout: Duration,
    /// Strategies in priority order.
    pub strategy_order: Vec<StrategyId>,
    /// Explicit URL for the cache replay; otherwise the last observed match is used.
    pub replay_url: Option<String>,
}

impl CaptureRequest {
    pub fn new(target_url_substring: impl Into<String>) -> Self {
        Self {
            target_url_substring: target_url_substring.into(),
            max_wait: Duration::from_secs(20),
            poll_interval: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(3),
            strategy_order: vec![StrategyId::PageBuffer, StrategyId::ProtocolLog],
            replay_url: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_strategies(mut self, order: Vec<StrategyId>) -> Self {
        self.strategy_order = order;
        self
    }

    pub fn with_replay_url(mut self, url: impl Into<String>) -> Self {
        self.replay_url = Some(url.into());
        self
    }

    /// Whether `url` is the response this request is looking for.
    pub fn matches(&self, url: &str) -> bool {
        !self.target_url_substring.is_empty() && url.contains(&self.target_url_substring)
    }
}

/// One request/response pair observed by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedExchange {
    pub url: String,
    /// Unknown when the observer only saw the body.
    pub http_status: Option<u16>,
    /// Absent when the observer only saw the URL.
    pub body_text: Option<String>,
    pub observed_at_ms: i64,
}

/// Expected, named non-success conditions reported by the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftFailureReason {
    RateLimited,
    QuotaExceeded,
}

impl fmt::Display for SoftFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate_limited"),
            Self::QuotaExceeded => f.write_str("quota_exceeded"),
        }
    }
}

/// Why an attempt ended without a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The deadline passed while strategies kept reporting nothing.
    Timeout,
    /// Every strategy invocation in every round errored.
    StrategyExhausted,
    /// An external cancellation signal ended the attempt.
    Cancelled,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::StrategyExhausted => f.write_str("strategy_exhausted"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Result of one capture attempt or one strategy invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Captured {
        source: StrategyId,
        payload: Value,
        size_bytes: usize,
        captured_at_ms: i64,
    },
    SoftFailure {
        reason: SoftFailureReason,
        raw: Value,
    },
    NotFound {
        reason: NotFoundReason,
    },
    StrategyError {
        source: StrategyId,
        detail: String,
    },
}

impl CaptureOutcome {
    /// `Captured` and `SoftFailure` end an attempt; the others do not carry a payload.
    pub fn is_conclusive(&self) -> bool {
        matches!(self, Self::Captured { .. } | Self::SoftFailure { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Captured { .. } => "captured",
            Self::SoftFailure { .. } => "soft_failure",
            Self::NotFound { .. } => "not_found",
            Self::StrategyError { .. } => "strategy_error",
        }
    }
}

/// Which timestamp field a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Actual,
    Estimated,
    Unknown,
}

/// A departure or arrival time with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTimestamp {
    pub value: Option<String>,
    pub source: TimestampSource,
}

impl ResolvedTimestamp {
    pub fn unknown() -> Self {
        Self {
            value: None,
            source: TimestampSource::Unknown,
        }
    }

    pub fn actual(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            source: TimestampSource::Actual,
        }
    }

    pub fn estimated(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            source: TimestampSource::Estimated,
        }
    }
}

/// The most recent event of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemEvent {
    pub description: String,
    pub date: Option<String>,
    pub location: String,
    pub actual: bool,
}

/// A container on the shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub number: String,
    pub size_type: String,
    pub status: String,
    pub event_count: usize,
    /// `None` when the container has no events yet.
    pub latest_event: Option<LineItemEvent>,
}

/// A vessel carrying the shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub name: String,
    pub imo: Option<u64>,
    pub flag: Option<String>,
    #[serde(default)]
    pub voyage: Option<String>,
    /// Port where this vessel loaded the shipment.
    #[serde(default)]
    pub loading_port: Option<String>,
    #[serde(default)]
    pub discharge_port: Option<String>,
}

/// Flat, strategy-independent view of a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub subject_id: String,
    pub status: String,
    pub carrier_name: String,
    pub origin_location: String,
    pub destination_location: String,
    pub departure: ResolvedTimestamp,
    pub arrival: ResolvedTimestamp,
    pub line_items: Vec<LineItem>,
    pub vehicles: Vec<Vehicle>,
    pub last_updated: String,
}

/// Errors raised by a browser session primitive.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("primitive not supported by this session: {0}")]
    Unsupported(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("protocol call failed: {0}")]
    Protocol(String),

    #[error("session closed")]
    Closed,
}

/// A strategy failed to perform its check. Recoverable by trying the next strategy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{strategy} failed: {detail}")]
pub struct StrategyError {
    pub strategy: StrategyId,
    pub detail: String,
}

impl StrategyError {
    pub fn new(strategy: StrategyId, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            detail: detail.into(),
        }
    }

    pub fn from_session(strategy: StrategyId, err: SessionError) -> Self {
        Self::new(strategy, err.to_string())
    }
}

/// Invalid configuration values.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown capture strategy: {0}")]
    UnknownStrategy(String),

    #[error("no capture strategy enabled")]
    NoStrategies,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_id_parse() {
        assert_eq!("page_buffer".parse::<StrategyId>().unwrap(), StrategyId::PageBuffer);
        assert_eq!("Protocol-Log".parse::<StrategyId>().unwrap(), StrategyId::ProtocolLog);
        assert_eq!("replay".parse::<StrategyId>().unwrap(), StrategyId::CacheReplay);
        assert_eq!(
            "dom".parse::<StrategyId>(),
            Err(ConfigError::UnknownStrategy("dom".to_string()))
        );
    }

    #[test]
    fn test_request_matches() {
        let req = CaptureRequest::new("tracking-system/reverse/tracking");
        assert!(req.matches("https://x.test/api/tracking-system/reverse/tracking?number=1"));
        assert!(!req.matches("https://x.test/api/other"));
        assert!(!CaptureRequest::new("").matches("anything"));
    }

    #[test]
    fn test_outcome_serialization_tag() {
        let outcome = CaptureOutcome::NotFound {
            reason: NotFoundReason::StrategyExhausted,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["reason"], "strategy_exhausted");
        assert!(!outcome.is_conclusive());
    }

    #[test]
    fn test_strategy_error_display() {
        let err = StrategyError::from_session(StrategyId::ProtocolLog, SessionError::Closed);
        assert_eq!(err.to_string(), "protocol_log failed: session closed");
    }
}

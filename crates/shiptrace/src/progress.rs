//! Progress events and broadcast channel for capture telemetry.
//!
//! The coordinator emits [`CaptureEvent`]s while it polls. They flow through
//! a `tokio::sync::broadcast` channel to any subscriber (CLI progress lines,
//! log sinks). When no subscriber exists, events are silently dropped.

use crate::types::{NotFoundReason, SoftFailureReason, StrategyId};
use serde::{Deserialize, Serialize};

/// A progress event emitted during a capture attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureEvent {
    /// Subject (tracking number) the attempt belongs to.
    pub subject: String,
    /// Monotonically increasing sequence number within the attempt.
    pub seq: u64,
    pub event: CaptureEventKind,
}

/// The specific kind of progress event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CaptureEventKind {
    /// Polling started with the given strategy order.
    AttemptStarted {
        strategies: Vec<StrategyId>,
        max_wait_ms: u64,
    },
    /// A strategy raised; the round continues with the next one.
    StrategyFailed { strategy: StrategyId, detail: String },
    /// A full round produced nothing conclusive.
    RoundCompleted { round: u32, elapsed_ms: u64 },
    /// A strategy obtained the target payload.
    Captured {
        strategy: StrategyId,
        size_bytes: usize,
        round: u32,
    },
    /// The upstream reported a quota or rate limit.
    SoftFailure { reason: SoftFailureReason },
    /// The attempt ended without a payload.
    Exhausted { reason: NotFoundReason, rounds: u32 },
}

pub type ProgressSender = tokio::sync::broadcast::Sender<CaptureEvent>;

pub type ProgressReceiver = tokio::sync::broadcast::Receiver<CaptureEvent>;

/// Create a new progress broadcast channel with a bounded buffer.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    tokio::sync::broadcast::channel(128)
}

/// Emit a progress event, ignoring send errors (no receivers listening).
pub fn emit(tx: &Option<ProgressSender>, subject: &str, seq: &mut u64, event: CaptureEventKind) {
    if let Some(ref sender) = tx {
        *seq += 1;
        let _ = sender.send(CaptureEvent {
            subject: subject.to_string(),
            seq: *seq,
            event,
        });
    }
}

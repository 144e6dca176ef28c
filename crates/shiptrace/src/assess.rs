//! Turn a terminal capture outcome into a typed assessment.
//!
//! Nothing here is an error: soft failures, malformed payloads and missing
//! captures all come back as [`Assessment`] variants so a batch can keep
//! going and degrade to the DOM summary.

use crate::normalize::normalize;
use crate::types::{CaptureOutcome, NotFoundReason, SoftFailureReason, StrategyId, TrackingSummary};
use crate::validate::{validate, Decision};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Validated and normalized result of one capture attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assessment {
    Tracked {
        summary: TrackingSummary,
        source: StrategyId,
        raw: Value,
    },
    SoftFailure {
        reason: SoftFailureReason,
        raw: Value,
    },
    Malformed {
        source: StrategyId,
        missing_fields: Vec<String>,
        detail: String,
        raw: Value,
    },
    NotFound {
        reason: NotFoundReason,
    },
}

impl Assessment {
    pub fn summary(&self) -> Option<&TrackingSummary> {
        match self {
            Self::Tracked { summary, .. } => Some(summary),
            _ => None,
        }
    }

    /// Raw payload, when one was observed.
    pub fn raw(&self) -> Option<&Value> {
        match self {
            Self::Tracked { raw, .. } | Self::SoftFailure { raw, .. } | Self::Malformed { raw, .. } => {
                Some(raw)
            }
            Self::NotFound { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tracked { .. } => "tracked",
            Self::SoftFailure { .. } => "soft_failure",
            Self::Malformed { .. } => "malformed",
            Self::NotFound { .. } => "not_found",
        }
    }
}

/// Validate then normalize a terminal outcome.
///
/// A `StrategyError` outcome should never reach this point; it is treated
/// as an exhausted attempt.
pub fn assess(outcome: CaptureOutcome) -> Assessment {
    match outcome {
        CaptureOutcome::Captured { source, payload, .. } => match validate(&payload) {
            Decision::Valid => Assessment::Tracked {
                summary: normalize(&payload),
                source,
                raw: payload,
            },
            Decision::SoftFailureSignal { reason } => Assessment::SoftFailure { reason, raw: payload },
            Decision::Malformed {
                missing_fields,
                detail,
            } => {
                tracing::warn!(%source, ?missing_fields, "captured payload is malformed: {detail}");
                Assessment::Malformed {
                    source,
                    missing_fields,
                    detail,
                    raw: payload,
                }
            }
        },
        CaptureOutcome::SoftFailure { reason, raw } => Assessment::SoftFailure { reason, raw },
        CaptureOutcome::NotFound { reason } => Assessment::NotFound { reason },
        CaptureOutcome::StrategyError { source, detail } => {
            tracing::warn!(%source, "strategy error reached assessment: {detail}");
            Assessment::NotFound {
                reason: NotFoundReason::StrategyExhausted,
            }
        }
    }
}

/// Where the summary of a subject came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Captured,
    Dom,
    None,
}

/// Pick the captured summary when there is one, else the DOM one.
///
/// The two are never blended: a partial DOM summary does not fill gaps in
/// a captured one.
pub fn prefer_captured(
    assessment: &Assessment,
    dom: Option<TrackingSummary>,
) -> (Option<TrackingSummary>, SummarySource) {
    if let Some(summary) = assessment.summary() {
        return (Some(summary.clone()), SummarySource::Captured);
    }
    match dom {
        Some(summary) => (Some(summary), SummarySource::Dom),
        None => (None, SummarySource::None),
    }
}

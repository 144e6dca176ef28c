//! Payload validation.
//!
//! Separates three conditions that must never share a bucket: a usable
//! payload, an expected quota/rate-limit signal from the upstream service,
//! and a payload whose shape no longer matches what the normalizer reads.

use crate::types::SoftFailureReason;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level `status` value of a successful response.
pub const SUCCESS_STATUS: &str = "success";

/// Field carrying the soft-failure sentinel.
pub const SOFT_FAILURE_FIELD: &str = "message";

/// Subsections `data` must contain.
pub const REQUIRED_SECTIONS: [&str; 5] = ["metadata", "route", "vessels", "containers", "locations"];

const RATE_LIMIT_SENTINELS: &[&str] = &[
    "API_KEY_LIMIT_REACHED",
    "LIMIT_REACHED",
    "RATE_LIMIT_EXCEEDED",
    "TOO_MANY_REQUESTS",
];

const QUOTA_SENTINELS: &[&str] = &["QUOTA_EXCEEDED", "DAILY_LIMIT_REACHED", "DAILY_QUOTA_EXCEEDED"];

/// Verdict on a captured payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Valid,
    SoftFailureSignal { reason: SoftFailureReason },
    Malformed {
        /// Keys whose absence made the payload unusable.
        missing_fields: Vec<String>,
        detail: String,
    },
}

impl Decision {
    fn malformed(missing_fields: Vec<String>, detail: impl Into<String>) -> Self {
        Self::Malformed {
            missing_fields,
            detail: detail.into(),
        }
    }
}

/// Recognize the upstream soft-failure marker, if present.
pub fn soft_failure_signal(payload: &Value) -> Option<SoftFailureReason> {
    let marker = payload.get(SOFT_FAILURE_FIELD)?.as_str()?.trim();
    let marker = marker.to_ascii_uppercase();
    if RATE_LIMIT_SENTINELS.contains(&marker.as_str()) {
        Some(SoftFailureReason::RateLimited)
    } else if QUOTA_SENTINELS.contains(&marker.as_str()) {
        Some(SoftFailureReason::QuotaExceeded)
    } else {
        None
    }
}

/// Check a payload against the expected tracking response schema.
pub fn validate(payload: &Value) -> Decision {
    let Some(root) = payload.as_object() else {
        return Decision::malformed(vec!["<root>".to_string()], "payload is not a JSON object");
    };

    if let Some(reason) = soft_failure_signal(payload) {
        return Decision::SoftFailureSignal { reason };
    }

    match root.get("status").and_then(Value::as_str) {
        Some(SUCCESS_STATUS) => {}
        Some(other) => {
            return Decision::malformed(Vec::new(), format!("status is {other:?}, expected {SUCCESS_STATUS:?}"));
        }
        None => return Decision::malformed(vec!["status".to_string()], "status field missing"),
    }

    let Some(data) = root.get("data").and_then(Value::as_object) else {
        return Decision::malformed(vec!["data".to_string()], "data section missing or not an object");
    };

    let missing: Vec<String> = REQUIRED_SECTIONS
        .iter()
        .filter(|key| data.get(**key).map_or(true, Value::is_null))
        .map(|key| format!("data.{key}"))
        .collect();

    if missing.is_empty() {
        Decision::Valid
    } else {
        let detail = format!("missing required sections: {}", missing.join(", "));
        Decision::malformed(missing, detail)
    }
}

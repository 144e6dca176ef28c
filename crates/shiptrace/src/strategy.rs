//! Capture strategies.
//!
//! Each strategy is a single non-blocking check against the session:
//! `Ok(None)` means nothing observed yet, `Ok(Some(_))` is a conclusive
//! outcome, and `Err(_)` means the technique itself failed. Strategies never
//! loop or sleep; retry and backoff belong to the coordinator.

use crate::installer::{js_string, read_buffer_expression, Instrumentation};
use crate::session::{CaptureSession, ProtocolResponse};
use crate::types::{
    now_ms, CaptureOutcome, CaptureRequest, ObservedExchange, SoftFailureReason, StrategyError,
    StrategyId,
};
use crate::validate::soft_failure_signal;
use serde::Deserialize;
use serde_json::Value;

/// Everything a strategy may look at during one attempt.
#[derive(Clone, Copy)]
pub struct CaptureContext<'a> {
    pub session: &'a dyn CaptureSession,
    pub request: &'a CaptureRequest,
    pub instrumentation: &'a Instrumentation,
}

/// Run one strategy once.
pub async fn attempt(
    id: StrategyId,
    ctx: CaptureContext<'_>,
) -> Result<Option<CaptureOutcome>, StrategyError> {
    let exchange = match id {
        StrategyId::PageBuffer => read_page_buffer(ctx).await?,
        StrategyId::ProtocolLog => replay_protocol_log(ctx).await?,
        StrategyId::CacheReplay => replay_from_cache(ctx).await?,
    };
    exchange.map(|ex| classify(id, ex)).transpose()
}

/// Turn a found exchange into `Captured` or `SoftFailure`.
pub fn classify(source: StrategyId, exchange: ObservedExchange) -> Result<CaptureOutcome, StrategyError> {
    let body = exchange
        .body_text
        .ok_or_else(|| StrategyError::new(source, format!("no body for {}", exchange.url)))?;

    let parsed = serde_json::from_str::<Value>(&body);

    if exchange.http_status == Some(429) {
        let raw = parsed.unwrap_or(Value::String(body));
        return Ok(CaptureOutcome::SoftFailure {
            reason: SoftFailureReason::RateLimited,
            raw,
        });
    }

    let payload = parsed.map_err(|e| StrategyError::new(source, format!("response body is not JSON: {e}")))?;

    if let Some(reason) = soft_failure_signal(&payload) {
        return Ok(CaptureOutcome::SoftFailure { reason, raw: payload });
    }

    if let Some(status) = exchange.http_status.filter(|s| *s >= 400) {
        return Err(StrategyError::new(source, format!("upstream returned HTTP {status}")));
    }

    Ok(CaptureOutcome::Captured {
        source,
        payload,
        size_bytes: body.len(),
        captured_at_ms: now_ms(),
    })
}

/// Entry written by the in-page hook.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageEntry {
    url: String,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    observed_at: Option<i64>,
}

impl From<PageEntry> for ObservedExchange {
    fn from(entry: PageEntry) -> Self {
        ObservedExchange {
            url: entry.url,
            http_status: entry.status.filter(|s| *s != 0),
            body_text: entry.body,
            observed_at_ms: entry.observed_at.unwrap_or_else(now_ms),
        }
    }
}

fn string_result(source: StrategyId, value: Value) -> Result<Option<String>, StrategyError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        other => Err(StrategyError::new(
            source,
            format!("unexpected evaluation result: {other}"),
        )),
    }
}

async fn read_page_buffer(ctx: CaptureContext<'_>) -> Result<Option<ObservedExchange>, StrategyError> {
    let source = StrategyId::PageBuffer;
    if let Some(e) = ctx.instrumentation.page_hook_error() {
        return Err(StrategyError::new(source, format!("page hook not armed: {e}")));
    }

    let value = ctx
        .session
        .evaluate(&read_buffer_expression(ctx.instrumentation.buffer_key()))
        .await
        .map_err(|e| StrategyError::from_session(source, e))?;

    let Some(raw) = string_result(source, value)? else {
        return Ok(None);
    };
    let entries: Vec<PageEntry> = serde_json::from_str(&raw)
        .map_err(|e| StrategyError::new(source, format!("corrupt page buffer: {e}")))?;

    // Most recent exchange whose body the hook managed to read.
    Ok(entries
        .into_iter()
        .rev()
        .find(|entry| entry.body.is_some() && ctx.request.matches(&entry.url))
        .map(ObservedExchange::from))
}

/// Latest matching log entry, preferring successful responses.
fn pick_logged<'r>(request: &CaptureRequest, log: &'r [ProtocolResponse]) -> Option<&'r ProtocolResponse> {
    let matching = move || log.iter().rev().filter(move |r| request.matches(&r.url));
    matching()
        .find(|r| (200..300).contains(&r.status))
        .or_else(|| matching().next())
}

async fn replay_protocol_log(ctx: CaptureContext<'_>) -> Result<Option<ObservedExchange>, StrategyError> {
    let source = StrategyId::ProtocolLog;
    if let Some(e) = ctx.instrumentation.network_log_error() {
        return Err(StrategyError::new(source, format!("network log not armed: {e}")));
    }

    let log = ctx
        .session
        .network_responses()
        .await
        .map_err(|e| StrategyError::from_session(source, e))?;

    let Some(entry) = pick_logged(ctx.request, &log) else {
        return Ok(None);
    };

    let body = ctx
        .session
        .response_body(&entry.request_id)
        .await
        .map_err(|e| StrategyError::new(source, format!("body of {} unavailable: {e}", entry.request_id)))?;

    Ok(Some(ObservedExchange {
        url: entry.url.clone(),
        http_status: Some(entry.status),
        body_text: Some(body),
        observed_at_ms: entry.observed_at_ms,
    }))
}

const REPLAY_COLLECT_TEMPLATE: &str = r#"
(() => {
    const slot = window['__shiptrace_replay_' + __KEY__];
    return slot ? JSON.stringify(slot) : null;
})()
"#;

const REPLAY_LAUNCH_TEMPLATE: &str = r#"
(() => {
    const name = '__shiptrace_replay_' + __KEY__;
    if (window[name]) return window[name].state;
    window[name] = { state: 'pending' };
    const s = window.__shiptrace || {};
    const doFetch = s.nativeFetch || window.fetch.bind(window);
    doFetch(__URL__, { cache: 'force-cache', credentials: 'include' })
        .then((r) => r.text().then((body) => {
            window[name] = { state: 'done', result: { url: r.url, status: r.status, body: body, observedAt: Date.now() } };
        }))
        .catch((e) => { window[name] = { state: 'failed', error: String(e) }; });
    return 'launched';
})()
"#;

#[derive(Debug, Deserialize)]
struct ReplaySlot {
    state: String,
    #[serde(default)]
    result: Option<PageEntry>,
    #[serde(default)]
    error: Option<String>,
}

/// Re-issue the target request with `cache: "force-cache"`.
///
/// Last resort. Depending on the deployment's cache headers this can
/// re-trigger a live upstream request and consume a rate-limited quota
/// slot, which is why it only runs when explicitly enabled. The call is
/// split across rounds: the first launches the fetch in the page, later
/// rounds collect its result.
async fn replay_from_cache(ctx: CaptureContext<'_>) -> Result<Option<ObservedExchange>, StrategyError> {
    let source = StrategyId::CacheReplay;
    let key = js_string(ctx.instrumentation.buffer_key());

    let collected = ctx
        .session
        .evaluate(&REPLAY_COLLECT_TEMPLATE.replace("__KEY__", &key))
        .await
        .map_err(|e| StrategyError::from_session(source, e))?;

    if let Some(raw) = string_result(source, collected)? {
        let slot: ReplaySlot = serde_json::from_str(&raw)
            .map_err(|e| StrategyError::new(source, format!("corrupt replay slot: {e}")))?;
        return match slot.state.as_str() {
            "done" => Ok(slot.result.map(ObservedExchange::from)),
            "failed" => Err(StrategyError::new(
                source,
                slot.error.unwrap_or_else(|| "replay failed".to_string()),
            )),
            _ => Ok(None),
        };
    }

    let url = match ctx.request.replay_url.clone() {
        Some(url) => url,
        None => {
            // Without a URL observed yet, the real request has not fired.
            let log = ctx
                .session
                .network_responses()
                .await
                .map_err(|e| StrategyError::new(source, format!("network log unavailable: {e}")))?;
            match pick_logged(ctx.request, &log) {
                Some(entry) => entry.url.clone(),
                None => return Ok(None),
            }
        }
    };

    tracing::warn!("launching cache-backed replay of {url}; this may consume upstream quota");
    let launch = REPLAY_LAUNCH_TEMPLATE
        .replace("__KEY__", &key)
        .replace("__URL__", &js_string(&url));
    ctx.session
        .evaluate(&launch)
        .await
        .map_err(|e| StrategyError::from_session(source, e))?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exchange(status: Option<u16>, body: &str) -> ObservedExchange {
        ObservedExchange {
            url: "https://x.test/tracking-system/reverse/tracking?number=1".to_string(),
            http_status: status,
            body_text: Some(body.to_string()),
            observed_at_ms: 0,
        }
    }

    #[test]
    fn test_classify_captured() {
        let body = r#"{"status":"success","data":{}}"#;
        match classify(StrategyId::PageBuffer, exchange(Some(200), body)).unwrap() {
            CaptureOutcome::Captured {
                source,
                payload,
                size_bytes,
                ..
            } => {
                assert_eq!(source, StrategyId::PageBuffer);
                assert_eq!(payload["status"], "success");
                assert_eq!(size_bytes, body.len());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_http_429_is_soft_failure() {
        let outcome = classify(StrategyId::ProtocolLog, exchange(Some(429), "Too Many Requests")).unwrap();
        assert_eq!(
            outcome,
            CaptureOutcome::SoftFailure {
                reason: SoftFailureReason::RateLimited,
                raw: json!("Too Many Requests"),
            }
        );
    }

    #[test]
    fn test_classify_sentinel_is_soft_failure() {
        let body = r#"{"status":"error","message":"API_KEY_LIMIT_REACHED"}"#;
        let outcome = classify(StrategyId::PageBuffer, exchange(Some(200), body)).unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::SoftFailure {
                reason: SoftFailureReason::RateLimited,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_errors() {
        let err = classify(StrategyId::PageBuffer, exchange(None, "<html>")).unwrap_err();
        assert!(err.detail.contains("not JSON"));

        let err = classify(StrategyId::ProtocolLog, exchange(Some(502), "{}")).unwrap_err();
        assert!(err.detail.contains("502"));

        let mut no_body = exchange(Some(200), "");
        no_body.body_text = None;
        assert!(classify(StrategyId::PageBuffer, no_body).is_err());
    }

    #[test]
    fn test_pick_logged_prefers_success() {
        let request = CaptureRequest::new("reverse/tracking");
        let log = vec![
            ProtocolResponse {
                request_id: "1".into(),
                url: "https://x.test/reverse/tracking".into(),
                status: 200,
                observed_at_ms: 1,
            },
            ProtocolResponse {
                request_id: "2".into(),
                url: "https://x.test/reverse/tracking".into(),
                status: 503,
                observed_at_ms: 2,
            },
            ProtocolResponse {
                request_id: "3".into(),
                url: "https://x.test/static.js".into(),
                status: 200,
                observed_at_ms: 3,
            },
        ];
        assert_eq!(pick_logged(&request, &log).unwrap().request_id, "1");
        assert_eq!(pick_logged(&request, &log[1..]).unwrap().request_id, "2");
        assert!(pick_logged(&request, &log[2..]).is_none());
    }
}

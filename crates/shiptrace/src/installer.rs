//! Instrumentation installer.
//!
//! Arms the interception hooks before navigation so the target response
//! cannot slip past in a race with page load. Two channels are armed:
//!
//! - a document-start script wrapping the page's `fetch` and
//!   `XMLHttpRequest`, which records matching exchanges into a buffer keyed
//!   by a fresh per-attempt key (mirrored into `sessionStorage`);
//! - the protocol-level network event log of the session.
//!
//! A channel that cannot be armed is remembered on the returned
//! [`Instrumentation`]; only the strategies that depend on it fail.

use crate::session::CaptureSession;
use crate::types::{CaptureRequest, SessionError};

/// Name of the page global holding the hook state.
pub const PAGE_STATE_GLOBAL: &str = "__shiptrace";

/// Prefix of the `sessionStorage` mirror of a buffer.
pub const STORAGE_PREFIX: &str = "__shiptrace_";

const HOOK_TEMPLATE: &str = r#"
(() => {
    const key = __KEY__;
    const target = __TARGET__;
    const s = window.__shiptrace || (window.__shiptrace = { key: null, target: null, exchanges: [], hooked: false });
    if (s.key !== key) {
        s.key = key;
        s.exchanges = [];
    }
    s.target = target;
    if (s.hooked) return true;
    s.hooked = true;

    const record = (url, status, body) => {
        try {
            if (!url || !String(url).includes(s.target)) return;
            s.exchanges.push({ url: String(url), status: status || null, body: body == null ? null : body, observedAt: Date.now() });
            try { sessionStorage.setItem('__shiptrace_' + s.key, JSON.stringify(s.exchanges)); } catch (e) {}
        } catch (e) {}
    };

    const nativeFetch = window.fetch;
    if (typeof nativeFetch === 'function') {
        s.nativeFetch = nativeFetch.bind(window);
        window.fetch = function () {
            return nativeFetch.apply(this, arguments).then((response) => {
                try {
                    if (response && String(response.url).includes(s.target)) {
                        response.clone().text()
                            .then((text) => record(response.url, response.status, text))
                            .catch(() => record(response.url, response.status, null));
                    }
                } catch (e) {}
                return response;
            });
        };
    }

    const XHR = window.XMLHttpRequest;
    if (XHR && XHR.prototype) {
        const open = XHR.prototype.open;
        const send = XHR.prototype.send;
        XHR.prototype.open = function (method, url) {
            this.__shiptraceUrl = url;
            return open.apply(this, arguments);
        };
        XHR.prototype.send = function () {
            const xhr = this;
            xhr.addEventListener('load', function () {
                const url = xhr.responseURL || xhr.__shiptraceUrl;
                let body = null;
                try {
                    body = (xhr.responseType === '' || xhr.responseType === 'text')
                        ? xhr.responseText
                        : JSON.stringify(xhr.response);
                } catch (e) {}
                record(url, xhr.status, body);
            });
            return send.apply(this, arguments);
        };
    }
    return true;
})()
"#;

const READ_TEMPLATE: &str = r#"
(() => {
    const key = __KEY__;
    const s = window.__shiptrace;
    if (s && s.key === key && s.exchanges && s.exchanges.length) return JSON.stringify(s.exchanges);
    try {
        const stored = sessionStorage.getItem('__shiptrace_' + key);
        if (stored) return stored;
    } catch (e) {}
    return null;
})()
"#;

const DISARM_TEMPLATE: &str = r#"
(() => {
    const key = __KEY__;
    const s = window.__shiptrace;
    if (s && s.key === key) s.exchanges = [];
    try { delete window['__shiptrace_replay_' + key]; } catch (e) {}
    try { sessionStorage.removeItem('__shiptrace_' + key); } catch (e) {}
    return true;
})()
"#;

/// Encode a value as a JS string literal.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Script installed at document start for the given key and target.
pub fn hook_script(buffer_key: &str, target_url_substring: &str) -> String {
    HOOK_TEMPLATE
        .replace("__KEY__", &js_string(buffer_key))
        .replace("__TARGET__", &js_string(target_url_substring))
}

/// Expression returning the buffered exchanges as a JSON string, or `null`.
pub fn read_buffer_expression(buffer_key: &str) -> String {
    READ_TEMPLATE.replace("__KEY__", &js_string(buffer_key))
}

fn disarm_expression(buffer_key: &str) -> String {
    DISARM_TEMPLATE.replace("__KEY__", &js_string(buffer_key))
}

/// Handle on the hooks armed for one capture attempt.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    buffer_key: String,
    page_hook: Result<(), SessionError>,
    network_log: Result<(), SessionError>,
}

impl Instrumentation {
    /// Key of this attempt's in-page buffer.
    pub fn buffer_key(&self) -> &str {
        &self.buffer_key
    }

    /// Why the page hook could not be armed, if it could not.
    pub fn page_hook_error(&self) -> Option<&SessionError> {
        self.page_hook.as_ref().err()
    }

    /// Why the protocol log could not be armed, if it could not.
    pub fn network_log_error(&self) -> Option<&SessionError> {
        self.network_log.as_ref().err()
    }

    /// Discard the buffered state of this attempt.
    ///
    /// Best-effort: the page may already be gone.
    pub async fn disarm(self, session: &dyn CaptureSession) {
        if self.page_hook.is_ok() {
            if let Err(e) = session.evaluate(&disarm_expression(&self.buffer_key)).await {
                tracing::debug!("disarm of buffer {} skipped: {e}", self.buffer_key);
            }
        }
        if self.network_log.is_ok() {
            if let Err(e) = session.clear_network_log().await {
                tracing::debug!("network log of buffer {} not cleared: {e}", self.buffer_key);
            }
        }
    }
}

/// Arms interception hooks for a capture attempt.
pub struct Installer;

impl Installer {
    /// Arm both channels for `request` on `session`.
    ///
    /// Call before navigation. Each call generates a fresh buffer key, so
    /// nothing buffered by an earlier attempt on the same session is visible
    /// through the returned handle. The page wrapper itself is installed at
    /// most once per document.
    pub async fn install(session: &dyn CaptureSession, request: &CaptureRequest) -> Instrumentation {
        let buffer_key = uuid::Uuid::new_v4().simple().to_string();
        let script = hook_script(&buffer_key, &request.target_url_substring);

        let page_hook = match session.add_init_script(&script).await {
            Ok(()) => {
                // Also arm the current document; navigation may already be underway.
                if let Err(e) = session.evaluate(&script).await {
                    tracing::debug!("hook evaluation in current document failed: {e}");
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("page hook unavailable: {e}");
                Err(e)
            }
        };

        let network_log = match session.enable_network_log().await {
            // Entries from an earlier attempt on this session must not leak in.
            Ok(()) => session.clear_network_log().await,
            Err(e) => {
                tracing::warn!("protocol network log unavailable: {e}");
                Err(e)
            }
        };

        tracing::debug!(
            "instrumentation armed: key={buffer_key} target={} page_hook={} network_log={}",
            request.target_url_substring,
            page_hook.is_ok(),
            network_log.is_ok()
        );

        Instrumentation {
            buffer_key,
            page_hook,
            network_log,
        }
    }
}

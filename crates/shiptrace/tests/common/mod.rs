//! In-memory page session used by the integration tests.
//!
//! `FakePage` recognizes the scripts the installer and strategies send and
//! emulates the page-side hook: exchanges fired with [`FakePage::fire`] land
//! in the buffer of the currently armed key (plus its storage mirror) and in
//! the protocol log. Cache replays stay pending until settled or failed,
//! unless the page was built with a replay answer, in which case the fetch
//! completes before the next collect.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use shiptrace::{CaptureSession, ProtocolResponse, SessionError};
use std::collections::HashMap;
use std::sync::Mutex;

pub const TARGET: &str = "tracking-system/reverse/tracking";

pub fn target_url(number: &str) -> String {
    format!("https://www.searates.com/tracking-system/reverse/tracking?number={number}&sealine=MSCU")
}

#[derive(Default)]
struct PageState {
    init_scripts: usize,
    hooked_key: Option<String>,
    exchanges: Vec<Value>,
    storage: HashMap<String, String>,
    log_enabled: bool,
    log: Vec<ProtocolResponse>,
    bodies: HashMap<String, String>,
    next_request: u64,
    evaluations: usize,
    replays: HashMap<String, Value>,
    replay_launches: Vec<String>,
}

#[derive(Default)]
pub struct FakePage {
    state: Mutex<PageState>,
    deny_init_script: bool,
    deny_network_log: bool,
    network_log_closed: bool,
    expire_bodies: bool,
    replay_answer: Option<(u16, String)>,
}

/// Pull `const key = "...";` out of an installer or strategy script.
fn script_key(script: &str) -> Option<String> {
    let start = script.find("const key = ")? + "const key = ".len();
    let end = start + script[start..].find(';')?;
    serde_json::from_str(&script[start..end]).ok()
}

/// Pull the key out of `'__shiptrace_replay_' + "...";` or `... + "..."]`.
fn replay_key(script: &str) -> Option<String> {
    let marker = "'__shiptrace_replay_' + ";
    let start = script.find(marker)? + marker.len();
    let end = start + script[start..].find([';', ']'])?;
    serde_json::from_str(&script[start..end]).ok()
}

/// Pull the URL out of `doFetch("...", {`.
fn replay_url(script: &str) -> Option<String> {
    let start = script.find("doFetch(\"")? + "doFetch(".len();
    let end = start + script[start..].find(", {")?;
    serde_json::from_str(&script[start..end]).ok()
}

fn replay_done(url: &str, status: u16, body: &str) -> Value {
    json!({
        "state": "done",
        "result": {"url": url, "status": status, "body": body, "observedAt": 1_700_000_000_000i64},
    })
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page that refuses document-start scripts.
    pub fn without_init_script() -> Self {
        Self {
            deny_init_script: true,
            ..Self::default()
        }
    }

    /// A page where neither the hook nor the network log can be armed.
    pub fn without_channels() -> Self {
        Self {
            deny_init_script: true,
            deny_network_log: true,
            ..Self::default()
        }
    }

    /// A page whose protocol connection dropped after arming.
    pub fn with_closed_network_log() -> Self {
        Self {
            network_log_closed: true,
            ..Self::default()
        }
    }

    /// A page whose response bodies are gone by the time they are asked for.
    pub fn with_expiring_bodies() -> Self {
        Self {
            expire_bodies: true,
            ..Self::default()
        }
    }

    /// A page whose cache replays complete with `status` and `body`.
    pub fn with_replay_answer(status: u16, body: &str) -> Self {
        Self {
            replay_answer: Some((status, body.to_string())),
            ..Self::default()
        }
    }

    /// Complete every pending replay with `status` and `body`.
    pub fn settle_replays(&self, status: u16, body: &str) {
        let mut state = self.state.lock().unwrap();
        for slot in state.replays.values_mut() {
            if slot["state"] == "pending" {
                let url = slot["url"].as_str().unwrap_or_default().to_string();
                *slot = replay_done(&url, status, body);
            }
        }
    }

    /// Fail every pending replay with `error`.
    pub fn fail_replays(&self, error: &str) {
        let mut state = self.state.lock().unwrap();
        for slot in state.replays.values_mut() {
            if slot["state"] == "pending" {
                *slot = json!({"state": "failed", "error": error});
            }
        }
    }

    /// URLs the page was asked to re-fetch from cache, in order.
    pub fn replay_launches(&self) -> Vec<String> {
        self.state.lock().unwrap().replay_launches.clone()
    }

    /// Simulate the page issuing the target request and receiving `body`.
    pub fn fire(&self, url: &str, status: u16, body: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = state.hooked_key.clone() {
            if url.contains(TARGET) {
                state.exchanges.push(json!({
                    "url": url,
                    "status": status,
                    "body": body,
                    "observedAt": 1_700_000_000_000i64,
                }));
                let mirrored = Value::Array(state.exchanges.clone()).to_string();
                state.storage.insert(format!("__shiptrace_{key}"), mirrored);
            }
        }
        if state.log_enabled {
            state.next_request += 1;
            let request_id = format!("req-{}", state.next_request);
            state.log.push(ProtocolResponse {
                request_id: request_id.clone(),
                url: url.to_string(),
                status,
                observed_at_ms: 1_700_000_000_000,
            });
            state.bodies.insert(request_id, body.to_string());
        }
    }

    /// Simulate a navigation: in-page globals are lost, storage survives.
    pub fn reload(&self) {
        let mut state = self.state.lock().unwrap();
        state.exchanges.clear();
    }

    pub fn init_scripts(&self) -> usize {
        self.state.lock().unwrap().init_scripts
    }

    pub fn evaluations(&self) -> usize {
        self.state.lock().unwrap().evaluations
    }

    pub fn stored_buffers(&self) -> usize {
        self.state.lock().unwrap().storage.len()
    }
}

#[async_trait]
impl CaptureSession for FakePage {
    async fn add_init_script(&self, _source: &str) -> Result<(), SessionError> {
        if self.deny_init_script {
            return Err(SessionError::Unsupported("addScriptToEvaluateOnNewDocument".into()));
        }
        self.state.lock().unwrap().init_scripts += 1;
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, SessionError> {
        let mut state = self.state.lock().unwrap();
        state.evaluations += 1;

        if expression.contains("force-cache") {
            let (Some(key), Some(url)) = (replay_key(expression), replay_url(expression)) else {
                return Err(SessionError::Evaluation("unreadable replay script".into()));
            };
            if let Some(slot) = state.replays.get(&key) {
                return Ok(slot["state"].clone());
            }
            state.replays.insert(key, json!({"state": "pending", "url": url}));
            state.replay_launches.push(url);
            return Ok(Value::String("launched".into()));
        }

        if expression.contains("JSON.stringify(slot)") {
            let Some(key) = replay_key(expression) else {
                return Ok(Value::Null);
            };
            let Some(slot) = state.replays.get_mut(&key) else {
                return Ok(Value::Null);
            };
            if let Some((status, body)) = self.replay_answer.as_ref().filter(|_| slot["state"] == "pending") {
                let url = slot["url"].as_str().unwrap_or_default().to_string();
                *slot = replay_done(&url, *status, body);
            }
            return Ok(Value::String(slot.to_string()));
        }

        let key = script_key(expression);

        if expression.contains("s.hooked") {
            if self.deny_init_script {
                return Err(SessionError::Evaluation("page is gone".into()));
            }
            if state.hooked_key != key {
                state.hooked_key = key;
                state.exchanges.clear();
            }
            return Ok(Value::Bool(true));
        }

        if expression.contains("sessionStorage.removeItem") {
            if let Some(key) = key {
                if state.hooked_key.as_deref() == Some(key.as_str()) {
                    state.exchanges.clear();
                }
                state.storage.remove(&format!("__shiptrace_{key}"));
                state.replays.remove(&key);
            }
            return Ok(Value::Bool(true));
        }

        if expression.contains("sessionStorage.getItem") {
            let Some(key) = key else {
                return Ok(Value::Null);
            };
            if state.hooked_key.as_deref() == Some(key.as_str()) && !state.exchanges.is_empty() {
                return Ok(Value::String(Value::Array(state.exchanges.clone()).to_string()));
            }
            return Ok(state
                .storage
                .get(&format!("__shiptrace_{key}"))
                .cloned()
                .map(Value::String)
                .unwrap_or(Value::Null));
        }

        Ok(Value::Null)
    }

    async fn enable_network_log(&self) -> Result<(), SessionError> {
        if self.deny_network_log {
            return Err(SessionError::Protocol("Network.enable refused".into()));
        }
        self.state.lock().unwrap().log_enabled = true;
        Ok(())
    }

    async fn network_responses(&self) -> Result<Vec<ProtocolResponse>, SessionError> {
        if self.network_log_closed {
            return Err(SessionError::Closed);
        }
        Ok(self.state.lock().unwrap().log.clone())
    }

    async fn response_body(&self, request_id: &str) -> Result<String, SessionError> {
        if self.expire_bodies {
            return Err(SessionError::Protocol(format!("No resource with given identifier found: {request_id}")));
        }
        self.state
            .lock()
            .unwrap()
            .bodies
            .get(request_id)
            .cloned()
            .ok_or_else(|| SessionError::Protocol(format!("unknown request {request_id}")))
    }

    async fn clear_network_log(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        state.log.clear();
        state.bodies.clear();
        Ok(())
    }
}

/// A complete, valid tracking response for `number`.
pub fn tracking_payload(number: &str) -> Value {
    json!({
        "status": "success",
        "message": "OK",
        "data": {
            "metadata": {
                "type": "BL",
                "number": number,
                "sealine": "MSCU",
                "sealine_name": "MSC",
                "status": "IN_TRANSIT",
                "updated_at": "2024-02-01 10:00:00"
            },
            "locations": [
                {"id": 1, "name": "Jebel Ali", "country": "United Arab Emirates", "locode": "AEJEA"},
                {"id": 2, "name": "Nhava Sheva", "country": "India", "locode": "INNSA"}
            ],
            "route": {
                "prepol": {"location": 1, "date": "2024-01-03 08:00:00", "actual": true},
                "pol": {"location": 1, "date": "2024-01-05 12:00:00", "actual": true},
                "pod": {"location": 2, "date": "2024-01-20 06:00:00", "actual": false, "predictive_eta": null},
                "postpod": {"location": 2, "date": null, "actual": null}
            },
            "vessels": [
                {"id": 1, "name": "MSC AURORA", "imo": 9839284, "flag": "PA"}
            ],
            "containers": [
                {
                    "number": "MSCU1234567",
                    "size_type": "40' High Cube",
                    "status": "IN_TRANSIT",
                    "events": [
                        {"location": 1, "description": "Gate in", "date": "2024-01-03 08:00:00", "actual": true},
                        {"location": 1, "description": "Loaded", "date": "2024-01-05 11:00:00", "actual": true}
                    ]
                }
            ]
        }
    })
}

//! Browser session primitives the capture engine depends on.
//!
//! The session is supplied already past any challenge page. It exposes the
//! three observation channels the strategies use: a document-start script
//! hook, in-page evaluation, and the protocol-level network event log.
//! No retry semantics live here; retries belong to the coordinator.

use crate::types::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `responseReceived`-style entry from the protocol event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolResponse {
    /// Identifier used to fetch the body later.
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub observed_at_ms: i64,
}

/// The primitives a page session must provide to the capture engine.
#[async_trait]
pub trait CaptureSession: Send + Sync {
    /// Register a script that runs before any page script on every new document.
    async fn add_init_script(&self, source: &str) -> Result<(), SessionError>;

    /// Evaluate an expression in the current page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<Value, SessionError>;

    /// Start recording protocol-level response events.
    async fn enable_network_log(&self) -> Result<(), SessionError>;

    /// Snapshot of response events recorded since the log was enabled or cleared.
    async fn network_responses(&self) -> Result<Vec<ProtocolResponse>, SessionError>;

    /// Fetch a response body by its protocol request id.
    ///
    /// Protocol implementations may expire this state, in which case an error
    /// is returned even though the event is still in the log.
    async fn response_body(&self, request_id: &str) -> Result<String, SessionError>;

    /// Drop every recorded response event.
    async fn clear_network_log(&self) -> Result<(), SessionError>;
}

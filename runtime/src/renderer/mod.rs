//! Renderer abstraction for browser-based page sessions.
//!
//! A `Renderer` hands out `PageSession`s: one browser tab per tracked
//! subject. A page session is a [`CaptureSession`] for the capture engine
//! plus the navigation and markup access the batch runner needs.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shiptrace::CaptureSession;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can open page sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Open a new tab positioned at `about:blank`.
    async fn new_session(&self) -> Result<Box<dyn PageSession>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently open sessions.
    fn active_sessions(&self) -> usize;
}

/// A single browser tab.
#[async_trait]
pub trait PageSession: CaptureSession {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;
    /// Get the full page HTML.
    async fn html(&self) -> Result<String>;
    /// This session as seen by the capture engine.
    fn capture(&self) -> &dyn CaptureSession;
    /// Close this tab.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A no-op renderer used when Chromium is unavailable.
///
/// Every subject then ends with a session error recorded on its entry,
/// which keeps `doctor` and dry runs usable without a browser.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_session(&self) -> Result<Box<dyn PageSession>> {
        Err(anyhow::anyhow!("browser not available"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_sessions(&self) -> usize {
        0
    }
}

//! Chromium-based renderer using chromiumoxide.

use super::{NavigationResult, PageSession, Renderer};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use shiptrace::{now_ms, CaptureSession, ProtocolResponse, SessionError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. SHIPTRACE_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("SHIPTRACE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.shiptrace/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".shiptrace/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".shiptrace/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".shiptrace/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".shiptrace/chromium/chrome-linux64/chrome"),
                home.join(".shiptrace/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium instance.
    pub async fn new() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found. Set SHIPTRACE_CHROMIUM_PATH or install Chrome.")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--window-size=1920,1080")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler: {e}");
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_session(&self) -> Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        // The listener must exist before navigation, or early responses are missed.
        let log: Arc<Mutex<Vec<ProtocolResponse>>> = Arc::default();
        let recording = Arc::new(AtomicBool::new(false));
        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("failed to subscribe to Network.responseReceived")?;
        let listener = {
            let log = Arc::clone(&log);
            let recording = Arc::clone(&recording);
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if !recording.load(Ordering::Relaxed) {
                        continue;
                    }
                    log.lock().await.push(ProtocolResponse {
                        request_id: event.request_id.inner().clone(),
                        url: event.response.url.clone(),
                        status: u16::try_from(event.response.status).unwrap_or(0),
                        observed_at_ms: now_ms(),
                    });
                }
            })
        };

        self.active_count.fetch_add(1, Ordering::Relaxed);

        Ok(Box::new(ChromiumSession {
            page,
            log,
            recording,
            listener,
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.handler.abort();
        Ok(())
    }

    fn active_sessions(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// A single Chromium tab with its network event log.
pub struct ChromiumSession {
    page: Page,
    log: Arc<Mutex<Vec<ProtocolResponse>>>,
    recording: Arc<AtomicBool>,
    listener: JoinHandle<()>,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureSession for ChromiumSession {
    async fn add_init_script(&self, source: &str) -> Result<(), SessionError> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(source.to_string()))
            .await
            .map(|_| ())
            .map_err(|e| SessionError::Protocol(format!("Page.addScriptToEvaluateOnNewDocument: {e}")))
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, SessionError> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| SessionError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn enable_network_log(&self) -> Result<(), SessionError> {
        self.page
            .execute(EnableParams::default())
            .await
            .map_err(|e| SessionError::Protocol(format!("Network.enable: {e}")))?;
        self.recording.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn network_responses(&self) -> Result<Vec<ProtocolResponse>, SessionError> {
        if self.listener.is_finished() {
            return Err(SessionError::Closed);
        }
        Ok(self.log.lock().await.clone())
    }

    async fn response_body(&self, request_id: &str) -> Result<String, SessionError> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(request_id)))
            .await
            .map_err(|e| SessionError::Protocol(format!("Network.getResponseBody: {e}")))?;
        let body = &response.result;
        if body.base64_encoded {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&body.body)
                .map_err(|e| SessionError::Protocol(format!("body is not valid base64: {e}")))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Ok(body.body.clone())
        }
    }

    async fn clear_network_log(&self) -> Result<(), SessionError> {
        self.log.lock().await.clear();
        Ok(())
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {timeout_ms}ms"),
        }
    }

    async fn html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to get HTML")?;

        let html: String = result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML result: {e:?}"))?;

        Ok(html)
    }

    fn capture(&self) -> &dyn CaptureSession {
        self
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.listener.abort();
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        let _ = self.page.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiptrace::{CancellationToken, CaptureRequest, Coordinator, Installer};
    use std::time::Duration;

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_captures_fetch_through_both_channels() {
        let renderer = ChromiumRenderer::new().await.expect("failed to launch");
        let mut session = renderer.new_session().await.expect("failed to open tab");

        let request = CaptureRequest::new("data:application/json")
            .with_max_wait(Duration::from_secs(5))
            .with_poll_interval(Duration::from_millis(200));
        let instrumentation = Installer::install(session.capture(), &request).await;
        assert!(instrumentation.page_hook_error().is_none());

        session
            .navigate(
                "data:text/html,<script>fetch('data:application/json,{\"status\":\"success\"}')</script>",
                10000,
            )
            .await
            .expect("navigation failed");

        let report = Coordinator::new("chromium", request)
            .run(session.capture(), &instrumentation, &CancellationToken::new())
            .await;
        assert!(report.outcome.is_conclusive(), "{:?}", report.outcome);

        let html = session.html().await.expect("html failed");
        assert!(html.contains("<script>"));

        session.close().await.expect("close failed");
        assert_eq!(renderer.active_sessions(), 0);
        renderer.shutdown().await.expect("shutdown failed");
    }
}

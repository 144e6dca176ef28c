//! Outbound delivery of subject records to a downstream HTTP endpoint.
//!
//! POSTs each record as JSON. Retries on 5xx and transport errors with
//! exponential backoff, and honours `Retry-After` on 429.

use crate::record::SubjectRecord;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const MAX_RETRIES: u32 = 2;

/// HTTP client for record delivery.
#[derive(Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    endpoint: String,
}

impl DeliveryClient {
    pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint).with_context(|| format!("invalid delivery URL: {endpoint}"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(concat!("shiptrace/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build delivery client")?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver one record; returns the final HTTP status.
    pub async fn deliver(&self, record: &SubjectRecord) -> Result<u16> {
        let mut retries = 0u32;

        loop {
            let resp = self.client.post(&self.endpoint).json(record).send().await;

            match resp {
                Ok(r) => {
                    let status = r.status().as_u16();

                    // Retry on 5xx
                    if status >= 500 && retries < MAX_RETRIES {
                        retries += 1;
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }

                    // Backoff on 429
                    if status == 429 && retries < MAX_RETRIES {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.trim().parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    if !(200..300).contains(&status) {
                        let body = r.text().await.unwrap_or_default();
                        bail!(
                            "delivery of {} rejected with HTTP {status}: {}",
                            record.subject,
                            body.chars().take(200).collect::<String>()
                        );
                    }

                    tracing::info!("delivered {} to {} ({status})", record.subject, self.endpoint);
                    return Ok(status);
                }
                Err(e) => {
                    if retries < MAX_RETRIES {
                        retries += 1;
                        tracing::debug!("delivery attempt failed, retrying: {e}");
                        tokio::time::sleep(backoff(retries)).await;
                        continue;
                    }
                    return Err(e).context(format!("failed to deliver {}", record.subject));
                }
            }
        }
    }
}

fn backoff(retry: u32) -> Duration {
    Duration::from_millis(500 * 2u64.pow(retry.saturating_sub(1)))
}

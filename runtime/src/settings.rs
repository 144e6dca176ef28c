//! Runtime settings: where to navigate, where to write, how long to wait.
//!
//! Values come from `SHIPTRACE_*` environment variables with defaults; the
//! CLI overrides individual fields from flags.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PAGE_URL_TEMPLATE: &str =
    "https://www.searates.com/container/tracking/?number={number}&sealine={sealine}&shipment-type=sea";
pub const DEFAULT_SEALINE: &str = "AUTO";
const DEFAULT_OUTPUT_DIR: &str = "data";
const DEFAULT_DELAY_SECS: u64 = 10;
const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Tracking page URL with `{number}` and `{sealine}` placeholders.
    pub page_url_template: String,
    pub output_dir: PathBuf,
    /// Courtesy delay between subjects.
    pub delay: Duration,
    pub delivery_url: Option<String>,
    pub navigation_timeout_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            page_url_template: DEFAULT_PAGE_URL_TEMPLATE.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            delivery_url: None,
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }
}

impl RuntimeSettings {
    pub fn from_env() -> Self {
        Self {
            page_url_template: read_env_string("SHIPTRACE_PAGE_URL_TEMPLATE")
                .unwrap_or_else(|| DEFAULT_PAGE_URL_TEMPLATE.to_string()),
            output_dir: read_env_string("SHIPTRACE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            delay: Duration::from_secs(read_env_u64("SHIPTRACE_DELAY_SECS", DEFAULT_DELAY_SECS)),
            delivery_url: read_env_string("SHIPTRACE_DELIVERY_URL"),
            navigation_timeout_ms: read_env_u64("SHIPTRACE_NAVIGATION_TIMEOUT_MS", DEFAULT_NAVIGATION_TIMEOUT_MS),
        }
    }

    /// Tracking page URL for one subject, with both values query-encoded.
    pub fn page_url(&self, number: &str, sealine: &str) -> Result<String> {
        let encode = |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
        let raw = self
            .page_url_template
            .replace("{number}", &encode(number))
            .replace("{sealine}", &encode(sealine));
        let parsed = url::Url::parse(&raw).with_context(|| format!("invalid tracking page URL: {raw}"))?;
        Ok(parsed.to_string())
    }
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_url_encodes_subject() {
        let settings = RuntimeSettings::default();
        let url = settings.page_url("DXB500681500", "AUTO").unwrap();
        assert_eq!(
            url,
            "https://www.searates.com/container/tracking/?number=DXB500681500&sealine=AUTO&shipment-type=sea"
        );

        let url = settings.page_url("A B&C", "AUTO").unwrap();
        assert!(url.contains("number=A+B%26C"));
    }

    #[test]
    fn test_invalid_template_is_an_error() {
        let settings = RuntimeSettings {
            page_url_template: "not a url {number}".into(),
            ..RuntimeSettings::default()
        };
        assert!(settings.page_url("X", "AUTO").is_err());
    }
}

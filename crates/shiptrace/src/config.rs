//! Capture configuration loaded from the environment.

use crate::types::{CaptureRequest, ConfigError, StrategyId};
use std::time::Duration;

pub const DEFAULT_TARGET_URL_SUBSTRING: &str = "tracking-system/reverse/tracking";
const DEFAULT_MAX_WAIT_MS: u64 = 20_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 3_000;
const MIN_ATTEMPT_TIMEOUT_MS: u64 = 50;
const DEFAULT_STRATEGIES: &str = "page_buffer,protocol_log";

/// Settings shared by every capture attempt of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub target_url_substring: String,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub attempt_timeout: Duration,
    pub strategies: Vec<StrategyId>,
    /// Cache replay may consume upstream quota and only runs when set.
    pub allow_cache_replay: bool,
    /// URL re-fetched by cache replay instead of the last observed match.
    pub replay_url: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_url_substring: DEFAULT_TARGET_URL_SUBSTRING.to_string(),
            max_wait: Duration::from_millis(DEFAULT_MAX_WAIT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
            strategies: vec![StrategyId::PageBuffer, StrategyId::ProtocolLog],
            allow_cache_replay: false,
            replay_url: None,
        }
    }
}

impl CaptureConfig {
    /// Read `SHIPTRACE_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let strategies = parse_strategies(
            &read_env_string("SHIPTRACE_STRATEGIES").unwrap_or_else(|| DEFAULT_STRATEGIES.to_string()),
        )?;
        Ok(Self {
            target_url_substring: read_env_string("SHIPTRACE_TARGET_URL_SUBSTRING")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_TARGET_URL_SUBSTRING.to_string()),
            max_wait: Duration::from_millis(read_env_u64("SHIPTRACE_MAX_WAIT_MS", DEFAULT_MAX_WAIT_MS)),
            poll_interval: Duration::from_millis(
                read_env_u64("SHIPTRACE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS).max(50),
            ),
            attempt_timeout: Duration::from_millis(
                read_env_u64("SHIPTRACE_ATTEMPT_TIMEOUT_MS", DEFAULT_ATTEMPT_TIMEOUT_MS).max(MIN_ATTEMPT_TIMEOUT_MS),
            ),
            strategies,
            allow_cache_replay: read_env_bool("SHIPTRACE_ALLOW_CACHE_REPLAY", false),
            replay_url: read_env_string("SHIPTRACE_REPLAY_URL").filter(|s| !s.is_empty()),
        })
    }

    /// Strategy order actually used: cache replay is dropped without opt-in.
    pub fn effective_strategies(&self) -> Result<Vec<StrategyId>, ConfigError> {
        let mut order = Vec::with_capacity(self.strategies.len());
        for &id in &self.strategies {
            if id == StrategyId::CacheReplay && !self.allow_cache_replay {
                tracing::warn!("cache_replay listed but not allowed; skipping it");
                continue;
            }
            if !order.contains(&id) {
                order.push(id);
            }
        }
        if order.is_empty() {
            return Err(ConfigError::NoStrategies);
        }
        Ok(order)
    }

    /// Build the immutable request for one attempt.
    pub fn request(&self) -> Result<CaptureRequest, ConfigError> {
        let request = CaptureRequest::new(self.target_url_substring.clone())
            .with_max_wait(self.max_wait)
            .with_poll_interval(self.poll_interval)
            .with_attempt_timeout(self.attempt_timeout)
            .with_strategies(self.effective_strategies()?);
        Ok(match &self.replay_url {
            Some(url) => request.with_replay_url(url.clone()),
            None => request,
        })
    }
}

/// Parse a comma-separated strategy list.
pub fn parse_strategies(list: &str) -> Result<Vec<StrategyId>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

fn read_env_u64(name: &str, default_value: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default_value)
}

fn read_env_bool(name: &str, default_value: bool) -> bool {
    match read_env_string(name).map(|v| v.to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default_value,
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string())
}

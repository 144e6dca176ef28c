//! Pacing between subjects of a batch.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay inserted between consecutive subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePolicy {
    /// Wait a fixed time after every subject except the last.
    FixedDelay(Duration),
    NoDelay,
}

impl SchedulePolicy {
    pub fn from_delay(delay: Duration) -> Self {
        if delay.is_zero() {
            Self::NoDelay
        } else {
            Self::FixedDelay(delay)
        }
    }

    /// Wait before the subject at `next_index`. Returns `false` if cancelled.
    pub async fn pause(&self, next_index: usize, cancel: &CancellationToken) -> bool {
        match *self {
            Self::FixedDelay(delay) if next_index > 0 => {
                tracing::info!("waiting {}s before next subject", delay.as_secs());
                tokio::select! {
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            _ => !cancel.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_skips_first_subject() {
        let cancel = CancellationToken::new();
        let policy = SchedulePolicy::FixedDelay(Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        assert!(policy.pause(0, &cancel).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(policy.pause(1, &cancel).await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_delay() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let policy = SchedulePolicy::from_delay(Duration::from_secs(3600));
        assert!(!policy.pause(1, &cancel).await);
        assert!(!SchedulePolicy::NoDelay.pause(1, &cancel).await);
    }
}

//! Bounded polling primitive shared by every wait-and-recheck site.
//!
//! A [`Poller`] hands out numbered rounds until its wall-clock budget or
//! round limit is spent, or until the cancellation token fires. Between
//! rounds it sleeps for the poll interval, clipped to the remaining budget,
//! so no wait anywhere exceeds the configured maximum.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Limits of one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_wait: Duration,
    pub interval: Duration,
    /// Optional cap on the number of rounds, independent of `max_wait`.
    pub max_rounds: Option<u32>,
}

impl PollPolicy {
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self {
            max_wait,
            interval,
            max_rounds: None,
        }
    }

    /// Express the policy as `rounds × interval`.
    pub fn rounds(rounds: u32, interval: Duration) -> Self {
        Self {
            max_wait: interval.saturating_mul(rounds),
            interval,
            max_rounds: Some(rounds),
        }
    }

    /// Upper bound on the number of rounds this policy can produce.
    pub fn max_attempts(&self) -> u32 {
        let by_time = if self.interval.is_zero() {
            u32::MAX
        } else {
            let n = self.max_wait.as_nanos().div_ceil(self.interval.as_nanos());
            u32::try_from(n).unwrap_or(u32::MAX).max(1)
        };
        self.max_rounds.map_or(by_time, |cap| cap.min(by_time))
    }
}

/// Why a poller stopped handing out rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStop {
    Deadline,
    RoundLimit,
    Cancelled,
}

/// Iterator-like driver for a bounded polling loop.
pub struct Poller<'a> {
    policy: PollPolicy,
    cancel: &'a CancellationToken,
    started: Instant,
    rounds: u32,
    stop: Option<PollStop>,
}

impl<'a> Poller<'a> {
    pub fn new(policy: PollPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            policy,
            cancel,
            started: Instant::now(),
            rounds: 0,
            stop: None,
        }
    }

    /// Wait for and return the next round number (starting at 1).
    ///
    /// Returns `None` once the poller has stopped; [`Poller::stop_reason`]
    /// then tells why.
    pub async fn next_round(&mut self) -> Option<u32> {
        if self.stop.is_some() {
            return None;
        }

        if self.rounds > 0 {
            let remaining = self.remaining();
            if remaining.is_zero() {
                return self.halt(PollStop::Deadline);
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return self.halt(PollStop::Cancelled),
                _ = tokio::time::sleep(self.policy.interval.min(remaining)) => {}
            }
        }

        if self.cancel.is_cancelled() {
            return self.halt(PollStop::Cancelled);
        }
        if self.started.elapsed() >= self.policy.max_wait {
            return self.halt(PollStop::Deadline);
        }
        if self.policy.max_rounds.is_some_and(|cap| self.rounds >= cap) {
            return self.halt(PollStop::RoundLimit);
        }

        self.rounds += 1;
        Some(self.rounds)
    }

    fn halt(&mut self, reason: PollStop) -> Option<u32> {
        self.stop = Some(reason);
        None
    }

    pub fn stop_reason(&self) -> Option<PollStop> {
        self.stop
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.policy.max_wait.saturating_sub(self.started.elapsed())
    }
}

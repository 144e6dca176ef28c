//! Capture coordinator.
//!
//! One coordinator run is one capture attempt:
//!
//! ```text
//! Idle ──▶ Polling ──┬──▶ Succeeded   (a strategy returned Captured)
//!                    ├──▶ SoftFailed  (a strategy returned SoftFailure)
//!                    └──▶ Exhausted   (deadline or cancellation)
//! ```
//!
//! Each round walks the strategy order. The first conclusive outcome ends
//! the attempt without evaluating later strategies, so the winner is always
//! the earliest strategy in the order, never the fastest. Strategy errors
//! are logged, recorded and skipped.

use crate::installer::Instrumentation;
use crate::poll::{PollPolicy, PollStop, Poller};
use crate::progress::{self, CaptureEventKind, ProgressSender};
use crate::session::CaptureSession;
use crate::strategy::{self, CaptureContext};
use crate::types::{CaptureOutcome, CaptureRequest, NotFoundReason, StrategyError, StrategyId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Polling,
    Succeeded,
    SoftFailed,
    Exhausted,
}

/// Everything known about a finished capture attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureReport {
    /// The single terminal outcome.
    pub outcome: CaptureOutcome,
    pub state: CoordinatorState,
    pub rounds: u32,
    pub elapsed_ms: u64,
    /// Swallowed `StrategyError` outcomes, in the order they occurred.
    pub strategy_errors: Vec<CaptureOutcome>,
}

/// Runs capture strategies for a single attempt.
pub struct Coordinator {
    subject: String,
    request: CaptureRequest,
    progress: Option<ProgressSender>,
    state: CoordinatorState,
}

impl Coordinator {
    pub fn new(subject: impl Into<String>, request: CaptureRequest) -> Self {
        Self {
            subject: subject.into(),
            request,
            progress: None,
            state: CoordinatorState::Idle,
        }
    }

    /// Publish progress events on `tx`.
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// Poll the built-in strategies against `session`.
    pub async fn run(
        &mut self,
        session: &dyn CaptureSession,
        instrumentation: &Instrumentation,
        cancel: &CancellationToken,
    ) -> CaptureReport {
        let request = self.request.clone();
        let ctx = CaptureContext {
            session,
            request: &request,
            instrumentation,
        };
        self.run_with(cancel, |id| strategy::attempt(id, ctx)).await
    }

    /// Poll with an arbitrary strategy implementation.
    ///
    /// `call` is invoked once per strategy per round, in `strategy_order`.
    pub async fn run_with<F, Fut>(&mut self, cancel: &CancellationToken, mut call: F) -> CaptureReport
    where
        F: FnMut(StrategyId) -> Fut,
        Fut: Future<Output = Result<Option<CaptureOutcome>, StrategyError>>,
    {
        debug_assert_eq!(
            self.state,
            CoordinatorState::Idle,
            "a coordinator runs exactly one capture attempt"
        );
        self.state = CoordinatorState::Polling;

        let order = self.request.strategy_order.clone();
        let attempt_timeout = self.request.attempt_timeout;
        let mut seq = 0u64;
        let mut strategy_errors = Vec::new();
        let mut invocations = 0usize;

        progress::emit(
            &self.progress,
            &self.subject,
            &mut seq,
            CaptureEventKind::AttemptStarted {
                strategies: order.clone(),
                max_wait_ms: self.request.max_wait.as_millis() as u64,
            },
        );
        tracing::info!(
            "capture started: subject={} strategies={:?} max_wait={}ms",
            self.subject,
            order,
            self.request.max_wait.as_millis()
        );

        let policy = PollPolicy::new(self.request.max_wait, self.request.poll_interval);
        let mut poller = Poller::new(policy, cancel);

        'rounds: while let Some(round) = poller.next_round().await {
            for &id in &order {
                if cancel.is_cancelled() {
                    break 'rounds;
                }
                let remaining = poller.remaining();
                if remaining.is_zero() {
                    break 'rounds;
                }
                // A zero attempt timeout leaves only the attempt budget as the bound.
                let clipped = attempt_timeout.is_zero() || remaining < attempt_timeout;
                let limit = if clipped { remaining } else { attempt_timeout };

                let answered = tokio::select! {
                    _ = cancel.cancelled() => break 'rounds,
                    answered = tokio::time::timeout(limit, call(id)) => answered.ok(),
                };
                let Some(result) = answered else {
                    if clipped {
                        tracing::debug!("{id}: still pending when the attempt budget ran out");
                        break 'rounds;
                    }
                    invocations += 1;
                    self.record_error(
                        &mut seq,
                        &mut strategy_errors,
                        StrategyError::new(id, format!("no answer within {}ms", attempt_timeout.as_millis())),
                    );
                    continue;
                };
                invocations += 1;

                match result {
                    Ok(None) => {
                        tracing::debug!("{id}: nothing yet (round {round})");
                    }
                    Ok(Some(CaptureOutcome::StrategyError { source, detail })) => {
                        self.record_error(&mut seq, &mut strategy_errors, StrategyError::new(source, detail));
                    }
                    Ok(Some(CaptureOutcome::NotFound { .. })) => {
                        tracing::debug!("{id}: reported not found (round {round})");
                    }
                    Ok(Some(outcome)) => {
                        return self.conclude(&mut seq, outcome, round, &poller, strategy_errors);
                    }
                    Err(err) => self.record_error(&mut seq, &mut strategy_errors, err),
                }
            }

            progress::emit(
                &self.progress,
                &self.subject,
                &mut seq,
                CaptureEventKind::RoundCompleted {
                    round,
                    elapsed_ms: poller.elapsed().as_millis() as u64,
                },
            );
        }

        let reason = if cancel.is_cancelled() || poller.stop_reason() == Some(PollStop::Cancelled) {
            NotFoundReason::Cancelled
        } else if invocations > 0 && strategy_errors.len() == invocations {
            NotFoundReason::StrategyExhausted
        } else {
            NotFoundReason::Timeout
        };

        self.state = CoordinatorState::Exhausted;
        progress::emit(
            &self.progress,
            &self.subject,
            &mut seq,
            CaptureEventKind::Exhausted {
                reason,
                rounds: poller.rounds(),
            },
        );
        tracing::warn!(
            "capture exhausted: subject={} reason={reason} rounds={} strategy_errors={}",
            self.subject,
            poller.rounds(),
            strategy_errors.len()
        );

        CaptureReport {
            outcome: CaptureOutcome::NotFound { reason },
            state: self.state,
            rounds: poller.rounds(),
            elapsed_ms: poller.elapsed().as_millis() as u64,
            strategy_errors,
        }
    }

    fn record_error(&self, seq: &mut u64, errors: &mut Vec<CaptureOutcome>, err: StrategyError) {
        tracing::warn!("strategy error (continuing): {err}");
        progress::emit(
            &self.progress,
            &self.subject,
            seq,
            CaptureEventKind::StrategyFailed {
                strategy: err.strategy,
                detail: err.detail.clone(),
            },
        );
        errors.push(CaptureOutcome::StrategyError {
            source: err.strategy,
            detail: err.detail,
        });
    }

    fn conclude(
        &mut self,
        seq: &mut u64,
        outcome: CaptureOutcome,
        round: u32,
        poller: &Poller<'_>,
        strategy_errors: Vec<CaptureOutcome>,
    ) -> CaptureReport {
        match &outcome {
            CaptureOutcome::Captured {
                source, size_bytes, ..
            } => {
                self.state = CoordinatorState::Succeeded;
                tracing::info!(
                    "captured: subject={} strategy={source} bytes={size_bytes} round={round}",
                    self.subject
                );
                progress::emit(
                    &self.progress,
                    &self.subject,
                    seq,
                    CaptureEventKind::Captured {
                        strategy: *source,
                        size_bytes: *size_bytes,
                        round,
                    },
                );
            }
            CaptureOutcome::SoftFailure { reason, .. } => {
                self.state = CoordinatorState::SoftFailed;
                tracing::warn!("soft failure: subject={} reason={reason}", self.subject);
                progress::emit(
                    &self.progress,
                    &self.subject,
                    seq,
                    CaptureEventKind::SoftFailure { reason: *reason },
                );
            }
            _ => unreachable!("only conclusive outcomes end polling"),
        }

        CaptureReport {
            outcome,
            state: self.state,
            rounds: round,
            elapsed_ms: poller.elapsed().as_millis() as u64,
            strategy_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SoftFailureReason;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn request(order: Vec<StrategyId>) -> CaptureRequest {
        CaptureRequest::new("reverse/tracking")
            .with_max_wait(Duration::from_millis(3000))
            .with_poll_interval(Duration::from_millis(500))
            .with_strategies(order)
    }

    fn captured(source: StrategyId, marker: &str) -> CaptureOutcome {
        CaptureOutcome::Captured {
            source,
            payload: json!({ "from": marker }),
            size_bytes: 10,
            captured_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_soft_failure_short_circuits() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = Coordinator::new(
            "S1",
            request(vec![StrategyId::PageBuffer, StrategyId::ProtocolLog]),
        );
        let cancel = CancellationToken::new();
        let log = Arc::clone(&calls);
        let report = coordinator
            .run_with(&cancel, move |id| {
                log.lock().unwrap().push(id);
                async move {
                    Ok(Some(CaptureOutcome::SoftFailure {
                        reason: SoftFailureReason::QuotaExceeded,
                        raw: json!({"message": "QUOTA_EXCEEDED"}),
                    }))
                }
            })
            .await;

        assert_eq!(report.state, CoordinatorState::SoftFailed);
        assert_eq!(coordinator.state(), CoordinatorState::SoftFailed);
        assert_eq!(*calls.lock().unwrap(), vec![StrategyId::PageBuffer]);
        assert!(matches!(report.outcome, CaptureOutcome::SoftFailure { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_round_capture() {
        let calls = Arc::new(Mutex::new(0u32));
        let mut coordinator = Coordinator::new("S2", request(vec![StrategyId::PageBuffer]));
        let cancel = CancellationToken::new();
        let counter = Arc::clone(&calls);
        let report = coordinator
            .run_with(&cancel, move |id| {
                let n = {
                    let mut c = counter.lock().unwrap();
                    *c += 1;
                    *c
                };
                async move { Ok((n == 3).then(|| captured(id, "third"))) }
            })
            .await;

        assert_eq!(report.state, CoordinatorState::Succeeded);
        assert_eq!(report.rounds, 3);
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_errors_is_strategy_exhausted() {
        let mut coordinator = Coordinator::new(
            "S3",
            request(vec![StrategyId::PageBuffer, StrategyId::ProtocolLog]),
        );
        let cancel = CancellationToken::new();
        let report = coordinator
            .run_with(&cancel, |id| async move { Err(StrategyError::new(id, "boom")) })
            .await;

        assert_eq!(
            report.outcome,
            CaptureOutcome::NotFound {
                reason: NotFoundReason::StrategyExhausted
            }
        );
        assert_eq!(report.strategy_errors.len() as u32, report.rounds * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_strategy_is_bounded() {
        let req = request(vec![StrategyId::CacheReplay])
            .with_attempt_timeout(Duration::from_millis(200));
        let mut coordinator = Coordinator::new("S4", req);
        let cancel = CancellationToken::new();
        let report = coordinator
            .run_with(&cancel, |id| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Some(captured(id, "late")))
            })
            .await;

        assert!(matches!(report.outcome, CaptureOutcome::NotFound { .. }));
        assert!(report.elapsed_ms < 4000);
        match &report.strategy_errors[0] {
            CaptureOutcome::StrategyError { source, detail } => {
                assert_eq!(*source, StrategyId::CacheReplay);
                assert!(detail.contains("200ms"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_strategy_never_outlives_max_wait() {
        for attempt_timeout in [Duration::ZERO, Duration::from_secs(3)] {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let req = request(vec![StrategyId::PageBuffer, StrategyId::ProtocolLog])
                .with_max_wait(Duration::from_millis(1000))
                .with_attempt_timeout(attempt_timeout);
            let mut coordinator = Coordinator::new("S6", req);
            let cancel = CancellationToken::new();
            let log = Arc::clone(&calls);
            let started = tokio::time::Instant::now();
            let report = coordinator
                .run_with(&cancel, move |id| {
                    log.lock().unwrap().push(id);
                    async move {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(None)
                    }
                })
                .await;

            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_millis(1000), "{attempt_timeout:?}: {elapsed:?}");
            assert!(elapsed < Duration::from_millis(1100), "{attempt_timeout:?}: {elapsed:?}");
            assert_eq!(
                report.outcome,
                CaptureOutcome::NotFound {
                    reason: NotFoundReason::Timeout
                }
            );
            assert!(report.strategy_errors.is_empty());
            assert_eq!(*calls.lock().unwrap(), vec![StrategyId::PageBuffer]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spent_budget_skips_remaining_strategies() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let req = request(vec![StrategyId::PageBuffer, StrategyId::ProtocolLog])
            .with_max_wait(Duration::from_millis(1000))
            .with_attempt_timeout(Duration::from_secs(3));
        let mut coordinator = Coordinator::new("S7", req);
        let cancel = CancellationToken::new();
        let log = Arc::clone(&calls);
        let report = coordinator
            .run_with(&cancel, move |id| {
                log.lock().unwrap().push(id);
                async move {
                    if id == StrategyId::PageBuffer {
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                        return Err(StrategyError::new(id, "too late"));
                    }
                    Ok(None)
                }
            })
            .await;

        assert!(report.elapsed_ms <= 1000);
        assert_eq!(*calls.lock().unwrap(), vec![StrategyId::PageBuffer]);
        assert!(matches!(report.outcome, CaptureOutcome::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_progress_events_emitted() {
        let (tx, mut rx) = progress::channel();
        let mut coordinator = Coordinator::new("S5", request(vec![StrategyId::PageBuffer])).with_progress(tx);
        let cancel = CancellationToken::new();
        coordinator
            .run_with(&cancel, |id| async move { Ok(Some(captured(id, "x"))) })
            .await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event, CaptureEventKind::AttemptStarted { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, CaptureEventKind::Captured { round: 1, .. }));
        assert_eq!(second.subject, "S5");
    }
}

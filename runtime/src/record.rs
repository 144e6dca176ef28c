//! Per-subject result record written to disk and delivered downstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shiptrace::{Assessment, CaptureReport, CoordinatorState, StrategyId, SummarySource, TrackingSummary};

/// Coordinator statistics kept on a record (the payload lives on the assessment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStats {
    pub state: CoordinatorState,
    pub rounds: u32,
    pub elapsed_ms: u64,
    /// `strategy: detail` for every swallowed strategy error.
    pub strategy_errors: Vec<String>,
}

impl From<&CaptureReport> for CaptureStats {
    fn from(report: &CaptureReport) -> Self {
        Self {
            state: report.state,
            rounds: report.rounds,
            elapsed_ms: report.elapsed_ms,
            strategy_errors: report
                .strategy_errors
                .iter()
                .filter_map(|e| match e {
                    shiptrace::CaptureOutcome::StrategyError { source, detail } => Some(format!("{source}: {detail}")),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Everything known about one subject after a batch pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub subject: String,
    pub sealine: String,
    pub page_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub capture: Option<CaptureStats>,
    pub assessment: Option<Assessment>,
    pub summary: Option<TrackingSummary>,
    pub summary_source: SummarySource,
    /// Session or navigation failure that prevented a capture attempt.
    pub error: Option<String>,
    /// `Some(true)` once delivered, `Some(false)` if delivery failed.
    pub delivered: Option<bool>,
}

impl SubjectRecord {
    pub fn new(subject: impl Into<String>, sealine: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            subject: subject.into(),
            sealine: sealine.into(),
            page_url: None,
            started_at: now,
            finished_at: now,
            capture: None,
            assessment: None,
            summary: None,
            summary_source: SummarySource::None,
            error: None,
            delivered: None,
        }
    }

    pub fn has_summary(&self) -> bool {
        self.summary.is_some()
    }

    /// Raw captured payload, if any.
    pub fn raw_payload(&self) -> Option<&Value> {
        self.assessment.as_ref().and_then(Assessment::raw)
    }

    /// Strategy that captured the payload behind the summary.
    pub fn captured_by(&self) -> Option<StrategyId> {
        match &self.assessment {
            Some(Assessment::Tracked { source, .. }) | Some(Assessment::Malformed { source, .. }) => Some(*source),
            _ => None,
        }
    }

    /// Short outcome label for progress lines and reports.
    pub fn outcome_label(&self) -> String {
        if let Some(err) = &self.error {
            return format!("error ({err})");
        }
        let kind = self.assessment.as_ref().map_or("not_attempted", Assessment::kind);
        match self.summary_source {
            SummarySource::Dom => format!("{kind}, summary from page markup"),
            _ => kind.to_string(),
        }
    }
}

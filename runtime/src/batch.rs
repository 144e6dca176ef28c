//! Sequential batch runner.
//!
//! For each subject: open a tab, arm the instrumentation, navigate, let the
//! coordinator poll, disarm, assess, fall back to the DOM summary when the
//! capture produced none, then write and deliver the record. A failure at
//! any step is recorded on that subject's entry and the batch continues.

use crate::delivery::DeliveryClient;
use crate::dom;
use crate::record::{CaptureStats, SubjectRecord};
use crate::renderer::{PageSession, Renderer};
use crate::report::ReportWriter;
use crate::schedule::SchedulePolicy;
use crate::settings::RuntimeSettings;
use crate::subjects::Subject;
use anyhow::Result;
use chrono::Utc;
use shiptrace::progress::ProgressSender;
use shiptrace::{assess, prefer_captured, CancellationToken, CaptureRequest, Coordinator, Installer};
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a whole batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub run_id: String,
    pub records: Vec<SubjectRecord>,
    pub combined_report: Option<PathBuf>,
    /// Subjects skipped because the batch was cancelled.
    pub skipped: usize,
}

impl BatchOutcome {
    pub fn all_summarized(&self) -> bool {
        self.skipped == 0 && self.records.iter().all(SubjectRecord::has_summary)
    }
}

/// Drives capture attempts for a list of subjects, one at a time.
pub struct BatchRunner {
    renderer: Arc<dyn Renderer>,
    request: CaptureRequest,
    settings: RuntimeSettings,
    schedule: SchedulePolicy,
    writer: Option<ReportWriter>,
    delivery: Option<DeliveryClient>,
    progress: Option<ProgressSender>,
}

impl BatchRunner {
    pub fn new(renderer: Arc<dyn Renderer>, request: CaptureRequest, settings: RuntimeSettings) -> Self {
        let schedule = SchedulePolicy::from_delay(settings.delay);
        Self {
            renderer,
            request,
            settings,
            schedule,
            writer: None,
            delivery: None,
            progress: None,
        }
    }

    pub fn with_schedule(mut self, schedule: SchedulePolicy) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_writer(mut self, writer: ReportWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryClient) -> Self {
        self.delivery = Some(delivery);
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Process every subject in order until done or cancelled.
    pub async fn run(&self, subjects: &[Subject], cancel: &CancellationToken) -> Result<BatchOutcome> {
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!("batch {run_id}: {} subject(s)", subjects.len());

        let mut records = Vec::with_capacity(subjects.len());
        for (index, subject) in subjects.iter().enumerate() {
            if !self.schedule.pause(index, cancel).await {
                break;
            }

            let mut record = self.track(subject, cancel).await;

            if let Some(delivery) = &self.delivery {
                match delivery.deliver(&record).await {
                    Ok(_) => record.delivered = Some(true),
                    Err(e) => {
                        tracing::warn!("{e:#}");
                        record.delivered = Some(false);
                    }
                }
            }

            if let Some(writer) = &self.writer {
                if let Err(e) = writer.write_subject(&record) {
                    tracing::warn!("report for {} not written: {e:#}", record.subject);
                }
            }

            tracing::info!("{}: {}", record.subject, record.outcome_label());
            records.push(record);
        }

        let skipped = subjects.len() - records.len();
        if skipped > 0 {
            tracing::warn!("batch {run_id} cancelled; {skipped} subject(s) not attempted");
        }

        let combined_report = match &self.writer {
            Some(writer) if !records.is_empty() => Some(writer.write_combined(&run_id, &records)?),
            _ => None,
        };

        Ok(BatchOutcome {
            run_id,
            records,
            combined_report,
            skipped,
        })
    }

    /// One subject, end to end. Never fails: errors land on the record.
    pub async fn track(&self, subject: &Subject, cancel: &CancellationToken) -> SubjectRecord {
        let mut record = SubjectRecord::new(&subject.number, &subject.sealine);

        let page_url = match self.settings.page_url(&subject.number, &subject.sealine) {
            Ok(url) => url,
            Err(e) => {
                record.error = Some(format!("{e:#}"));
                record.finished_at = Utc::now();
                return record;
            }
        };
        record.page_url = Some(page_url.clone());

        let mut session = match self.renderer.new_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("{}: no browser session: {e:#}", subject.number);
                record.error = Some(format!("{e:#}"));
                record.finished_at = Utc::now();
                return record;
            }
        };

        if let Err(e) = self.capture_into(&mut record, session.as_mut(), &page_url, cancel).await {
            tracing::warn!("{}: {e:#}", subject.number);
            record.error = Some(format!("{e:#}"));
        }

        if let Err(e) = session.close().await {
            tracing::debug!("closing session failed: {e:#}");
        }
        record.finished_at = Utc::now();
        record
    }

    async fn capture_into(
        &self,
        record: &mut SubjectRecord,
        session: &mut dyn PageSession,
        page_url: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let instrumentation = Installer::install(session.capture(), &self.request).await;

        let nav = session.navigate(page_url, self.settings.navigation_timeout_ms).await?;
        tracing::debug!("{}: loaded {} in {}ms", record.subject, nav.final_url, nav.load_time_ms);

        let mut coordinator = Coordinator::new(&record.subject, self.request.clone());
        if let Some(tx) = &self.progress {
            coordinator = coordinator.with_progress(tx.clone());
        }
        let report = coordinator.run(session.capture(), &instrumentation, cancel).await;
        instrumentation.disarm(session.capture()).await;

        record.capture = Some(CaptureStats::from(&report));
        let assessment = assess(report.outcome);

        let dom_summary = if assessment.summary().is_none() && !cancel.is_cancelled() {
            match session.html().await {
                Ok(html) => dom::extract_summary(&html, &record.subject),
                Err(e) => {
                    tracing::warn!("{}: page markup unavailable: {e:#}", record.subject);
                    None
                }
            }
        } else {
            None
        };

        let (summary, source) = prefer_captured(&assessment, dom_summary);
        record.summary = summary;
        record.summary_source = source;
        record.assessment = Some(assessment);
        Ok(())
    }
}

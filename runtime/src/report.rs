//! Report writer: JSON record, raw payload, text report, combined file.

use crate::record::SubjectRecord;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use shiptrace::{TimestampSource, TrackingSummary, UNKNOWN};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const RULE: &str = "======================================================================";

/// Files written for one subject.
#[derive(Debug, Clone, Default)]
pub struct ReportPaths {
    pub record: PathBuf,
    pub raw_payload: Option<PathBuf>,
    pub text_report: PathBuf,
}

#[derive(Serialize)]
struct Combined<'a> {
    run_id: &'a str,
    generated_at: String,
    total: usize,
    with_summary: usize,
    subjects: &'a [SubjectRecord],
}

/// Writes reports under one output directory.
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Create the writer, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `<base>.json`, `<base>_api_full.json` (when a payload exists)
    /// and `<base>_report.txt`.
    pub fn write_subject(&self, record: &SubjectRecord) -> Result<ReportPaths> {
        let base = format!(
            "shiptrace_{}_{}",
            file_stem(&record.subject),
            record.finished_at.format("%Y%m%d_%H%M%S")
        );

        let record_path = self.dir.join(format!("{base}.json"));
        write_json(&record_path, record)?;

        let raw_payload = match record.raw_payload() {
            Some(raw) => {
                let path = self.dir.join(format!("{base}_api_full.json"));
                write_json(&path, raw)?;
                Some(path)
            }
            None => None,
        };

        let text_report = self.dir.join(format!("{base}_report.txt"));
        std::fs::write(&text_report, render_text_report(record))
            .with_context(|| format!("failed to write {}", text_report.display()))?;

        tracing::info!("report written: {}", record_path.display());
        Ok(ReportPaths {
            record: record_path,
            raw_payload,
            text_report,
        })
    }

    /// Write `combined_<timestamp>.json` with every record of a batch.
    pub fn write_combined(&self, run_id: &str, records: &[SubjectRecord]) -> Result<PathBuf> {
        let now = Utc::now();
        let path = self.dir.join(format!("combined_{}.json", now.format("%Y%m%d_%H%M%S")));
        let combined = Combined {
            run_id,
            generated_at: now.to_rfc3339(),
            total: records.len(),
            with_summary: records.iter().filter(|r| r.has_summary()).count(),
            subjects: records,
        };
        write_json(&path, &combined)?;
        Ok(path)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

/// Subject id reduced to characters safe in a file name.
fn file_stem(subject: &str) -> String {
    let stem: String = subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "subject".to_string()
    } else {
        stem
    }
}

fn timestamp_line(label: &str, ts: &shiptrace::ResolvedTimestamp) -> String {
    let marker = match ts.source {
        TimestampSource::Actual => "actual",
        TimestampSource::Estimated => "estimated",
        TimestampSource::Unknown => "unknown",
    };
    format!("{label}: {} ({marker})", ts.value.as_deref().unwrap_or("N/A"))
}

fn render_summary(out: &mut String, summary: &TrackingSummary) {
    let _ = writeln!(out, "Reference: {}", summary.subject_id);
    let _ = writeln!(out, "Status: {}", summary.status);
    let _ = writeln!(out, "Carrier: {}", summary.carrier_name);
    let _ = writeln!(
        out,
        "Route: {} -> {}",
        summary.origin_location, summary.destination_location
    );
    let _ = writeln!(out, "{}", timestamp_line("Departure", &summary.departure));
    let _ = writeln!(out, "{}", timestamp_line("Arrival", &summary.arrival));
    let _ = writeln!(out, "Last updated: {}", summary.last_updated);

    let _ = writeln!(out, "\nVESSELS:");
    for (i, v) in summary.vehicles.iter().enumerate() {
        let imo = v.imo.map(|n| format!(" (IMO {n})")).unwrap_or_default();
        let voyage = v.voyage.as_deref().map(|n| format!(" voyage {n}")).unwrap_or_default();
        let _ = writeln!(out, "[{}] {}{imo}{voyage}", i + 1, v.name);
        if v.loading_port.is_some() || v.discharge_port.is_some() {
            let _ = writeln!(
                out,
                "    {} -> {}",
                v.loading_port.as_deref().unwrap_or(UNKNOWN),
                v.discharge_port.as_deref().unwrap_or(UNKNOWN)
            );
        }
    }

    let _ = writeln!(out, "\nCONTAINERS:");
    for (i, c) in summary.line_items.iter().enumerate() {
        let _ = writeln!(out, "[{}] {} {} - {}", i + 1, c.number, c.size_type, c.status);
        if let Some(e) = &c.latest_event {
            let mark = if e.actual { "x" } else { "o" };
            let _ = writeln!(
                out,
                "    {mark} {}: {} {}",
                e.location,
                e.description,
                e.date.as_deref().unwrap_or("pending")
            );
        }
    }
}

/// Human-readable report for one subject.
pub fn render_text_report(record: &SubjectRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nSHIPTRACE TRACKING REPORT\n{RULE}\n");
    let _ = writeln!(out, "Subject: {} ({})", record.subject, record.sealine);
    let _ = writeln!(out, "Outcome: {}", record.outcome_label());
    if let Some(strategy) = record.captured_by() {
        let _ = writeln!(out, "Captured by: {strategy}");
    }
    if let Some(capture) = &record.capture {
        let _ = writeln!(
            out,
            "Capture: {} rounds, {}ms, {} strategy errors",
            capture.rounds,
            capture.elapsed_ms,
            capture.strategy_errors.len()
        );
    }
    let _ = writeln!(out);

    match &record.summary {
        Some(summary) => render_summary(&mut out, summary),
        None => {
            let _ = writeln!(out, "No summary available.");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shiptrace::{Assessment, ResolvedTimestamp, StrategyId, SummarySource, Vehicle};

    fn tracked_record() -> SubjectRecord {
        let summary = TrackingSummary {
            subject_id: "DXB500681500".into(),
            status: "IN_TRANSIT".into(),
            carrier_name: "MSC".into(),
            origin_location: "Jebel Ali, United Arab Emirates".into(),
            destination_location: "Nhava Sheva, India".into(),
            departure: ResolvedTimestamp::actual("2024-01-05"),
            arrival: ResolvedTimestamp::estimated("2024-01-20"),
            line_items: vec![],
            vehicles: vec![Vehicle {
                name: "MSC AURORA".into(),
                imo: Some(9839284),
                flag: None,
                voyage: Some("FA402E".into()),
                loading_port: Some("Jebel Ali".into()),
                discharge_port: None,
            }],
            last_updated: "2024-02-01".into(),
        };
        let mut record = SubjectRecord::new("DXB500681500", "AUTO");
        record.assessment = Some(Assessment::Tracked {
            summary: summary.clone(),
            source: StrategyId::PageBuffer,
            raw: json!({"status": "success"}),
        });
        record.summary = Some(summary);
        record.summary_source = SummarySource::Captured;
        record
    }

    #[test]
    fn test_write_subject_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("data")).unwrap();
        assert!(writer.dir().is_dir());
        let paths = writer.write_subject(&tracked_record()).unwrap();
        assert_eq!(paths.record.parent(), Some(writer.dir()));

        assert!(paths.record.exists());
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(paths.raw_payload.unwrap()).unwrap()).unwrap();
        assert_eq!(raw, json!({"status": "success"}));

        let text = std::fs::read_to_string(paths.text_report).unwrap();
        assert!(text.contains("Route: Jebel Ali, United Arab Emirates -> Nhava Sheva, India"));
        assert!(text.contains("Departure: 2024-01-05 (actual)"));
        assert!(text.contains("[1] MSC AURORA (IMO 9839284) voyage FA402E"));
        assert!(text.contains("    Jebel Ali -> Unknown"));
        assert!(text.contains("Captured by: page_buffer"));
    }

    #[test]
    fn test_record_without_payload_skips_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();
        let mut record = SubjectRecord::new("../evil name", "AUTO");
        record.error = Some("browser not available".into());

        let paths = writer.write_subject(&record).unwrap();
        assert!(paths.raw_payload.is_none());
        assert_eq!(paths.record.parent().unwrap(), dir.path());
        assert!(paths
            .record
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("shiptrace____evil_name_"));
        let text = std::fs::read_to_string(paths.text_report).unwrap();
        assert!(text.contains("No summary available."));
    }

    #[test]
    fn test_combined_counts() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();
        let records = vec![tracked_record(), SubjectRecord::new("X", "AUTO")];
        let path = writer.write_combined("run-1", &records).unwrap();

        let combined: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(combined["total"], 2);
        assert_eq!(combined["with_summary"], 1);
        assert_eq!(combined["run_id"], "run-1");
        assert_eq!(combined["subjects"][0]["summary_source"], "captured");
    }
}

//! `shiptrace track`: run a batch of subjects through the browser.

use crate::batch::{BatchOutcome, BatchRunner};
use crate::cli::output;
use crate::delivery::DeliveryClient;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::Renderer;
use crate::report::ReportWriter;
use crate::settings::RuntimeSettings;
use crate::subjects::{self, Subject};
use anyhow::{Context, Result};
use shiptrace::config::parse_strategies;
use shiptrace::progress::{self, CaptureEventKind, ProgressReceiver};
use shiptrace::{CancellationToken, CaptureConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Flags of the `track` subcommand; `None` keeps the environment value.
#[derive(Debug, Default, Clone)]
pub struct TrackOptions {
    pub subjects: Vec<String>,
    pub file: PathBuf,
    pub sealine: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub no_report: bool,
    pub delay_secs: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub strategies: Option<String>,
    pub allow_cache_replay: bool,
    pub replay_url: Option<String>,
    pub deliver_to: Option<String>,
    pub page_url_template: Option<String>,
}

fn load_subjects(opts: &TrackOptions) -> Result<Vec<Subject>> {
    if !opts.subjects.is_empty() {
        return Ok(subjects::from_args(&opts.subjects, opts.sealine.as_deref()));
    }
    let sealine = opts.sealine.as_deref().unwrap_or(crate::settings::DEFAULT_SEALINE);
    Ok(subjects::load_subject_file(&opts.file, sealine)?)
}

fn capture_config(opts: &TrackOptions) -> Result<CaptureConfig> {
    let mut config = CaptureConfig::from_env().context("invalid capture configuration")?;
    if let Some(ms) = opts.max_wait_ms {
        config.max_wait = Duration::from_millis(ms);
    }
    if let Some(list) = &opts.strategies {
        config.strategies = parse_strategies(list)?;
    }
    if opts.allow_cache_replay {
        config.allow_cache_replay = true;
    }
    if let Some(url) = &opts.replay_url {
        config.replay_url = Some(url.clone());
    }
    Ok(config)
}

fn runtime_settings(opts: &TrackOptions) -> RuntimeSettings {
    let mut settings = RuntimeSettings::from_env();
    if let Some(dir) = &opts.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(secs) = opts.delay_secs {
        settings.delay = Duration::from_secs(secs);
    }
    if let Some(url) = &opts.deliver_to {
        settings.delivery_url = Some(url.clone());
    }
    if let Some(template) = &opts.page_url_template {
        settings.page_url_template = template.clone();
    }
    settings
}

/// Print coordinator progress lines to stderr until the channel closes.
async fn print_progress(mut rx: ProgressReceiver) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        let line = match &event.event {
            CaptureEventKind::AttemptStarted { strategies, max_wait_ms } => {
                format!("capturing ({strategies:?}, up to {max_wait_ms}ms)")
            }
            CaptureEventKind::StrategyFailed { strategy, detail } => format!("{strategy} failed: {detail}"),
            CaptureEventKind::RoundCompleted { round, elapsed_ms } => {
                format!("round {round} done, nothing yet ({elapsed_ms}ms)")
            }
            CaptureEventKind::Captured {
                strategy,
                size_bytes,
                round,
            } => format!("captured by {strategy}: {size_bytes} bytes in round {round}"),
            CaptureEventKind::SoftFailure { reason } => format!("upstream soft failure: {reason}"),
            CaptureEventKind::Exhausted { reason, rounds } => format!("no capture ({reason}) after {rounds} rounds"),
        };
        eprintln!("  [{}] {line}", event.subject);
    }
}

fn print_outcome(outcome: &BatchOutcome) {
    if output::is_json() {
        output::print_json(&serde_json::json!({
            "run_id": outcome.run_id,
            "skipped": outcome.skipped,
            "combined_report": outcome.combined_report,
            "records": outcome.records,
        }));
        return;
    }
    if output::is_quiet() {
        return;
    }
    println!();
    for record in &outcome.records {
        let route = record
            .summary
            .as_ref()
            .map(|s| format!("{} -> {} [{}]", s.origin_location, s.destination_location, s.status))
            .unwrap_or_default();
        println!("  {:<16} {:<40} {route}", record.subject, record.outcome_label());
    }
    if outcome.skipped > 0 {
        println!("  {} subject(s) skipped after cancellation", outcome.skipped);
    }
    if let Some(path) = &outcome.combined_report {
        println!("\n  Combined report: {}", path.display());
    }
}

/// Run the batch. Returns whether every subject ended with a summary.
pub async fn run(opts: TrackOptions) -> Result<bool> {
    let subjects = load_subjects(&opts)?;
    let request = capture_config(&opts)?
        .request()
        .context("invalid capture configuration")?;
    let settings = runtime_settings(&opts);

    let renderer: Arc<dyn Renderer> = Arc::new(ChromiumRenderer::new().await?);

    let (tx, rx) = progress::channel();
    let printer = (!output::is_quiet() && !output::is_json()).then(|| tokio::spawn(print_progress(rx)));

    let mut runner = BatchRunner::new(Arc::clone(&renderer), request, settings.clone()).with_progress(tx);
    if !opts.no_report {
        let writer = ReportWriter::new(&settings.output_dir)?;
        tracing::info!("reports go to {}", writer.dir().display());
        runner = runner.with_writer(writer);
    }
    if let Some(url) = &settings.delivery_url {
        let delivery = DeliveryClient::new(url, 15_000)?;
        tracing::info!("delivering records to {}", delivery.endpoint());
        runner = runner.with_delivery(delivery);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current subject");
            on_signal.cancel();
        }
    });

    let outcome = runner.run(&subjects, &cancel).await;
    drop(runner);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    renderer.shutdown().await?;

    let outcome = outcome?;
    print_outcome(&outcome);
    Ok(outcome.all_summarized())
}

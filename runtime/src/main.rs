use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use shiptrace_runtime::cli;
use shiptrace_runtime::cli::track::TrackOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "shiptrace",
    about = "Shiptrace: capture container tracking responses through a headless browser",
    version,
    after_help = "Run 'shiptrace <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track one or more bills of lading / container numbers
    Track {
        /// Subjects to track; read from --file when omitted
        subjects: Vec<String>,
        /// Subject list, one per line, `#` for comments
        #[arg(long, short, default_value = "bol_list.txt")]
        file: PathBuf,
        /// Sealine code for subjects without one
        #[arg(long)]
        sealine: Option<String>,
        /// Directory for reports (default: $SHIPTRACE_OUTPUT_DIR or ./data)
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Do not write report files
        #[arg(long)]
        no_report: bool,
        /// Seconds to wait between subjects
        #[arg(long)]
        delay_secs: Option<u64>,
        /// Capture budget per subject in milliseconds
        #[arg(long)]
        max_wait_ms: Option<u64>,
        /// Comma-separated strategy order (page_buffer, protocol_log, cache_replay)
        #[arg(long)]
        strategies: Option<String>,
        /// Allow the cache replay strategy, which may consume upstream quota
        #[arg(long)]
        allow_cache_replay: bool,
        /// URL the cache replay re-fetches instead of the last observed request
        #[arg(long)]
        replay_url: Option<String>,
        /// POST every record as JSON to this URL
        #[arg(long)]
        deliver_to: Option<String>,
        /// Tracking page URL with {number} and {sealine} placeholders
        #[arg(long)]
        page_url_template: Option<String>,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("shiptrace={level},shiptrace_runtime={level}"))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var(cli::output::JSON_ENV, "1");
    }
    if cli.quiet {
        std::env::set_var(cli::output::QUIET_ENV, "1");
    }
    init_tracing(&cli.log_level, cli.json);

    let result = match cli.command {
        Commands::Track {
            subjects,
            file,
            sealine,
            output_dir,
            no_report,
            delay_secs,
            max_wait_ms,
            strategies,
            allow_cache_replay,
            replay_url,
            deliver_to,
            page_url_template,
        } => {
            cli::track::run(TrackOptions {
                subjects,
                file,
                sealine,
                output_dir,
                no_report,
                delay_secs,
                max_wait_ms,
                strategies,
                allow_cache_replay,
                replay_url,
                deliver_to,
                page_url_template,
            })
            .await
        }
        Commands::Doctor => cli::doctor::run().await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "shiptrace", &mut std::io::stdout());
            Ok(true)
        }
    };

    // Exit codes: 0=success, 1=error or a subject without a summary
    match result {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            if cli::output::is_json() {
                cli::output::print_json(&serde_json::json!({
                    "error": true,
                    "message": format!("{e:#}"),
                }));
            } else if !cli::output::is_quiet() {
                eprintln!("  Error: {e:#}");
            }
            std::process::exit(1);
        }
    }
}

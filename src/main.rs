use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use flowtag::analyzer::{Analyzer, RunOutcome};
use flowtag::config::Config;

/// Exit status for a run stopped by SIGINT or SIGTERM.
const EXIT_CANCELLED: u8 = 130;

/// Tags flow log records by destination port and protocol, and counts them.
#[derive(Parser)]
#[command(name = "flowtag", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Flow log file to analyze.
    #[arg(long)]
    logs: Option<PathBuf>,

    /// Tag mapping CSV (dstport,protocol,tag).
    #[arg(long)]
    mappings: Option<PathBuf>,

    /// Protocol number CSV. Defaults to the built-in IANA table.
    #[arg(long)]
    protocols: Option<PathBuf>,

    /// Report output path.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Lines read per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent batch workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, cfg: &mut Config) {
        if let Some(path) = &self.logs {
            cfg.input.flow_logs = Some(path.clone());
        }
        if let Some(path) = &self.mappings {
            cfg.input.tag_mappings = Some(path.clone());
        }
        if let Some(path) = &self.protocols {
            cfg.input.protocol_numbers = Some(path.clone());
        }
        if let Some(path) = &self.output {
            cfg.output.report = Some(path.clone());
        }
        if let Some(n) = self.batch_size {
            cfg.engine.batch_size = n;
        }
        if let Some(n) = self.workers {
            cfg.engine.workers = n;
        }
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
    }
}

mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("flowtag {}", version::full());
        return Ok(ExitCode::SUCCESS);
    }

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    let filter = EnvFilter::try_new(&cfg.log_level)
        .with_context(|| format!("invalid log level: {}", cfg.log_level))?;
    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting flowtag",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let mut analyzer = Analyzer::new(cfg)?;
    match analyzer.run(&cancel).await? {
        RunOutcome::Completed(summary) => {
            tracing::info!(
                records = summary.snapshot.records(),
                errors = summary.snapshot.errors,
                lines = summary.stats.lines_read,
                "flowtag finished",
            );
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Cancelled(stats) => {
            tracing::warn!(lines = stats.lines_read, "flowtag cancelled, no report written");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            tracing::warn!(error = %e, "failed to register SIGTERM handler");
            None
        }
    };

    tokio::select! {
        _ = signal_or_pending("SIGINT", tokio::signal::ctrl_c()) => {
            tracing::info!("received SIGINT, cancelling run");
        }
        Some(_) = async {
            match sigterm.as_mut() {
                Some(s) => s.recv().await,
                None => std::future::pending().await,
            }
        } => {
            tracing::info!("received SIGTERM, cancelling run");
        }
    }

    cancel.cancel();
}

/// Resolves when `signal` fires. Never resolves if the handler failed to
/// install, so a registration error cannot cancel the run.
async fn signal_or_pending<F>(name: &str, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::warn!(error = %e, signal = name, "failed to register signal handler");
        std::future::pending::<()>().await;
    }
}

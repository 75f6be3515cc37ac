use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use windscout::{
    pipeline::{export_store, Pipeline, RunSummary},
    schedule::Scheduler,
    AppConfig,
};

/// Scrapes windsurf classifieds, keeps a classified store of them and mails the interesting ones.
#[derive(Parser)]
#[command(name = "windscout", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scouting pass.
    Run {
        /// Configuration file (defaults to ./windscout.toml if present).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a pass once per day after the configured hour.
    Schedule {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Re-render the workbook from the stored entries.
    Export {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    AppConfig::load(path.map(PathBuf::as_path)).context("failed to load configuration")
}

fn print_summary(summary: &RunSummary, elapsed: std::time::Duration) {
    println!("\n=== Scouting Summary ===");
    println!("Listings scraped: {}", summary.scraped);
    println!("New entries: {}", summary.fresh);
    println!("Still listed: {}", summary.still_present);
    println!("Sold: {}", summary.sold);
    println!("Re-extracted: {}", summary.requeried);
    println!("Filtered out: {}", summary.filtered_out);
    println!("Entries stored: {}", summary.stored);
    println!("Interesting: {} (mail sent: {})", summary.interesting, summary.notified);
    println!("Processing time: {:.2?}", elapsed);
}

async fn execute(command: Command) -> Result<()> {
    match command {
        Command::Run { config } => {
            let start_time = Instant::now();
            let pipeline = Pipeline::from_config(load_config(config.as_ref())?)?;
            let summary = pipeline.run().await?;
            print_summary(&summary, start_time.elapsed());
        }
        Command::Schedule { config } => {
            let config = load_config(config.as_ref())?;
            let scheduler = Scheduler::new(config.schedule.clone());
            let pipeline = Pipeline::from_config(config)?;
            scheduler.run_forever(|| pipeline.run()).await;
        }
        Command::Export { config } => {
            let config = load_config(config.as_ref())?;
            let sheets = export_store(&config).await?;
            if sheets.is_empty() {
                println!("No entries stored, nothing exported");
            } else {
                let names: Vec<&str> = sheets.iter().map(|kind| kind.display_name()).collect();
                println!("{}: {}", config.storage.export_file.display(), names.join(", "));
            }
        }
    }
    Ok(())
}

/// Runs `work` unless `interrupt` completes first, in which case the run counts as failed.
async fn until_interrupted<W, I>(work: W, interrupt: I) -> Result<()>
where
    W: Future<Output = Result<()>>,
    I: Future,
{
    tokio::select! {
        result = work => result,
        _ = interrupt => {
            warn!("Interrupted, stopping");
            info!("Files written so far are left in place");
            anyhow::bail!("interrupted")
        }
    }
}

/// The main entry point of the application.
///
/// Initializes logging from `RUST_LOG` (default `info`), parses the command line and runs the
/// chosen command until it finishes or Ctrl-C is pressed.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    until_interrupted(execute(cli.command), tokio::signal::ctrl_c()).await
}

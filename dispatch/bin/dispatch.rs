//! Dead-letter maintenance for the dispatch resilience layer
//!
//! - `purge`: delete old entries once
//! - `serve`: run the scheduled retention purge until interrupted
//! - `stats`: print entry counts per dead-letter reason

use std::{path::PathBuf, sync::LazyLock};

use chrono::Utc;
use clap::{Parser, Subcommand};
use dispatch::{Dispatch, find_config_file};
use dispatch_common::{Signal, logging};
use dispatch_dlq::{DeadLetterFilter, DeadLetterQueue};
use tokio::sync::broadcast;

#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

/// Dead-letter maintenance for the dispatch resilience layer
#[derive(Parser, Debug)]
#[command(name = "dispatch")]
#[command(about = "Maintain the dispatch dead-letter queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete entries enqueued before a cutoff
    Purge {
        /// Age in days; defaults to the configured retention
        #[arg(long)]
        older_than_days: Option<u64>,

        /// Only delete entries that have already been replayed
        #[arg(long)]
        replayed_only: bool,

        /// Reason recorded in the log
        #[arg(long, default_value = "manual purge")]
        reason: String,
    },
    /// Run the scheduled retention purge until interrupted
    Serve,
    /// Show entry counts per reason
    Stats,
}

static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            tracing::info!("Terminate signal received, shutting down");
        }
    }

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = find_config_file(cli.config.as_deref())?;
    let config = Dispatch::load(&config_path)?;
    logging::init(&config.logging);

    tracing::debug!(config = %config_path.display(), "Loaded configuration");

    let queue = config.dead_letter.into_queue().await?;

    match cli.command {
        Commands::Purge {
            older_than_days,
            replayed_only,
            reason,
        } => cmd_purge(&queue, older_than_days, replayed_only, &reason).await,
        Commands::Serve => cmd_serve(&queue).await,
        Commands::Stats => cmd_stats(&queue).await,
    }
}

async fn cmd_purge(
    queue: &DeadLetterQueue,
    older_than_days: Option<u64>,
    replayed_only: bool,
    reason: &str,
) -> anyhow::Result<()> {
    let age = match older_than_days {
        Some(days) => chrono::Duration::try_days(i64::try_from(days)?)
            .ok_or_else(|| anyhow::anyhow!("--older-than-days is out of range"))?,
        None => {
            let Some(retention) = queue.retention() else {
                anyhow::bail!("No retention configured, pass --older-than-days");
            };
            chrono::Duration::from_std(retention)?
        }
    };

    let cutoff = Utc::now()
        .checked_sub_signed(age)
        .ok_or_else(|| anyhow::anyhow!("Cutoff is out of range"))?;

    let purged = queue.purge(cutoff, replayed_only, reason).await?;
    println!("Purged {purged} entries enqueued before {cutoff}");
    Ok(())
}

async fn cmd_serve(queue: &DeadLetterQueue) -> anyhow::Result<()> {
    tracing::info!("Dead-letter maintenance running");

    let purge = queue.serve_purge(SHUTDOWN_BROADCAST.subscribe());
    tokio::pin!(purge);

    tokio::select! {
        () = &mut purge => Ok(()),
        r = shutdown() => {
            r?;
            purge.await;
            tracing::info!("Dead-letter maintenance stopped");
            Ok(())
        }
    }
}

async fn cmd_stats(queue: &DeadLetterQueue) -> anyhow::Result<()> {
    let total = queue.count(&DeadLetterFilter::all()).await?;
    let pending = queue.count(&DeadLetterFilter::all().replayed(false)).await?;

    println!("{:<24} {:>10}", "REASON", "ENTRIES");
    for (reason, count) in queue.count_by_reason().await? {
        if count > 0 {
            println!("{:<24} {count:>10}", reason.as_str());
        }
    }
    println!();
    println!("Total: {total}");
    println!("Awaiting replay: {pending}");
    println!("Replayed: {}", total.saturating_sub(pending));

    Ok(())
}

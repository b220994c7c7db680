//! CLI entry point for the resumable downloader.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use resume_core::{DownloadEngine, TaskId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::Args;
use progress::ProgressListener;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = Arc::new(args.download_config());
    info!(
        sandbox = %config.allowed_base_path().display(),
        resume = args.resume,
        "Downloader starting"
    );

    let engine = DownloadEngine::new(Arc::clone(&config))?;
    let listener = Arc::new(ProgressListener::new(
        &args.url,
        !args.quiet && io::stderr().is_terminal(),
    ));

    // Ctrl-C stops at the next suspension point and keeps the partial file
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping download");
            trigger.cancel();
        }
    });

    let result = engine
        .execute_with_cancellation(
            &args.url,
            args.save_path(),
            listener.clone(),
            args.resume,
            &cancel,
        )
        .await;

    if let Some(task) = listener.task(&TaskId::from_url(&args.url)) {
        debug!(
            task_id = %task.id(),
            filename = ?task.filename(),
            progress = task.progress(),
            failed = task.is_failed(),
            "Task finished"
        );
    }

    let path = result.with_context(|| format!("failed to download {}", args.url))?;

    info!(path = %path.display(), "Download complete");
    println!("{}", path.display());

    Ok(())
}

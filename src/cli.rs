//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use resume_core::DownloadConfig;
use resume_core::download::RateLimiter;
use resume_core::download::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_NETWORK_TIMEOUT, DEFAULT_PROGRESS_INTERVAL,
};

/// Download one file over HTTP(S), resuming where a previous run stopped.
///
/// The file is saved under the sandbox directory; its name comes from the
/// server.
#[derive(Parser, Debug)]
#[command(name = "resume-dl")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download
    pub url: String,

    /// Directory inside the sandbox to save into (defaults to the sandbox root)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Root directory downloads may be written under (defaults to the platform download dir)
    #[arg(long)]
    pub sandbox: Option<PathBuf>,

    /// Directory for partial files (defaults to <sandbox>/.partial)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Continue from a partial file left by an earlier run
    #[arg(long)]
    pub resume: bool,

    /// Maximum retries for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Per-request network timeout in seconds (1-3600)
    #[arg(short = 't', long, default_value_t = DEFAULT_NETWORK_TIMEOUT.as_secs(), value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,

    /// Allow plain http:// URLs
    #[arg(long)]
    pub allow_http: bool,

    /// Maximum file size in bytes
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Bytes between progress updates
    #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL, value_parser = clap::value_parser!(u64).range(1..))]
    pub progress_interval: u64,

    /// Maximum download speed in bytes per second (0 to disable)
    #[arg(short = 'l', long, default_value_t = 0)]
    pub rate_limit: u64,

    /// Do not ask the server for a checksum-capable response
    #[arg(long)]
    pub no_checksum: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Builds the engine configuration these flags describe.
    pub fn download_config(&self) -> DownloadConfig {
        let mut config = match &self.sandbox {
            Some(sandbox) => DownloadConfig::for_sandbox(sandbox),
            None => DownloadConfig::default(),
        };
        config = config
            .with_max_retries(u32::from(self.max_retries))
            .with_network_timeout(Duration::from_secs(self.timeout))
            .with_force_https(!self.allow_http)
            .with_progress_interval(self.progress_interval)
            .with_checksum(!self.no_checksum);

        if let Some(work_dir) = &self.work_dir {
            config = config.with_work_dir(work_dir);
        }
        if let Some(max_size) = self.max_size {
            config = config.with_max_file_size(max_size);
        }
        if self.rate_limit > 0 {
            config = config.with_speed_limiter(Arc::new(RateLimiter::new(self.rate_limit)));
        }
        config
    }

    /// Save directory relative to the sandbox root.
    pub fn save_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_default()
    }
}

//! Observer interface and callback delivery.
//!
//! Callers implement [`DownloadListener`]. The engine never calls it directly;
//! it goes through a [`Notifier`], which either invokes the listener inline or
//! forwards events over an ordered channel to a task on the configured
//! runtime. Either way, for one task id, progress events arrive strictly
//! before the single terminal event.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use super::config::NotificationContext;
use super::error::DownloadError;
use super::task::TaskId;

/// Receives progress and completion for downloads.
///
/// Exactly one of [`on_success`](Self::on_success) or
/// [`on_error`](Self::on_error) fires per task id; `on_progress` fires zero or
/// more times before it.
pub trait DownloadListener: Send + Sync {
    /// `fraction` is `bytes_downloaded / total_bytes`. `total_bytes` is 0
    /// while the length is unknown; the final event always reports the true
    /// total.
    fn on_progress(&self, task_id: &TaskId, fraction: f32, bytes_downloaded: u64, total_bytes: u64);

    /// The file is in its final location.
    fn on_success(&self, task_id: &TaskId, file: &Path);

    /// The download failed; `error` is the observer-facing translation.
    fn on_error(&self, task_id: &TaskId, error: &DownloadError);
}

#[derive(Debug)]
enum Event {
    Progress {
        fraction: f32,
        downloaded: u64,
        total: u64,
    },
    Success(PathBuf),
    Error(DownloadError),
}

/// Delivers one task's events to its listener on the configured context.
pub(crate) struct Notifier {
    task_id: TaskId,
    mode: Mode,
}

enum Mode {
    Inline(Arc<dyn DownloadListener>),
    Dispatched {
        sender: mpsc::UnboundedSender<Event>,
        worker: JoinHandle<()>,
    },
}

impl Notifier {
    pub(crate) fn new(
        task_id: TaskId,
        listener: Arc<dyn DownloadListener>,
        context: &NotificationContext,
    ) -> Self {
        let handle = match context {
            NotificationContext::Inline => None,
            NotificationContext::Dedicated => Some(tokio::runtime::Handle::current()),
            NotificationContext::Runtime(handle) => Some(handle.clone()),
        };

        let mode = match handle {
            None => Mode::Inline(listener),
            Some(handle) => {
                let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();
                let worker_id = task_id.clone();
                let worker = handle.spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        deliver(listener.as_ref(), &worker_id, event);
                    }
                });
                Mode::Dispatched { sender, worker }
            }
        };

        Self { task_id, mode }
    }

    pub(crate) fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub(crate) fn progress(&self, downloaded: u64, total: u64) {
        #[allow(clippy::cast_precision_loss)]
        let fraction = if total == 0 {
            // Unknown length mid-stream; an empty body is complete.
            if downloaded == 0 { 1.0 } else { 0.0 }
        } else {
            downloaded as f32 / total as f32
        };
        self.send(Event::Progress {
            fraction,
            downloaded,
            total,
        });
    }

    /// Delivers the terminal success event and waits for delivery.
    pub(crate) async fn success(self, file: &Path) {
        self.finish(Event::Success(file.to_path_buf())).await;
    }

    /// Delivers the terminal error event and waits for delivery.
    pub(crate) async fn error(self, error: DownloadError) {
        self.finish(Event::Error(error)).await;
    }

    fn send(&self, event: Event) {
        match &self.mode {
            Mode::Inline(listener) => deliver(listener.as_ref(), &self.task_id, event),
            Mode::Dispatched { sender, .. } => {
                if sender.send(event).is_err() {
                    warn!(task_id = %self.task_id, "notification worker stopped; event dropped");
                }
            }
        }
    }

    async fn finish(self, event: Event) {
        self.send(event);
        if let Mode::Dispatched { sender, worker } = self.mode {
            drop(sender);
            if let Err(e) = worker.await {
                warn!(task_id = %self.task_id, error = %e, "notification worker failed");
            }
        }
    }
}

fn deliver(listener: &dyn DownloadListener, task_id: &TaskId, event: Event) {
    match event {
        Event::Progress {
            fraction,
            downloaded,
            total,
        } => listener.on_progress(task_id, fraction, downloaded, total),
        Event::Success(path) => listener.on_success(task_id, &path),
        Event::Error(error) => listener.on_error(task_id, &error),
    }
}

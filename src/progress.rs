//! Progress bar for a download run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressStyle};
use resume_core::{DownloadError, DownloadListener, DownloadTask, TaskId};

/// Renders engine callbacks as a progress bar and keeps the caller-side
/// [`DownloadTask`] records up to date.
pub(crate) struct ProgressListener {
    bar: ProgressBar,
    tasks: Mutex<HashMap<TaskId, DownloadTask>>,
}

impl ProgressListener {
    /// Tracks `url`; the bar is drawn only when `visible`.
    pub(crate) fn new(url: &str, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_message(url.to_string());

        let task = DownloadTask::new(url);
        Self {
            bar,
            tasks: Mutex::new(HashMap::from([(task.id().clone(), task)])),
        }
    }

    /// Snapshot of the record for `id`.
    pub(crate) fn task(&self, id: &TaskId) -> Option<DownloadTask> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn update(&self, id: &TaskId, apply: impl FnOnce(&mut DownloadTask)) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = tasks.get_mut(id) {
            apply(task);
        }
    }
}

impl DownloadListener for ProgressListener {
    fn on_progress(&self, task_id: &TaskId, fraction: f32, bytes_downloaded: u64, total_bytes: u64) {
        if total_bytes > 0 {
            self.bar.set_length(total_bytes);
        }
        self.bar.set_position(bytes_downloaded);
        self.update(task_id, |task| task.set_progress(fraction));
    }

    fn on_success(&self, task_id: &TaskId, file: &Path) {
        self.update(task_id, |task| {
            task.set_progress(1.0);
            if let Some(name) = file.file_name().and_then(|name| name.to_str()) {
                task.set_filename(name);
            }
        });
        self.bar
            .finish_with_message(format!("saved {}", file.display()));
    }

    fn on_error(&self, task_id: &TaskId, error: &DownloadError) {
        self.update(task_id, DownloadTask::mark_failed);
        self.bar.abandon_with_message(format!("failed: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/file.bin";

    #[test]
    fn test_progress_updates_task_fraction() {
        let listener = ProgressListener::new(URL, false);
        let id = TaskId::from_url(URL);

        listener.on_progress(&id, 0.25, 25, 100);

        let task = listener.task(&id).unwrap();
        assert!((task.progress() - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_success_records_filename() {
        let listener = ProgressListener::new(URL, false);
        let id = TaskId::from_url(URL);

        listener.on_success(&id, Path::new("/downloads/file.bin"));

        let task = listener.task(&id).unwrap();
        assert_eq!(task.filename(), Some("file.bin"));
        assert!((task.progress() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_error_marks_task_failed() {
        let listener = ProgressListener::new(URL, false);
        let id = TaskId::from_url(URL);

        listener.on_progress(&id, 0.5, 50, 100);
        listener.on_error(&id, &DownloadError::Cancelled);

        assert!(listener.task(&id).unwrap().is_failed());
    }

    #[test]
    fn test_unknown_task_is_ignored() {
        let listener = ProgressListener::new(URL, false);
        let other = TaskId::from_url("https://example.com/other.bin");

        listener.on_progress(&other, 0.5, 50, 100);

        assert!(listener.task(&other).is_none());
    }
}

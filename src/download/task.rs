//! Per-invocation task identity and caller-side progress bookkeeping.

use std::fmt;

use uuid::Uuid;

/// Progress value marking a failed task.
pub const FAILED_PROGRESS: f32 = -1.0;

/// Deterministic correlation key for one `execute` call's callbacks.
///
/// Derived from the URL with a name-based UUID, so the same URL always maps
/// to the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// Builds the identifier for `url`.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        Self(format!("download_{}", Self::uuid_for(url)))
    }

    /// Short stable hash used to name temp files.
    #[must_use]
    pub fn short_hash(&self) -> &str {
        let hex = self.0.trim_start_matches("download_");
        &hex[..hex.len().min(16)]
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn uuid_for(url: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
            .simple()
            .to_string()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Caller-owned record of one download.
///
/// The engine never stores these; callers keep them in their own map keyed
/// by [`TaskId`] and update them from observer callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    id: TaskId,
    url: String,
    filename: Option<String>,
    progress: f32,
}

impl DownloadTask {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: TaskId::from_url(&url),
            url,
            filename: None,
            progress: 0.0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolved filename, once known.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
    }

    /// Fraction in `[0, 1]`, or [`FAILED_PROGRESS`].
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Records progress, clamped to `[0, 1]`. Ignored once failed.
    pub fn set_progress(&mut self, fraction: f32) {
        if self.is_failed() {
            return;
        }
        self.progress = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
    }

    pub fn mark_failed(&mut self) {
        self.progress = FAILED_PROGRESS;
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.progress < 0.0
    }
}

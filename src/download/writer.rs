//! Streams a response body into the temp file.
//!
//! The body is copied through a fixed-size buffer, each buffer-sized piece is
//! paid for with the configured speed limiter before it is written, and
//! progress is reported whenever the running total crosses a multiple of the
//! configured progress interval.

use std::path::Path;

use futures_util::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::config::DownloadConfig;
use super::error::DownloadError;
use super::listener::Notifier;
use super::transport::FetchResponse;

/// Emits progress each time the byte count crosses an interval boundary.
#[derive(Debug)]
struct ProgressGate {
    interval: u64,
    next_threshold: u64,
    last_reported: Option<u64>,
}

impl ProgressGate {
    fn new(interval: u64, start: u64) -> Self {
        let interval = interval.max(1);
        Self {
            interval,
            next_threshold: (start / interval + 1).saturating_mul(interval),
            last_reported: None,
        }
    }

    /// Returns `true` when `written` crossed the next boundary.
    fn crossed(&mut self, written: u64) -> bool {
        if written < self.next_threshold {
            return false;
        }
        self.next_threshold = (written / self.interval + 1).saturating_mul(self.interval);
        self.last_reported = Some(written);
        true
    }

    fn needs_final(&self, written: u64) -> bool {
        self.last_reported != Some(written)
    }
}

/// Writes `response`'s body into `temp_file` starting at `start_offset`.
///
/// Anything in the file beyond `start_offset` is discarded first. Returns the
/// file length after the transfer.
///
/// # Errors
///
/// - [`DownloadError::FileTooLarge`] if the declared or streamed size exceeds
///   `max_file_size`.
/// - [`DownloadError::Timeout`] if a body read stalls past `network_timeout`.
/// - [`DownloadError::Network`] if the stream fails or ends short of the
///   declared length.
/// - [`DownloadError::Io`] if the temp file cannot be opened or written.
/// - [`DownloadError::Cancelled`] if `cancel` fires.
#[instrument(skip_all, fields(path = %temp_file.display(), start_offset = start_offset))]
pub(crate) async fn write_body(
    response: FetchResponse,
    temp_file: &Path,
    start_offset: u64,
    notifier: &Notifier,
    config: &DownloadConfig,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let url = response.url.to_string();
    let total = response
        .content_length
        .map(|length| start_offset.saturating_add(length));
    if let Some(total) = total
        && total > config.max_file_size()
    {
        return Err(DownloadError::file_too_large(total, config.max_file_size()));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(temp_file)
        .await
        .map_err(|e| DownloadError::io(temp_file, e))?;
    file.set_len(start_offset)
        .await
        .map_err(|e| DownloadError::io(temp_file, e))?;
    file.seek(std::io::SeekFrom::Start(start_offset))
        .await
        .map_err(|e| DownloadError::io(temp_file, e))?;

    let buffer_size = config.buffer_size();
    let mut writer = BufWriter::with_capacity(buffer_size, file);
    let mut body = response.into_body();
    let mut written = start_offset;
    let mut gate = ProgressGate::new(config.progress_interval(), start_offset);

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = tokio::time::timeout(config.network_timeout(), body.next()) => next,
        };
        let chunk = match next {
            Err(_elapsed) => return Err(DownloadError::timeout(&url)),
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };

        for piece in chunk.chunks(buffer_size) {
            if let Some(limiter) = config.speed_limiter() {
                tokio::select! {
                    () = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    () = limiter.acquire(piece.len() as u64) => {}
                }
            }

            writer
                .write_all(piece)
                .await
                .map_err(|e| DownloadError::io(temp_file, e))?;
            written += piece.len() as u64;

            if written > config.max_file_size() {
                return Err(DownloadError::file_too_large(written, config.max_file_size()));
            }
            if gate.crossed(written) {
                notifier.progress(written, total.unwrap_or(0));
            }
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(temp_file, e))?;

    if let Some(total) = total
        && written != total
    {
        return Err(DownloadError::network(
            url,
            format!("body ended at {written} of {total} bytes"),
        ));
    }

    if gate.needs_final(written) {
        notifier.progress(written, written);
    }

    debug!(bytes = written, "body written");
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use futures_util::stream;
    use reqwest::header::HeaderMap;
    use tempfile::TempDir;
    use url::Url;

    use super::*;
    use crate::download::config::NotificationContext;
    use crate::download::listener::tests::{Recorded, RecordingListener};
    use crate::download::task::TaskId;
    use crate::download::transport::BodyStream;

    const MIB: u64 = 1024 * 1024;

    fn notifier(listener: &Arc<RecordingListener>) -> Notifier {
        Notifier::new(
            TaskId::from_url("https://a.test/file"),
            listener.clone(),
            &NotificationContext::Inline,
        )
    }

    fn chunked_response(total: usize, chunk: usize, declared: Option<u64>) -> FetchResponse {
        let chunks: Vec<Result<Bytes, DownloadError>> = (0..total)
            .step_by(chunk)
            .map(|start| {
                let len = chunk.min(total - start);
                Ok(Bytes::from(vec![(start % 251) as u8; len]))
            })
            .collect();
        let body: BodyStream = Box::pin(stream::iter(chunks));
        FetchResponse::new(
            200,
            Url::parse("https://a.test/file").unwrap(),
            HeaderMap::new(),
            declared,
            body,
        )
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_total() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path()).with_progress_interval(MIB);
        let size = 10 * MIB as usize;

        let written = write_body(
            chunked_response(size, 64 * 1024 + 7, Some(size as u64)),
            &path,
            0,
            &notifier(&listener),
            &config,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(written, size as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size as u64);

        let progress: Vec<(u64, u64)> = listener
            .events()
            .into_iter()
            .map(|event| match event {
                Recorded::Progress { downloaded, total } => (downloaded, total),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert!(progress.len() >= 10);
        assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(progress.iter().all(|(_, total)| *total == size as u64));
        assert_eq!(progress.last().unwrap().0, size as u64);
    }

    #[tokio::test]
    async fn test_resume_appends_after_offset_and_drops_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        std::fs::write(&path, b"abcdXXXX").unwrap();
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path());

        let response = FetchResponse::from_bytes(
            206,
            Url::parse("https://a.test/file").unwrap(),
            HeaderMap::new(),
            b"efgh".to_vec(),
        );
        let written = write_body(
            response,
            &path,
            4,
            &notifier(&listener),
            &config,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(written, 8);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefgh");
        assert_eq!(
            listener.events().last(),
            Some(&Recorded::Progress {
                downloaded: 8,
                total: 8
            })
        );
    }

    #[tokio::test]
    async fn test_declared_size_over_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path()).with_max_file_size(10);

        let result = write_body(
            chunked_response(20, 5, Some(20)),
            &path,
            0,
            &notifier(&listener),
            &config,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DownloadError::FileTooLarge { size: 20, limit: 10 })));
    }

    #[tokio::test]
    async fn test_undeclared_stream_over_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path()).with_max_file_size(10);

        let result = write_body(
            chunked_response(20, 5, None),
            &path,
            0,
            &notifier(&listener),
            &config,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DownloadError::FileTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_short_body_is_a_network_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path());

        let result = write_body(
            chunked_response(10, 5, Some(12)),
            &path,
            0,
            &notifier(&listener),
            &config,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Network { .. })));
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path());

        let body: BodyStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(DownloadError::timeout("https://a.test/file")),
        ]));
        let response = FetchResponse::new(
            200,
            Url::parse("https://a.test/file").unwrap(),
            HeaderMap::new(),
            Some(6),
            body,
        );
        let result = write_body(
            response,
            &path,
            0,
            &notifier(&listener),
            &config,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DownloadError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_transfer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.part");
        let listener = Arc::new(RecordingListener::default());
        let config = DownloadConfig::for_sandbox(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let body: BodyStream = Box::pin(stream::pending::<Result<Bytes, DownloadError>>());
        let response = FetchResponse::new(
            200,
            Url::parse("https://a.test/file").unwrap(),
            HeaderMap::new(),
            None,
            body,
        );
        let result = write_body(response, &path, 0, &notifier(&listener), &config, &cancel).await;
        assert!(matches!(result, Err(DownloadError::Cancelled)));
    }

    #[test]
    fn test_progress_gate_skips_to_next_boundary() {
        let mut gate = ProgressGate::new(100, 0);
        assert!(!gate.crossed(99));
        assert!(gate.crossed(250));
        assert!(!gate.crossed(299));
        assert!(gate.crossed(300));
        assert!(!gate.needs_final(300));
        assert!(gate.needs_final(350));
    }

    #[test]
    fn test_progress_gate_starts_after_resume_offset() {
        let mut gate = ProgressGate::new(100, 150);
        assert!(!gate.crossed(199));
        assert!(gate.crossed(200));
    }
}

//! Filename extraction and sanitization for downloads.
//!
//! The destination name is taken, in priority order, from the
//! `Content-Disposition` header, the last segment of the response URL, or a
//! generated `download_<timestamp>.dat` fallback. Every candidate goes through
//! [`sanitize_filename`] before use.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::CONTENT_DISPOSITION;
use tracing::debug;
use url::Url;

use super::constants::{FILENAME_SAFETY_MARGIN, MAX_FILENAME_BYTES};
use super::error::DownloadError;
use super::transport::FetchResponse;

/// Device names reserved on Windows, compared case-insensitively.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Unicode control/format/private-use/unassigned code points not covered by C0/C1.
static UNICODE_CONTROL: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"[\p{Cc}\p{Cf}\p{Co}\p{Cn}]").expect("unicode category regex is valid") // Static pattern, safe to panic
});

/// Where a resolved filename came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameSource {
    /// `Content-Disposition` header.
    ContentDisposition,
    /// Last path segment of the response URL.
    UrlPath,
    /// Timestamped fallback.
    Generated,
}

/// A sanitized destination filename and its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilename {
    /// The sanitized name.
    pub name: String,
    /// Which candidate produced it.
    pub source: FilenameSource,
}

impl ResolvedFilename {
    fn new(name: String, source: FilenameSource) -> Self {
        Self { name, source }
    }
}

/// Derives a safe destination filename from response metadata.
#[must_use]
pub fn resolve_filename(response: &FetchResponse) -> ResolvedFilename {
    let from_header = response
        .headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_content_disposition)
        .map(|raw| sanitize_filename(&raw))
        .filter(|name| !name.is_empty());
    if let Some(name) = from_header {
        return ResolvedFilename::new(name, FilenameSource::ContentDisposition);
    }

    if let Some(name) = filename_from_url(&response.url) {
        return ResolvedFilename::new(name, FilenameSource::UrlPath);
    }

    let generated = generate_default_filename();
    debug!(filename = %generated, "no usable filename in response, using generated name");
    ResolvedFilename::new(generated, FilenameSource::Generated)
}

/// Checks that a resumed response still names the file captured on the probe.
///
/// A generated fallback on either side carries no server identity and is
/// accepted as-is.
///
/// # Errors
///
/// Returns [`DownloadError::FilenameChanged`] when both names come from server
/// metadata and differ.
pub fn verify_filename_consistency(
    original: &ResolvedFilename,
    response: &FetchResponse,
) -> Result<ResolvedFilename, DownloadError> {
    let current = resolve_filename(response);
    if original.source == FilenameSource::Generated || current.source == FilenameSource::Generated
    {
        return Ok(original.clone());
    }
    if current.name != original.name {
        return Err(DownloadError::filename_changed(
            original.name.clone(),
            current.name,
        ));
    }
    Ok(current)
}

/// Parses a `Content-Disposition` header value and returns the decoded filename.
///
/// Handles:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example%20file.pdf` (RFC 5987)
///
/// The extended `filename*` form wins when both are present.
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `header`.
    let lower = header.to_ascii_lowercase();

    if let Some(pos) = lower.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim_start();
        let value = value.split(';').next().unwrap_or("").trim().trim_matches('"');
        // Format: charset'language'encoded_value
        if let Some(quote_pos) = value.find('\'')
            && let Some(rest) = value[quote_pos + 1..].find('\'')
        {
            let encoded = &value[quote_pos + 1 + rest + 1..];
            if !encoded.is_empty() {
                return Some(percent_decode(encoded));
            }
        }
    }

    let mut search_from = 0;
    while let Some(found) = lower[search_from..].find("filename=") {
        let pos = search_from + found;
        search_from = pos + "filename=".len();
        let value = header[search_from..].trim_start();
        let raw = if let Some(stripped) = value.strip_prefix('"') {
            stripped.find('"').map(|end| &stripped[..end])
        } else {
            let end = value.find(';').unwrap_or(value.len());
            Some(value[..end].trim())
        };
        if let Some(raw) = raw.filter(|raw| !raw.is_empty()) {
            return Some(percent_decode(raw));
        }
    }

    None
}

fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |decoded| decoded.into_owned())
}

/// Sanitizes a candidate filename for filesystem safety.
///
/// - C0/C1 control characters are removed.
/// - Remaining Unicode control, format, private-use, and unassigned code
///   points become `_`.
/// - `/ \ : * ? " < > |` become `_`; any `..` run collapses to `_`.
/// - Leading and trailing dots and whitespace are stripped.
/// - The result is truncated to `MAX_FILENAME_BYTES - FILENAME_SAFETY_MARGIN`
///   bytes on a character boundary.
/// - Reserved device names get a trailing `_`.
///
/// May return an empty string; callers fall through to the next candidate.
#[must_use]
pub fn sanitize_filename(raw: &str) -> String {
    let without_c0_c1: String = raw
        .chars()
        .filter(|c| !matches!(*c as u32, 0x00..=0x1F | 0x7F..=0x9F))
        .collect();
    let without_unicode_controls = UNICODE_CONTROL.replace_all(&without_c0_c1, "_");

    let replaced: String = without_unicode_controls
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();
    let replaced = replaced.replace("..", "_");

    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let truncated = truncate_to_bytes(trimmed, MAX_FILENAME_BYTES - FILENAME_SAFETY_MARGIN);
    let truncated = truncated.trim_end_matches(|c: char| c == '.' || c.is_whitespace());

    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(truncated))
    {
        format!("{truncated}_")
    } else {
        truncated.to_string()
    }
}

fn truncate_to_bytes(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Last non-empty URL path segment, percent-decoded and sanitized.
fn filename_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let name = sanitize_filename(&percent_decode(last));
    (!name.is_empty()).then_some(name)
}

/// Timestamped fallback, e.g. `download_20250825_143056.dat`.
fn generate_default_filename() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    format!("download_{timestamp}.dat")
}

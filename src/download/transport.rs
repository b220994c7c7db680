//! HTTP transport seam used by the engine.
//!
//! The engine only needs to issue a GET with custom headers and read back the
//! status, headers, final URL, declared length, and a streamed body.
//! [`HttpTransport`] captures exactly that, so tests can script responses and
//! failures without a socket. [`ReqwestTransport`] is the production
//! implementation.

use std::error::Error as _;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, instrument};
use url::Url;

use super::constants::DEFAULT_NETWORK_TIMEOUT;
use super::error::DownloadError;

/// Streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// A GET request to issue.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URL.
    pub url: Url,
    /// Extra request headers.
    pub headers: HeaderMap,
}

impl FetchRequest {
    /// Creates a request with no extra headers.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Adds (or replaces) a header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A response whose body has not been read yet.
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: Url,
    /// Response headers.
    pub headers: HeaderMap,
    /// Length of this response's body, when declared.
    pub content_length: Option<u64>,
    body: BodyStream,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    /// Creates a response from its parts.
    #[must_use]
    pub fn new(
        status: u16,
        url: Url,
        headers: HeaderMap,
        content_length: Option<u64>,
        body: BodyStream,
    ) -> Self {
        Self {
            status,
            url,
            headers,
            content_length,
            body,
        }
    }

    /// Creates a response with an in-memory body of known length.
    #[must_use]
    pub fn from_bytes(status: u16, url: Url, headers: HeaderMap, body: Vec<u8>) -> Self {
        let length = body.len() as u64;
        let body: BodyStream = Box::pin(stream::once(async move { Ok(Bytes::from(body)) }));
        Self::new(status, url, headers, Some(length), body)
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Consumes the response and returns its body stream.
    #[must_use]
    pub fn into_body(self) -> BodyStream {
        self.body
    }
}

/// Injectable HTTP client used by the engine.
///
/// Implementations must be cancel-safe: dropping the returned future (or the
/// body stream) aborts the underlying request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a GET and returns once headers are available.
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    async fn get(&self, request: FetchRequest) -> Result<FetchResponse, DownloadError>;
}

/// [`HttpTransport`] backed by a pooled `reqwest` client.
///
/// Created once and reused for every request, taking advantage of connection
/// pooling. Transparent decompression is not enabled, so byte offsets in
/// `Range` requests always match bytes on disk.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default connect timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidInput`] if the client cannot be built.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_settings(DEFAULT_NETWORK_TIMEOUT, &default_user_agent())
    }

    /// Creates a transport with an explicit connect timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidInput`] if the client cannot be built.
    #[instrument(level = "debug")]
    pub fn with_settings(connect_timeout: Duration, user_agent: &str) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DownloadError::invalid_input(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn get(&self, request: FetchRequest) -> Result<FetchResponse, DownloadError> {
        let url_text = request.url.to_string();
        let response = self
            .client
            .get(request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url_text, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let content_length = response.content_length();
        debug!(status, ?content_length, "response headers received");

        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| map_reqwest_error(&url_text, e)));

        Ok(FetchResponse::new(
            status,
            final_url,
            headers,
            content_length,
            Box::pin(body),
        ))
    }
}

/// User agent sent by [`ReqwestTransport::new`].
#[must_use]
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

/// Maps a reqwest error onto the retry-relevant transport kinds.
fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else if error.is_connect() {
        if is_tls_failure(&error) {
            DownloadError::tls_handshake(url, error)
        } else {
            DownloadError::connection_refused(url, error)
        }
    } else {
        DownloadError::network(url, error)
    }
}

/// Checks the causes of a connect error for a TLS/certificate failure.
///
/// The walk starts below the reqwest error, whose message carries the URL.
fn is_tls_failure(error: &reqwest::Error) -> bool {
    let mut current = error.source();
    while let Some(err) = current {
        if let Some(io_error) = err.downcast_ref::<io::Error>() {
            match io_error.kind() {
                // rustls reports handshake and certificate failures as InvalidData
                io::ErrorKind::InvalidData => return true,
                io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::AddrNotAvailable => return false,
                _ => {}
            }
        }
        let text = err.to_string().to_lowercase();
        if text.contains("certificate")
            || text.contains("tls")
            || text.contains("ssl")
            || text.contains("handshake")
        {
            return true;
        }
        current = err.source();
    }
    false
}

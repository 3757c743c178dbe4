//! HTTP client wrapper for probes and ranged transfers.
//!
//! [`HttpClient`] owns three reqwest clients sharing one cookie jar:
//! a probe client that never follows redirects (the resolver walks them
//! itself), a transfer client with cookies, and a cookieless transfer client
//! for requests whose cookie policy forbids sending them.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_TYPE, RANGE, REFERER};
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, TRANSFER_REDIRECT_LIMIT};
use super::error::DownloadError;
use crate::user_agent;

/// Per-request parameters carried by a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Query parameters appended to the URL.
    pub get: Vec<(String, String)>,
    /// Form fields; when present the request is sent as a POST.
    pub post: Option<Vec<(String, String)>>,
    /// Value for the `Referer` header.
    pub referer: Option<String>,
    /// Whether cookies from the shared jar are sent and stored.
    pub cookies: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            get: Vec::new(),
            post: None,
            referer: None,
            cookies: true,
        }
    }
}

/// Inclusive byte range for a `Range` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive), open-ended when `None`.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range starting at `start` and running to the end of the resource.
    #[must_use]
    pub fn from(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Closed range `start..=end`.
    #[must_use]
    pub fn closed(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Header value, e.g. `bytes=100-199`.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// HTTP client used by the resolver and the transfer executor.
///
/// Create once and clone freely; clones share connection pools and cookies.
#[derive(Debug, Clone)]
pub struct HttpClient {
    probe: Client,
    transfer: Client,
    cookieless: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with default timeouts (30 s connect, 5 min read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self::with_cookie_jar_and_timeouts(
            Arc::new(Jar::default()),
            connect_timeout_secs,
            read_timeout_secs,
        )
    }

    /// Creates a client around an existing cookie jar.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    #[instrument(level = "debug", skip(cookie_jar))]
    pub fn with_cookie_jar_and_timeouts(
        cookie_jar: Arc<Jar>,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Self {
        let timeouts = (connect_timeout_secs, read_timeout_secs);
        let probe = build_client(Some(Arc::clone(&cookie_jar)), timeouts, false)
            .expect("failed to build probe HTTP client with static configuration");
        let transfer = build_client(Some(cookie_jar), timeouts, true)
            .expect("failed to build transfer HTTP client with static configuration");
        let cookieless = build_client(None, timeouts, true)
            .expect("failed to build cookieless HTTP client with static configuration");
        Self {
            probe,
            transfer,
            cookieless,
        }
    }

    /// Issues a header-only request without following redirects.
    ///
    /// Any status is returned to the caller; only transport failures error.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for unparseable URLs and
    /// [`DownloadError::Network`]/[`DownloadError::Timeout`] on transport failure.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn head(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        self.probe
            .head(parsed)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))
    }

    /// Sends a GET (or POST when form fields are present) for a transfer.
    ///
    /// A `range` adds the `Range` header and asks for an identity encoding so
    /// byte offsets refer to the stored representation. The response is
    /// returned whatever its status; the executor classifies it.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for unparseable URLs and
    /// [`DownloadError::Network`]/[`DownloadError::Timeout`] on transport failure.
    #[instrument(level = "debug", skip(self, options), fields(url = %url))]
    pub async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        range: Option<ByteRange>,
    ) -> Result<reqwest::Response, DownloadError> {
        let target = build_url(url, &options.get)?;
        let client = if options.cookies {
            &self.transfer
        } else {
            &self.cookieless
        };

        let mut request = match &options.post {
            Some(fields) => client
                .post(target)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(fields)),
            None => client.get(target),
        };
        if let Some(referer) = &options.referer {
            request = request.header(REFERER, referer);
        }
        if let Some(range) = range {
            debug!(range = %range.header_value(), "requesting byte range");
            request = request
                .header(RANGE, range.header_value())
                .header(ACCEPT_ENCODING, "identity");
        }

        request
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))
    }
}

/// Appends GET parameters to the URL.
pub(crate) fn build_url(url: &str, params: &[(String, String)]) -> Result<Url, DownloadError> {
    let mut parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::invalid_url(url));
    }
    if !params.is_empty() {
        parsed.query_pairs_mut().extend_pairs(params);
    }
    Ok(parsed)
}

fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

fn build_client(
    cookie_jar: Option<Arc<Jar>>,
    (connect_timeout_secs, read_timeout_secs): (u64, u64),
    follow_redirects: bool,
) -> Result<Client, reqwest::Error> {
    let redirect = if follow_redirects {
        Policy::limited(TRANSFER_REDIRECT_LIMIT)
    } else {
        Policy::none()
    };
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .redirect(redirect)
        .user_agent(user_agent::default_user_agent());
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build()
}

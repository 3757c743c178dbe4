//! Error types for the download module.
//!
//! Every variant carries the context (URL, path, status) needed to turn it
//! into a job failure message without access to the original request.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while probing or transferring a resource.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with a status the transfer cannot work with.
    #[error("bad header: HTTP {status} downloading {url}")]
    BadHeader {
        /// The URL that returned the status.
        url: String,
        /// The offending HTTP status code.
        status: u16,
    },

    /// Local file system failure (disk full, permission denied, interrupted write).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The server closed the body before the announced range was delivered.
    #[error("incomplete body from {url}: expected {expected} bytes, received {received}")]
    Truncated {
        /// The URL being transferred.
        url: String,
        /// Bytes the range or content length announced.
        expected: u64,
        /// Bytes actually received.
        received: u64,
    },

    /// The transfer was cancelled by the scheduler.
    #[error("download of {url} aborted")]
    Aborted {
        /// The URL being transferred.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Maps a reqwest error, promoting timeouts to [`DownloadError::Timeout`].
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates a bad header error.
    pub fn bad_header(url: impl Into<String>, status: u16) -> Self {
        Self::BadHeader {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a truncated body error.
    pub fn truncated(url: impl Into<String>, expected: u64, received: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected,
            received,
        }
    }

    /// Creates an aborted error.
    pub fn aborted(url: impl Into<String>) -> Self {
        Self::Aborted { url: url.into() }
    }

    /// OS error code of a local I/O failure, if the platform reported one.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// HTTP status attached to a bad header error.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadHeader { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true when the scheduler cancelled the transfer.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs a URL or
// path the source error does not carry.

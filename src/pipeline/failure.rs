//! Failure classification and the premium → non-premium fallback decision.
//!
//! Every way an attempt can end early is a [`PipelineFailure`] tagged with a
//! [`FailureKind`]. The [`FallbackPolicy`] then decides whether the job gets
//! one more attempt without its account:
//!
//! ```
//! use fetchjob_core::job::AccountContext;
//! use fetchjob_core::pipeline::{FailureKind, FallbackDecision, FallbackPolicy, PipelineFailure};
//!
//! let policy = FallbackPolicy::new(true);
//! let failure = PipelineFailure::new(FailureKind::Network, "connection reset");
//!
//! match policy.decide(&failure, Some(&AccountContext::premium()), false, 1) {
//!     FallbackDecision::Fallback => println!("retrying without the account"),
//!     FallbackDecision::NoFallback { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::fmt;

use tracing::{debug, instrument};

use crate::download::DownloadError;
use crate::job::AccountContext;

/// What went wrong during an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The resolver ran out of redirect depth.
    RedirectLimitExceeded,
    /// The URL serves a page, not a file.
    NotResource,
    /// Local filesystem failure; carries the OS error code when known.
    IoFailure {
        /// OS error number.
        code: Option<i32>,
    },
    /// The server answered with an unusable status.
    BadHeader {
        /// HTTP status code.
        status: u16,
    },
    /// Connection, timeout or protocol failure.
    Network,
    /// The server reported the resource as gone (404/410).
    ResourceGone,
    /// The transfer ended without a file on disk.
    NoFileDownloaded,
    /// The integrity scan found an empty payload.
    EmptyFile,
    /// A premium attempt would exceed the account's remaining traffic.
    OutOfTraffic,
    /// An interactive challenge must be solved again.
    ChallengeRetry,
    /// The job was cancelled.
    Aborted,
    /// A failure turned terminal because no fallback was possible.
    NoFallbackAvailable,
}

impl FailureKind {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedirectLimitExceeded => "redirect_limit_exceeded",
            Self::NotResource => "not_resource",
            Self::IoFailure { .. } => "io_failure",
            Self::BadHeader { .. } => "bad_header",
            Self::Network => "network",
            Self::ResourceGone => "resource_gone",
            Self::NoFileDownloaded => "no_file_downloaded",
            Self::EmptyFile => "empty_file",
            Self::OutOfTraffic => "out_of_traffic",
            Self::ChallengeRetry => "challenge_retry",
            Self::Aborted => "aborted",
            Self::NoFallbackAvailable => "no_fallback_available",
        }
    }

    /// Returns true for kinds that end the job without any retry.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Aborted | Self::ChallengeRetry | Self::NoFallbackAvailable
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attempt's failure: its kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    /// Classification driving the retry decision.
    pub kind: FailureKind,
    /// Message reported on the job.
    pub message: String,
    /// Kind of the failure this one escalated, if any.
    pub cause: Option<FailureKind>,
}

impl PipelineFailure {
    /// Creates a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Failure of a job that was cancelled.
    #[must_use]
    pub fn aborted() -> Self {
        Self::new(FailureKind::Aborted, "Aborted")
    }

    /// Turns this failure terminal, keeping its message and kind as the cause.
    #[must_use]
    pub fn escalate(self) -> Self {
        if self.kind.is_final() {
            return self;
        }
        Self {
            kind: FailureKind::NoFallbackAvailable,
            message: self.message,
            cause: Some(self.kind),
        }
    }

    /// Kind of the underlying failure, looking through an escalation.
    #[must_use]
    pub fn root_kind(&self) -> &FailureKind {
        self.cause.as_ref().unwrap_or(&self.kind)
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for PipelineFailure {}

impl From<&DownloadError> for FailureKind {
    fn from(error: &DownloadError) -> Self {
        match error {
            DownloadError::Io { source, .. } => Self::IoFailure {
                code: source.raw_os_error(),
            },
            DownloadError::BadHeader { status, .. } => Self::BadHeader { status: *status },
            DownloadError::Aborted { .. } => Self::Aborted,
            DownloadError::Network { .. }
            | DownloadError::Timeout { .. }
            | DownloadError::InvalidUrl { .. }
            | DownloadError::Truncated { .. } => Self::Network,
        }
    }
}

impl From<DownloadError> for PipelineFailure {
    fn from(error: DownloadError) -> Self {
        let kind = FailureKind::from(&error);
        match kind {
            FailureKind::Aborted => Self::aborted(),
            FailureKind::IoFailure { code: Some(code) } => {
                Self::new(kind, format!("IOError {code}: {error}"))
            }
            _ => Self::new(kind, error.to_string()),
        }
    }
}

/// Whether a failed attempt is repeated under a downgraded account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Run once more without the account.
    Fallback,
    /// The failure is terminal.
    NoFallback {
        /// Human-readable reason.
        reason: String,
    },
}

/// Decides the single premium → non-premium fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    enabled: bool,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FallbackPolicy {
    /// Creates a policy; `enabled` mirrors the `fallback` config flag.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Decides what happens after `failure` on attempt `attempt` (1-indexed).
    ///
    /// A fallback happens at most once: only the first attempt, run under a
    /// premium account, of a job not marked `no_fallback` qualifies.
    #[instrument(skip(self, failure, account), fields(kind = %failure.kind))]
    #[must_use]
    pub fn decide(
        &self,
        failure: &PipelineFailure,
        account: Option<&AccountContext>,
        no_fallback: bool,
        attempt: u32,
    ) -> FallbackDecision {
        let refuse = |reason: &str| {
            debug!(reason, "no fallback");
            FallbackDecision::NoFallback {
                reason: reason.to_string(),
            }
        };

        if failure.kind.is_final() {
            return refuse("failure is final");
        }
        if !self.enabled {
            return refuse("fallback disabled");
        }
        if no_fallback {
            return refuse("job does not allow fallback");
        }
        if !account.is_some_and(|account| account.premium) {
            return refuse("attempt was not premium");
        }
        if attempt > 1 {
            return refuse("fallback already used");
        }

        debug!("falling back to non-premium attempt");
        FallbackDecision::Fallback
    }
}

//! Job status definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up.
    Idle,
    /// Passed the duplicate check, preparing the destination.
    Starting,
    /// Bytes are moving.
    Downloading,
    /// Parked until an external collaborator (e.g. a challenge) is ready.
    Waiting,
    /// Running the post-transfer integrity scan.
    Checking,
    /// Verified file on disk.
    Finished,
    /// Deliberately not transferred (duplicate).
    Skipped,
    /// Terminal failure.
    Failed,
    /// Cancelled by the scheduler.
    Aborted,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Idle,
        Self::Starting,
        Self::Downloading,
        Self::Waiting,
        Self::Checking,
        Self::Finished,
        Self::Skipped,
        Self::Failed,
        Self::Aborted,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Waiting => "waiting",
            Self::Checking => "checking",
            Self::Finished => "finished",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Still owned by a worker or the scheduler's queue.
    #[must_use]
    pub fn is_unfinished(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Starting | Self::Downloading | Self::Waiting | Self::Checking
        )
    }

    /// Terminal status counted as a package failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Aborted)
    }

    /// A same-named job in this status makes a new transfer redundant.
    #[must_use]
    pub fn claims_name(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Downloading | Self::Waiting | Self::Starting
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid job status: {s}"))
    }
}

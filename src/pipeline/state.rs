//! Pipeline states and the outcome of one run.

use std::fmt;

use super::failure::PipelineFailure;
use crate::job::{JobId, JobStatus};

/// Stage of a job inside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// An attempt begins.
    Created,
    /// The duplicate guard approved the target name.
    DuplicateChecked,
    /// The destination folder exists.
    Starting,
    /// Bytes are flowing.
    Transferring,
    /// The integrity scan runs.
    Verifying,
    /// The file is on disk and verified.
    Finished,
    /// A duplicate exists; nothing was transferred.
    Skipped,
    /// The attempt failed and a downgraded attempt follows.
    RetryPending,
    /// The job failed for good.
    Failed,
    /// The job waits for an interactive challenge to be solved again.
    Waiting,
    /// The job was cancelled.
    Aborted,
}

impl PipelineState {
    /// Returns true for states that end a run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Skipped | Self::Failed | Self::Waiting | Self::Aborted
        )
    }

    /// Job status reported for a terminal state.
    #[must_use]
    pub fn job_status(self) -> Option<JobStatus> {
        match self {
            Self::Finished => Some(JobStatus::Finished),
            Self::Skipped => Some(JobStatus::Skipped),
            Self::Failed => Some(JobStatus::Failed),
            Self::Waiting => Some(JobStatus::Waiting),
            Self::Aborted => Some(JobStatus::Aborted),
            _ => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::DuplicateChecked => "duplicate_checked",
            Self::Starting => "starting",
            Self::Transferring => "transferring",
            Self::Verifying => "verifying",
            Self::Finished => "finished",
            Self::Skipped => "skipped",
            Self::RetryPending => "retry_pending",
            Self::Failed => "failed",
            Self::Waiting => "waiting",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    /// Job that ran.
    pub job_id: JobId,
    /// Terminal state.
    pub state: PipelineState,
    /// Attempts made, including a fallback attempt.
    pub attempts: u32,
    /// Every state visited, in order.
    pub trace: Vec<PipelineState>,
    /// Failure of the last attempt, if it failed.
    pub failure: Option<PipelineFailure>,
    /// Why the job was skipped.
    pub skip_reason: Option<String>,
}

impl JobOutcome {
    /// Returns true when a verified file is on disk.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == PipelineState::Finished
    }

    /// Returns true when the run took the fallback path.
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.trace.contains(&PipelineState::RetryPending)
    }
}

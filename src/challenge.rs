//! Interactive challenge collaborator (e.g. a captcha solved out of band).
//!
//! Solving challenges is outside this crate. The pipeline only reports
//! whether the server accepted a solution and asks for a new one when a
//! transfer produced nothing while a challenge was outstanding.

use crate::job::JobId;

/// Tracks interactive challenges attached to jobs.
pub trait ChallengeHandler: Send + Sync {
    /// Returns true when `job_id` has an unresolved challenge.
    fn is_pending(&self, job_id: JobId) -> bool;

    /// Requests a fresh challenge for `job_id`.
    fn request_retry(&self, job_id: JobId);

    /// Reports that the last solution for `job_id` was accepted.
    fn mark_correct(&self, job_id: JobId);
}

/// Handler for jobs that never carry challenges.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChallenge;

impl ChallengeHandler for NoChallenge {
    fn is_pending(&self, _job_id: JobId) -> bool {
        false
    }

    fn request_retry(&self, _job_id: JobId) {}

    fn mark_correct(&self, _job_id: JobId) {}
}

//! Exit code logic for the fetchjob process.
//!
//! Single responsibility: map job outcomes to the process exit outcome.

use fetchjob_core::PipelineState;

use crate::ProcessExit;

/// Returns true when an outcome counts against the run.
pub(crate) fn is_failed(state: PipelineState) -> bool {
    !matches!(state, PipelineState::Finished | PipelineState::Skipped)
}

/// Determines the process exit outcome from completed and failed job counts.
pub(crate) fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

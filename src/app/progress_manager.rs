//! Per-job progress bars for download runs.

use std::sync::Arc;

use fetchjob_core::JobOutcome;
use fetchjob_core::download::ProgressFn;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Owns the bar set; hands out one bar per job.
pub(crate) struct ProgressManager {
    multi: Option<MultiProgress>,
}

impl ProgressManager {
    /// Creates a manager; when `enabled` is false every bar is a no-op.
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            multi: enabled.then(MultiProgress::new),
        }
    }

    /// Adds a bar labelled `name`.
    pub(crate) fn add(&self, name: &str) -> JobBar {
        let bar = self.multi.as_ref().map(|multi| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::with_template(
                    "{msg:30!} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
            );
            bar.set_message(name.to_string());
            bar
        });
        JobBar { bar }
    }
}

/// Progress bar of one job.
pub(crate) struct JobBar {
    bar: Option<ProgressBar>,
}

impl JobBar {
    /// Callback feeding transfer progress into the bar.
    pub(crate) fn callback(&self) -> Option<ProgressFn> {
        let bar = self.bar.clone()?;
        let callback: ProgressFn = Arc::new(move |done, total| {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(done);
        });
        Some(callback)
    }

    /// Freezes the bar with the job's terminal state.
    pub(crate) fn finish(&self, outcome: &JobOutcome) {
        if let Some(bar) = &self.bar {
            bar.abandon_with_message(format!("{} ({})", bar.message(), outcome.state));
        }
    }
}

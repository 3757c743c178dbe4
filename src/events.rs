//! Fire-and-forget notifications emitted by the pipeline.

use std::path::PathBuf;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

use crate::job::JobId;

/// Notification emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transfer of `url` into `path` is about to begin.
    DownloadStart {
        /// Job being transferred.
        job_id: JobId,
        /// URL being fetched.
        url: String,
        /// Provisional destination path.
        path: PathBuf,
    },
    /// A file landed on disk and passed verification.
    DownloadCheck {
        /// Job being verified.
        job_id: JobId,
    },
    /// A job attempt finished, whatever its outcome.
    DownloadProcessed {
        /// Job that finished.
        job_id: JobId,
    },
    /// Every job of a package reached a terminal status.
    PackageProcessed {
        /// Package that finished.
        package_id: u64,
    },
    /// Like [`Event::PackageProcessed`], with at least one failed job.
    PackageFailed {
        /// Package with failures.
        package_id: u64,
    },
}

/// Receives pipeline notifications; must not block.
pub trait EventSink: Send + Sync {
    /// Delivers one event. Delivery failures are the sink's concern.
    fn dispatch(&self, event: Event);
}

/// Sink that only writes events to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn dispatch(&self, event: Event) {
        match &event {
            Event::PackageProcessed { package_id } => {
                info!(package_id, "Package finished");
            }
            Event::PackageFailed { package_id } => {
                warn!(package_id, "Package finished with failures");
            }
            _ => debug!(?event, "event"),
        }
    }
}

/// Sink forwarding events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: UnboundedSender<Event>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<Event>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn dispatch(&self, event: Event) {
        // A dropped receiver just means nobody listens any more.
        let _ = self.sender.send(event);
    }
}

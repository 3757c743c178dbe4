//! Jobs, packages and account context.
//!
//! A [`Job`] is one file to retrieve. Jobs are grouped into a [`Package`]
//! sharing a destination folder. The scheduler registers every live job in
//! a [`JobRegistry`]; the pipeline reads siblings from it and mutates only
//! the job it is running, through that job's [`JobHandle`].

mod registry;
mod status;

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::download::RequestOptions;

pub use registry::JobRegistry;
pub use status::JobStatus;

/// Job identifier, unique within a registry.
pub type JobId = u64;

/// A named group of jobs sharing a destination folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Package identifier.
    pub id: u64,
    /// Display name.
    pub name: String,
    /// Folder below the download folder; names are unique only within it.
    pub folder: String,
}

impl Package {
    /// Creates a package whose folder equals its name.
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            folder: name.clone(),
            name,
        }
    }
}

/// Account the attempt runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountContext {
    /// Premium accounts unlock fallback and traffic checks.
    pub premium: bool,
    /// Remaining traffic in bytes; `Some(-1)` is unlimited, `None` unknown.
    pub traffic_left: Option<i64>,
}

impl AccountContext {
    /// Traffic value meaning "no limit".
    pub const UNLIMITED_TRAFFIC: i64 = -1;

    /// Premium account with unlimited traffic.
    #[must_use]
    pub fn premium() -> Self {
        Self {
            premium: true,
            traffic_left: Some(Self::UNLIMITED_TRAFFIC),
        }
    }

    /// Non-premium account.
    #[must_use]
    pub fn free() -> Self {
        Self {
            premium: false,
            traffic_left: Some(Self::UNLIMITED_TRAFFIC),
        }
    }

    /// Returns true when a transfer of `size` bytes exceeds the remaining traffic.
    ///
    /// Unknown traffic counts as exhausted.
    #[must_use]
    pub fn out_of_traffic(&self, size: u64) -> bool {
        match self.traffic_left {
            None => true,
            Some(Self::UNLIMITED_TRAFFIC) => false,
            Some(left) => i64::try_from(size).map_or(true, |bytes| bytes > left),
        }
    }
}

/// One file to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Unique id.
    pub id: JobId,
    /// Source URL.
    pub url: String,
    /// Target file name; final only after the duplicate check approves it.
    pub name: String,
    /// Bytes on disk after the last attempt.
    pub size: u64,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Owning package.
    pub package: Arc<Package>,
    /// Set only once a file is durably written and present on disk.
    pub local_path: Option<PathBuf>,
    /// Label of whatever produced this job (plugin or source name).
    pub source: String,
    /// Never retry this job under a downgraded account.
    pub no_fallback: bool,
    /// Validate the URL with the resource resolver before transferring.
    pub resolve_resource: bool,
    /// Per-job chunk override; positive values replace the account limit.
    pub chunks: Option<i32>,
    /// Query/form parameters, referer and cookie policy for the transfer.
    pub options: RequestOptions,
    /// Skip/failure reason or other status message.
    pub message: Option<String>,
}

impl Job {
    /// Creates an idle job.
    #[must_use]
    pub fn new(
        id: JobId,
        url: impl Into<String>,
        name: impl Into<String>,
        package: Arc<Package>,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            name: name.into(),
            size: 0,
            status: JobStatus::Idle,
            package,
            local_path: None,
            source: "direct".to_string(),
            no_fallback: false,
            resolve_resource: false,
            chunks: None,
            options: RequestOptions::default(),
            message: None,
        }
    }

    /// Sets the source label.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Shared, lock-guarded reference to a registered job.
///
/// Reads take a shared lock; every mutation happens under the write lock so
/// other workers scanning the registry never observe a half-applied change.
#[derive(Debug, Clone)]
pub struct JobHandle(Arc<RwLock<Job>>);

impl JobHandle {
    /// Wraps a job.
    #[must_use]
    pub fn new(job: Job) -> Self {
        Self(Arc::new(RwLock::new(job)))
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, Job> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` atomically under the write lock.
    pub fn update<R>(&self, change: impl FnOnce(&mut Job) -> R) -> R {
        let mut job = self.0.write().unwrap_or_else(PoisonError::into_inner);
        change(&mut job)
    }

    /// Copy of the current job.
    #[must_use]
    pub fn snapshot(&self) -> Job {
        self.read().clone()
    }

    /// Job id.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.read().id
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    /// Current target name.
    #[must_use]
    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    /// Owning package.
    #[must_use]
    pub fn package(&self) -> Arc<Package> {
        Arc::clone(&self.read().package)
    }

    /// Sets the status.
    pub fn set_status(&self, status: JobStatus) {
        self.update(|job| job.status = status);
    }

    /// Sets the status together with a message.
    pub fn set_status_with_message(&self, status: JobStatus, message: impl Into<String>) {
        let message = message.into();
        self.update(|job| {
            job.status = status;
            job.message = Some(message);
        });
    }
}

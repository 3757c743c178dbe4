//! Duplicate detection before a transfer starts.
//!
//! Order is fixed: same-named jobs in flight in the same package folder are
//! checked first, then the file on disk. The disk checks race against jobs
//! starting concurrently; the guarantee is best-effort.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::download::filename::next_free_name;
use crate::job::{JobHandle, JobId, JobRegistry};

/// Reason used when no prior source label is known.
pub const FILE_EXISTS: &str = "File exists";

/// Failure of the external duplicate index.
#[derive(Debug, Error)]
#[error("duplicate lookup failed: {0}")]
pub struct LookupError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// External index of previously retrieved files.
#[async_trait]
pub trait DuplicateIndex: Send + Sync {
    /// Source label of another job that stored `name` in `folder`.
    async fn find_duplicate(
        &self,
        job_id: JobId,
        folder: &str,
        name: &str,
    ) -> Result<Option<String>, LookupError>;
}

/// Index that never knows about prior files.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndex;

#[async_trait]
impl DuplicateIndex for NoIndex {
    async fn find_duplicate(
        &self,
        _job_id: JobId,
        _folder: &str,
        _name: &str,
    ) -> Result<Option<String>, LookupError> {
        Ok(None)
    }
}

/// Verdict of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Transfer under this (possibly disambiguated) name.
    Proceed(String),
    /// Do not transfer; the reason names who already has the file.
    Skip(String),
}

/// Decides whether a job's target collides with another job or a file.
pub struct DuplicateGuard<'a> {
    registry: &'a JobRegistry,
    index: &'a dyn DuplicateIndex,
    download_folder: &'a Path,
    skip_existing: bool,
}

impl<'a> DuplicateGuard<'a> {
    /// Creates a guard over a registry, an index and a download folder.
    #[must_use]
    pub fn new(
        registry: &'a JobRegistry,
        index: &'a dyn DuplicateIndex,
        download_folder: &'a Path,
        skip_existing: bool,
    ) -> Self {
        Self {
            registry,
            index,
            download_folder,
            skip_existing,
        }
    }

    /// Destination of `name` inside package folder `folder`.
    #[must_use]
    pub fn destination(&self, folder: &str, name: &str) -> PathBuf {
        self.download_folder.join(folder).join(name)
    }

    /// Runs the duplicate check for `job`.
    ///
    /// A zero-byte file at the destination is treated as fresh: the job's
    /// stale local path (and the file it points at) is dropped.
    #[instrument(skip(self, job), fields(job_id = job.id()))]
    pub async fn check(&self, job: &JobHandle) -> Decision {
        let (id, name, folder) = {
            let current = job.read();
            (
                current.id,
                current.name.clone(),
                current.package.folder.clone(),
            )
        };

        for other in self.registry.in_folder(&folder, id) {
            let other = other.read();
            if other.name == name && other.status.claims_name() {
                debug!(other = other.id, status = %other.status, "same file in flight");
                return Decision::Skip(other.source.clone());
            }
        }

        let destination = self.destination(&folder, &name);
        let Ok(metadata) = tokio::fs::metadata(&destination).await else {
            return Decision::Proceed(name);
        };

        if metadata.len() == 0 {
            let stale = job.update(|current| current.local_path.take());
            if let Some(stale) = stale
                && let Err(error) = tokio::fs::remove_file(&stale).await
                && error.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %stale.display(), error = %error, "failed to remove stale file");
            }
            return Decision::Proceed(name);
        }

        if self.skip_existing {
            let prior = match self.index.find_duplicate(id, &folder, &name).await {
                Ok(prior) => prior,
                Err(error) => {
                    warn!(error = %error, "duplicate index unavailable");
                    None
                }
            };
            return Decision::Skip(prior.unwrap_or_else(|| FILE_EXISTS.to_string()));
        }

        let folder_path = self.download_folder.join(&folder);
        let renamed = next_free_name(&folder_path, &name);
        debug!(from = %name, to = %renamed, "target exists, adding counter");
        Decision::Proceed(renamed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::{Job, JobStatus, Package};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FixedIndex(Option<&'static str>);

    #[async_trait]
    impl DuplicateIndex for FixedIndex {
        async fn find_duplicate(
            &self,
            _job_id: JobId,
            _folder: &str,
            _name: &str,
        ) -> Result<Option<String>, LookupError> {
            Ok(self.0.map(str::to_string))
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl DuplicateIndex for FailingIndex {
        async fn find_duplicate(
            &self,
            _job_id: JobId,
            _folder: &str,
            _name: &str,
        ) -> Result<Option<String>, LookupError> {
            Err(LookupError("database locked".into()))
        }
    }

    fn register(registry: &JobRegistry, package: &Arc<Package>, name: &str) -> JobHandle {
        registry.register(Job::new(
            registry.next_id(),
            "https://h.example/f",
            name,
            Arc::clone(package),
        ))
    }

    #[tokio::test]
    async fn test_in_flight_same_name_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let registry = JobRegistry::new();
        let package = Arc::new(Package::new(1, "X"));
        let other = register(&registry, &package, "movie.mp4");
        other.update(|job| {
            job.status = JobStatus::Downloading;
            job.source = "hoster-a".to_string();
        });
        let job = register(&registry, &package, "movie.mp4");

        let guard = DuplicateGuard::new(&registry, &NoIndex, temp_dir.path(), false);
        assert_eq!(
            guard.check(&job).await,
            Decision::Skip("hoster-a".to_string())
        );
    }

    #[tokio::test]
    async fn test_in_flight_idle_or_other_folder_does_not_block() {
        let temp_dir = TempDir::new().unwrap();
        let registry = JobRegistry::new();
        let x = Arc::new(Package::new(1, "X"));
        let y = Arc::new(Package::new(2, "Y"));
        register(&registry, &x, "movie.mp4");
        register(&registry, &y, "movie.mp4").set_status(JobStatus::Downloading);
        let job = register(&registry, &x, "movie.mp4");

        let guard = DuplicateGuard::new(&registry, &NoIndex, temp_dir.path(), false);
        assert_eq!(
            guard.check(&job).await,
            Decision::Proceed("movie.mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_zero_byte_file_is_fresh_and_clears_local_path() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("X");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("movie.mp4"), b"").unwrap();
        let stale = folder.join("old.part");
        std::fs::write(&stale, b"").unwrap();

        let registry = JobRegistry::new();
        let package = Arc::new(Package::new(1, "X"));
        let job = register(&registry, &package, "movie.mp4");
        job.update(|current| current.local_path = Some(stale.clone()));

        let guard = DuplicateGuard::new(&registry, &NoIndex, temp_dir.path(), true);
        assert_eq!(
            guard.check(&job).await,
            Decision::Proceed("movie.mp4".to_string())
        );
        assert!(job.read().local_path.is_none());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_existing_file_gets_counter_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("X");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("movie.mp4"), b"data").unwrap();

        let registry = JobRegistry::new();
        let package = Arc::new(Package::new(1, "X"));
        let job = register(&registry, &package, "movie.mp4");
        let guard = DuplicateGuard::new(&registry, &NoIndex, temp_dir.path(), false);
        assert_eq!(
            guard.check(&job).await,
            Decision::Proceed("movie (1).mp4".to_string())
        );

        std::fs::write(folder.join("movie (1).mp4"), b"data").unwrap();
        assert_eq!(
            guard.check(&job).await,
            Decision::Proceed("movie (2).mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_skip_existing_consults_index() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("X");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("a.bin"), b"data").unwrap();

        let registry = JobRegistry::new();
        let package = Arc::new(Package::new(1, "X"));
        let job = register(&registry, &package, "a.bin");

        let known = FixedIndex(Some("hoster-b"));
        let guard = DuplicateGuard::new(&registry, &known, temp_dir.path(), true);
        assert_eq!(guard.check(&job).await, Decision::Skip("hoster-b".to_string()));

        let unknown = FixedIndex(None);
        let guard = DuplicateGuard::new(&registry, &unknown, temp_dir.path(), true);
        assert_eq!(guard.check(&job).await, Decision::Skip(FILE_EXISTS.to_string()));

        let guard = DuplicateGuard::new(&registry, &FailingIndex, temp_dir.path(), true);
        assert_eq!(guard.check(&job).await, Decision::Skip(FILE_EXISTS.to_string()));
    }

    #[tokio::test]
    async fn test_in_flight_check_precedes_disk_check() {
        let temp_dir = TempDir::new().unwrap();
        let folder = temp_dir.path().join("X");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("a.bin"), b"").unwrap();

        let registry = JobRegistry::new();
        let package = Arc::new(Package::new(1, "X"));
        let other = register(&registry, &package, "a.bin");
        other.set_status(JobStatus::Finished);
        let job = register(&registry, &package, "a.bin");

        let guard = DuplicateGuard::new(&registry, &NoIndex, temp_dir.path(), false);
        assert!(matches!(guard.check(&job).await, Decision::Skip(_)));
    }
}

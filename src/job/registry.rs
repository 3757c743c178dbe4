//! Registry of live jobs shared between the scheduler and pipelines.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{Job, JobHandle, JobId};

/// Concurrent map of live jobs.
///
/// Lookups never block other readers; each job's fields are guarded by its
/// own [`JobHandle`] lock so status changes are atomic per job.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, JobHandle>,
    next_id: AtomicU64,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh job id.
    pub fn next_id(&self) -> JobId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers a job, replacing any previous entry with the same id.
    pub fn register(&self, job: Job) -> JobHandle {
        let handle = JobHandle::new(job);
        self.jobs.insert(handle.id(), handle.clone());
        handle
    }

    /// Looks up a job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.get(&id).map(|entry| entry.value().clone())
    }

    /// Drops a job from the registry (archived by the scheduler).
    pub fn remove(&self, id: JobId) -> Option<JobHandle> {
        self.jobs.remove(&id).map(|(_, handle)| handle)
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true when no job is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs whose package uses `folder`, excluding `exclude`.
    #[must_use]
    pub fn in_folder(&self, folder: &str, exclude: JobId) -> Vec<JobHandle> {
        self.collect(|handle| {
            let job = handle.read();
            job.id != exclude && job.package.folder == folder
        })
    }

    /// Jobs of package `package_id`, excluding `exclude`.
    #[must_use]
    pub fn siblings(&self, package_id: u64, exclude: JobId) -> Vec<JobHandle> {
        self.collect(|handle| {
            let job = handle.read();
            job.id != exclude && job.package.id == package_id
        })
    }

    /// Every registered job.
    #[must_use]
    pub fn all(&self) -> Vec<JobHandle> {
        self.collect(|_| true)
    }

    fn collect(&self, keep: impl Fn(&JobHandle) -> bool) -> Vec<JobHandle> {
        // Clone handles out first so no shard lock is held while job locks are taken.
        let handles: Vec<JobHandle> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        handles.into_iter().filter(|handle| keep(handle)).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, Package};
    use std::sync::Arc;

    fn job(registry: &JobRegistry, package: &Arc<Package>, name: &str) -> JobHandle {
        let id = registry.next_id();
        registry.register(Job::new(
            id,
            format!("https://h.example/{name}"),
            name,
            Arc::clone(package),
        ))
    }

    #[test]
    fn test_register_get_remove() {
        let registry = JobRegistry::new();
        let package = Arc::new(Package::new(1, "X"));
        let handle = job(&registry, &package, "a.bin");

        assert_eq!(registry.len(), 1);
        let fetched = registry.get(handle.id()).unwrap();
        fetched.set_status(JobStatus::Downloading);
        assert_eq!(handle.status(), JobStatus::Downloading);

        assert!(registry.remove(handle.id()).is_some());
        assert!(registry.is_empty());
        assert!(registry.get(handle.id()).is_none());
    }

    #[test]
    fn test_siblings_and_folder_exclude_self() {
        let registry = JobRegistry::new();
        let x = Arc::new(Package::new(1, "X"));
        let y = Arc::new(Package::new(2, "Y"));
        let mut shared = Package::new(3, "Z");
        shared.folder = "X".to_string();
        let z = Arc::new(shared);

        let a = job(&registry, &x, "a");
        let _b = job(&registry, &x, "b");
        let _c = job(&registry, &y, "c");
        let _d = job(&registry, &z, "d");

        assert_eq!(registry.siblings(1, a.id()).len(), 1);
        assert_eq!(registry.in_folder("X", a.id()).len(), 2);
        assert_eq!(registry.in_folder("Y", a.id()).len(), 1);
        assert_eq!(registry.all().len(), 4);
    }

    #[test]
    fn test_next_id_is_unique_across_threads() {
        let registry = Arc::new(JobRegistry::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..100).map(|_| registry.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut ids: Vec<JobId> = threads
            .into_iter()
            .flat_map(|thread| thread.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
    }
}

//! The job pipeline: duplicate check, transfer, verification and fallback.
//!
//! One [`JobPipeline`] serves every job of a run. [`JobPipeline::run`] drives
//! a job through
//!
//! ```text
//! Created → DuplicateChecked → Starting → Transferring → Verifying → Finished
//!                  │                           │              │
//!                  └→ Skipped                  └──────┬───────┘
//!                                                     ├→ RetryPending → Created (once)
//!                                                     └→ Failed | Waiting | Aborted
//! ```
//!
//! A failed premium attempt is repeated exactly once without the account
//! when the [`FallbackPolicy`] allows it. Whatever the outcome, the job is
//! finalized: a `DownloadProcessed` event is emitted and, once no sibling in
//! the package is still in progress, `PackageProcessed` (plus
//! `PackageFailed` when any sibling failed).

mod failure;
mod state;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use failure::{FailureKind, FallbackDecision, FallbackPolicy, PipelineFailure};
pub use state::{JobOutcome, PipelineState};

use crate::challenge::{ChallengeHandler, NoChallenge};
use crate::config::PipelineConfig;
use crate::download::filename::{next_free_name, safe_name};
use crate::download::{
    ChunkedTransferExecutor, DownloadError, HeaderProbe, HttpClient, ProgressFn, ResourceResolver,
    TransferRequest, UNLIMITED_CHUNKS, resolve_chunk_count,
};
use crate::duplicate::{Decision, DuplicateGuard, DuplicateIndex, NoIndex};
use crate::events::{Event, EventSink, LogSink};
use crate::job::{AccountContext, JobHandle, JobRegistry, JobStatus};
use crate::scan::{ScanRuleSet, scan_file};

/// How a single attempt ended without failing.
enum AttemptEnd {
    Finished,
    Skipped(String),
}

/// Runs jobs through duplicate detection, transfer and verification.
pub struct JobPipeline {
    config: PipelineConfig,
    registry: Arc<JobRegistry>,
    executor: ChunkedTransferExecutor,
    resolver: ResourceResolver<Arc<dyn HeaderProbe>>,
    index: Arc<dyn DuplicateIndex>,
    events: Arc<dyn EventSink>,
    challenges: Arc<dyn ChallengeHandler>,
    rules: ScanRuleSet,
    fallback: FallbackPolicy,
}

impl JobPipeline {
    /// Creates a pipeline with an HTTP client built from the config timeouts.
    #[must_use]
    pub fn new(config: PipelineConfig, registry: Arc<JobRegistry>) -> Self {
        let client =
            HttpClient::new_with_timeouts(config.connect_timeout_secs, config.read_timeout_secs);
        Self::with_client(config, registry, client)
    }

    /// Creates a pipeline around an existing client.
    ///
    /// Collaborators default to no duplicate index, log-only events and no
    /// interactive challenges.
    #[must_use]
    pub fn with_client(config: PipelineConfig, registry: Arc<JobRegistry>, client: HttpClient) -> Self {
        let executor =
            ChunkedTransferExecutor::with_unlimited_cap(client.clone(), config.unlimited_chunk_cap);
        let probe: Arc<dyn HeaderProbe> = Arc::new(client);
        Self {
            fallback: FallbackPolicy::new(config.fallback),
            config,
            registry,
            executor,
            resolver: ResourceResolver::new(probe),
            index: Arc::new(NoIndex),
            events: Arc::new(LogSink),
            challenges: Arc::new(NoChallenge),
            rules: ScanRuleSet::builtin(),
        }
    }

    /// Uses `index` for cross-run duplicate lookups.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn DuplicateIndex>) -> Self {
        self.index = index;
        self
    }

    /// Sends notifications to `events`.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Uses `challenges` to track interactive challenges.
    #[must_use]
    pub fn with_challenges(mut self, challenges: Arc<dyn ChallengeHandler>) -> Self {
        self.challenges = challenges;
        self
    }

    /// Uses `probe` for resource resolution instead of the HTTP client.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HeaderProbe>) -> Self {
        self.resolver = ResourceResolver::new(probe);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Registry the pipeline consults for siblings and in-flight duplicates.
    #[must_use]
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Runs `job` to a terminal state under `account`.
    pub async fn run(
        &self,
        job: &JobHandle,
        account: Option<AccountContext>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        self.run_with_progress(job, account, cancel, None).await
    }

    /// Like [`JobPipeline::run`], reporting transfer progress to `progress`.
    #[instrument(skip_all, fields(job_id = job.id()))]
    pub async fn run_with_progress(
        &self,
        job: &JobHandle,
        account: Option<AccountContext>,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
    ) -> JobOutcome {
        let job_id = job.id();
        let mut account = account;
        let mut attempts = 0;
        let mut trace = Vec::new();

        let (state, failure, skip_reason) = loop {
            attempts += 1;
            trace.push(PipelineState::Created);
            let premium = account.is_some_and(|account| account.premium);

            let result = self
                .attempt(job, account.as_ref(), cancel, progress.clone(), &mut trace)
                .await;
            match result {
                Ok(AttemptEnd::Finished) => break (PipelineState::Finished, None, None),
                Ok(AttemptEnd::Skipped(reason)) => {
                    info!(reason = %reason, "Download skipped");
                    job.set_status_with_message(JobStatus::Skipped, reason.clone());
                    break (PipelineState::Skipped, None, Some(reason));
                }
                Err(failure) if failure.kind == FailureKind::Aborted => {
                    info!("Download aborted");
                    job.set_status_with_message(JobStatus::Aborted, failure.message.clone());
                    break (PipelineState::Aborted, Some(failure), None);
                }
                Err(failure) if failure.kind == FailureKind::ChallengeRetry => {
                    info!("Waiting for a new challenge");
                    job.set_status_with_message(JobStatus::Waiting, failure.message.clone());
                    break (PipelineState::Waiting, Some(failure), None);
                }
                Err(failure) => {
                    let label = if premium {
                        "Premium download failed"
                    } else {
                        "Free download failed"
                    };
                    warn!(kind = %failure.kind, error = %failure.message, "{label}");

                    let no_fallback = job.read().no_fallback;
                    match self
                        .fallback
                        .decide(&failure, account.as_ref(), no_fallback, attempts)
                    {
                        FallbackDecision::Fallback => {
                            trace.push(PipelineState::RetryPending);
                            account = None;
                        }
                        FallbackDecision::NoFallback { reason } => {
                            debug!(reason = %reason, "failure is terminal");
                            let failure = failure.escalate();
                            job.set_status_with_message(
                                JobStatus::Failed,
                                format!("{label}: {}", failure.message),
                            );
                            break (PipelineState::Failed, Some(failure), None);
                        }
                    }
                }
            }
        };

        trace.push(state);
        self.finalize(job);

        JobOutcome {
            job_id,
            state,
            attempts,
            trace,
            failure,
            skip_reason,
        }
    }

    async fn attempt(
        &self,
        job: &JobHandle,
        account: Option<&AccountContext>,
        cancel: &CancellationToken,
        progress: Option<ProgressFn>,
        trace: &mut Vec<PipelineState>,
    ) -> Result<AttemptEnd, PipelineFailure> {
        if cancel.is_cancelled() {
            return Err(PipelineFailure::aborted());
        }

        let guard = DuplicateGuard::new(
            &self.registry,
            self.index.as_ref(),
            &self.config.download_folder,
            self.config.skip_existing,
        );
        match guard.check(job).await {
            Decision::Skip(reason) => return Ok(AttemptEnd::Skipped(reason)),
            Decision::Proceed(name) => job.update(|current| current.name = name),
        }
        trace.push(PipelineState::DuplicateChecked);

        job.set_status(JobStatus::Starting);
        let snapshot = job.snapshot();
        let folder = self.config.download_folder.join(&snapshot.package.folder);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| DownloadError::io(&folder, e))?;
        set_permissions(&folder, self.config.folder_permissions).await;
        info!(url = %snapshot.url, "Processing url");
        trace.push(PipelineState::Starting);

        trace.push(PipelineState::Transferring);
        if let Some(account) = account
            && account.premium
            && snapshot.size > 0
            && account.out_of_traffic(snapshot.size)
        {
            return Err(PipelineFailure::new(
                FailureKind::OutOfTraffic,
                "Out of traffic",
            ));
        }

        let (limit, mut resume) = match account {
            Some(_) => (UNLIMITED_CHUNKS, true),
            None => (1, false),
        };
        let limit = snapshot.chunks.filter(|chunks| *chunks > 0).unwrap_or(limit);
        let chunks = resolve_chunk_count(self.config.chunks, limit);

        let mut url = snapshot.url.clone();
        if snapshot.resolve_resource {
            let resolution = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(PipelineFailure::aborted()),
                resolution = self.resolver.resolve(&url, self.config.redirect_depth(), resume) => resolution?,
            };
            if !resolution.resource {
                return Err(if resolution.limit_reached {
                    PipelineFailure::new(
                        FailureKind::RedirectLimitExceeded,
                        format!("Too many redirects resolving {url}"),
                    )
                } else {
                    PipelineFailure::new(
                        FailureKind::NotResource,
                        format!("{url} does not point to a file"),
                    )
                });
            }
            url = resolution.url;
            resume = resolution.resumable;
        }

        job.set_status(JobStatus::Downloading);
        let destination = folder.join(&snapshot.name);
        self.events.dispatch(Event::DownloadStart {
            job_id: snapshot.id,
            url: url.clone(),
            path: destination.clone(),
        });

        let request = TransferRequest {
            url,
            destination,
            options: snapshot.options.clone(),
            resume,
            chunks,
            disposition: true,
        };
        let result = self.executor.execute(&request, progress, cancel).await;
        self.challenges.mark_correct(snapshot.id);
        let result = match result {
            Ok(result) => {
                job.update(|current| current.size = result.size);
                result
            }
            Err(error) => {
                job.update(|current| current.size = error.bytes_written);
                return Err(error.source.into());
            }
        };

        let mut local_path = None;
        if let Some(mut path) = result.path.clone() {
            let mut safe = safe_name(&result.name);
            if !safe.is_empty() && safe != snapshot.name {
                if tokio::fs::try_exists(folder.join(&safe)).await.unwrap_or(true) {
                    let free = next_free_name(&folder, &safe);
                    debug!(taken = %safe, free = %free, "Server-provided name already on disk");
                    safe = free;
                }
                let renamed = folder.join(&safe);
                match tokio::fs::rename(&path, &renamed).await {
                    Ok(()) => {
                        info!(from = %snapshot.name, to = %safe, "Saved under server-provided name");
                        job.update(|current| current.name.clone_from(&safe));
                        path = renamed;
                    }
                    Err(error) => {
                        warn!(from = %snapshot.name, to = %safe, error = %error, "Error renaming");
                    }
                }
            }
            set_permissions(&path, self.config.file_permissions).await;
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                local_path = Some(path);
            }
        }
        job.update(|current| current.local_path.clone_from(&local_path));

        trace.push(PipelineState::Verifying);
        job.set_status(JobStatus::Checking);
        info!("Checking download");

        let Some(path) = local_path else {
            if self.challenges.is_pending(snapshot.id) {
                self.challenges.request_retry(snapshot.id);
                return Err(PipelineFailure::new(
                    FailureKind::ChallengeRetry,
                    "Challenge retry requested",
                ));
            }
            if result.is_gone() {
                return Err(PipelineFailure::new(
                    FailureKind::ResourceGone,
                    format!("No file downloaded: HTTP {}", result.status),
                ));
            }
            return Err(PipelineFailure::new(
                FailureKind::NoFileDownloaded,
                "No file downloaded",
            ));
        };

        if let Some(label) = scan_file(&path, &self.rules, self.config.scan_read_limit).await? {
            debug!(label = %label, "scan rule matched");
            if let Err(error) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %error, "failed to remove empty file");
            }
            job.update(|current| current.local_path = None);
            return Err(PipelineFailure::new(FailureKind::EmptyFile, "Empty file"));
        }

        self.events
            .dispatch(Event::DownloadCheck { job_id: snapshot.id });
        info!(path = %path.display(), "File is OK");
        job.update(|current| {
            current.status = JobStatus::Finished;
            current.message = None;
        });
        Ok(AttemptEnd::Finished)
    }

    fn finalize(&self, job: &JobHandle) {
        let (job_id, package_id, own_status) = {
            let current = job.read();
            (current.id, current.package.id, current.status)
        };
        self.events.dispatch(Event::DownloadProcessed { job_id });

        let siblings = self.registry.siblings(package_id, job_id);
        if siblings.iter().any(|sibling| sibling.status().is_unfinished()) {
            return;
        }

        self.events.dispatch(Event::PackageProcessed { package_id });
        if own_status.is_failure() || siblings.iter().any(|sibling| sibling.status().is_failure())
        {
            self.events.dispatch(Event::PackageFailed { package_id });
        }
    }
}

#[cfg(unix)]
async fn set_permissions(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;

    let Some(mode) = mode else {
        return;
    };
    if let Err(error) =
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    {
        warn!(path = %path.display(), mode = %format!("{mode:o}"), error = %error, "Setting permissions failed");
    }
}

#[cfg(not(unix))]
async fn set_permissions(_path: &Path, _mode: Option<u32>) {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::{ProbeResponse, RequestOptions};
    use crate::events::ChannelSink;
    use crate::job::{Job, Package};
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn pipeline(temp_dir: &TempDir, registry: &Arc<JobRegistry>) -> JobPipeline {
        let config = PipelineConfig {
            download_folder: temp_dir.path().to_path_buf(),
            ..PipelineConfig::default()
        };
        JobPipeline::new(config, Arc::clone(registry))
    }

    fn register(registry: &JobRegistry, url: &str, name: &str) -> JobHandle {
        registry.register(Job::new(
            registry.next_id(),
            url,
            name,
            Arc::new(Package::new(1, "X")),
        ))
    }

    fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        std::iter::from_fn(|| receiver.try_recv().ok()).collect()
    }

    #[derive(Default)]
    struct PendingChallenge {
        retried: AtomicBool,
        corrected: AtomicUsize,
    }

    impl ChallengeHandler for PendingChallenge {
        fn is_pending(&self, _job_id: u64) -> bool {
            true
        }

        fn request_retry(&self, _job_id: u64) {
            self.retried.store(true, Ordering::SeqCst);
        }

        fn mark_correct(&self, _job_id: u64) {
            self.corrected.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct HtmlProbe;

    #[async_trait]
    impl HeaderProbe for HtmlProbe {
        async fn probe(&self, _url: &str) -> Result<ProbeResponse, DownloadError> {
            Ok(ProbeResponse {
                status: 200,
                content_type: Some("text/html; charset=utf-8".to_string()),
                ..ProbeResponse::default()
            })
        }
    }

    #[tokio::test]
    async fn test_existing_file_with_skip_existing_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("X")).unwrap();
        std::fs::write(temp_dir.path().join("X").join("a.bin"), b"data").unwrap();

        let registry = Arc::new(JobRegistry::new());
        let config = PipelineConfig {
            download_folder: temp_dir.path().to_path_buf(),
            skip_existing: true,
            ..PipelineConfig::default()
        };
        let (sink, mut events) = ChannelSink::channel();
        let pipeline =
            JobPipeline::new(config, Arc::clone(&registry)).with_events(Arc::new(sink));
        let job = register(&registry, "http://127.0.0.1:9/a.bin", "a.bin");

        let outcome = pipeline
            .run(&job, None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, PipelineState::Skipped);
        assert_eq!(outcome.skip_reason.as_deref(), Some("File exists"));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(job.status(), JobStatus::Skipped);
        assert_eq!(job.read().message.as_deref(), Some("File exists"));
        assert_eq!(
            drain(&mut events),
            vec![
                Event::DownloadProcessed { job_id: job.id() },
                Event::PackageProcessed { package_id: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_aborted_without_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let pipeline = pipeline(&temp_dir, &registry);
        let job = register(&registry, "http://127.0.0.1:9/a.bin", "a.bin");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pipeline
            .run(&job, Some(AccountContext::premium()), &cancel)
            .await;

        assert_eq!(outcome.state, PipelineState::Aborted);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.fell_back());
        assert_eq!(job.status(), JobStatus::Aborted);
    }

    #[tokio::test]
    async fn test_html_page_is_not_a_resource() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let pipeline = pipeline(&temp_dir, &registry).with_probe(Arc::new(HtmlProbe));
        let job = register(&registry, "https://h.example/page", "page");
        job.update(|current| current.resolve_resource = true);

        let outcome = pipeline
            .run(&job, None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, PipelineState::Failed);
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::NoFallbackAvailable);
        assert_eq!(failure.root_kind(), &FailureKind::NotResource);
        let message = job.read().message.clone().unwrap();
        assert!(message.starts_with("Free download failed: "), "{message}");
    }

    #[tokio::test]
    async fn test_finished_transfer_records_size_and_path() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let (sink, mut events) = ChannelSink::channel();
        let pipeline = pipeline(&temp_dir, &registry).with_events(Arc::new(sink));
        let url = format!("{}/a.bin", mock_server.uri());
        let job = register(&registry, &url, "a.bin");

        let outcome = pipeline.run(&job, None, &CancellationToken::new()).await;

        assert_eq!(outcome.state, PipelineState::Finished, "{outcome:?}");
        assert_eq!(
            outcome.trace,
            vec![
                PipelineState::Created,
                PipelineState::DuplicateChecked,
                PipelineState::Starting,
                PipelineState::Transferring,
                PipelineState::Verifying,
                PipelineState::Finished,
            ]
        );
        let expected = temp_dir.path().join("X").join("a.bin");
        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Finished);
        assert_eq!(snapshot.size, 10);
        assert_eq!(snapshot.local_path.as_deref(), Some(expected.as_path()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"0123456789");

        let events = drain(&mut events);
        assert!(matches!(events[0], Event::DownloadStart { .. }));
        assert_eq!(events[1], Event::DownloadCheck { job_id: job.id() });
        assert_eq!(events[2], Event::DownloadProcessed { job_id: job.id() });
        assert_eq!(events[3], Event::PackageProcessed { package_id: 1 });
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_whitespace_body_is_removed_as_empty_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/blank.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n\t "))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let pipeline = pipeline(&temp_dir, &registry);
        let job = register(
            &registry,
            &format!("{}/blank.txt", mock_server.uri()),
            "blank.txt",
        );

        let outcome = pipeline.run(&job, None, &CancellationToken::new()).await;

        assert_eq!(outcome.state, PipelineState::Failed);
        assert_eq!(
            outcome.failure.as_ref().map(PipelineFailure::root_kind),
            Some(&FailureKind::EmptyFile)
        );
        assert!(job.read().local_path.is_none());
        assert!(!temp_dir.path().join("X").join("blank.txt").exists());
        assert_eq!(
            job.read().message.as_deref(),
            Some("Free download failed: Empty file")
        );
    }

    #[tokio::test]
    async fn test_gone_with_pending_challenge_waits() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let challenge = Arc::new(PendingChallenge::default());
        let pipeline = pipeline(&temp_dir, &registry).with_challenges(challenge.clone());
        let job = register(&registry, &format!("{}/x.bin", mock_server.uri()), "x.bin");

        let outcome = pipeline
            .run(&job, Some(AccountContext::premium()), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, PipelineState::Waiting);
        assert_eq!(outcome.attempts, 1);
        assert!(challenge.retried.load(Ordering::SeqCst));
        assert_eq!(challenge.corrected.load(Ordering::SeqCst), 1);
        assert_eq!(job.status(), JobStatus::Waiting);
    }

    #[tokio::test]
    async fn test_gone_without_challenge_fails_as_resource_gone() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let pipeline = pipeline(&temp_dir, &registry);
        let job = register(&registry, &format!("{}/x.bin", mock_server.uri()), "x.bin");

        let outcome = pipeline.run(&job, None, &CancellationToken::new()).await;

        let failure = outcome.failure.unwrap();
        assert_eq!(failure.root_kind(), &FailureKind::ResourceGone);
        assert_eq!(failure.message, "No file downloaded: HTTP 410");
    }

    #[tokio::test]
    async fn test_out_of_traffic_falls_back_to_free_attempt() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/big.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
            .expect(1)
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let pipeline = pipeline(&temp_dir, &registry);
        let job = register(&registry, &format!("{}/big.bin", mock_server.uri()), "big.bin");
        job.update(|current| current.size = 4 * 1024 * 1024);
        let account = AccountContext {
            premium: true,
            traffic_left: Some(1024),
        };

        let outcome = pipeline
            .run(&job, Some(account), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, PipelineState::Finished, "{outcome:?}");
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.fell_back());
        assert_eq!(job.read().size, 64);
    }

    #[tokio::test]
    async fn test_disposition_name_is_sanitized_and_applied() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/get"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", "attachment; filename=\"re:port.pdf\"")
                    .set_body_bytes(b"%PDF-1.7".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let pipeline = pipeline(&temp_dir, &registry);
        let job = register(&registry, &format!("{}/get", mock_server.uri()), "get");
        job.update(|current| current.options = RequestOptions::default());

        let outcome = pipeline.run(&job, None, &CancellationToken::new()).await;

        assert_eq!(outcome.state, PipelineState::Finished, "{outcome:?}");
        let name = job.name();
        assert_ne!(name, "get");
        assert!(!name.contains(':'), "{name}");
        assert!(temp_dir.path().join("X").join(&name).exists());
        assert!(!temp_dir.path().join("X").join("get").exists());
    }
}

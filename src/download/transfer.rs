//! Chunked, resumable transfer of one resource into one file.
//!
//! The executor opens the transfer with a single request. When the server
//! answers a range request with `206 Partial Content` and the total size is
//! known, the body is split into segments: the opening response feeds the
//! first segment and every other segment gets its own ranged request. All
//! segments write into the same file through a shared, locked handle so
//! writes never interleave. Multi-segment progress is persisted to a
//! `<file>.chunks` sidecar whenever the transfer stops early.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_RANGE};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::chunks::{ChunkState, SegmentState, effective_segments};
use super::client::{ByteRange, HttpClient, RequestOptions};
use super::constants::DEFAULT_UNLIMITED_CHUNK_CAP;
use super::error::DownloadError;
use super::filename::{base_name, parse_content_disposition};

/// Progress callback: `(bytes on disk, total size if known)`.
pub type ProgressFn = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Everything needed to transfer one resource.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// URL to fetch.
    pub url: String,
    /// Provisional destination file.
    pub destination: PathBuf,
    /// Query/form parameters, referer and cookie policy.
    pub options: RequestOptions,
    /// Continue from bytes already on disk.
    pub resume: bool,
    /// Resolved chunk count (`-1` for unlimited).
    pub chunks: i32,
    /// Report the server's content-disposition filename as the used name.
    pub disposition: bool,
}

impl TransferRequest {
    /// Single-chunk, non-resuming request with default options.
    #[must_use]
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            options: RequestOptions::default(),
            resume: false,
            chunks: 1,
            disposition: false,
        }
    }
}

/// Outcome of a transfer that reached a terminal HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// File written, `None` when the resource is gone (404/410).
    pub path: Option<PathBuf>,
    /// Name to persist: the disposition name when requested and offered,
    /// otherwise the provisional file name.
    pub name: String,
    /// Bytes on disk.
    pub size: u64,
    /// Status code of the opening response.
    pub status: u16,
}

impl TransferResult {
    /// Returns true when the server reported the resource as gone.
    #[must_use]
    pub fn is_gone(&self) -> bool {
        self.path.is_none()
    }
}

/// A failed transfer together with the bytes it left on disk.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransferError {
    /// What went wrong.
    #[source]
    pub source: DownloadError,
    /// Bytes on disk when the transfer stopped.
    pub bytes_written: u64,
}

impl TransferError {
    fn new(source: DownloadError, bytes_written: u64) -> Self {
        Self {
            source,
            bytes_written,
        }
    }
}

/// Performs resumable, optionally multi-chunk transfers.
#[derive(Debug, Clone)]
pub struct ChunkedTransferExecutor {
    client: HttpClient,
    unlimited_cap: usize,
}

/// Shared context of one running transfer.
struct Transfer {
    client: HttpClient,
    url: String,
    options: RequestOptions,
    path: PathBuf,
    file: Mutex<File>,
    written: AtomicU64,
    total: Option<u64>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
}

/// One byte range being filled.
struct Segment {
    start: u64,
    end: Option<u64>,
    done: AtomicU64,
}

impl Segment {
    fn new(start: u64, end: Option<u64>, done: u64) -> Self {
        Self {
            start,
            end,
            done: AtomicU64::new(done),
        }
    }

    fn remaining(&self) -> Option<u64> {
        self.end.map(|end| {
            (end + 1)
                .saturating_sub(self.start)
                .saturating_sub(self.done.load(Ordering::SeqCst))
        })
    }

    fn state(&self) -> Option<SegmentState> {
        self.end.map(|end| SegmentState {
            start: self.start,
            end,
            done: self.done.load(Ordering::SeqCst),
        })
    }
}

/// How the opening response shapes the rest of the transfer.
enum Plan {
    /// One stream written from `offset`.
    Single { offset: u64 },
    /// Parallel segments; the opening response belongs to `first`.
    Segments { segments: Vec<Arc<Segment>>, first: usize },
    /// Nothing left to fetch.
    Complete,
}

impl ChunkedTransferExecutor {
    /// Creates an executor capping unlimited chunk counts at the default cap.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self::with_unlimited_cap(client, DEFAULT_UNLIMITED_CHUNK_CAP)
    }

    /// Creates an executor with an explicit cap for unlimited chunk counts.
    #[must_use]
    pub fn with_unlimited_cap(client: HttpClient, unlimited_cap: usize) -> Self {
        Self {
            client,
            unlimited_cap: unlimited_cap.max(1),
        }
    }

    /// Transfers `request.url` into `request.destination`.
    ///
    /// A 404 or 410 removes any partial output and yields a result without a
    /// path. Cancellation stops every segment and keeps the partial file and
    /// chunk state for a later resume.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] carrying [`DownloadError::Io`] (with the OS
    /// error code) for local failures, [`DownloadError::BadHeader`] for
    /// unusable statuses, [`DownloadError::Aborted`] on cancellation and
    /// network errors otherwise. `bytes_written` reports what is on disk.
    #[instrument(skip(self, progress, cancel), fields(url = %request.url, chunks = request.chunks))]
    pub async fn execute(
        &self,
        request: &TransferRequest,
        progress: Option<ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<TransferResult, TransferError> {
        let path = request.destination.clone();
        let segment_count = effective_segments(request.chunks, self.unlimited_cap);
        let provisional = file_name_of(&path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::new(DownloadError::io(parent, e), 0))?;
        }

        let saved = if request.resume {
            ChunkState::load(&path, &request.url).await
        } else {
            None
        };
        let existing = if request.resume {
            existing_len(&path).await
        } else {
            0
        };
        let saved = saved.filter(|_| existing > 0);

        let send_range = match &saved {
            Some(state) => match first_pending(state) {
                Some(segment) => Some(ByteRange::closed(
                    segment.start + segment.done,
                    segment.end,
                )),
                None => {
                    debug!("all saved chunks already on disk");
                    ChunkState::remove(&path).await;
                    return Ok(TransferResult {
                        path: Some(path),
                        name: provisional,
                        size: existing,
                        status: 206,
                    });
                }
            },
            None if existing > 0 => Some(ByteRange::from(existing)),
            None if segment_count > 1 => Some(ByteRange::from(0)),
            None => None,
        };

        if cancel.is_cancelled() {
            return Err(TransferError::new(
                DownloadError::aborted(&request.url),
                existing,
            ));
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(TransferError::new(DownloadError::aborted(&request.url), existing));
            }
            response = self.client.send(&request.url, &request.options, send_range) => {
                response.map_err(|e| TransferError::new(e, existing))?
            }
        };

        let status = response.status().as_u16();
        let name = if request.disposition {
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_content_disposition)
                .map(|raw| base_name(&raw).to_string())
                .filter(|raw| !raw.is_empty())
                .unwrap_or_else(|| provisional.clone())
        } else {
            provisional.clone()
        };

        if matches!(status, 404 | 410) {
            info!(status, "resource gone, removing partial output");
            remove_if_exists(&path).await;
            ChunkState::remove(&path).await;
            return Ok(TransferResult {
                path: None,
                name,
                size: 0,
                status,
            });
        }

        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);

        if status == 416 && existing > 0 {
            // Range past the end: the previous attempt already finished the body.
            let total = content_range.and_then(|range| range.total);
            if total.is_none_or(|total| total == existing) {
                ChunkState::remove(&path).await;
                return Ok(TransferResult {
                    path: Some(path),
                    name,
                    size: existing,
                    status,
                });
            }
        }

        if !(200..300).contains(&status) {
            return Err(TransferError::new(
                DownloadError::bad_header(&request.url, status),
                existing,
            ));
        }

        let partial = status == 206 && send_range.is_some();
        let (plan, total, preexisting) = match (&saved, partial, content_range) {
            (Some(state), true, Some(range)) if range.total == Some(state.total) => {
                let segments = state
                    .segments
                    .iter()
                    .map(|s| Arc::new(Segment::new(s.start, Some(s.end), s.done)))
                    .collect::<Vec<_>>();
                let first = segments
                    .iter()
                    .position(|segment| segment.remaining().is_some_and(|left| left > 0))
                    .unwrap_or(0);
                (
                    Plan::Segments { segments, first },
                    Some(state.total),
                    state.bytes_done(),
                )
            }
            (None, true, Some(range)) if range.start == 0 && segment_count > 1 => {
                match range.total {
                    Some(total) if total > 0 => {
                        let state = ChunkState::new(&request.url, total, segment_count);
                        let segments = state
                            .segments
                            .iter()
                            .map(|s| Arc::new(Segment::new(s.start, Some(s.end), 0)))
                            .collect::<Vec<_>>();
                        (Plan::Segments { segments, first: 0 }, Some(total), 0)
                    }
                    Some(_) => (Plan::Complete, Some(0), 0),
                    None => (Plan::Single { offset: 0 }, None, 0),
                }
            }
            (None, true, Some(range)) if range.start == existing => (
                Plan::Single { offset: existing },
                range.total,
                existing,
            ),
            (_, true, Some(range)) if range.start != 0 => {
                warn!(
                    start = range.start,
                    existing, "partial response starts at an unexpected offset"
                );
                if saved.is_some() {
                    ChunkState::remove(&path).await;
                }
                return Err(TransferError::new(
                    DownloadError::bad_header(&request.url, status),
                    existing,
                ));
            }
            _ => {
                // Full body (200, or a 206 from offset 0 we cannot line up): start over.
                if saved.is_some() {
                    debug!("server ignored saved chunk ranges, restarting");
                    ChunkState::remove(&path).await;
                }
                let total = if partial {
                    content_range.and_then(|range| range.total)
                } else {
                    response.content_length()
                };
                (Plan::Single { offset: 0 }, total, 0)
            }
        };

        let file = open_destination(&path, preexisting > 0)
            .await
            .map_err(|e| TransferError::new(e, 0))?;

        let transfer = Arc::new(Transfer {
            client: self.client.clone(),
            url: request.url.clone(),
            options: request.options.clone(),
            path: path.clone(),
            file: Mutex::new(file),
            written: AtomicU64::new(preexisting),
            total,
            progress,
            cancel: cancel.child_token(),
        });
        transfer.report();

        let outcome = match plan {
            Plan::Complete => Ok(()),
            Plan::Single { offset } => {
                let segment = Arc::new(Segment::new(offset, None, 0));
                run_segment(Arc::clone(&transfer), segment, Some(response)).await
            }
            Plan::Segments { segments, first } => {
                let result =
                    run_segments(Arc::clone(&transfer), &segments, first, response).await;
                if result.is_ok() {
                    ChunkState::remove(&path).await;
                } else if let Some(total) = total {
                    persist_state(&request.url, total, &segments, &path).await;
                }
                result
            }
        };

        let flushed = transfer.flush().await;
        let size = transfer.written.load(Ordering::SeqCst);
        match outcome.and(flushed) {
            Ok(()) => {
                info!(path = %path.display(), bytes = size, "File saved");
                Ok(TransferResult {
                    path: Some(path),
                    name,
                    size,
                    status,
                })
            }
            Err(error) => {
                if error.is_aborted() {
                    info!(bytes = size, "transfer aborted, keeping partial file");
                } else {
                    warn!(error = %error, bytes = size, "transfer failed");
                }
                Err(TransferError::new(error, size))
            }
        }
    }
}

impl Transfer {
    fn report(&self) {
        if let Some(progress) = &self.progress {
            progress(self.written.load(Ordering::SeqCst), self.total);
        }
    }

    async fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), DownloadError> {
        let mut file = self.file.lock().await;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))
    }

    async fn flush(&self) -> Result<(), DownloadError> {
        let mut file = self.file.lock().await;
        file.flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))
    }
}

async fn run_segments(
    transfer: Arc<Transfer>,
    segments: &[Arc<Segment>],
    first: usize,
    response: reqwest::Response,
) -> Result<(), DownloadError> {
    debug!(segments = segments.len(), "starting chunked transfer");
    let mut tasks = JoinSet::new();
    let mut opening = Some(response);
    for (index, segment) in segments.iter().enumerate() {
        if segment.remaining() == Some(0) {
            continue;
        }
        let response = if index == first { opening.take() } else { None };
        tasks.spawn(run_segment(
            Arc::clone(&transfer),
            Arc::clone(segment),
            response,
        ));
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|join_error| {
            Err(DownloadError::io(
                &transfer.path,
                std::io::Error::other(join_error.to_string()),
            ))
        });
        if let Err(error) = result
            && first_error.is_none()
        {
            // One failed segment stops its siblings.
            transfer.cancel.cancel();
            first_error = Some(error);
        }
    }

    match first_error {
        // A sibling aborted only because another one failed.
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Streams one segment into the file.
///
/// Uses the given response or requests the segment's remaining range.
async fn run_segment(
    transfer: Arc<Transfer>,
    segment: Arc<Segment>,
    response: Option<reqwest::Response>,
) -> Result<(), DownloadError> {
    let response = match response {
        Some(response) => response,
        None => {
            let offset = segment.start + segment.done.load(Ordering::SeqCst);
            let range = match segment.end {
                Some(end) => ByteRange::closed(offset, end),
                None => ByteRange::from(offset),
            };
            let response = tokio::select! {
                biased;
                () = transfer.cancel.cancelled() => return Err(DownloadError::aborted(&transfer.url)),
                response = transfer.client.send(&transfer.url, &transfer.options, Some(range)) => response?,
            };
            let status = response.status().as_u16();
            if status != 206 {
                return Err(DownloadError::bad_header(&transfer.url, status));
            }
            response
        }
    };

    let mut stream = response.bytes_stream();
    loop {
        if segment.remaining() == Some(0) {
            break;
        }
        let next = tokio::select! {
            biased;
            () = transfer.cancel.cancelled() => return Err(DownloadError::aborted(&transfer.url)),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| DownloadError::from_reqwest(&transfer.url, e))?;

        let take = segment.remaining().map_or(chunk.len(), |left| {
            usize::try_from(left).map_or(chunk.len(), |left| left.min(chunk.len()))
        });
        let bytes = &chunk[..take];
        let offset = segment.start + segment.done.load(Ordering::SeqCst);
        transfer.write_at(offset, bytes).await?;

        let len = bytes.len() as u64;
        segment.done.fetch_add(len, Ordering::SeqCst);
        transfer.written.fetch_add(len, Ordering::SeqCst);
        transfer.report();
    }

    if let (Some(end), Some(left)) = (segment.end, segment.remaining())
        && left > 0
    {
        let expected = end + 1 - segment.start;
        return Err(DownloadError::truncated(
            &transfer.url,
            expected,
            expected - left,
        ));
    }
    Ok(())
}

async fn persist_state(url: &str, total: u64, segments: &[Arc<Segment>], path: &Path) {
    let state = ChunkState {
        url: url.to_string(),
        total,
        segments: segments.iter().filter_map(|segment| segment.state()).collect(),
    };
    if let Err(error) = state.save(path).await {
        warn!(path = %path.display(), error = %error, "failed to persist chunk state");
    }
}

fn first_pending(state: &ChunkState) -> Option<&SegmentState> {
    state.segments.iter().find(|segment| !segment.is_complete())
}

async fn existing_len(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.len())
        .unwrap_or(0)
}

async fn open_destination(path: &Path, keep: bool) -> Result<File, DownloadError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if !keep {
        options.truncate(true);
    }
    options
        .open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))
}

async fn remove_if_exists(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %error, "failed to remove partial file");
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parsed `Content-Range: bytes start-end/total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: u64,
    total: Option<u64>,
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        digits => Some(digits.parse().ok()?),
    };
    let start = match span.trim() {
        "*" => 0,
        span => span.split_once('-')?.0.trim().parse().ok()?,
    };
    Some(ContentRange { start, total })
}

//! Chunk-count policy, segment planning and persisted chunk progress.
//!
//! A multi-chunk transfer keeps a JSON sidecar next to the destination file
//! (`<file>.chunks`) describing every segment and how many bytes of it are
//! already on disk. The sidecar survives failures and aborts so a later
//! attempt resumes each segment where it stopped.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::constants::CHUNK_STATE_SUFFIX;

/// Chunk count meaning "no limit".
pub const UNLIMITED_CHUNKS: i32 = -1;

/// Combines the global chunk setting with a job-level limit.
///
/// Either side being [`UNLIMITED_CHUNKS`] selects the larger value, otherwise
/// the smaller one wins. Any other non-positive result falls back to a single
/// chunk.
///
/// ```
/// use fetchjob_core::download::resolve_chunk_count;
///
/// assert_eq!(resolve_chunk_count(-1, 3), 3);
/// assert_eq!(resolve_chunk_count(4, 2), 2);
/// assert_eq!(resolve_chunk_count(-1, -1), -1);
/// assert_eq!(resolve_chunk_count(0, 5), 1);
/// ```
#[must_use]
pub fn resolve_chunk_count(global: i32, limit: i32) -> i32 {
    let resolved = if global == UNLIMITED_CHUNKS || limit == UNLIMITED_CHUNKS {
        global.max(limit)
    } else {
        global.min(limit)
    };
    if resolved == UNLIMITED_CHUNKS || resolved > 0 {
        resolved
    } else {
        1
    }
}

/// Number of parallel segments actually used for a resolved chunk count.
#[must_use]
pub fn effective_segments(resolved: i32, unlimited_cap: usize) -> usize {
    if resolved == UNLIMITED_CHUNKS {
        return unlimited_cap.max(1);
    }
    usize::try_from(resolved).map_or(1, |count| count.max(1))
}

/// Splits `total` bytes into at most `count` contiguous inclusive ranges.
///
/// Never produces empty segments; a resource smaller than `count` bytes gets
/// one segment per byte.
#[must_use]
pub fn plan_segments(total: u64, count: usize) -> Vec<(u64, u64)> {
    if total == 0 {
        return Vec::new();
    }
    let count = u64::try_from(count.max(1)).unwrap_or(1).min(total);
    let base = total / count;
    let remainder = total % count;

    let mut segments = Vec::with_capacity(usize::try_from(count).unwrap_or(1));
    let mut start = 0;
    for index in 0..count {
        let len = base + u64::from(index < remainder);
        segments.push((start, start + len - 1));
        start += len;
    }
    segments
}

/// Progress of one segment in a persisted chunk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentState {
    /// First byte offset of the segment.
    pub start: u64,
    /// Last byte offset of the segment (inclusive).
    pub end: u64,
    /// Bytes of the segment already written.
    pub done: u64,
}

impl SegmentState {
    /// Segment length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Returns true when every byte of the segment is written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done >= self.len()
    }
}

/// Persisted description of a multi-chunk transfer in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkState {
    /// URL the segments were fetched from.
    pub url: String,
    /// Total resource size in bytes.
    pub total: u64,
    /// Segments in file order.
    pub segments: Vec<SegmentState>,
}

impl ChunkState {
    /// Fresh state with nothing written yet.
    #[must_use]
    pub fn new(url: impl Into<String>, total: u64, count: usize) -> Self {
        let segments = plan_segments(total, count)
            .into_iter()
            .map(|(start, end)| SegmentState {
                start,
                end,
                done: 0,
            })
            .collect();
        Self {
            url: url.into(),
            total,
            segments,
        }
    }

    /// Bytes written across all segments.
    #[must_use]
    pub fn bytes_done(&self) -> u64 {
        self.segments.iter().map(|segment| segment.done).sum()
    }

    /// Returns true when every segment is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(SegmentState::is_complete)
    }

    /// Path of the sidecar belonging to `destination`.
    #[must_use]
    pub fn sidecar_path(destination: &Path) -> PathBuf {
        let mut name = destination.as_os_str().to_owned();
        name.push(CHUNK_STATE_SUFFIX);
        PathBuf::from(name)
    }

    /// Loads the sidecar for `destination` if it exists and is usable.
    ///
    /// A sidecar for a different URL, one that does not tile its total, or
    /// one that cannot be parsed is ignored.
    pub async fn load(destination: &Path, url: &str) -> Option<Self> {
        let path = Self::sidecar_path(destination);
        let raw = tokio::fs::read(&path).await.ok()?;
        let state: Self = match serde_json::from_slice(&raw) {
            Ok(state) => state,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "ignoring unreadable chunk state");
                return None;
            }
        };
        if state.url != url || !state.is_consistent() {
            debug!(path = %path.display(), "chunk state does not match this transfer");
            return None;
        }
        Some(state)
    }

    /// Writes the sidecar for `destination`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the sidecar cannot be written.
    pub async fn save(&self, destination: &Path) -> std::io::Result<()> {
        let encoded = serde_json::to_vec(self).map_err(std::io::Error::other)?;
        tokio::fs::write(Self::sidecar_path(destination), encoded).await
    }

    /// Removes the sidecar for `destination`, ignoring a missing file.
    pub async fn remove(destination: &Path) {
        let path = Self::sidecar_path(destination);
        if let Err(error) = tokio::fs::remove_file(&path).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %error, "failed to remove chunk state");
        }
    }

    fn is_consistent(&self) -> bool {
        let mut expected_start = 0;
        for segment in &self.segments {
            if segment.start != expected_start || segment.end < segment.start {
                return false;
            }
            if segment.done > segment.len() {
                return false;
            }
            expected_start = segment.end + 1;
        }
        !self.segments.is_empty() && expected_start == self.total
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_chunk_count_table() {
        assert_eq!(resolve_chunk_count(-1, 3), 3);
        assert_eq!(resolve_chunk_count(4, -1), 4);
        assert_eq!(resolve_chunk_count(4, 2), 2);
        assert_eq!(resolve_chunk_count(2, 4), 2);
        assert_eq!(resolve_chunk_count(-1, -1), -1);
    }

    #[test]
    fn test_resolve_chunk_count_non_positive_defaults_to_one() {
        assert_eq!(resolve_chunk_count(0, 3), 1);
        assert_eq!(resolve_chunk_count(3, 0), 1);
        assert_eq!(resolve_chunk_count(0, -1), 1);
        assert_eq!(resolve_chunk_count(-1, 0), 1);
        assert_eq!(resolve_chunk_count(-5, 2), 1);
    }

    #[test]
    fn test_effective_segments() {
        assert_eq!(effective_segments(-1, 8), 8);
        assert_eq!(effective_segments(-1, 0), 1);
        assert_eq!(effective_segments(3, 8), 3);
        assert_eq!(effective_segments(0, 8), 1);
    }

    #[test]
    fn test_plan_segments_tiles_total() {
        assert_eq!(plan_segments(10, 3), vec![(0, 3), (4, 6), (7, 9)]);
        assert_eq!(plan_segments(9, 3), vec![(0, 2), (3, 5), (6, 8)]);
        assert_eq!(plan_segments(2, 4), vec![(0, 0), (1, 1)]);
        assert_eq!(plan_segments(5, 1), vec![(0, 4)]);
        assert!(plan_segments(0, 3).is_empty());
    }

    #[test]
    fn test_chunk_state_progress() {
        let mut state = ChunkState::new("https://host.example/a", 10, 2);
        assert_eq!(state.segments.len(), 2);
        assert!(!state.is_complete());
        state.segments[0].done = 5;
        state.segments[1].done = 3;
        assert_eq!(state.bytes_done(), 8);
        state.segments[1].done = 5;
        assert!(state.is_complete());
    }

    #[test]
    fn test_sidecar_path_appends_suffix() {
        let path = ChunkState::sidecar_path(Path::new("/tmp/pkg/movie.mp4"));
        assert_eq!(path, PathBuf::from("/tmp/pkg/movie.mp4.chunks"));
    }

    #[tokio::test]
    async fn test_chunk_state_save_load_remove() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("a.bin");
        let mut state = ChunkState::new("https://host.example/a", 100, 4);
        state.segments[2].done = 7;
        state.save(&destination).await.unwrap();

        let loaded = ChunkState::load(&destination, "https://host.example/a")
            .await
            .unwrap();
        assert_eq!(loaded, state);

        assert!(
            ChunkState::load(&destination, "https://host.example/other")
                .await
                .is_none()
        );

        ChunkState::remove(&destination).await;
        assert!(!ChunkState::sidecar_path(&destination).exists());
        ChunkState::remove(&destination).await;
    }

    #[tokio::test]
    async fn test_chunk_state_load_rejects_inconsistent_state() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("a.bin");
        let state = ChunkState {
            url: "u".to_string(),
            total: 10,
            segments: vec![SegmentState {
                start: 0,
                end: 4,
                done: 0,
            }],
        };
        state.save(&destination).await.unwrap();
        assert!(ChunkState::load(&destination, "u").await.is_none());

        std::fs::write(ChunkState::sidecar_path(&destination), b"not json").unwrap();
        assert!(ChunkState::load(&destination, "u").await.is_none());
    }
}

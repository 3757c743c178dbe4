//! Constants for the download module (timeouts, redirect and chunk limits).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default probe depth when resolving a resource URL.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Parallel segments used when the chunk count resolves to "unlimited".
pub const DEFAULT_UNLIMITED_CHUNK_CAP: usize = 8;

/// Leading bytes of a finished file inspected by the integrity scan (1 MiB).
pub const DEFAULT_SCAN_READ_LIMIT: u64 = 1024 * 1024;

/// Suffix of the per-file chunk progress sidecar.
pub const CHUNK_STATE_SUFFIX: &str = ".chunks";

/// Redirects the transfer client follows on its own before giving up.
pub const TRANSFER_REDIRECT_LIMIT: usize = 10;

//! Network side of a job: resolution and chunked transfer.
//!
//! # Features
//!
//! - Header-only resource resolution with bounded redirect depth
//! - Chunked, resumable transfers into a single destination file
//! - Content-Disposition filename extraction and safe-name sanitising
//! - Structured error types with full context (URL, path, status, OS code)
//!
//! # Example
//!
//! ```no_run
//! use fetchjob_core::download::{ChunkedTransferExecutor, HttpClient, TransferRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = ChunkedTransferExecutor::new(HttpClient::new());
//! let mut request = TransferRequest::new("https://example.com/a.bin", "downloads/pkg/a.bin");
//! request.chunks = 3;
//! let result = executor.execute(&request, None, &CancellationToken::new()).await?;
//! println!("{} bytes in {:?}", result.size, result.path);
//! # Ok(())
//! # }
//! ```

mod chunks;
mod client;
pub mod constants;
mod error;
pub mod filename;
mod resolver;
mod transfer;

pub use chunks::{
    ChunkState, SegmentState, UNLIMITED_CHUNKS, effective_segments, plan_segments,
    resolve_chunk_count,
};
pub use client::{ByteRange, HttpClient, RequestOptions};
pub use error::DownloadError;
pub use resolver::{HeaderProbe, ProbeResponse, Resolution, ResourceResolver};
pub use transfer::{
    ChunkedTransferExecutor, ProgressFn, TransferError, TransferRequest, TransferResult,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.

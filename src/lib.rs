//! Fetchjob Core Library
//!
//! Retrieves files over HTTP for a scheduler that hands over one job at a
//! time. Each job is checked for duplicates, transferred (resumable and
//! optionally split into parallel chunks), verified and, on a premium
//! failure, retried once without the account.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - HTTP client, resource resolution and the chunked transfer executor
//! - [`duplicate`] - Duplicate detection against live jobs and files on disk
//! - [`scan`] - Post-transfer integrity scan
//! - [`pipeline`] - The job state machine tying everything together
//! - [`job`] - Jobs, packages, accounts and the live job registry
//! - [`db`] - Database connection and the persisted job index
//! - [`events`] and [`challenge`] - Collaborators notified by the pipeline

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod challenge;
pub mod config;
pub mod db;
pub mod download;
pub mod duplicate;
pub mod events;
pub mod job;
pub mod pipeline;
pub mod scan;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{ConfigError, PipelineConfig};
pub use db::{Database, DbError};
pub use download::{ChunkedTransferExecutor, DownloadError, HttpClient, ResourceResolver};
pub use duplicate::{Decision, DuplicateGuard, DuplicateIndex};
pub use events::{Event, EventSink};
pub use job::{AccountContext, Job, JobHandle, JobId, JobRegistry, JobStatus, Package};
pub use pipeline::{FailureKind, JobOutcome, JobPipeline, PipelineFailure, PipelineState};
pub use scan::{ScanRule, ScanRuleSet};

//! Configuration consumed by the job pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_REDIRECTS, DEFAULT_SCAN_READ_LIMIT,
    DEFAULT_UNLIMITED_CHUNK_CAP, READ_TIMEOUT_SECS,
};
use crate::download::UNLIMITED_CHUNKS;

/// Upper bound accepted for the global chunk count.
pub const MAX_CHUNKS: i32 = 64;

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value fell outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    OutOfRange {
        /// Offending key.
        field: &'static str,
        /// Rendered value.
        value: String,
        /// Accepted range, human readable.
        expected: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Settings read by the pipeline on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Global chunk count; `-1` means unlimited.
    pub chunks: i32,
    /// Skip jobs whose target already exists on disk.
    pub skip_existing: bool,
    /// Base folder; packages live in sub-folders.
    pub download_folder: PathBuf,
    /// Probe depth for resource resolution; 0 disables redirect following.
    pub max_redirects: u32,
    /// Retry a failed premium attempt once without the account.
    pub fallback: bool,
    /// Unix mode applied to package folders after creation.
    pub folder_permissions: Option<u32>,
    /// Unix mode applied to finished files.
    pub file_permissions: Option<u32>,
    /// Leading bytes inspected by the integrity scan.
    pub scan_read_limit: u64,
    /// Segment count used when the chunk count is unlimited.
    pub unlimited_chunk_cap: usize,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunks: 3,
            skip_existing: false,
            download_folder: PathBuf::from("downloads"),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            fallback: true,
            folder_permissions: None,
            file_permissions: None,
            scan_read_limit: DEFAULT_SCAN_READ_LIMIT,
            unlimited_chunk_cap: DEFAULT_UNLIMITED_CHUNK_CAP,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl PipelineConfig {
    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunks != UNLIMITED_CHUNKS && !(1..=MAX_CHUNKS).contains(&self.chunks) {
            return Err(ConfigError::out_of_range(
                "chunks",
                self.chunks,
                "-1 or 1..=64",
            ));
        }
        if self.max_redirects > 50 {
            return Err(ConfigError::out_of_range(
                "max_redirects",
                self.max_redirects,
                "0..=50",
            ));
        }
        for (field, mode) in [
            ("folder_permissions", self.folder_permissions),
            ("file_permissions", self.file_permissions),
        ] {
            if let Some(mode) = mode
                && mode > 0o7777
            {
                return Err(ConfigError::out_of_range(
                    field,
                    format!("{mode:o}"),
                    "an octal mode up to 7777",
                ));
            }
        }
        if self.scan_read_limit == 0 {
            return Err(ConfigError::out_of_range(
                "scan_read_limit",
                self.scan_read_limit,
                "at least 1 byte",
            ));
        }
        if !(1..=64).contains(&self.unlimited_chunk_cap) {
            return Err(ConfigError::out_of_range(
                "unlimited_chunk_cap",
                self.unlimited_chunk_cap,
                "1..=64",
            ));
        }
        for (field, secs) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("read_timeout_secs", self.read_timeout_secs),
        ] {
            if !(1..=3600).contains(&secs) {
                return Err(ConfigError::out_of_range(field, secs, "1..=3600"));
            }
        }
        Ok(())
    }

    /// Resolver depth argument derived from `max_redirects`.
    #[must_use]
    pub fn redirect_depth(&self) -> i32 {
        i32::try_from(self.max_redirects).unwrap_or(i32::MAX)
    }
}

//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Retrieve files over HTTP as a package of jobs.
///
/// Every URL becomes one job. Jobs are checked for duplicates, transferred
/// (resumable, optionally in parallel chunks) and verified before they are
/// reported as finished.
#[derive(Parser, Debug)]
#[command(name = "fetchjob")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to retrieve (read from stdin when omitted)
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Package name
    #[arg(short = 'p', long, default_value = "fetchjob")]
    pub package: String,

    /// Package folder below the download directory (defaults to the package name)
    #[arg(long)]
    pub folder: Option<String>,

    /// Download directory
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Chunks per transfer (-1 for unlimited, max 64)
    #[arg(short = 'c', long, allow_negative_numbers = true, value_parser = parse_chunks)]
    pub chunks: Option<i32>,

    /// Skip jobs whose file already exists instead of renaming
    #[arg(long)]
    pub skip_existing: bool,

    /// Check that each URL serves a file before transferring it
    #[arg(long)]
    pub resolve: bool,

    /// Run jobs under a premium account (resume, unlimited chunks, one free fallback)
    #[arg(long)]
    pub premium: bool,

    /// Never retry a failed premium attempt without the account
    #[arg(long)]
    pub no_fallback: bool,

    /// SQLite database recording jobs across runs (in-memory when omitted)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Config file (defaults to $XDG_CONFIG_HOME/fetchjob/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

fn parse_chunks(raw: &str) -> Result<i32, String> {
    let value: i32 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not an integer"))?;
    if value == -1 || (1..=64).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is out of range (-1 or 1..=64)"))
    }
}

//! The minimal scheduler behind the `fetchjob` binary.
//!
//! Builds one package from the command line, registers a job per URL and
//! runs every job through a shared [`JobPipeline`] on its own task.

use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fetchjob_core::download::filename::{name_from_url, safe_name};
use fetchjob_core::events::LogSink;
use fetchjob_core::{
    AccountContext, Database, Job, JobHandle, JobOutcome, JobPipeline, JobRegistry, JobStatus,
    Package, PipelineConfig, PipelineState,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{exit_handler, input_processor, progress_manager, terminal};
use crate::app_config::{self, LoadedConfig};
use crate::cli::Args;

pub(crate) async fn run_fetchjob() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    terminal::init_tracing(terminal::default_log_level(args.quiet, args.verbose));
    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_file_config_from(args.config.as_deref())?;
    let config = resolve_config(&args, &loaded)?;

    let urls = input_processor::collect_urls(&args.urls)?;
    if urls.is_empty() {
        info!("No input provided. Pass URLs as arguments or pipe them via stdin.");
        return Ok(ProcessExit::Success);
    }

    let db = match &args.db {
        Some(path) => Database::new(path)
            .await
            .with_context(|| format!("Failed to open database '{}'", path.display()))?,
        None => Database::new_in_memory().await?,
    };

    let registry = Arc::new(JobRegistry::new());
    let pipeline = Arc::new(
        JobPipeline::new(config, Arc::clone(&registry))
            .with_index(Arc::new(db.clone()))
            .with_events(Arc::new(LogSink)),
    );

    let mut package = Package::new(1, args.package.clone());
    if let Some(folder) = &args.folder {
        package.folder.clone_from(folder);
    }
    let package = Arc::new(package);

    let mut jobs = Vec::with_capacity(urls.len());
    for url in urls {
        let name = name_from_url(&url).map_or_else(|| "download".to_string(), |raw| safe_name(&raw));
        let id = db.insert_job(&package.folder, &name, &url, "direct").await?;
        let mut job = Job::new(id, url, name, Arc::clone(&package));
        job.resolve_resource = args.resolve;
        job.no_fallback = args.no_fallback;
        jobs.push(registry.register(job));
    }
    info!(jobs = jobs.len(), package = %package.name, "Starting jobs");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting jobs");
            interrupt.cancel();
        }
    });

    let show_progress = terminal::should_show_progress(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let progress = progress_manager::ProgressManager::new(show_progress);
    let account = args.premium.then(AccountContext::premium);

    let mut tasks = JoinSet::new();
    for job in jobs {
        let pipeline = Arc::clone(&pipeline);
        let cancel = cancel.child_token();
        let bar = progress.add(&job.name());
        let db = db.clone();
        tasks.spawn(async move {
            if let Err(error) = db.update_status(job.id(), JobStatus::Starting).await {
                warn!(job_id = job.id(), error = %error, "Failed to mark job started");
            }
            let outcome = pipeline
                .run_with_progress(&job, account, &cancel, bar.callback())
                .await;
            bar.finish(&outcome);
            (job, outcome)
        });
    }

    let mut completed = 0;
    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        let (job, outcome) = joined.context("job task panicked")?;
        if let Err(error) = db.record_job(&job.snapshot()).await {
            warn!(job_id = job.id(), error = %error, "Failed to record job");
        }
        print_outcome(&job, &outcome);
        if exit_handler::is_failed(outcome.state) {
            failed += 1;
        } else {
            completed += 1;
        }
    }

    info!(completed, failed, "Run complete");
    db.close().await;
    Ok(exit_handler::determine_exit_outcome(completed, failed))
}

/// Defaults, then the config file, then CLI flags.
fn resolve_config(args: &Args, loaded: &LoadedConfig) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::default();
    if let Some(file) = &loaded.config {
        if let Some(path) = &loaded.path {
            debug!(path = %path.display(), "Loaded config file");
        }
        file.apply_to(&mut config);
    }
    if let Some(dir) = &args.output_dir {
        config.download_folder.clone_from(dir);
    }
    if let Some(chunks) = args.chunks {
        config.chunks = chunks;
    }
    if args.skip_existing {
        config.skip_existing = true;
    }
    config.validate()?;
    Ok(config)
}

fn print_outcome(job: &JobHandle, outcome: &JobOutcome) {
    let job = job.snapshot();
    let detail = match outcome.state {
        PipelineState::Finished => job
            .local_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        _ => job.message.clone().unwrap_or_default(),
    };
    println!("{}\t{}\t{}", outcome.state, job.name, detail);
}

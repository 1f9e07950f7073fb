//! `appsetd`: reconciles application sets from a configuration directory.
//!
//! The configuration directory comes from `--config`, then
//! `$APPSET_CONFIG_DIR`, then `<platform config dir>/appset`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::sync::broadcast;

use appset::config::{ConfigError, LoadedConfig, RepositoryType};
use appset::logging::{init_logging, LogFormat, LoggingError};
use appset::reconcile::{
    ApplyEngine, AsyncRepoWatcher, ManifestDirApplyEngine, ReconcileError, ReconcileOptions,
    Reconciler, SyncScheduler,
};
use appset::repo::git::FetchSpec;
use appset::repo::{FsSnapshotProvider, GitRepository, GitSnapshotProvider, SnapshotProvider};
use appset::{ConfigLoader, ConfigValidator};

#[derive(Error, Debug)]
enum DaemonError {
    #[error("No configuration directory given and no platform config directory found")]
    NoConfigDir,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

/// appsetd CLI
#[derive(Parser, Debug)]
#[command(name = "appsetd")]
#[command(about = "Reconciles GitOps application sets", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration directory
    #[arg(short, long, env = "APPSET_CONFIG_DIR")]
    config: Option<PathBuf>,

    /// Run a single pass, print its report and exit
    #[arg(long)]
    once: bool,

    /// Log output format (text or json)
    #[arg(long, env = "APPSET_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "APPSET_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("appset"))
}

fn resolve_config_dir(arg: Option<PathBuf>) -> Option<PathBuf> {
    arg.or_else(default_config_dir)
}

fn build_provider(config: &LoadedConfig) -> Arc<dyn SnapshotProvider> {
    let repository = &config.settings.resource.spec.repository;
    let path = config.repository_path();

    match repository.repo_type {
        RepositoryType::Directory => Arc::new(FsSnapshotProvider::new(path)),
        RepositoryType::Git => {
            let mut provider =
                GitSnapshotProvider::new(GitRepository::new(path), repository.revision.as_str());
            if repository.fetch {
                // `origin/main` is refreshed by fetching `main` from `origin`.
                let prefix = format!("{}/", repository.remote);
                let branch = repository
                    .revision
                    .strip_prefix(&prefix)
                    .unwrap_or(&repository.revision);
                provider = provider.with_fetch(FetchSpec {
                    remote: repository.remote.clone(),
                    branch: branch.to_string(),
                });
            }
            Arc::new(provider)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, DaemonError> {
    let config_dir = resolve_config_dir(cli.config).ok_or(DaemonError::NoConfigDir)?;
    log::info!(
        "Starting appsetd v{} with config {}",
        env!("CARGO_PKG_VERSION"),
        config_dir.display()
    );

    let config = ConfigLoader::new(&config_dir).load()?;
    ConfigValidator::new().validate(&config)?;

    let settings = &config.settings.resource.spec;
    let provider = build_provider(&config);
    let engine: Arc<dyn ApplyEngine> =
        Arc::new(ManifestDirApplyEngine::new(config.output_directory()));
    let sets = config
        .application_sets
        .iter()
        .map(|s| s.resource.clone())
        .collect();
    let reconciler = Arc::new(Reconciler::new(
        provider,
        engine,
        sets,
        ReconcileOptions::from(&settings.reconcile),
    ));

    if cli.once {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let report = match runtime.block_on(reconciler.reconcile()) {
            Ok(report) => report,
            Err(e) => {
                if let Some(partial) = e.partial_report() {
                    println!("{}", serde_json::to_string_pretty(partial)?);
                }
                return Err(e.into());
            }
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        let healthy = report.sets.iter().all(|s| s.is_healthy());
        return Ok(if healthy {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let mut watcher = settings.watch.then(|| {
        let mut watcher = AsyncRepoWatcher::new(config.repository_path());
        watcher.start();
        watcher
    });

    let mut scheduler = SyncScheduler::new(
        Arc::clone(&reconciler),
        Duration::from_secs(settings.reconcile.interval_secs),
    );
    if let Some(watcher) = &watcher {
        scheduler = scheduler.with_change_events(watcher.subscribe());
    }

    let (_trigger_tx, trigger_rx) = broadcast::channel(16);
    let handle = scheduler.start(trigger_rx);

    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    let _ = stop_rx.recv();
    log::info!("Shutting down, waiting for the current pass to finish");

    scheduler.stop();
    if handle.join().is_err() {
        log::error!("Scheduler thread panicked");
    }
    if let Some(watcher) = watcher.as_mut() {
        watcher.stop();
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format, &cli.log_level) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

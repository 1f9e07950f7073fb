//! Process-wide logging setup.
//!
//! `log` records from the library are forwarded into a `tracing` subscriber
//! so that they share filtering and formatting with the pipeline spans.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Unknown log format '{0}', expected 'text' or 'json'")]
    UnknownFormat(String),

    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to install logger: {0}")]
    Install(String),
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `Ok(false)`
/// without touching anything if logging was already initialized.
pub fn init_logging(format: LogFormat, default_filter: &str) -> Result<bool, LoggingError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(false);
    }

    let result = install(format, default_filter);
    if result.is_err() {
        INITIALIZED.store(false, Ordering::SeqCst);
    }
    result.map(|()| true)
}

fn install(format: LogFormat, default_filter: &str) -> Result<(), LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| LoggingError::InvalidFilter {
            filter: default_filter.to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json()),
        ),
        LogFormat::Text => {
            tracing::subscriber::set_global_default(registry.with(tracing_subscriber::fmt::layer()))
        }
    };
    installed.map_err(|e| LoggingError::Install(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LoggingError::Install(e.to_string()))?;
    Ok(())
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

//! Tracing configuration and log routing.
//!
//! The pipeline logs to stdout with a compact formatter and, when a log file
//! can be opened, to that file through a non‑blocking writer so ingestion and
//! query hot paths never block on disk. `DOCPILOT_LOG_FILE` overrides the
//! default location of `logs/docpilot.log`.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Filter applied when `RUST_LOG` is unset.
///
/// `pdf_extract` logs every unrecognized font operator at `info`; one corrupt
/// upload can emit thousands of lines, so it is capped at `warn`.
const DEFAULT_FILTER: &str = "info,pdf_extract=warn";

/// Configure tracing subscribers for stdout and optional file logging.
///
/// - Respects `RUST_LOG` for filtering (defaults to [`DEFAULT_FILTER`]).
/// - Installs a compact stdout layer and, when the log file opens, a file layer.
/// - Uses a global guard to keep the non‑blocking writer alive for the process lifetime.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

/// Resolve the log file location: `DOCPILOT_LOG_FILE` wins, otherwise
/// `logs/docpilot.log` relative to the working directory.
fn resolve_log_path() -> PathBuf {
    std::env::var("DOCPILOT_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs").join("docpilot.log"))
}

/// Build a non‑blocking writer for the resolved log file.
///
/// Returns `None` when the parent directory cannot be created or the file
/// cannot be opened; the pipeline then logs to stdout only.
fn configure_file_writer() -> Option<NonBlocking> {
    let path = resolve_log_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}

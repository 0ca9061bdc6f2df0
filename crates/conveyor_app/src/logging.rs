use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info,conveyor_network=debug,conveyor_app=debug";

/// Daily log files are named `conveyor.<date>`.
const LOG_FILE_PREFIX: &str = "conveyor";

/// Console plus daily rolling file output. Keep the guard alive for the
/// duration of the run.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard> {
    let (writer, guard) = file_writer(logs_dir)?;

    tracing_subscriber::registry()
        .with(filter_or(DEFAULT_FILTER))
        .with(file_layer(writer))
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .compact(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

/// File-only logging with an explicit filter, for tests and embedding.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    let (writer, guard) = file_writer(logs_dir)?;

    tracing_subscriber::registry()
        .with(filter_or(filter))
        .with(file_layer(writer))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(guard)
}

fn file_writer(logs_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(logs_dir)?;
    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    Ok(tracing_appender::non_blocking(appender))
}

fn file_layer<S>(writer: NonBlocking) -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(writer)
}

/// `RUST_LOG` wins when set and valid.
fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

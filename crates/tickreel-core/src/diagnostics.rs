use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

pub const DEFAULT_LOG_FILTER: &str = "info,tickreel_core=trace";
pub const DEFAULT_TRACE_FILE_PREFIX: &str = "tickreel";

/// Keeps the file writer alive. Dropping it flushes buffered log lines.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    /// JSON log of this process run.
    pub log_path: PathBuf,
    _file_guard: WorkerGuard,
}

pub fn init_tracing(log_dir: impl AsRef<Path>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(log_dir, DEFAULT_TRACE_FILE_PREFIX, DEFAULT_LOG_FILTER)
}

pub fn init_tracing_from_config(
    log_dir: impl AsRef<Path>,
    diagnostics: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_options(
        log_dir,
        &diagnostics.trace_file_prefix,
        &diagnostics.rust_log_filter,
    )
}

/// Installs a compact stderr layer plus a JSON file layer. `RUST_LOG` wins
/// over `default_filter` when set.
pub fn init_tracing_with_options(
    log_dir: impl AsRef<Path>,
    file_prefix: &str,
    default_filter: &str,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let session_id = Uuid::new_v4();
    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    // two runs started in the same second must not share a log file
    let run = session_id.simple().to_string();
    let file_name = format!("{file_prefix}-{timestamp}-{}.log", &run[..8]);
    let log_path = log_dir.join(&file_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .with_target(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        Ok(()) => info!(%session_id, log_path = %log_path.display(), "tracing initialized"),
        Err(error) => warn!(?error, "global tracing subscriber already initialized"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_path,
        _file_guard: file_guard,
    })
}

use crate::logging::config::LoggingConfig;
use crate::Result;
use anyhow::{anyhow, Context};
use dirs_next::home_dir;
use std::fs::{create_dir_all, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self as tracing_fmt, format, writer::BoxMakeWriter};
use tracing_subscriber::registry::LookupSpan;

pub const LOG_FILE_NAME: &str = "dsrgraph.log";

pub type FileFmtLayer<S> =
    tracing_fmt::Layer<S, format::DefaultFields, format::Format<format::Full>, BoxMakeWriter>;

pub type FileLayerStack<S> = tracing_subscriber::layer::Layered<FileFmtLayer<S>, S>;

/// `<log_dir>/dsrgraph.log`, where the directory defaults to `<workspace>/.dsrgraph/logs`.
pub fn log_file_path(config: &LoggingConfig, workspace_root: Option<&Path>) -> Result<PathBuf> {
    let directory = resolve_log_dir(config, workspace_root)?;
    Ok(directory.join(LOG_FILE_NAME))
}

/// File layer behind a non-blocking writer; a sink layer when disabled.
pub fn file_layer<S>(
    log_file: &Path,
    enabled: bool,
) -> Result<(FileFmtLayer<S>, Option<WorkerGuard>)>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if !enabled {
        return Ok((make_layer(BoxMakeWriter::new(io::sink)), None));
    }

    let directory = log_file
        .parent()
        .ok_or_else(|| anyhow!("log file path {} has no parent directory", log_file.display()))?;
    create_dir_all(directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let writer = BoxMakeWriter::new(move || non_blocking.clone());
    Ok((make_layer(writer), Some(guard)))
}

fn make_layer<S>(writer: BoxMakeWriter) -> FileFmtLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
}

fn resolve_log_dir(config: &LoggingConfig, workspace_root: Option<&Path>) -> Result<PathBuf> {
    let anchor = match workspace_root {
        Some(workspace) => workspace.to_path_buf(),
        None => home_dir().ok_or_else(|| anyhow!("$HOME directory unavailable"))?,
    };
    let base_dir = match &config.log_dir {
        Some(custom) if custom.is_absolute() => return Ok(custom.clone()),
        Some(custom) => anchor.join(custom),
        None => anchor.join(".dsrgraph").join("logs"),
    };

    // Relative overrides must stay under the workspace (or home) they hang off.
    let normalized = canonicalize_or_clone(&base_dir);
    let anchor = canonicalize_or_clone(&anchor);
    if config.log_dir.is_some() && !normalized.starts_with(&anchor) {
        return Err(anyhow!(
            "logging.log_dir resolves outside {}",
            anchor.display()
        ));
    }
    Ok(normalized)
}

fn canonicalize_or_clone(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

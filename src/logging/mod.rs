pub mod config;
pub mod context;
pub mod layers;

pub use context::{detect_context, ExecutionContext};
pub use layers::console::ConsoleOutput;

use crate::logging::config::LoggingConfig;
use crate::logging::layers::{console, file};
use crate::{cli::Command, Result};
use anyhow::{anyhow, Context};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::Registry;

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Keeps the non-blocking file writer alive; dropping it flushes pending events.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
    console_output: ConsoleOutput,
    log_file_path: PathBuf,
}

impl LoggingGuard {
    pub fn console_output(&self) -> ConsoleOutput {
        self.console_output
    }

    pub fn log_file_path(&self) -> &Path {
        &self.log_file_path
    }
}

/// Initialize the logging framework for the provided CLI command.
///
/// Installs a registry with an `EnvFilter` (`RUST_LOG`, else the configured
/// level), a file sink and a console sink chosen by execution context. Errors
/// when called twice in one process.
pub fn init(command: &Command) -> Result<LoggingGuard> {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(anyhow!("logging already initialized"));
    }

    let context = detect_context(command);
    let workspace_root = resolve_workspace_path(command);
    let config = LoggingConfig::load(workspace_root.as_deref())?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.default_level))
        .context("failed to configure tracing level")?;
    let log_file_path = file::log_file_path(&config, workspace_root.as_deref())?;

    type FileSubscriber = file::FileLayerStack<Registry>;

    let (file_layer, file_guard) = file::file_layer::<Registry>(&log_file_path, config.enable_file)?;
    let console_output = console::select_console_output(context, config.console_output);
    let console_layer = console::console_layer::<FileSubscriber>(console_output);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(env_filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        console_output,
        log_file_path,
    })
}

fn resolve_workspace_path(command: &Command) -> Option<PathBuf> {
    let explicit = match command {
        Command::Validate(args) => args.workspace.clone(),
        Command::Lint(args) => args.workspace.clone(),
        Command::Dot(args) => args.workspace.clone(),
        Command::Status(args) => args.workspace.clone(),
    };
    explicit.or_else(|| env::current_dir().ok())
}


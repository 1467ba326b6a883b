//! Tracing setup for Undertow
//!
//! The console follows the level picked on the command line, with the HTTP
//! stack held back so per-connection chatter does not bury scheduler and
//! session events. Each run also rewrites a log file that keeps every event,
//! span timings included.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// File name of the per-run log inside the logs directory.
pub const LOG_FILE_NAME: &str = "undertow-last-run.log";

/// Logs directory used when none is given.
pub const DEFAULT_LOGS_DIR: &str = "logs";

/// Dependencies that log every connection and frame below INFO.
const NOISY_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest"];

/// Console filter directives for `level`.
///
/// At DEBUG and TRACE the noisy HTTP dependencies stay capped at INFO.
pub fn console_directives(level: Level) -> String {
    let mut directives = level.to_string().to_ascii_lowercase();
    if level > Level::INFO {
        for target in NOISY_TARGETS {
            directives.push_str(&format!(",{target}=info"));
        }
    }
    directives
}

/// Installs the global subscriber and returns the run log path.
///
/// `RUST_LOG` replaces the console directives when set; the run log always
/// records everything down to TRACE.
///
/// # Errors
///
/// - `std::io::Error` - Logs directory or run log could not be created
/// - `tracing_subscriber::util::TryInitError` - A global subscriber is already set
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error + Send + Sync>> {
    let log_path = logs_dir
        .unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR))
        .join(LOG_FILE_NAME);
    let run_log = open_run_log(&log_path)?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));
    let console_layer = fmt::layer()
        .compact()
        .with_target(true)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(Arc::new(run_log))
        .with_filter(EnvFilter::new("trace"));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        console = %console_level,
        run_log = %log_path.display(),
        "Tracing initialized"
    );

    Ok(log_path)
}

/// Truncates the previous run's log, creating its directory on first use.
fn open_run_log(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    File::create(path)
}

/// Log levels selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Informational, warning, and error messages
    #[default]
    Info,
    /// Debug and above
    Debug,
    /// Everything
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use undertow_core::tracing_setup::CliLogLevel;
    ///
    /// assert_eq!(CliLogLevel::Debug.as_tracing_level(), tracing::Level::DEBUG);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CliLogLevel::Error => "error",
            CliLogLevel::Warn => "warn",
            CliLogLevel::Info => "info",
            CliLogLevel::Debug => "debug",
            CliLogLevel::Trace => "trace",
        })
    }
}

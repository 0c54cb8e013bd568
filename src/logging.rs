//! Tracing setup for the CLI.
//!
//! Terminal output goes to stderr, compact by default or JSON on request.
//! When a log directory is given, a JSON copy of everything at debug level and
//! above is written to a daily-rotated file there.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

pub const LOG_FILE_PREFIX: &str = "phasegate.log";

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    /// JSON lines on stderr instead of the compact format
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

/// Keeps the file writer flushing until dropped.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Colours only on a terminal without `NO_COLOR`.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Filter for terminal output: `RUST_LOG` wins, otherwise verbosity decides.
pub fn terminal_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("phasegate=debug,info")
            } else {
                EnvFilter::try_new("phasegate=warn,error")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

pub fn init_tracing(options: &LogOptions) -> Result<LogGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    layers.push(if options.json {
        fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_filter(terminal_filter(options.verbose))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(options.verbose)
            .with_ansi(use_color())
            .compact()
            .with_filter(terminal_filter(options.verbose))
            .boxed()
    });

    let guard = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .json()
                    .with_filter(EnvFilter::new("phasegate=debug,info"))
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("Failed to initialise tracing")?;

    Ok(LogGuard { _file: guard })
}

//! Structured logging setup for the binary.
//!
//! Console output goes to stderr (stdout carries the JSON-line event
//! stream). When a log directory is usable, a daily-rotated file layer is
//! added as well.

use std::fs;
use std::path::Path;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter. `ort` logs hundreds of graph-optimizer lines at info.
const DEFAULT_FILTER: &str = "info,ort=warn,reqwest=warn,hyper=warn,mio=warn";

/// Install the global subscriber. Fails if one is already installed.
pub fn try_init(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let file_layer = log_dir.and_then(|dir| match file_appender(dir) {
        Ok(appender) => Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true),
        ),
        Err(e) => {
            eprintln!("File logging disabled ({}): {}", dir.display(), e);
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if let Some(dir) = log_dir {
        tracing::info!(log_dir = %dir.display(), "Logger initialized");
    }
    Ok(())
}

fn file_appender(dir: &Path) -> anyhow::Result<RollingFileAppender> {
    fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("duplex-voice")
        .filename_suffix("log")
        .max_log_files(5)
        .build(dir)?;
    Ok(appender)
}

//! Logging setup: console output plus optional daily rotated files.

use std::fs;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

/// Default filter when `RUST_LOG` is not set.
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("kvdi_pki={level},pki_controller={level}"))
}

/// Initialize the logging system
///
/// # Arguments
/// * `level` - Log level for this crate and the PKI library (e.g. "info", "debug")
/// * `json_format` - Emit JSON lines instead of the human readable format
/// * `log_dir` - Optional directory for a daily rotated `pki-controller` log
pub fn init_logger(level: &str, json_format: bool, log_dir: Option<&str>) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    let file_layer = match log_dir {
        Some(dir) => {
            let log_dir = Path::new(dir);
            fs::create_dir_all(log_dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "pki-controller");
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(std::sync::Mutex::new(appender)),
            )
        }
        None => None,
    };

    let console_layer = if json_format {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}

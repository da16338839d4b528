//! Structured logging for hive.
//!
//! Library code logs through `tracing` macros. The binary installs a
//! subscriber writing to `~/.hive/hive.log`, or to stderr when there is no
//! home directory.
//!
//! Debug mode can be enabled with `--debug` flag or `HIVE_DEBUG=1` env var.
//! `RUST_LOG` overrides both.

use std::fs::File;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Keeps the background log writer alive. Drop it last to flush.
pub struct LogGuard {
    _guard: Option<WorkerGuard>,
}

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) -> LogGuard {
    let env_debug = std::env::var("HIVE_DEBUG")
        .map(|v| is_truthy(&v))
        .unwrap_or(false);
    let debug_enabled = debug || env_debug;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug_enabled)));

    let log_file = Config::log_path().ok().and_then(|path| {
        std::fs::create_dir_all(path.parent()?).ok()?;
        // Truncate file on startup
        File::create(path).ok()
    });

    match log_file {
        Some(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            LogGuard {
                _guard: Some(guard),
            }
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            LogGuard { _guard: None }
        }
    }
}

fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

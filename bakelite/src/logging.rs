//! Engine logging initialization.
//!
//! Console output goes to stderr (the container process owns stdout);
//! a daily-rolling copy lands under the engine home's `logs/` directory.
//! Filtering via `BAKELITE_LOG` (falls back to `RUST_LOG`, then `info`).

use crate::runtime::layout::FilesystemLayout;
use bakelite_shared::errors::BakeliteResult;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

// Held for the process lifetime so the non-blocking file writer flushes.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn init_logging_for(layout: &FilesystemLayout) -> BakeliteResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_env("BAKELITE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let appender = tracing_appender::rolling::daily(layout.logs_dir(), "bakelite.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let initialized = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .is_ok();

    // A subscriber may already be installed (tests, embedding apps); that is
    // not an error, but then the file guard has nothing to flush.
    if initialized {
        let _ = LOG_GUARD.set(guard);
    }

    Ok(())
}

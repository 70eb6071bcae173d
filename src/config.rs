//! Runtime Configuration and Logging Setup
//!
//! CLI-level defaults plus tracing initialization. Logs go to stderr
//! always, and additionally into `<run_dir>/pipeline.log` when a run
//! directory exists. The returned guard must stay alive for the process
//! lifetime or buffered log lines are lost.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default run output root, relative to the working directory.
pub const DEFAULT_OUTPUT_DIR: &str = "output/runs";

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "GAMEBOOK_FORGE_LOG";

/// Initialize tracing: stderr layer always, file layer into the run
/// directory when given.
pub fn init_tracing(run_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match run_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("debug"));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

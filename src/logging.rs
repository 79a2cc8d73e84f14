//! Logging setup and prelude.
//!
//! Human-readable lines go to the console; when a log directory is given,
//! the same events are also appended to a daily rolling `coresync.log`.
//!
//! ```bash
//! RUST_LOG=debug coresync sync
//! RUST_LOG=coresync::vault=trace coresync
//! ```

pub use tracing::{debug, error, info, warn};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Rolling log file prefix.
pub const LOG_FILE_PREFIX: &str = "coresync.log";

/// Initialize the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process. A second call is a no-op.
pub fn init_tracing(log_directory: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stdout);

    let (file, guard) = match log_directory {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();

    guard
}

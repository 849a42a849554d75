//! Shared `tracing` bootstrap for the worker and controller binaries, behind the
//! `tracing-init` feature so a crate that only needs config loading doesn't pull in
//! `tracing-subscriber`/`tracing-appender` for nothing.
//!
//! Reads `RUST_LOG` (default `info`) for the filter, and writes daily-rotated log
//! files under `log_dir` in addition to stderr when one is given.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber: an `EnvFilter` (`RUST_LOG`, default
/// `info`), an stderr layer, and -- when `log_dir` is given -- a daily-rotated file
/// layer under `<log_dir>/<app_name>.log.<date>`.
///
/// Returns the file appender's [`WorkerGuard`] when file logging is enabled; the
/// caller must keep it alive for the process lifetime or buffered log lines are lost
/// on exit.
pub fn init(app_name: &str, log_dir: Option<&std::path::Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer());

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = registry
                .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init();
            Some(guard)
        }
        None => {
            let _ = registry.try_init();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_log_dir_returns_no_guard() {
        // try_init() only succeeds once per process; this exercises the code path
        // without asserting global-subscriber install (other tests in the same
        // binary may have already installed one).
        let guard = init("warden-config-test", None);
        assert!(guard.is_none());
    }

    #[test]
    fn init_with_log_dir_returns_a_guard() {
        let dir = tempfile::tempdir().unwrap();
        let guard = init("warden-config-test-file", Some(dir.path()));
        assert!(guard.is_some());
    }
}

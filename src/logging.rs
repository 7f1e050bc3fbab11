//! Tracing setup shared by the CLI and the daemon.
//!
//! On Linux the journald layer is used when the journal socket is reachable.
//! Otherwise logs go to a daily-rolling file under the data directory.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directive, e.g. `storyline=debug`.
pub const LOG_ENV: &str = "STORYLINE_LOG";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storyline")
        .join("logs")
}

/// Install the global subscriber. `file_prefix` names the rolling log file,
/// so the CLI and the daemon write separate files in the same directory.
pub fn init(log_dir: Option<PathBuf>, file_prefix: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer.with_syslog_identifier(file_prefix.to_string()))
                .try_init()?;

            tracing::debug!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, format!("{}.log", file_prefix));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Dropping the guard stops the writer thread; keep it for the process lifetime.
    let _ = FILE_GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::debug!("Logging initialized with file backend at {:?}", log_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir_is_namespaced() {
        let dir = default_log_dir();
        assert!(dir.ends_with("storyline/logs"));
    }
}

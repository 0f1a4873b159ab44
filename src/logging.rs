use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix of the daily log files.
pub const LOG_FILE_PREFIX: &str = "azexport";

/// Parse a level name.
///
/// Accepts `DEBUG`, `INFO`, `WARN`/`WARNING` and `ERROR` in any case;
/// anything else is INFO.
pub fn parse_level(name: &str) -> Level {
    match name.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => Level::DEBUG,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// The effective level: the configured one wins over the environment one.
pub fn resolve_level(configured: Option<&str>, from_env: Option<&str>) -> Level {
    let non_blank = |name: &&str| !name.trim().is_empty();
    configured
        .filter(non_blank)
        .or(from_env.filter(non_blank))
        .map(parse_level)
        .unwrap_or(Level::INFO)
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::new(level.as_str().to_lowercase())
}

/// Setup console logging, plus a daily rotating file when `log_dir` is set.
///
/// Called once at startup; the level does not change afterwards.
///
/// # Arguments
/// * `level` - Maximum level to record
/// * `log_dir` - Directory for log files, created if missing
///
/// # Returns
/// The file writer's guard, which must be held for the rest of the program
/// when file logging is enabled
pub fn setup_logging(level: Level, log_dir: Option<&Utf8Path>) -> Result<Option<WorkerGuard>> {
    let Some(log_dir) = log_dir else {
        tracing_subscriber::registry()
            .with(env_filter(level))
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_target(false),
            )
            .try_init()
            .context("Failed to initialize logging")?;

        tracing::debug!("Logging initialized: level={}", level);
        return Ok(None);
    };

    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    tracing::debug!("Logging initialized: level={}, dir={}", level, log_dir);

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARNING"), Level::WARN);
        assert_eq!(parse_level(" Error "), Level::ERROR);
        assert_eq!(parse_level("verbose"), Level::INFO);
    }

    #[test]
    fn test_configured_level_wins() {
        assert_eq!(resolve_level(Some("ERROR"), Some("DEBUG")), Level::ERROR);
        assert_eq!(resolve_level(None, Some("DEBUG")), Level::DEBUG);
        assert_eq!(resolve_level(Some(" "), Some("DEBUG")), Level::DEBUG);
        assert_eq!(resolve_level(None, None), Level::INFO);
    }

    #[test]
    fn test_setup_logging_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = Utf8PathBuf::try_from(temp_dir.path().join("logs")).unwrap();

        match setup_logging(Level::INFO, Some(&log_dir)) {
            Ok(guard) => assert!(guard.is_some()),
            Err(e) => assert!(e.to_string().contains("Failed to initialize logging")),
        }
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_setup_logging_console_only() {
        match setup_logging(Level::WARN, None) {
            Ok(guard) => assert!(guard.is_none()),
            Err(e) => assert!(e.to_string().contains("Failed to initialize logging")),
        }
    }
}

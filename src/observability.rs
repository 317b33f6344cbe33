//! Logging configuration and initialization for the feature builder.

use std::env;

use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::pipeline::{PipelineConfig, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single-line human output.
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `CREDIT_FEATURES_LOG_{LEVEL,FORMAT,TARGET}`; unparseable values keep
/// the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let mut config = LoggingConfig::default();

    if let Ok(level) = env::var("CREDIT_FEATURES_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Some(format) = env::var("CREDIT_FEATURES_LOG_FORMAT")
        .ok()
        .and_then(|raw| parse_log_format(&raw))
    {
        config.format = format;
    }

    if let Some(include_target) = env::var("CREDIT_FEATURES_LOG_TARGET")
        .ok()
        .and_then(|raw| parse_bool(&raw))
    {
        config.include_target = include_target;
    }

    config
}

/// Installs the global subscriber. Logs go to stderr.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(config.include_target)
        .with_ansi(!matches!(config.format, LogFormat::Json));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

pub fn log_app_start(config: &LoggingConfig) {
    info!(
        component = "build_features",
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_config_selected(config: &PipelineConfig) {
    let tables: Vec<&str> = config.tables.iter().map(|t| t.dataset_name()).collect();
    info!(
        component = "build_features",
        event = "config.selected",
        data_dir = %config.data_dir.display(),
        output = %config.output_path.display(),
        report = ?config.report_path.as_ref().map(|p| p.display().to_string()),
        workers = config.workers,
        sampling_fraction = config.sampling_fraction,
        seed = config.sampling_seed,
        tables = ?tables
    );
}

pub fn log_run_failed(err: &PipelineError) {
    match err.table() {
        Some(table) => error!(
            component = "build_features",
            event = "run.failed",
            table,
            error = %err
        ),
        None => error!(
            component = "build_features",
            event = "run.failed",
            error = %err
        ),
    }
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_log_env<R>(
        level: Option<&str>,
        format: Option<&str>,
        target: Option<&str>,
        f: impl FnOnce() -> R,
    ) -> R {
        let _guard = env_lock().lock().expect("env lock should not be poisoned");
        let vars = [
            ("CREDIT_FEATURES_LOG_LEVEL", level),
            ("CREDIT_FEATURES_LOG_FORMAT", format),
            ("CREDIT_FEATURES_LOG_TARGET", target),
        ];
        let previous: Vec<(&str, Option<String>)> =
            vars.iter().map(|(key, _)| (*key, env::var(key).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let output = f();

        for (key, value) in previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        output
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = with_log_env(None, None, None, logging_config_from_env);
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn reads_level_format_and_target() {
        let cfg = with_log_env(
            Some(" debug "),
            Some("JSON"),
            Some("off"),
            logging_config_from_env,
        );
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);

        let cfg = with_log_env(None, Some("compact"), None, logging_config_from_env);
        assert_eq!(cfg.format, LogFormat::Compact);
    }

    #[test]
    fn unparseable_values_keep_defaults() {
        let cfg = with_log_env(
            Some("credit_features=trace"),
            Some("yaml"),
            Some("sometimes"),
            logging_config_from_env,
        );
        assert_eq!(cfg.level, "credit_features=trace");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.include_target);
    }
}

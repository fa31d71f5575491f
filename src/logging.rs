/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogConfig, LogLevel};
use crate::error::{GridError, GridResult};

/// Initialize structured logging based on configuration
pub fn init_logging(config: &LogConfig) -> GridResult<()> {
    let env_filter = build_filter(config)?;

    if let Some(ref log_path) = config.log_file {
        init_file_logging(log_path, env_filter)
    } else {
        init_stdout_logging(env_filter)
    }
}

/// `RUST_LOG` wins; otherwise `rods_grid=<level>`
fn build_filter(config: &LogConfig) -> GridResult<EnvFilter> {
    let level = effective_level(config).to_tracing_level();
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("rods_grid={}", level)))
        .map_err(|e| GridError::InvalidConfig {
            message: format!("Failed to create log filter: {}", e),
        })
}

fn effective_level(config: &LogConfig) -> LogLevel {
    if config.verbose {
        LogLevel::Debug
    } else {
        config.log_level
    }
}

fn init_stdout_logging(env_filter: EnvFilter) -> GridResult<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| GridError::InvalidConfig {
            message: format!("Failed to install subscriber: {}", e),
        })
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> GridResult<()> {
    let file = File::create(log_path).map_err(|e| GridError::InvalidConfig {
        message: format!("Failed to create log file: {}", e),
    })?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| GridError::InvalidConfig {
            message: format!("Failed to install subscriber: {}", e),
        })
}

/// Route crate logs to the test harness output
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rods_grid=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = LogConfig {
            log_level: LogLevel::Error,
            log_file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&config), LogLevel::Debug);
    }

    #[test]
    fn test_configured_level_used_when_quiet() {
        let config = LogConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), LogLevel::Warn);
    }

    #[test]
    fn test_filter_builds() {
        assert!(build_filter(&LogConfig::default()).is_ok());
    }

    #[test]
    fn test_second_init_is_an_error_not_a_panic() {
        init_test_logging();
        let err = init_logging(&LogConfig::default()).unwrap_err();
        assert_eq!(err.kind_tag(), "invalid-config");
    }
}

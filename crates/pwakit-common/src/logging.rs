//! Logging configuration and setup.

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose output is raised to the configured level when no filter is given.
const PWAKIT_TARGETS: &[&str] = &["pwakit_common", "pwakit_net", "pwakit_sw", "pwakit"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Pretty,
    /// Compact single-line format.
    Compact,
    /// JSON format for structured logging.
    Json,
}

/// Errors raised while installing the global subscriber.
#[derive(Error, Debug)]
pub enum LogInitError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("A global subscriber is already installed")]
    AlreadyInitialized,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level applied to PwaKit crates.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Include source file location.
    pub include_location: bool,
    /// Custom filter string (e.g., "pwakit_sw=trace,reqwest=warn").
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            include_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Map a `-v` count to a configuration.
    ///
    /// 0 is `warn`, 1 is `info`, 2 is `debug`, anything higher is `trace`.
    pub fn for_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        Self {
            level,
            include_location: verbosity >= 3,
            ..Default::default()
        }
    }

    /// Switch to JSON output.
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Set a custom filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Filter directives used when neither `filter` nor `RUST_LOG` is set.
    ///
    /// Dependencies stay at `warn`; PwaKit crates get the configured level.
    pub fn default_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        let mut directives = vec!["warn".to_string()];
        directives.extend(PWAKIT_TARGETS.iter().map(|t| format!("{t}={level}")));
        directives.join(",")
    }

    fn env_filter(&self) -> Result<EnvFilter, LogInitError> {
        if let Some(ref custom) = self.filter {
            return EnvFilter::try_new(custom).map_err(|e| LogInitError::InvalidFilter {
                filter: custom.clone(),
                message: e.to_string(),
            });
        }

        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => {
                let directives = self.default_directives();
                EnvFilter::try_new(&directives).map_err(|e| LogInitError::InvalidFilter {
                    filter: directives,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: LogConfig) -> Result<(), LogInitError> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(true))
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|_| LogInitError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_for_verbosity() {
        assert_eq!(LogConfig::for_verbosity(0).level, Level::WARN);
        assert_eq!(LogConfig::for_verbosity(1).level, Level::INFO);
        assert_eq!(LogConfig::for_verbosity(2).level, Level::DEBUG);
        assert_eq!(LogConfig::for_verbosity(9).level, Level::TRACE);
        assert!(LogConfig::for_verbosity(3).include_location);
    }

    #[test]
    fn test_default_directives_scope_pwakit_crates() {
        let directives = LogConfig::for_verbosity(2).default_directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("pwakit_sw=debug"));
        assert!(directives.contains("pwakit_net=debug"));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LogConfig::default().with_filter("pwakit_sw=notalevel");
        assert!(matches!(
            config.env_filter(),
            Err(LogInitError::InvalidFilter { .. })
        ));
    }
}

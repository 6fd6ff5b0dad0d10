//! # relay-logging
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` built from the
//! configured level and per-module overrides (`RUST_LOG` wins when set),
//! and a JSON or human-readable `fmt` layer on stdout.

#![deny(unsafe_code)]

use relay_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The configured level or a module override is not a valid directive.
    #[error("invalid log filter {directives:?}: {reason}")]
    InvalidFilter {
        /// The directive string that failed to parse.
        directives: String,
        /// Parser message.
        reason: String,
    },
    /// A global subscriber was already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Build the filter directive string, e.g. `info,relay_server=debug`.
pub fn filter_directives(level: &str, module_levels: &[(String, String)]) -> String {
    let mut directives = level.to_lowercase();
    for (module, level) in module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_lowercase()));
    }
    directives
}

/// Build the `EnvFilter`: `RUST_LOG` if set and valid, else the configured directives.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directives = filter_directives(&settings.level, &settings.module_levels);
    EnvFilter::try_new(&directives).map_err(|e| LoggingError::InvalidFilter {
        directives,
        reason: e.to_string(),
    })
}

/// Initialize logging. Call once at startup.
pub fn init_logging(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match settings.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    result.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_without_overrides() {
        assert_eq!(filter_directives("INFO", &[]), "info");
    }

    #[test]
    fn directives_with_module_overrides() {
        let overrides = vec![
            ("relay_server".to_string(), "DEBUG".to_string()),
            ("tower_http".to_string(), "warn".to_string()),
        ];
        assert_eq!(
            filter_directives("info", &overrides),
            "info,relay_server=debug,tower_http=warn"
        );
    }

    #[test]
    fn invalid_level_is_rejected() {
        let overrides = vec![("relay_server".to_string(), "loudest".to_string())];
        let err = EnvFilter::try_new(filter_directives("info", &overrides));
        assert!(err.is_err());
    }

    #[test]
    fn error_display_names_directives() {
        let err = LoggingError::InvalidFilter {
            directives: "bogus=[".into(),
            reason: "parse error".into(),
        };
        assert!(err.to_string().contains("bogus=["));
    }
}

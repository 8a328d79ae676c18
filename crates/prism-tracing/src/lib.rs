//! Shared tracing configuration utilities for the prism workspace.
//!
//! The helpers in this crate centralise how executables, integration tests,
//! and supporting tools install `tracing` subscribers. By routing setup
//! through a single crate we avoid copy-pasting builder logic and keep the
//! logging surface consistent across binaries.

pub mod performance;

#[macro_use]
pub mod macros;

use std::env;
use std::error::Error;
use std::fmt;

pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

/// Configuration describing how the shared tracing subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional tracing directives (e.g. `prism_driver=debug,info`). When
    /// absent the crate will fall back to `RUST_LOG` and finally to
    /// [`default_directive`](Self::default_directive).
    pub directives: Option<String>,
    /// Fallback directive used when neither [`directives`](Self::directives)
    /// nor `RUST_LOG` resolve to a valid filter.
    pub default_directive: String,
    /// Controls whether event targets (module paths) appear in output.
    pub include_targets: bool,
    /// Controls ANSI formatting. Disable for CI logs that strip colour codes.
    pub ansi: bool,
    /// Span lifecycle events to emit. Defaults to [`FmtSpan::NONE`].
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
    /// Controls whether performance tracing is enabled.
    /// When false, performance spans are no-ops with minimal overhead.
    pub enable_performance_tracing: bool,
    /// Minimum duration in microseconds to log performance spans.
    /// Spans with duration below this threshold are not logged.
    /// None means all spans are logged regardless of duration.
    pub performance_threshold_us: Option<u64>,
    /// Performance-specific tracing directives, separate from main directives.
    /// Allows different log levels for performance vs regular tracing.
    pub performance_directives: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Returns a configuration tuned for local development (pretty, ANSI-enabled output).
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            enable_performance_tracing: cfg!(debug_assertions),
            performance_threshold_us: None,
            performance_directives: None,
        }
    }

    /// Returns a configuration tuned for CI or log collection environments (JSON, no ANSI).
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Json,
            enable_performance_tracing: false,
            performance_threshold_us: None,
            performance_directives: None,
        }
    }

    /// Returns a configuration optimized for performance analysis.
    ///
    /// This preset enables:
    /// - JSON output for machine-readable logs
    /// - Detailed span events (ENTER, EXIT, CLOSE)
    /// - Performance tracing enabled
    /// - No ANSI formatting
    /// - Debug-level directives for performance-critical crates
    pub fn for_performance() -> Self {
        Self {
            directives: Some("prism_core=debug,prism_driver=debug".to_string()),
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::ENTER | FmtSpan::EXIT | FmtSpan::CLOSE,
            output: TracingOutput::Json,
            enable_performance_tracing: true,
            performance_threshold_us: None,
            performance_directives: Some("prism_core=trace,prism_driver=trace".to_string()),
        }
    }

    /// Build a configuration using environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `PRISM_TRACING_PROFILE` - Profile preset: `local` (default), `ci`, or `performance`
    /// - `PRISM_TRACING_DIRECTIVES` - Overrides tracing directives
    /// - `PRISM_TRACING_FORMAT` - Output format: `pretty`, `compact`, or `json`
    /// - `PRISM_PERF_TRACING` - Enable/disable performance tracing: `true` or `false`
    /// - `PRISM_PERF_THRESHOLD_US` - Minimum duration (microseconds) to log
    /// - `PRISM_PERF_DIRECTIVES` - Performance-specific tracing directives
    pub fn from_env() -> Self {
        let profile = env::var("PRISM_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "performance" => Self::for_performance(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("PRISM_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("PRISM_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if matches!(config.output, TracingOutput::Json) {
                    config.ansi = false;
                }
            }
        }

        if let Ok(perf_tracing) = env::var("PRISM_PERF_TRACING") {
            config.enable_performance_tracing = perf_tracing.eq_ignore_ascii_case("true")
                || perf_tracing == "1"
                || perf_tracing.eq_ignore_ascii_case("yes");
        }

        if let Ok(threshold) = env::var("PRISM_PERF_THRESHOLD_US") {
            if let Ok(threshold_us) = threshold.parse::<u64>() {
                config.performance_threshold_us = Some(threshold_us);
            }
        }

        if let Ok(perf_directives) = env::var("PRISM_PERF_DIRECTIVES") {
            if !perf_directives.trim().is_empty() {
                config.performance_directives = Some(perf_directives);
            }
        }

        config
    }

    /// Resolve the `EnvFilter` to use for the subscriber.
    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))
        } else {
            match EnvFilter::try_from_default_env() {
                Ok(filter) => Ok(filter),
                Err(_) => Ok(EnvFilter::new(self.default_directive.clone())),
            }
        }
    }
}

/// Errors surfaced when configuring the shared tracing subscriber fails.
#[derive(Debug)]
pub enum TracingSetupError {
    /// The provided directive string could not be parsed.
    InvalidFilter(String),
    /// Installing the global subscriber failed (usually because one is
    /// already set).
    SubscriberInit(tracing_subscriber::util::TryInitError),
}

impl fmt::Display for TracingSetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracingSetupError::InvalidFilter(msg) => {
                write!(f, "invalid tracing directive: {msg}")
            }
            TracingSetupError::SubscriberInit(err) => {
                write!(f, "failed to install global tracing subscriber: {err}")
            }
        }
    }
}

impl Error for TracingSetupError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TracingSetupError::SubscriberInit(err) => Some(err),
            _ => None,
        }
    }
}

/// Build a `tracing` subscriber using the provided configuration.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    let (filter, fmt_layer) = subscriber_layers(config)?;
    Ok(Registry::default().with(fmt_layer).with(filter))
}

/// Build the filter and formatting layers for external composition.
pub fn subscriber_layers(
    config: &TracingConfig,
) -> Result<(EnvFilter, Box<dyn Layer<Registry> + Send + Sync>), TracingSetupError> {
    let filter = config.resolve_filter()?;
    let span_events = config.span_events.clone();
    let include_targets = config.include_targets;
    let ansi = config.ansi;

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.output {
        TracingOutput::Compact => Box::new(
            tracing_fmt::layer()
                .with_target(include_targets)
                .with_ansi(ansi)
                .with_span_events(span_events),
        ),
        TracingOutput::Pretty => Box::new(
            tracing_fmt::layer()
                .pretty()
                .with_target(include_targets)
                .with_ansi(ansi)
                .with_span_events(span_events),
        ),
        TracingOutput::Json => Box::new(
            tracing_fmt::layer()
                .json()
                .with_target(include_targets)
                .with_span_events(span_events)
                .with_ansi(false),
        ),
    };

    Ok((filter, layer))
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Output format choices for the tracing formatter layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_env(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn rejects_invalid_directive() {
        reset_env(&["PRISM_TRACING_DIRECTIVES", "RUST_LOG"]);
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        let result = build_subscriber(&config);
        assert!(matches!(result, Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    #[serial]
    fn builds_with_defaults() {
        reset_env(&[]);
        let config = TracingConfig::default();
        assert!(build_subscriber(&config).is_ok());
    }

    #[test]
    #[serial]
    fn from_env_respects_profile_and_format() {
        reset_env(&[
            "PRISM_TRACING_PROFILE",
            "PRISM_TRACING_FORMAT",
            "PRISM_TRACING_DIRECTIVES",
        ]);

        env::set_var("PRISM_TRACING_PROFILE", "ci");
        env::set_var("PRISM_TRACING_FORMAT", "compact");
        env::set_var("PRISM_TRACING_DIRECTIVES", "prism_core=debug");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("prism_core=debug"));
        assert!(!config.ansi);
        assert!(matches!(config.output, TracingOutput::Compact));

        reset_env(&[
            "PRISM_TRACING_PROFILE",
            "PRISM_TRACING_FORMAT",
            "PRISM_TRACING_DIRECTIVES",
        ]);
    }

    #[test]
    #[serial]
    fn from_env_respects_performance_settings() {
        reset_env(&[
            "PRISM_TRACING_PROFILE",
            "PRISM_PERF_TRACING",
            "PRISM_PERF_THRESHOLD_US",
            "PRISM_PERF_DIRECTIVES",
        ]);

        env::set_var("PRISM_PERF_TRACING", "true");
        env::set_var("PRISM_PERF_THRESHOLD_US", "1000");
        env::set_var("PRISM_PERF_DIRECTIVES", "prism_driver=trace");

        let config = TracingConfig::from_env();
        assert!(config.enable_performance_tracing);
        assert_eq!(config.performance_threshold_us, Some(1000));
        assert_eq!(config.performance_directives.as_deref(), Some("prism_driver=trace"));

        reset_env(&["PRISM_PERF_TRACING", "PRISM_PERF_THRESHOLD_US", "PRISM_PERF_DIRECTIVES"]);
    }

    #[test]
    #[serial]
    fn for_performance_preset() {
        let config = TracingConfig::for_performance();
        assert!(config.enable_performance_tracing);
        assert!(matches!(config.output, TracingOutput::Json));
        assert!(!config.ansi);
        assert!(config.directives.is_some());
        assert!(config.performance_directives.is_some());
    }

    #[test]
    #[serial]
    fn performance_profile_from_env() {
        reset_env(&[
            "PRISM_TRACING_PROFILE",
            "PRISM_TRACING_FORMAT",
            "PRISM_PERF_TRACING",
            "PRISM_PERF_THRESHOLD_US",
            "PRISM_PERF_DIRECTIVES",
        ]);

        env::set_var("PRISM_TRACING_PROFILE", "performance");
        let config = TracingConfig::from_env();
        assert!(config.enable_performance_tracing);
        assert!(matches!(config.output, TracingOutput::Json));

        reset_env(&["PRISM_TRACING_PROFILE"]);
    }
}

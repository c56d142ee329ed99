//! Tracing configuration module for structured logging
//!
//! The binaries configure a subscriber; the library only emits events and
//! spans. Log output always goes to stderr because the bridge reserves stdout
//! for its status lines.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output with colors and emojis (default for CLI)
    Console,
    /// Plain compact output for CI and subprocess capture
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Set custom environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Initialize the global subscriber
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = if let Some(env_filter) = &self.env_filter {
            EnvFilter::try_new(env_filter)?
        } else {
            EnvFilter::try_new(self.verbosity_to_filter())?
        };

        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "🚀 Segmentation session started");
        }

        Ok(())
    }
}

/// Initialize tracing with CLI-friendly defaults
///
/// A non-empty `RUST_LOG` takes precedence over the `-v` count.
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<()> {
    cli_config(verbosity, format, std::env::var(EnvFilter::DEFAULT_ENV).ok()).init()
}

#[cfg(feature = "cli")]
fn cli_config(verbosity: u8, format: TracingFormat, env_override: Option<String>) -> TracingConfig {
    let config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    match env_override.filter(|filter| !filter.trim().is_empty()) {
        Some(filter) => config.with_env_filter(filter),
        None => config,
    }
}

/// Span creation helpers for common operations
pub mod spans {
    use tracing::{Level, Span};

    /// Whole bridge invocation
    pub fn dispatch(model_type: &str, checkpoint: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "dispatch",
            model_type = %model_type,
            checkpoint = %checkpoint.display()
        )
    }

    pub fn model_loading(family: &str, model_type: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "model_loading",
            family = %family,
            model_type = %model_type
        )
    }

    pub fn segmentation(mode: &str, cardinality: &str, dimensions: (u32, u32)) -> Span {
        tracing::span!(
            Level::INFO,
            "segmentation",
            mode = %mode,
            cardinality = %cardinality,
            width = %dimensions.0,
            height = %dimensions.1
        )
    }

    /// Host-side conversion of a mask batch into layers
    pub fn layer_rendering(stem: &str) -> Span {
        tracing::span!(Level::DEBUG, "layer_rendering", stem = %stem)
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use tracing::{debug, error, warn};

    pub fn error_with_context(error: &dyn std::error::Error, context: &str) {
        error!(error = %error, context = %context, "❌ Operation failed");
    }

    pub fn warning_with_recommendation(message: &str, recommendation: &str) {
        warn!(message = %message, recommendation = %recommendation, "⚠️  Warning");
    }

    pub fn performance_metric(operation: &str, duration_ms: u64) {
        debug!(operation = %operation, duration_ms = %duration_ms, "⏱️  Performance metric");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "trace");
        assert_eq!(TracingConfig::new().with_verbosity(9).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("segany=debug")
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("segany=debug"));
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_cli_config_env_override() {
        let config = cli_config(1, TracingFormat::Compact, Some("segany::host=trace".to_string()));
        assert_eq!(config.env_filter.as_deref(), Some("segany::host=trace"));
        assert!(config.session_id.is_some());

        let config = cli_config(1, TracingFormat::Compact, Some("  ".to_string()));
        assert!(config.env_filter.is_none());
        assert_eq!(config.verbosity_to_filter(), "debug");
    }

    #[test]
    fn test_spans_construct_without_subscriber() {
        let span = spans::segmentation("Box", "Single", (50, 50));
        let _entered = span.enter();
        events::performance_metric("encode", 3);
    }
}

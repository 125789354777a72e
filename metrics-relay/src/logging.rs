//! Logging utilities and configuration for metrics-relay.
//!
//! The engine logs through `tracing`. [`LogConfig`] decides how chatty the
//! hot paths are (every queued measurement, every submitted batch), and
//! [`setup`] installs a `tracing-subscriber` for applications that do not
//! configure one themselves.

use tracing::Level;

/// Logging configuration for an engine.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level for engine components
    pub base_level: Level,
    /// Whether to log every queued measurement
    pub log_measurements: bool,
    /// Whether to log submitted batches
    pub log_batches: bool,
    /// Maximum length for logged field values (to prevent huge logs)
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_measurements: false,
            log_batches: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Creates a verbose configuration suitable for debugging.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_measurements: true,
            log_batches: true,
            max_field_length: 1024,
        }
    }

    /// Creates a minimal configuration for production with lowest overhead.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_measurements: false,
            log_batches: false,
            max_field_length: 128,
        }
    }
}

/// Macro for conditional per-measurement logging.
#[macro_export]
macro_rules! log_measurement {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_measurements {
            tracing::debug!($($arg)*);
        }
    };
}

/// Macro for conditional batch logging.
#[macro_export]
macro_rules! log_batch {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_batches {
            tracing::info!($($arg)*);
        }
    };
}

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Utilities for installing a `tracing` subscriber.
pub mod setup {
    use tracing::Level;

    /// Configuration for the global subscriber.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Log level for the application
        pub level: Level,
        /// Log level for metrics-relay specifically
        pub relay_level: Level,
        /// Whether to use JSON output format
        pub json_format: bool,
        /// Environment filter override
        pub env_filter: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                relay_level: Level::DEBUG,
                json_format: false,
                env_filter: None,
            }
        }
    }

    impl LoggingConfig {
        /// Sets the log level for the application.
        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        /// Sets the log level for metrics-relay.
        pub fn with_relay_level(mut self, level: Level) -> Self {
            self.relay_level = level;
            self
        }

        /// Sets whether to use JSON output format.
        pub fn with_json_format(mut self, enabled: bool) -> Self {
            self.json_format = enabled;
            self
        }

        /// Sets a custom environment filter.
        pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
            self.env_filter = Some(filter.into());
            self
        }

        /// Builds the environment filter string.
        pub fn env_filter(&self) -> String {
            if let Some(ref filter) = self.env_filter {
                filter.clone()
            } else {
                format!(
                    "{},metrics_relay={}",
                    self.level.as_str().to_lowercase(),
                    self.relay_level.as_str().to_lowercase()
                )
            }
        }
    }

    /// Installs a global fmt subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured filter.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use metrics_relay::logging::setup::{LoggingConfig, init_logging};
    ///
    /// init_logging(LoggingConfig::default().with_json_format(true)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

        let fmt_layer = if config.json_format {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().boxed()
        };

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        Ok(())
    }
}

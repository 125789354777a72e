use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::client::MetricsClient;
use crate::error::{RelayError, Result};
use crate::options::{ProcessorOptions, DEFAULT_PER_REQUEST};

/// The resolved, validated settings of one engine.
///
/// Built once when the engine is built and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    autosubmit_interval: Option<u64>,
    batch_size: usize,
    source: Option<String>,
    tags: HashMap<String, String>,
    measure_time: Option<i64>,
    time: Option<i64>,
    created_at: DateTime<Utc>,
    clear_on_failure: bool,
    prefix: Option<String>,
    skip_measurement_times: bool,
    multidimensional: bool,
}

impl ProcessorConfig {
    /// Validates `options` and resolves them against `client`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfiguration`] for incompatible options
    /// or a zero `per_request`. Nothing is built on failure.
    pub fn new(
        options: ProcessorOptions,
        client: &MetricsClient,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        options.validate()?;

        let batch_size = options.per_request.unwrap_or(DEFAULT_PER_REQUEST);
        if batch_size == 0 {
            return Err(RelayError::invalid_configuration(
                "'per_request' must be greater than zero",
            ));
        }

        let tags = options.tags.unwrap_or_default();
        let multidimensional = client.has_tagging() || !tags.is_empty() || options.time.is_some();

        Ok(Self {
            autosubmit_interval: options.autosubmit_interval,
            batch_size,
            source: options.source,
            tags,
            measure_time: options.measure_time,
            time: options.time,
            created_at,
            clear_on_failure: options.clear_failures,
            prefix: options.prefix.filter(|p| !p.is_empty()),
            skip_measurement_times: options.skip_measurement_times,
            multidimensional,
        })
    }

    pub fn autosubmit_interval(&self) -> Option<u64> {
        self.autosubmit_interval
    }

    /// Maximum measurements per request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    pub fn measure_time(&self) -> Option<i64> {
        self.measure_time
    }

    pub fn time(&self) -> Option<i64> {
        self.time
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn clear_on_failure(&self) -> bool {
        self.clear_on_failure
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn skip_measurement_times(&self) -> bool {
        self.skip_measurement_times
    }

    /// True when submissions use tags and explicit times instead of a source.
    pub fn is_multidimensional(&self) -> bool {
        self.multidimensional
    }
}

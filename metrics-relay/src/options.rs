//! Option validation.
//!
//! Processor options and per-measurement options share one rule set: some
//! metadata keys describe the legacy single-source model and some the tagged
//! multidimensional model, and the two cannot be mixed. Presence of a key is
//! what counts; an explicit `null` still conflicts.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::measurement::MeasurementKind;

/// Option pairs that must never be present together.
pub const INCOMPATIBLE_OPTIONS: [(&str, &str); 4] = [
    ("source", "tags"),
    ("measure_time", "time"),
    ("source", "time"),
    ("measure_time", "tags"),
];

/// Default number of measurements sent per request.
pub const DEFAULT_PER_REQUEST: usize = 500;

/// Checks that `options` is a mapping with no incompatible keys.
///
/// # Errors
///
/// Returns [`RelayError::InvalidConfiguration`] if `options` is not a JSON
/// object or contains both keys of any pair in [`INCOMPATIBLE_OPTIONS`].
pub fn validate(options: &Value) -> Result<()> {
    let map = options
        .as_object()
        .ok_or_else(|| RelayError::invalid_configuration("options must be a key-value mapping"))?;
    check_compatibility(|key| map.contains_key(key))
}

fn check_compatibility(present: impl Fn(&str) -> bool) -> Result<()> {
    for (first, second) in INCOMPATIBLE_OPTIONS {
        if present(first) && present(second) {
            return Err(RelayError::incompatible_options(first, second));
        }
    }
    Ok(())
}

fn epoch_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.map(|v| v.trunc() as i64))
}

/// Options for a processor, as supplied by the caller.
///
/// Build with the `with_*` methods or deserialize from JSON with
/// [`ProcessorOptions::from_value`]. The connecting client is injected
/// separately when the engine is built.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessorOptions {
    /// Submit automatically once this many seconds have passed.
    #[serde(default)]
    pub autosubmit_interval: Option<u64>,
    /// Maximum measurements per request.
    #[serde(default)]
    pub per_request: Option<usize>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub measure_time: Option<i64>,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub time: Option<i64>,
    /// Drop queued measurements when the service rejects a submission.
    #[serde(default)]
    pub clear_failures: bool,
    /// Prefix prepended to every measurement name.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Strip per-measurement and default timestamps from submissions.
    #[serde(default)]
    pub skip_measurement_times: bool,
}

impl ProcessorOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a JSON mapping and deserializes it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfiguration`] if validation fails or a
    /// recognized option has the wrong type.
    pub fn from_value(value: Value) -> Result<Self> {
        validate(&value)?;
        serde_json::from_value(value)
            .map_err(|e| RelayError::invalid_configuration(format!("malformed options: {e}")))
    }

    /// Applies the compatibility rules to the typed form.
    pub fn validate(&self) -> Result<()> {
        check_compatibility(|key| match key {
            "source" => self.source.is_some(),
            "tags" => self.tags.is_some(),
            "measure_time" => self.measure_time.is_some(),
            "time" => self.time.is_some(),
            _ => false,
        })
    }

    pub fn with_autosubmit_interval(mut self, seconds: u64) -> Self {
        self.autosubmit_interval = Some(seconds);
        self
    }

    pub fn with_per_request(mut self, per_request: usize) -> Self {
        self.per_request = Some(per_request);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: HashMap<String, String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_measure_time(mut self, epoch_seconds: i64) -> Self {
        self.measure_time = Some(epoch_seconds);
        self
    }

    pub fn with_time(mut self, epoch_seconds: i64) -> Self {
        self.time = Some(epoch_seconds);
        self
    }

    pub fn with_clear_failures(mut self, clear: bool) -> Self {
        self.clear_failures = clear;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_skip_measurement_times(mut self, skip: bool) -> Self {
        self.skip_measurement_times = skip;
        self
    }
}

/// Metadata attached to a single measurement.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MeasureOptions {
    #[serde(default, rename = "type")]
    pub kind: MeasurementKind,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub measure_time: Option<i64>,
    #[serde(default, deserialize_with = "epoch_seconds")]
    pub time: Option<i64>,
}

impl MeasureOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a JSON mapping and deserializes it.
    pub fn from_value(value: Value) -> Result<Self> {
        validate(&value)?;
        serde_json::from_value(value).map_err(|e| {
            RelayError::invalid_configuration(format!("malformed measurement options: {e}"))
        })
    }

    /// Applies the compatibility rules to the typed form.
    pub fn validate(&self) -> Result<()> {
        check_compatibility(|key| match key {
            "source" => self.source.is_some(),
            "tags" => self.tags.is_some(),
            "measure_time" => self.measure_time.is_some(),
            "time" => self.time.is_some(),
            _ => false,
        })
    }

    pub fn counter(mut self) -> Self {
        self.kind = MeasurementKind::Counter;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_measure_time(mut self, epoch_seconds: i64) -> Self {
        self.measure_time = Some(epoch_seconds);
        self
    }

    pub fn with_time(mut self, epoch_seconds: i64) -> Self {
        self.time = Some(epoch_seconds);
        self
    }
}

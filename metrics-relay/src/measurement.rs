//! Measurement types and the batch payload handed to persistence backends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine::ProcessorConfig;

/// How the remote service should interpret a measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    /// A point-in-time value.
    #[default]
    Gauge,
    /// A monotonically increasing count.
    Counter,
}

/// A named numeric sample with optional metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub value: f64,
    #[serde(rename = "type", default)]
    pub kind: MeasurementKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

impl Measurement {
    /// Creates a gauge with no metadata.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            kind: MeasurementKind::Gauge,
            source: None,
            tags: None,
            measure_time: None,
            time: None,
        }
    }

    /// Creates a counter with no metadata.
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: MeasurementKind::Counter,
            ..Self::gauge(name, value)
        }
    }

    /// Returns true if the measurement carries tags or an explicit time.
    pub fn is_multidimensional(&self) -> bool {
        self.tags.is_some() || self.time.is_some()
    }
}

/// The queued measurements of one submission, with batch-level defaults.
///
/// In legacy mode measurements are split into `gauges` and `counters` and the
/// batch carries a default `source` and `measure_time`; a measurement with its
/// own tags or time still goes to `measurements`. In multidimensional mode
/// everything lives in `measurements` and the batch carries default `tags` and
/// `time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementBatch {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gauges: Vec<Measurement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<Measurement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub measurements: Vec<Measurement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

impl MeasurementBatch {
    /// Builds the submission payload for `items` using the processor defaults.
    pub fn assemble(items: Vec<Measurement>, config: &ProcessorConfig) -> Self {
        let skip_times = config.skip_measurement_times();
        let default_time = if skip_times {
            None
        } else {
            config.time().or(config.measure_time())
        };

        let items = items.into_iter().map(|mut m| {
            if skip_times {
                m.measure_time = None;
                m.time = None;
            }
            m
        });

        if config.is_multidimensional() {
            let tags = (!config.tags().is_empty()).then(|| config.tags().clone());
            Self {
                measurements: items.collect(),
                tags,
                time: default_time,
                ..Self::default()
            }
        } else {
            let (measurements, legacy): (Vec<_>, Vec<_>) =
                items.partition(Measurement::is_multidimensional);
            let (gauges, counters) = legacy
                .into_iter()
                .partition(|m| m.kind == MeasurementKind::Gauge);
            Self {
                gauges,
                counters,
                measurements,
                source: config.source().map(str::to_string),
                measure_time: default_time,
                ..Self::default()
            }
        }
    }

    /// Number of measurements in the batch.
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len() + self.measurements.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if any part of the batch targets the multidimensional
    /// endpoint.
    pub fn is_multidimensional(&self) -> bool {
        !self.measurements.is_empty() || self.tags.is_some() || self.time.is_some()
    }

    /// Splits the batch into chunks of at most `size` measurements.
    ///
    /// Gauges and counters are chunked together and keep the legacy defaults
    /// (`source`, `measure_time`). Entries of `measurements` go into separate
    /// chunks that never carry `source`, so every chunk targets exactly one
    /// endpoint. A `size` of zero is treated as one.
    pub fn chunks(&self, size: usize) -> Vec<MeasurementBatch> {
        let size = size.max(1);
        let legacy: Vec<&Measurement> = self.gauges.iter().chain(self.counters.iter()).collect();

        let legacy_chunks = legacy.chunks(size).map(|chunk| {
            let mut part = Self {
                source: self.source.clone(),
                measure_time: self.measure_time,
                ..Self::default()
            };
            for m in chunk {
                if m.kind == MeasurementKind::Counter {
                    part.counters.push((*m).clone());
                } else {
                    part.gauges.push((*m).clone());
                }
            }
            part
        });

        let tagged_chunks = self.measurements.chunks(size).map(|chunk| Self {
            measurements: chunk.to_vec(),
            tags: self.tags.clone(),
            time: self.time.or(self.measure_time),
            ..Self::default()
        });

        legacy_chunks.chain(tagged_chunks).collect()
    }
}

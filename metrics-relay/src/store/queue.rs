use crate::error::{RelayError, Result};
use crate::measurement::{Measurement, MeasurementKind};
use crate::store::MeasurementStore;

/// Unordered in-memory queue of measurements, optionally bounded.
#[derive(Debug, Clone, Default)]
pub struct MetricsQueue {
    entries: Vec<Measurement>,
    max_size: Option<usize>,
}

impl MetricsQueue {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue that refuses additions beyond `max_size` entries.
    pub fn bounded(max_size: usize) -> Self {
        Self {
            entries: Vec::with_capacity(max_size),
            max_size: Some(max_size),
        }
    }

    /// Queued gauges.
    pub fn gauges(&self) -> impl Iterator<Item = &Measurement> {
        self.by_kind(MeasurementKind::Gauge)
    }

    /// Queued counters.
    pub fn counters(&self) -> impl Iterator<Item = &Measurement> {
        self.by_kind(MeasurementKind::Counter)
    }

    fn by_kind(&self, kind: MeasurementKind) -> impl Iterator<Item = &Measurement> {
        self.entries.iter().filter(move |m| m.kind == kind)
    }

    /// Moves everything queued in `other` into this queue.
    ///
    /// Fails without moving anything if the result would exceed the bound.
    pub fn merge(&mut self, other: &mut MetricsQueue) -> Result<()> {
        if let Some(max_size) = self.max_size {
            let pending_count = self.entries.len() + other.entries.len();
            if pending_count > max_size {
                return Err(RelayError::QueueOverflow {
                    pending_count,
                    max_size,
                });
            }
        }
        self.entries.append(&mut other.entries);
        Ok(())
    }
}

impl MeasurementStore for MetricsQueue {
    fn add(&mut self, measurement: Measurement) -> Result<()> {
        if let Some(max_size) = self.max_size {
            if self.entries.len() >= max_size {
                return Err(RelayError::QueueOverflow {
                    pending_count: self.entries.len(),
                    max_size,
                });
            }
        }
        self.entries.push(measurement);
        Ok(())
    }

    fn queued(&self) -> Vec<Measurement> {
        self.entries.clone()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

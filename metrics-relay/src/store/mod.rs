//! Measurement stores.
//!
//! A store only holds measurements until the engine drains them. It does not
//! know about prefixes, defaults, or submission; the
//! [`SubmissionEngine`](crate::engine::SubmissionEngine) owns one and applies
//! those rules around it.

use crate::error::Result;
use crate::measurement::Measurement;

mod queue;

pub use queue::MetricsQueue;

/// Container of queued measurements.
pub trait MeasurementStore: Send + 'static {
    /// Queues one measurement.
    fn add(&mut self, measurement: Measurement) -> Result<()>;

    /// Snapshot of everything queued. Order is not significant.
    fn queued(&self) -> Vec<Measurement>;

    /// Number of queued measurements.
    fn len(&self) -> usize;

    /// Check if nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything queued.
    fn clear(&mut self);
}

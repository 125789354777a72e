//! Prelude for commonly used types and traits in metrics-relay.

pub use crate::client::MetricsClient;
pub use crate::clock::{Clock, SystemClock};
pub use crate::config::ClientConfig;
pub use crate::engine::{AutosubmitWorker, SubmissionEngine};
pub use crate::error::{ClientError, RelayError, Result};
pub use crate::logging::LogConfig;
pub use crate::measurement::{Measurement, MeasurementKind};
pub use crate::options::{MeasureOptions, ProcessorOptions};
pub use crate::persistence::{BackendRegistry, PersistenceKind, Persister};
pub use crate::store::{MeasurementStore, MetricsQueue};

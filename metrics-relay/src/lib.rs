//! # metrics-relay - Buffered Measurement Submission
//!
//! metrics-relay collects application measurements (gauges and counters) in
//! memory and submits them to a metrics service in batches, either on demand
//! or on an autosubmit schedule. Submission goes through a pluggable
//! persistence backend chosen by the client configuration.
//!
//! ## Overview
//!
//! An application builds a [`MetricsClient`](client::MetricsClient) with its
//! credentials, wraps a [`MeasurementStore`](store::MeasurementStore) in a
//! [`SubmissionEngine`](engine::SubmissionEngine), and feeds measurements into
//! the engine. The engine:
//!
//! - validates its options once, rejecting incompatible combinations such as
//!   `source` with `tags`
//! - applies a name prefix and engine-wide defaults (source, tags, times)
//! - times closures and futures, queueing their duration in milliseconds
//! - submits in batches of `per_request` measurements
//! - clears the queue only after the backend accepted it, or on a client
//!   rejection when `clear_failures` is set
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metrics_relay::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let client = MetricsClient::new(ClientConfig::new("ops@example.com", "api-key"))?;
//!
//! let engine = SubmissionEngine::builder(client, MetricsQueue::new())
//!     .options(
//!         ProcessorOptions::new()
//!             .with_source("web-1")
//!             .with_prefix("shop")
//!             .with_autosubmit_interval(60)
//!             .with_clear_failures(true),
//!     )
//!     .build()?;
//!
//! engine.add("checkout.active", 3.0).await?;
//! engine
//!     .add_with("checkout.completed", 1.0, MeasureOptions::new().counter())
//!     .await?;
//!
//! match engine.submit().await {
//!     Ok(true) => println!("submitted"),
//!     Ok(false) => println!("backend declined, measurements kept"),
//!     Err(e) if e.is_client_error() => println!("rejected: {e}"),
//!     Err(e) => println!("transient failure, measurements kept: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence Backends
//!
//! The client's persistence identifier picks the backend the first time an
//! engine submits:
//!
//! - `direct`: POST straight to the service, one request per chunk
//! - `file`: append to a local SQLite spool (feature `file`, on by default)
//! - `test`: record batches in memory; not in the default registry, register
//!   a [`RecordingPersister`](persistence::RecordingPersister) for it
//!
//! Custom registries can be injected with
//! [`SubmissionEngineBuilder::registry`](engine::SubmissionEngineBuilder::registry).
//!
//! ## Logging
//!
//! Everything is logged through `tracing`. Use
//! [`logging::setup::init_logging`] to install a subscriber, and
//! [`LogConfig`](logging::LogConfig) to control per-measurement and per-batch
//! events.

pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod options;
pub mod persistence;
pub mod prelude;
pub mod security;
pub mod store;

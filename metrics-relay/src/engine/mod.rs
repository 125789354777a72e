//! The submission engine.
//!
//! [`SubmissionEngine`] owns a [`MeasurementStore`] and drives its lifecycle:
//! measurements are validated and queued, optionally timed, and flushed to the
//! backend resolved from the client's persistence identifier.
//!
//! # Failure policy
//!
//! | backend outcome          | store                                  | `submit()` returns |
//! |--------------------------|----------------------------------------|--------------------|
//! | `Ok(true)`               | cleared, last-submit time updated      | `Ok(true)`         |
//! | `Ok(false)`              | kept                                   | `Ok(false)`        |
//! | `Err(Client(_))`         | cleared only with `clear_failures`     | the same error     |
//! | any other `Err`          | kept                                   | the same error     |
//!
//! The engine never retries on its own.
//!
//! # Example
//!
//! ```rust,no_run
//! use metrics_relay::prelude::*;
//!
//! # async fn example() -> metrics_relay::error::Result<()> {
//! let client = MetricsClient::new(ClientConfig::new("ops@example.com", "api-key"))?;
//! let engine = SubmissionEngine::builder(client, MetricsQueue::new())
//!     .options(ProcessorOptions::new().with_source("web-1").with_per_request(300))
//!     .build()?;
//!
//! engine.add("requests.active", 12.0).await?;
//! let rows = engine
//!     .time("db.query", MeasureOptions::new(), || Ok::<_, RelayError>(42))
//!     .await?;
//! assert_eq!(rows, 42);
//!
//! engine.submit().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::client::MetricsClient;
use crate::clock::{Clock, SystemClock};
use crate::error::{RelayError, Result};
use crate::logging::{truncate_field, LogConfig};
use crate::measurement::{Measurement, MeasurementBatch};
use crate::options::{MeasureOptions, ProcessorOptions};
use crate::persistence::{BackendRegistry, PersistOptions, Persister};
use crate::store::MeasurementStore;
use crate::{log_batch, log_measurement};

mod autosubmit;
mod config;
mod timing;
mod worker;

pub use config::ProcessorConfig;
pub use worker::{AutosubmitWorker, WorkerStats};

/// Measurement times older than this many seconds are rejected.
pub const MAX_MEASURE_TIME_AGE_SECS: i64 = 31_556_926;

/// Buffers measurements and submits them in batches.
///
/// All methods take `&self`; the store sits behind an async mutex that is held
/// for the whole of a submission, so the store is only cleared after the
/// backend has answered and measurements added meanwhile wait rather than
/// being lost.
pub struct SubmissionEngine<S: MeasurementStore> {
    config: ProcessorConfig,
    client: MetricsClient,
    store: Mutex<S>,
    registry: BackendRegistry,
    persister: OnceCell<Arc<dyn Persister>>,
    last_submit: RwLock<Option<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    log_config: LogConfig,
}

/// Builder for [`SubmissionEngine`].
pub struct SubmissionEngineBuilder<S: MeasurementStore> {
    client: MetricsClient,
    store: S,
    options: ProcessorOptions,
    registry: Option<BackendRegistry>,
    clock: Arc<dyn Clock>,
    log_config: LogConfig,
}

impl<S: MeasurementStore> SubmissionEngineBuilder<S> {
    pub fn options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    /// Use `registry` instead of [`BackendRegistry::with_defaults`].
    pub fn registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Validates the options and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidConfiguration`] if the options are
    /// incompatible.
    pub fn build(self) -> Result<SubmissionEngine<S>> {
        let created_at = self.clock.now();
        let config = ProcessorConfig::new(self.options, &self.client, created_at)?;

        debug!(
            batch_size = config.batch_size(),
            multidimensional = config.is_multidimensional(),
            autosubmit_interval = ?config.autosubmit_interval(),
            "Submission engine created"
        );

        Ok(SubmissionEngine {
            config,
            client: self.client,
            store: Mutex::new(self.store),
            registry: self
                .registry
                .unwrap_or_else(BackendRegistry::with_defaults),
            persister: OnceCell::new(),
            last_submit: RwLock::new(None),
            clock: self.clock,
            log_config: self.log_config,
        })
    }
}

impl<S: MeasurementStore> SubmissionEngine<S> {
    /// Starts building an engine over `store` that submits through `client`.
    pub fn builder(client: MetricsClient, store: S) -> SubmissionEngineBuilder<S> {
        SubmissionEngineBuilder {
            client,
            store,
            options: ProcessorOptions::default(),
            registry: None,
            clock: Arc::new(SystemClock),
            log_config: LogConfig::default(),
        }
    }

    /// Builds an engine with default registry and clock.
    pub fn new(client: MetricsClient, store: S, options: ProcessorOptions) -> Result<Self> {
        Self::builder(client, store).options(options).build()
    }

    /// Builds an engine from a JSON options mapping.
    pub fn from_value(client: MetricsClient, store: S, options: Value) -> Result<Self> {
        Self::new(client, store, ProcessorOptions::from_value(options)?)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn client(&self) -> &MetricsClient {
        &self.client
    }

    /// When the last successful submission finished, if any.
    pub async fn last_submit_time(&self) -> Option<DateTime<Utc>> {
        *self.last_submit.read().await
    }

    /// The persistence backend, resolved on first use.
    ///
    /// Later changes to the client's persistence identifier do not affect an
    /// engine that already resolved its backend.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownPersistenceBackend`] if the identifier has
    /// no registered backend.
    pub fn persister(&self) -> Result<Arc<dyn Persister>> {
        self.persister
            .get_or_try_init(|| self.registry.resolve(&self.client.persistence()))
            .map(Arc::clone)
    }

    /// Queues a gauge.
    pub async fn add(&self, name: impl Into<String>, value: f64) -> Result<()> {
        self.add_with(name, value, MeasureOptions::default()).await
    }

    /// Queues a measurement with its own metadata, then runs the autosubmit
    /// check.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidConfiguration`] for incompatible options
    /// - [`RelayError::InvalidMeasurement`] for an empty name or non-finite value
    /// - [`RelayError::InvalidMeasureTime`] for a timestamp older than a year
    /// - whatever the store returns, e.g. [`RelayError::QueueOverflow`]
    pub async fn add_with(
        &self,
        name: impl Into<String>,
        value: f64,
        options: MeasureOptions,
    ) -> Result<()> {
        let measurement = self.build_measurement(name.into(), value, options)?;

        log_measurement!(
            self.log_config,
            metric = %truncate_field(&measurement.name, self.log_config.max_field_length),
            value = measurement.value,
            "Queueing measurement"
        );

        self.store.lock().await.add(measurement)?;
        self.check_autosubmit().await;
        Ok(())
    }

    fn build_measurement(
        &self,
        name: String,
        value: f64,
        options: MeasureOptions,
    ) -> Result<Measurement> {
        self.check_measure_options(&name, &options)?;

        let name = match self.config.prefix() {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name,
        };
        if !value.is_finite() {
            return Err(RelayError::invalid_measurement(name, "value must be finite"));
        }

        Ok(Measurement {
            name,
            value,
            kind: options.kind,
            source: options.source,
            tags: options.tags,
            measure_time: options.measure_time,
            time: options.time,
        })
    }

    /// Checks everything about a measurement that does not depend on its value.
    fn check_measure_options(&self, name: &str, options: &MeasureOptions) -> Result<()> {
        options.validate()?;

        if name.trim().is_empty() {
            return Err(RelayError::invalid_measurement(name, "name must not be empty"));
        }

        for timestamp in [options.measure_time, options.time].into_iter().flatten() {
            self.check_measure_time(timestamp)?;
        }
        Ok(())
    }

    fn check_measure_time(&self, timestamp: i64) -> Result<()> {
        let earliest = self.clock.now().timestamp() - MAX_MEASURE_TIME_AGE_SECS;
        if timestamp < earliest {
            return Err(RelayError::InvalidMeasureTime {
                measure_time: timestamp,
                earliest,
            });
        }
        Ok(())
    }

    /// Number of queued measurements.
    pub async fn pending_count(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Snapshot of the queued measurements.
    pub async fn queued(&self) -> Vec<Measurement> {
        self.store.lock().await.queued()
    }

    /// Runs `f` against the store.
    pub async fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&*self.store.lock().await)
    }

    /// Drops everything queued without submitting.
    pub async fn clear(&self) {
        self.store.lock().await.clear();
    }

    /// Flushes the queued measurements to the persistence backend.
    ///
    /// Returns `Ok(true)` when nothing was queued or the backend accepted the
    /// batch, and `Ok(false)` when the backend declined without an error. See
    /// the module docs for the failure policy.
    ///
    /// # Errors
    ///
    /// - [`RelayError::UnknownPersistenceBackend`] if the backend cannot be
    ///   resolved
    /// - any error from the backend, unchanged
    #[instrument(skip(self))]
    pub async fn submit(&self) -> Result<bool> {
        let mut store = self.store.lock().await;
        if store.is_empty() {
            debug!("Nothing queued, skipping submit");
            return Ok(true);
        }

        let persister = self.persister()?;
        let batch = MeasurementBatch::assemble(store.queued(), &self.config);
        let options = PersistOptions::new(self.config.batch_size());

        match persister.persist(&self.client, &batch, options).await {
            Ok(true) => {
                *self.last_submit.write().await = Some(self.clock.now());
                store.clear();
                log_batch!(
                    self.log_config,
                    count = batch.len(),
                    batch_size = options.batch_size(),
                    "Submitted measurements"
                );
                Ok(true)
            }
            Ok(false) => {
                warn!(count = batch.len(), "Backend declined batch, keeping measurements");
                Ok(false)
            }
            Err(e) if e.is_client_error() => {
                if self.config.clear_on_failure() {
                    warn!(count = batch.len(), error = %e, "Submission rejected, dropping measurements");
                    store.clear();
                } else {
                    warn!(count = batch.len(), error = %e, "Submission rejected, keeping measurements");
                }
                Err(e)
            }
            Err(e) => {
                warn!(count = batch.len(), error = %e, "Submission failed, keeping measurements");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ClientConfig;
    use crate::error::ClientError;
    use crate::persistence::{PersistenceKind, RecordedResponse, RecordingPersister};
    use crate::store::MetricsQueue;
    use chrono::Duration;
    use serde_json::json;

    fn test_client() -> MetricsClient {
        MetricsClient::new(ClientConfig::new("ops@example.com", "key").with_persistence("test"))
            .unwrap()
    }

    fn engine_with(
        options: ProcessorOptions,
        response: RecordedResponse,
    ) -> (SubmissionEngine<MetricsQueue>, Arc<RecordingPersister>) {
        let recorder = Arc::new(RecordingPersister::with_response(response));
        let registry = BackendRegistry::new().with(PersistenceKind::Test, recorder.clone());
        let engine = SubmissionEngine::builder(test_client(), MetricsQueue::new())
            .options(options)
            .registry(registry)
            .build()
            .unwrap();
        (engine, recorder)
    }

    fn unauthorized() -> ClientError {
        ClientError::Unauthorized {
            message: "invalid token".to_string(),
        }
    }

    #[test]
    fn test_from_value_rejects_conflicts() {
        for options in [
            json!({"source": "a", "tags": {"k": "v"}}),
            json!({"measure_time": 1, "time": 2}),
            json!({"source": "a", "time": 2}),
            json!({"measure_time": 1, "tags": {"k": "v"}}),
        ] {
            let result = SubmissionEngine::from_value(test_client(), MetricsQueue::new(), options);
            assert!(matches!(
                result,
                Err(RelayError::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn test_from_value_rejects_non_mapping() {
        let result =
            SubmissionEngine::from_value(test_client(), MetricsQueue::new(), json!(["source"]));
        assert!(matches!(
            result,
            Err(RelayError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_empty_is_noop() {
        let (engine, recorder) = engine_with(ProcessorOptions::new(), RecordedResponse::Accept);

        assert!(engine.submit().await.unwrap());
        assert_eq!(recorder.calls().await, 0);
        assert!(engine.last_submit_time().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_empty_does_not_resolve_backend() {
        let client = test_client();
        client.set_persistence("nonexistent");
        let engine = SubmissionEngine::new(client, MetricsQueue::new(), ProcessorOptions::new())
            .unwrap();

        assert!(engine.submit().await.unwrap());
    }

    #[tokio::test]
    async fn test_submit_success_clears_and_stamps() {
        let (engine, recorder) = engine_with(
            ProcessorOptions::new().with_per_request(2),
            RecordedResponse::Accept,
        );
        engine.add("cpu", 0.5).await.unwrap();
        engine.add("memory", 0.7).await.unwrap();

        let before = Utc::now();
        assert!(engine.submit().await.unwrap());

        assert_eq!(engine.pending_count().await, 0);
        let stamped = engine.last_submit_time().await.unwrap();
        assert!(stamped >= before);

        let (batch, options) = recorder.last().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(options.batch_size(), 2);
    }

    #[tokio::test]
    async fn test_submit_declined_keeps_queue() {
        let (engine, _recorder) = engine_with(ProcessorOptions::new(), RecordedResponse::Decline);
        engine.add("cpu", 0.5).await.unwrap();
        engine.add("memory", 0.7).await.unwrap();
        let before = engine.queued().await;

        assert!(!engine.submit().await.unwrap());

        assert_eq!(engine.queued().await, before);
        assert!(engine.last_submit_time().await.is_none());
    }

    #[tokio::test]
    async fn test_client_error_with_clear_failures_drops_queue() {
        let (engine, _recorder) = engine_with(
            ProcessorOptions::new().with_clear_failures(true),
            RecordedResponse::Reject(unauthorized()),
        );
        engine.add("cpu", 0.5).await.unwrap();

        let err = engine.submit().await.unwrap_err();

        assert_eq!(err.as_client_error(), Some(&unauthorized()));
        assert_eq!(engine.pending_count().await, 0);
        assert!(engine.last_submit_time().await.is_none());
    }

    #[tokio::test]
    async fn test_client_error_without_clear_failures_keeps_queue() {
        let (engine, _recorder) = engine_with(
            ProcessorOptions::new(),
            RecordedResponse::Reject(unauthorized()),
        );
        engine.add("cpu", 0.5).await.unwrap();
        let before = engine.queued().await;

        let err = engine.submit().await.unwrap_err();

        assert_eq!(err.as_client_error(), Some(&unauthorized()));
        assert_eq!(engine.queued().await, before);
    }

    #[derive(Debug)]
    struct FailingPersister;

    #[async_trait::async_trait]
    impl Persister for FailingPersister {
        async fn persist(
            &self,
            _client: &MetricsClient,
            _batch: &MeasurementBatch,
            _options: PersistOptions,
        ) -> Result<bool> {
            Err(RelayError::Network {
                message: "connection reset".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_non_client_error_never_clears() {
        let registry = BackendRegistry::new().with(PersistenceKind::Test, Arc::new(FailingPersister));
        let engine = SubmissionEngine::builder(test_client(), MetricsQueue::new())
            .options(ProcessorOptions::new().with_clear_failures(true))
            .registry(registry)
            .build()
            .unwrap();
        engine.add("cpu", 0.5).await.unwrap();

        let err = engine.submit().await.unwrap_err();
        assert!(matches!(err, RelayError::Network { .. }));
        assert_eq!(engine.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_backend_on_submit() {
        let client = test_client();
        client.set_persistence("pigeon");
        let engine = SubmissionEngine::new(client, MetricsQueue::new(), ProcessorOptions::new())
            .unwrap();
        engine.add("cpu", 0.5).await.unwrap();

        let err = engine.submit().await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownPersistenceBackend { .. }));
        assert_eq!(engine.pending_count().await, 1);
    }

    #[test]
    fn test_persister_resolution_is_cached() {
        let (engine, _recorder) = engine_with(ProcessorOptions::new(), RecordedResponse::Accept);

        let first = engine.persister().unwrap();
        engine.client().set_persistence("direct");
        let second = engine.persister().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_prefix_is_applied() {
        let (engine, _recorder) = engine_with(
            ProcessorOptions::new().with_prefix("app"),
            RecordedResponse::Accept,
        );
        engine.add("cpu", 0.5).await.unwrap();

        assert_eq!(engine.queued().await[0].name, "app.cpu");
    }

    #[tokio::test]
    async fn test_invalid_measurements_rejected() {
        let (engine, _recorder) = engine_with(ProcessorOptions::new(), RecordedResponse::Accept);

        assert!(matches!(
            engine.add("cpu", f64::NAN).await,
            Err(RelayError::InvalidMeasurement { .. })
        ));
        assert!(matches!(
            engine.add("  ", 1.0).await,
            Err(RelayError::InvalidMeasurement { .. })
        ));
        assert!(matches!(
            engine
                .add_with("cpu", 1.0, MeasureOptions::new().with_source("a").with_tag("k", "v"))
                .await,
            Err(RelayError::InvalidConfiguration { .. })
        ));
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_old_measure_time_rejected() {
        let now = Utc::now();
        let clock = ManualClock::new(now);
        let engine = SubmissionEngine::builder(test_client(), MetricsQueue::new())
            .clock(Arc::new(clock))
            .build()
            .unwrap();

        let too_old = (now - Duration::days(400)).timestamp();
        let err = engine
            .add_with("cpu", 1.0, MeasureOptions::new().with_measure_time(too_old))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidMeasureTime { .. }));

        let recent = (now - Duration::days(2)).timestamp();
        engine
            .add_with("cpu", 1.0, MeasureOptions::new().with_measure_time(recent))
            .await
            .unwrap();
        assert_eq!(engine.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_batch_uses_engine_defaults() {
        let (engine, recorder) = engine_with(
            ProcessorOptions::new()
                .with_source("web-1")
                .with_measure_time(Utc::now().timestamp()),
            RecordedResponse::Accept,
        );
        engine.add("cpu", 0.5).await.unwrap();
        engine
            .add_with("requests", 3.0, MeasureOptions::new().counter())
            .await
            .unwrap();
        engine.submit().await.unwrap();

        let (batch, _) = recorder.last().await.unwrap();
        assert_eq!(batch.source.as_deref(), Some("web-1"));
        assert!(batch.measure_time.is_some());
        assert_eq!(batch.gauges.len(), 1);
        assert_eq!(batch.counters.len(), 1);
        assert!(batch.measurements.is_empty());
    }

    #[tokio::test]
    async fn test_multidimensional_batch() {
        let (engine, recorder) = engine_with(
            ProcessorOptions::new().with_tag("region", "us-east-1"),
            RecordedResponse::Accept,
        );
        engine.add("cpu", 0.5).await.unwrap();
        engine.submit().await.unwrap();

        let (batch, _) = recorder.last().await.unwrap();
        assert_eq!(batch.measurements.len(), 1);
        assert_eq!(
            batch.tags.as_ref().and_then(|t| t.get("region")).map(String::as_str),
            Some("us-east-1")
        );
        assert!(batch.source.is_none());
    }

    #[tokio::test]
    async fn test_tagged_measurement_in_legacy_engine() {
        let (engine, recorder) = engine_with(
            ProcessorOptions::new().with_source("web-1"),
            RecordedResponse::Accept,
        );
        engine.add("memory", 0.7).await.unwrap();
        engine
            .add_with("cpu", 1.0, MeasureOptions::new().with_tag("region", "eu"))
            .await
            .unwrap();
        engine.submit().await.unwrap();

        let (batch, options) = recorder.last().await.unwrap();
        assert_eq!(batch.gauges.len(), 1);
        assert_eq!(batch.gauges[0].name, "memory");
        assert_eq!(batch.measurements.len(), 1);
        assert_eq!(batch.measurements[0].name, "cpu");

        let chunks = batch.chunks(options.batch_size());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source.as_deref(), Some("web-1"));
        assert!(chunks[0].measurements.is_empty());
        assert!(chunks[1].source.is_none());
        assert!(chunks[1].gauges.is_empty());
    }

    #[tokio::test]
    async fn test_skip_measurement_times() {
        let now = Utc::now().timestamp();
        let (engine, recorder) = engine_with(
            ProcessorOptions::new()
                .with_measure_time(now)
                .with_skip_measurement_times(true),
            RecordedResponse::Accept,
        );
        engine
            .add_with("cpu", 0.5, MeasureOptions::new().with_measure_time(now))
            .await
            .unwrap();
        engine.submit().await.unwrap();

        let (batch, _) = recorder.last().await.unwrap();
        assert!(batch.measure_time.is_none());
        assert!(batch.gauges[0].measure_time.is_none());
    }
}

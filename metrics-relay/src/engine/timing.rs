use std::future::Future;
use std::time::Instant;

use tracing::warn;

use crate::error::RelayError;
use crate::options::MeasureOptions;
use crate::store::MeasurementStore;

use super::SubmissionEngine;

impl<S: MeasurementStore> SubmissionEngine<S> {
    /// Runs `work` and queues its wall-clock duration in milliseconds under
    /// `name`.
    ///
    /// The sample is only queued when `work` succeeds; its error is returned
    /// unchanged and nothing is recorded. Options, name and timestamps are
    /// checked before `work` runs, so an invalid measurement never executes it.
    /// Once `work` has succeeded its output is always returned: a sample the
    /// store refuses (e.g. a full bounded queue) is logged and dropped.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use metrics_relay::prelude::*;
    /// # async fn example(engine: SubmissionEngine<MetricsQueue>) -> metrics_relay::error::Result<()> {
    /// let total = engine
    ///     .time("report.build", MeasureOptions::new(), || {
    ///         Ok::<_, RelayError>((1..=10).sum::<u32>())
    ///     })
    ///     .await?;
    /// assert_eq!(total, 55);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn time<T, E, F>(&self, name: &str, options: MeasureOptions, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<RelayError>,
    {
        self.check_measure_options(name, &options)?;

        let started = Instant::now();
        let output = work()?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.record_timing(name, elapsed_ms, options).await;
        Ok(output)
    }

    /// Like [`time`](Self::time), for async work.
    pub async fn time_async<T, E, Fut>(
        &self,
        name: &str,
        options: MeasureOptions,
        work: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: From<RelayError>,
    {
        self.check_measure_options(name, &options)?;

        let started = Instant::now();
        let output = work.await?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.record_timing(name, elapsed_ms, options).await;
        Ok(output)
    }

    async fn record_timing(&self, name: &str, elapsed_ms: f64, options: MeasureOptions) {
        if let Err(e) = self.add_with(name, elapsed_ms, options).await {
            warn!(metric = name, error = %e, "Dropping timing sample");
        }
    }
}

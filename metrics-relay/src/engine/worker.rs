use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::store::MeasurementStore;

use super::SubmissionEngine;

/// Background task that submits on the autosubmit schedule even when no new
/// measurements arrive, and flushes once more on shutdown.
pub struct AutosubmitWorker<S: MeasurementStore> {
    engine: Arc<SubmissionEngine<S>>,
    tick: Duration,
    shutdown: watch::Receiver<bool>,
    stats: WorkerStats,
}

/// Statistics from the autosubmit worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub ticks: u64,
    pub submissions: u64,
    pub failures: u64,
    pub flushed_on_shutdown: bool,
}

impl<S: MeasurementStore> AutosubmitWorker<S> {
    /// Create a worker that checks the schedule every `tick`.
    pub fn new(
        engine: Arc<SubmissionEngine<S>>,
        tick: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            tick,
            shutdown,
            stats: WorkerStats::default(),
        }
    }

    /// Spawn a worker on the current runtime.
    ///
    /// Send `true` on the returned sender to stop it; the handle resolves to
    /// the worker's statistics.
    pub fn spawn(
        engine: Arc<SubmissionEngine<S>>,
        tick: Duration,
    ) -> (watch::Sender<bool>, JoinHandle<WorkerStats>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Self::new(engine, tick, shutdown_rx);
        (shutdown_tx, tokio::spawn(worker.run()))
    }

    /// Run until shutdown.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> WorkerStats {
        info!("Autosubmit worker started");
        let mut ticker = interval(self.tick);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.stats.ticks += 1;
                    if self.engine.autosubmit_due().await {
                        self.submit().await;
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Shutdown signal received, flushing queued measurements");
                        self.stats.flushed_on_shutdown = self.submit().await;
                        break;
                    }
                }
            }
        }

        info!(
            ticks = self.stats.ticks,
            submissions = self.stats.submissions,
            failures = self.stats.failures,
            "Autosubmit worker stopped"
        );
        self.stats
    }

    async fn submit(&mut self) -> bool {
        match self.engine.submit().await {
            Ok(true) => {
                self.stats.submissions += 1;
                true
            }
            Ok(false) => {
                debug!("Backend declined batch");
                self.stats.failures += 1;
                false
            }
            Err(e) => {
                warn!(error = %e, "Scheduled submission failed");
                self.stats.failures += 1;
                false
            }
        }
    }
}

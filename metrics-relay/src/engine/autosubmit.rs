use tracing::{debug, warn};

use crate::store::MeasurementStore;

use super::SubmissionEngine;

impl<S: MeasurementStore> SubmissionEngine<S> {
    /// Whether the autosubmit interval has elapsed.
    ///
    /// Elapsed time is counted from the last successful submission, or from
    /// engine creation when there has been none. Always false without an
    /// interval. A clock that moved backwards yields a negative elapsed time
    /// and therefore never triggers.
    pub async fn autosubmit_due(&self) -> bool {
        let Some(interval) = self.config.autosubmit_interval() else {
            return false;
        };
        let Ok(interval) = i64::try_from(interval) else {
            return false;
        };

        let created_at = self.config.created_at();
        let reference = match *self.last_submit.read().await {
            Some(last) if last > created_at => last,
            _ => created_at,
        };
        let elapsed = (self.clock.now() - reference).num_seconds();

        elapsed >= interval
    }

    /// Submits if the autosubmit interval has elapsed.
    ///
    /// Submission errors are logged, not returned; the queue is left to the
    /// usual failure policy.
    pub async fn check_autosubmit(&self) {
        if !self.autosubmit_due().await {
            return;
        }

        debug!("Autosubmit interval elapsed");
        match self.submit().await {
            Ok(true) => {}
            Ok(false) => warn!("Autosubmit declined by backend"),
            Err(e) => warn!(error = %e, "Autosubmit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use crate::client::MetricsClient;
    use crate::clock::ManualClock;
    use crate::config::ClientConfig;
    use crate::engine::SubmissionEngine;
    use crate::error::ClientError;
    use crate::options::ProcessorOptions;
    use crate::persistence::{
        BackendRegistry, PersistenceKind, RecordedResponse, RecordingPersister,
    };
    use crate::store::MetricsQueue;

    struct Harness {
        engine: SubmissionEngine<MetricsQueue>,
        clock: ManualClock,
        recorder: Arc<RecordingPersister>,
    }

    fn harness(options: ProcessorOptions) -> Harness {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let recorder = Arc::new(RecordingPersister::new());
        let client = MetricsClient::new(
            ClientConfig::new("ops@example.com", "key").with_persistence("test"),
        )
        .unwrap();

        let engine = SubmissionEngine::builder(client, MetricsQueue::new())
            .options(options)
            .registry(BackendRegistry::new().with(PersistenceKind::Test, recorder.clone()))
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        Harness {
            engine,
            clock,
            recorder,
        }
    }

    #[tokio::test]
    async fn test_no_interval_never_submits() {
        let h = harness(ProcessorOptions::new());

        h.clock.advance(Duration::days(30));
        h.engine.add("cpu", 1.0).await.unwrap();

        assert!(!h.engine.autosubmit_due().await);
        assert_eq!(h.recorder.calls().await, 0);
        assert_eq!(h.engine.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_interval_counts_from_creation() {
        let h = harness(ProcessorOptions::new().with_autosubmit_interval(60));

        h.clock.advance(Duration::seconds(59));
        h.engine.add("cpu", 1.0).await.unwrap();
        assert_eq!(h.recorder.calls().await, 0);
        assert_eq!(h.engine.pending_count().await, 1);

        h.clock.advance(Duration::seconds(2));
        h.engine.add("cpu", 2.0).await.unwrap();
        assert_eq!(h.recorder.calls().await, 1);
        assert_eq!(h.engine.pending_count().await, 0);

        let (batch, _) = h.recorder.last().await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_interval_counts_from_last_submit() {
        let h = harness(ProcessorOptions::new().with_autosubmit_interval(60));

        h.clock.advance(Duration::seconds(30));
        h.engine.add("cpu", 1.0).await.unwrap();
        h.engine.submit().await.unwrap();
        assert_eq!(h.recorder.calls().await, 1);

        // 61s after creation but only 31s after the last submit
        h.clock.advance(Duration::seconds(31));
        h.engine.add("cpu", 2.0).await.unwrap();
        assert_eq!(h.recorder.calls().await, 1);

        h.clock.advance(Duration::seconds(30));
        h.engine.add("cpu", 3.0).await.unwrap();
        assert_eq!(h.recorder.calls().await, 2);
    }

    #[tokio::test]
    async fn test_clock_moving_backwards_suppresses_autosubmit() {
        let h = harness(ProcessorOptions::new().with_autosubmit_interval(60));

        h.clock.advance(Duration::seconds(-120));
        h.engine.add("cpu", 1.0).await.unwrap();

        assert!(!h.engine.autosubmit_due().await);
        assert_eq!(h.recorder.calls().await, 0);
    }

    #[tokio::test]
    async fn test_failed_autosubmit_is_not_raised() {
        let h = harness(
            ProcessorOptions::new()
                .with_autosubmit_interval(10)
                .with_clear_failures(true),
        );
        h.recorder
            .set_response(RecordedResponse::Reject(ClientError::BadRequest {
                message: "malformed".to_string(),
            }))
            .await;

        h.clock.advance(Duration::seconds(11));
        h.engine.add("cpu", 1.0).await.unwrap();

        assert_eq!(h.recorder.calls().await, 1);
        assert_eq!(h.engine.pending_count().await, 0);
        assert!(h.engine.last_submit_time().await.is_none());
    }
}

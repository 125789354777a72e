use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::MetricsClient;
use crate::error::{ClientError, Result};
use crate::measurement::MeasurementBatch;
use crate::persistence::{PersistOptions, Persister};

/// What a [`RecordingPersister`] answers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordedResponse {
    /// Report success.
    #[default]
    Accept,
    /// Report a silent failure (`Ok(false)`).
    Decline,
    /// Fail with a client error.
    Reject(ClientError),
}

/// Keeps every persisted batch in memory instead of sending it.
///
/// Batches are recorded whatever the configured response, so tests can check
/// what a failing submission tried to send.
#[derive(Debug, Default)]
pub struct RecordingPersister {
    persisted: Mutex<Vec<(MeasurementBatch, PersistOptions)>>,
    response: Mutex<RecordedResponse>,
}

impl RecordingPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder that answers with `response`.
    pub fn with_response(response: RecordedResponse) -> Self {
        Self {
            persisted: Mutex::default(),
            response: Mutex::new(response),
        }
    }

    /// Changes the answer for later calls.
    pub async fn set_response(&self, response: RecordedResponse) {
        *self.response.lock().await = response;
    }

    /// Number of `persist` calls so far.
    pub async fn calls(&self) -> usize {
        self.persisted.lock().await.len()
    }

    /// All recorded batches, oldest first.
    pub async fn persisted(&self) -> Vec<MeasurementBatch> {
        self.persisted
            .lock()
            .await
            .iter()
            .map(|(batch, _)| batch.clone())
            .collect()
    }

    /// The most recent batch and the options it came with.
    pub async fn last(&self) -> Option<(MeasurementBatch, PersistOptions)> {
        self.persisted.lock().await.last().cloned()
    }
}

#[async_trait]
impl Persister for RecordingPersister {
    async fn persist(
        &self,
        _client: &MetricsClient,
        batch: &MeasurementBatch,
        options: PersistOptions,
    ) -> Result<bool> {
        self.persisted.lock().await.push((batch.clone(), options));
        debug!(count = batch.len(), "Recorded batch");

        match &*self.response.lock().await {
            RecordedResponse::Accept => Ok(true),
            RecordedResponse::Decline => Ok(false),
            RecordedResponse::Reject(e) => Err(e.clone().into()),
        }
    }
}

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::client::MetricsClient;
use crate::error::Result;
use crate::measurement::MeasurementBatch;
use crate::persistence::{PersistOptions, Persister};

/// Posts batches straight to the metrics API.
///
/// Chunks are sent in order; the first failing chunk aborts the rest and its
/// error is returned. Chunks already accepted stay accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectPersister;

#[async_trait]
impl Persister for DirectPersister {
    #[instrument(skip_all, fields(count = batch.len(), batch_size = options.batch_size()))]
    async fn persist(
        &self,
        client: &MetricsClient,
        batch: &MeasurementBatch,
        options: PersistOptions,
    ) -> Result<bool> {
        let chunks = batch.chunks(options.batch_size());
        debug!(requests = chunks.len(), "Posting batch");

        for chunk in &chunks {
            client.post_measurements(chunk).await?;
        }

        Ok(true)
    }
}

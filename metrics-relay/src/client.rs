use std::sync::{Arc, PoisonError, RwLock};

use reqwest::Client;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::error::{ClientError, RelayError, Result};
use crate::measurement::MeasurementBatch;

/// HTTP client for the metrics API.
///
/// Clones share configuration and the persistence identifier.
#[derive(Clone)]
pub struct MetricsClient {
    config: Arc<ClientConfig>,
    client: Client,
    persistence: Arc<RwLock<String>>,
}

impl std::fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsClient")
            .field("config", &self.config)
            .field("persistence", &self.persistence())
            .finish()
    }
}

impl MetricsClient {
    /// Create a new client with the given configuration.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RelayError::Configuration {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let persistence = Arc::new(RwLock::new(config.persistence().to_string()));

        Ok(Self {
            config: Arc::new(config),
            client,
            persistence,
        })
    }

    /// The persistence backend identifier currently configured.
    pub fn persistence(&self) -> String {
        self.persistence
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the persistence backend identifier.
    ///
    /// Engines that already resolved a backend keep using it.
    pub fn set_persistence(&self, persistence: impl Into<String>) {
        *self
            .persistence
            .write()
            .unwrap_or_else(PoisonError::into_inner) = persistence.into();
    }

    /// Whether the account accepts tagged measurements.
    pub fn has_tagging(&self) -> bool {
        self.config.tagging()
    }

    /// Send one batch to the metrics API.
    ///
    /// Multidimensional batches go to `/v1/measurements`, legacy batches to
    /// `/v1/metrics`.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn post_measurements(&self, batch: &MeasurementBatch) -> Result<()> {
        self.check_credentials()?;

        let path = if batch.is_multidimensional() {
            "measurements"
        } else {
            "metrics"
        };
        let url = format!("{}/v1/{}", self.config.endpoint(), path);

        let response = self
            .client
            .post(&url)
            .basic_auth(self.config.email(), Some(self.config.api_key().expose()))
            .json(batch)
            .send()
            .await
            .map_err(|e| RelayError::Network {
                message: e.to_string(),
            })?;

        if response.status().is_success() {
            debug!(status = response.status().as_u16(), "Batch accepted");
            Ok(())
        } else {
            self.handle_error_response(response).await
        }
    }

    fn check_credentials(&self) -> Result<()> {
        if self.config.email().trim().is_empty() {
            return Err(ClientError::CredentialsMissing {
                message: "email is not set".to_string(),
            }
            .into());
        }
        if self.config.api_key().is_empty() {
            return Err(ClientError::CredentialsMissing {
                message: "API key is not set".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Convert an error response to a RelayError.
    async fn handle_error_response<T>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body = response.text().await.unwrap_or_default();

        let err: RelayError = match status {
            400 | 422 => ClientError::BadRequest { message: body }.into(),
            401 | 403 => ClientError::Unauthorized { message: body }.into(),
            404 => ClientError::NotFound { message: body }.into(),
            429 => ClientError::RateLimited {
                retry_after_secs: retry_after,
            }
            .into(),
            400..=499 => ClientError::Rejected {
                status,
                message: body,
            }
            .into(),
            _ => RelayError::Server {
                status,
                message: body,
            },
        };
        Err(err)
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

//! Connection settings for [`MetricsClient`](crate::client::MetricsClient).

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::security::SecureString;

/// Default metrics API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://metrics-api.librato.com";

/// Configuration for connecting to the metrics service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    email: String,
    api_key: SecureString,
    endpoint: String,
    timeout: Duration,
    persistence: String,
    tagging: bool,
    spool_path: Option<PathBuf>,
}

impl ClientConfig {
    /// Create a new ClientConfig with the given credentials.
    pub fn new(email: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            api_key: SecureString::new(api_key.into()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            persistence: "direct".to_string(),
            tagging: false,
            spool_path: None,
        }
    }

    /// Set a custom API endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the persistence backend identifier ("direct", "file", "test").
    pub fn with_persistence(mut self, persistence: impl Into<String>) -> Self {
        self.persistence = persistence.into();
        self
    }

    /// Declare that the account accepts tagged (multidimensional) measurements.
    pub fn with_tagging(mut self, enabled: bool) -> Self {
        self.tagging = enabled;
        self
    }

    /// Set the path of the spool database used by the file backend.
    pub fn with_spool_path(mut self, path: impl AsRef<Path>) -> Self {
        self.spool_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Get the account email.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Get the API key.
    ///
    /// # Security
    /// Returns a reference to the secure string. Use `expose()` to access
    /// the underlying value. Avoid storing or logging the exposed value.
    pub fn api_key(&self) -> &SecureString {
        &self.api_key
    }

    /// Get the API endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the HTTP request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the initial persistence backend identifier.
    pub fn persistence(&self) -> &str {
        &self.persistence
    }

    /// Whether tagged submissions are enabled.
    pub fn tagging(&self) -> bool {
        self.tagging
    }

    /// Get the spool path.
    pub fn spool_path(&self) -> Option<&Path> {
        self.spool_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::new("ops@example.com", "test-api-key");

        assert_eq!(config.email(), "ops@example.com");
        assert_eq!(config.api_key().expose(), "test-api-key");
        assert_eq!(config.endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.persistence(), "direct");
        assert!(!config.tagging());
        assert!(config.spool_path().is_none());
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("ops@example.com", "key")
            .with_endpoint("http://localhost:8080/")
            .with_timeout(Duration::from_secs(5))
            .with_persistence("file")
            .with_tagging(true)
            .with_spool_path("/tmp/spool.db");

        assert_eq!(config.endpoint(), "http://localhost:8080");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.persistence(), "file");
        assert!(config.tagging());
        assert_eq!(config.spool_path(), Some(Path::new("/tmp/spool.db")));
    }

    #[test]
    fn test_api_key_not_leaked_in_debug() {
        let secret_key = "super-secret-api-key-12345";
        let config = ClientConfig::new("ops@example.com", secret_key);

        let debug_output = format!("{:?}", config);

        assert!(
            !debug_output.contains(secret_key),
            "API key should not appear in debug output"
        );
        assert!(debug_output.contains("SecureString(***)"));
    }
}

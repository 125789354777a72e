//! Error types for metrics-relay.
//!
//! All fallible operations return [`RelayError`]. Rejections reported by the
//! remote metrics service are grouped under [`ClientError`] so the submission
//! engine can tell "the service refused this data" apart from transport or
//! local failures.

use thiserror::Error;

/// A rejection reported by the remote metrics service.
///
/// These are the failures that will not succeed on a plain retry: bad
/// credentials, malformed payloads, or quota exhaustion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// No email or API key configured on the client.
    #[error("Credentials missing: {message}")]
    CredentialsMissing { message: String },

    /// The service refused the credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The payload was malformed or failed remote validation.
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// The requested resource does not exist.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// Rate limited by the service.
    #[error("Rate limited. Retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other 4xx response.
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl ClientError {
    /// Returns the HTTP status associated with this rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::CredentialsMissing { .. } => None,
            ClientError::Unauthorized { .. } => Some(401),
            ClientError::BadRequest { .. } => Some(400),
            ClientError::NotFound { .. } => Some(404),
            ClientError::RateLimited { .. } => Some(429),
            ClientError::Rejected { status, .. } => Some(*status),
        }
    }

    /// Returns the suggested retry delay in seconds, if available.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ClientError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// The main error type for metrics-relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Options were not a mapping, or mutually exclusive options were combined.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        message: String,
        /// The offending option pair, when the failure is a conflict.
        conflicting: Option<(&'static str, &'static str)>,
    },

    /// The client's persistence identifier has no registered backend.
    #[error("Unknown persistence backend '{backend}'")]
    UnknownPersistenceBackend { backend: String },

    /// The remote service rejected the request.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A measurement timestamp is outside the accepted window.
    #[error("Invalid measure time {measure_time}: must be after {earliest}")]
    InvalidMeasureTime { measure_time: i64, earliest: i64 },

    /// A measurement could not be queued.
    #[error("Invalid measurement '{name}': {message}")]
    InvalidMeasurement { name: String, message: String },

    /// The queue reached its capacity limit.
    #[error("Queue overflow: {pending_count} measurements pending, max is {max_size}")]
    QueueOverflow {
        pending_count: usize,
        max_size: usize,
    },

    /// Transport failure (connection refused, timeout, ...).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The service failed with a 5xx status.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Spool file error.
    #[error("Spool error: {message}")]
    Spool { message: String },

    /// Client or backend setup error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Creates an invalid configuration error without a conflicting pair.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
            conflicting: None,
        }
    }

    /// Creates an invalid configuration error for two options that cannot be combined.
    pub fn incompatible_options(first: &'static str, second: &'static str) -> Self {
        Self::InvalidConfiguration {
            message: format!("'{first}' and '{second}' cannot be used together"),
            conflicting: Some((first, second)),
        }
    }

    /// Creates an invalid measurement error.
    pub fn invalid_measurement(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMeasurement {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns true if the remote service rejected the request.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelayError::Client(_))
    }

    /// Returns the client rejection, if this is one.
    pub fn as_client_error(&self) -> Option<&ClientError> {
        match self {
            RelayError::Client(e) => Some(e),
            _ => None,
        }
    }
}

/// A type alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

//! Persistence backends.
//!
//! A backend takes the assembled [`MeasurementBatch`] of a submission and
//! delivers it somewhere, splitting it into chunks of at most
//! [`PersistOptions::batch_size`] measurements. Backends form a closed set
//! named by [`PersistenceKind`]; a [`BackendRegistry`] maps each kind to an
//! implementation and is injected into the engine.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use metrics_relay::persistence::{BackendRegistry, PersistenceKind, RecordingPersister};
//!
//! let recorder = Arc::new(RecordingPersister::new());
//! let registry = BackendRegistry::new().with(PersistenceKind::Test, recorder);
//!
//! assert!(registry.resolve("Test").is_ok());
//! assert!(registry.resolve("direct").is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::client::MetricsClient;
use crate::error::{RelayError, Result};
use crate::measurement::MeasurementBatch;
use crate::options::DEFAULT_PER_REQUEST;

mod direct;
#[cfg(feature = "file")]
mod file;
mod recording;

pub use direct::DirectPersister;
#[cfg(feature = "file")]
pub use file::{FilePersister, Spool, SpoolEntry};
pub use recording::{RecordedResponse, RecordingPersister};

/// The known persistence backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceKind {
    /// Post to the metrics API.
    Direct,
    /// Append to a local SQLite spool.
    File,
    /// Record in memory.
    Test,
}

impl PersistenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceKind::Direct => "direct",
            PersistenceKind::File => "file",
            PersistenceKind::Test => "test",
        }
    }
}

impl fmt::Display for PersistenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(PersistenceKind::Direct),
            "file" => Ok(PersistenceKind::File),
            "test" => Ok(PersistenceKind::Test),
            _ => Err(RelayError::UnknownPersistenceBackend {
                backend: s.to_string(),
            }),
        }
    }
}

/// Hints passed to a backend alongside the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOptions {
    batch_size: usize,
}

impl PersistOptions {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size }
    }

    /// Maximum measurements per network operation.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self::new(DEFAULT_PER_REQUEST)
    }
}

/// A persistence capability.
#[async_trait]
pub trait Persister: Send + Sync + fmt::Debug {
    /// Delivers `batch`.
    ///
    /// Returns `Ok(false)` when the backend declines without a specific
    /// failure; the caller keeps the data. Rejections by the remote service
    /// come back as [`RelayError::Client`].
    async fn persist(
        &self,
        client: &MetricsClient,
        batch: &MeasurementBatch,
        options: PersistOptions,
    ) -> Result<bool>;
}

/// Maps each [`PersistenceKind`] to an implementation.
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<PersistenceKind, Arc<dyn Persister>>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the production backends.
    ///
    /// `Test` is left out; register a [`RecordingPersister`] for it explicitly.
    pub fn with_defaults() -> Self {
        let registry = Self::new().with(PersistenceKind::Direct, Arc::new(DirectPersister));

        #[cfg(feature = "file")]
        let registry = registry.with(PersistenceKind::File, Arc::new(FilePersister::new()));

        registry
    }

    /// Registers `persister` for `kind`, replacing any previous entry.
    pub fn register(&mut self, kind: PersistenceKind, persister: Arc<dyn Persister>) {
        self.backends.insert(kind, persister);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, kind: PersistenceKind, persister: Arc<dyn Persister>) -> Self {
        self.register(kind, persister);
        self
    }

    pub fn get(&self, kind: PersistenceKind) -> Option<Arc<dyn Persister>> {
        self.backends.get(&kind).cloned()
    }

    /// Resolves a backend identifier such as `"direct"` or `"File"`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownPersistenceBackend`] if the identifier is
    /// not a known kind or no backend is registered for it.
    pub fn resolve(&self, identifier: &str) -> Result<Arc<dyn Persister>> {
        let kind: PersistenceKind = identifier.parse()?;
        let persister = self
            .get(kind)
            .ok_or_else(|| RelayError::UnknownPersistenceBackend {
                backend: identifier.to_string(),
            })?;
        debug!(backend = %kind, "Resolved persistence backend");
        Ok(persister)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing_normalizes() {
        assert_eq!("direct".parse::<PersistenceKind>().unwrap(), PersistenceKind::Direct);
        assert_eq!("Direct".parse::<PersistenceKind>().unwrap(), PersistenceKind::Direct);
        assert_eq!(" FILE ".parse::<PersistenceKind>().unwrap(), PersistenceKind::File);
        assert_eq!("test".parse::<PersistenceKind>().unwrap(), PersistenceKind::Test);
    }

    #[test]
    fn test_unknown_kind() {
        let err = "carrier-pigeon".parse::<PersistenceKind>().unwrap_err();
        assert!(matches!(
            err,
            RelayError::UnknownPersistenceBackend { ref backend } if backend == "carrier-pigeon"
        ));
    }

    #[test]
    fn test_registry_requires_registration() {
        let registry = BackendRegistry::new();
        let err = registry.resolve("direct").unwrap_err();
        assert!(matches!(err, RelayError::UnknownPersistenceBackend { .. }));
    }

    #[test]
    fn test_registry_with_defaults() {
        let registry = BackendRegistry::with_defaults();
        assert!(registry.resolve("direct").is_ok());
        #[cfg(feature = "file")]
        assert!(registry.resolve("file").is_ok());
        assert!(matches!(
            registry.resolve("test"),
            Err(RelayError::UnknownPersistenceBackend { .. })
        ));
    }

    #[test]
    fn test_register_replaces() {
        let first: Arc<dyn Persister> = Arc::new(RecordingPersister::new());
        let second: Arc<dyn Persister> = Arc::new(RecordingPersister::new());
        let registry = BackendRegistry::new()
            .with(PersistenceKind::Test, first.clone())
            .with(PersistenceKind::Test, second.clone());

        let resolved = registry.resolve("test").unwrap();
        assert!(Arc::ptr_eq(&resolved, &second));
        assert!(!Arc::ptr_eq(&resolved, &first));
    }

    #[test]
    fn test_default_persist_options() {
        assert_eq!(PersistOptions::default().batch_size(), 500);
    }
}

//! SQLite spool backend.
//!
//! Each chunk of a submission becomes one row holding the chunk's JSON
//! payload. Rows can be loaded and deleted later, for example to replay them
//! through [`DirectPersister`](crate::persistence::DirectPersister) once the
//! network is back.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::Connection;
use tracing::{debug, instrument, warn};

use crate::client::MetricsClient;
use crate::error::{RelayError, Result};
use crate::measurement::MeasurementBatch;
use crate::persistence::{PersistOptions, Persister};

/// A spooled chunk with its row ID for selective deletion.
#[derive(Debug)]
pub struct SpoolEntry {
    /// Row ID, used with [`Spool::delete_ids`].
    pub id: i64,
    pub batch: MeasurementBatch,
}

/// SQLite-backed store of pending batches.
pub struct Spool {
    conn: Mutex<Connection>,
}

fn spool_error(context: &str, e: impl std::fmt::Display) -> RelayError {
    RelayError::Spool {
        message: format!("{context}: {e}"),
    }
}

impl Spool {
    /// Create or open a spool at the given file path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| spool_error("Failed to create spool directory", e))?;
        }

        let conn =
            Connection::open(path).map_err(|e| spool_error("Failed to open spool database", e))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory spool for testing.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| spool_error("Failed to create in-memory spool", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spooled_batches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_json TEXT NOT NULL,
                measurement_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )
        .map_err(|e| spool_error("Failed to create schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| spool_error("Failed to acquire lock", e))
    }

    /// Append one batch.
    pub fn append(&self, batch: &MeasurementBatch) -> Result<()> {
        self.append_all(std::slice::from_ref(batch))
    }

    /// Append several batches in one transaction.
    ///
    /// Either every batch is written or none is.
    pub fn append_all(&self, batches: &[MeasurementBatch]) -> Result<()> {
        let rows = batches
            .iter()
            .map(|batch| {
                let json = serde_json::to_string(batch).map_err(|e| RelayError::Serialization {
                    message: e.to_string(),
                })?;
                Ok((json, i64::try_from(batch.len()).unwrap_or(i64::MAX)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| spool_error("Failed to begin transaction", e))?;
        for (json, count) in &rows {
            tx.execute(
                "INSERT INTO spooled_batches (batch_json, measurement_count) VALUES (?1, ?2)",
                rusqlite::params![json, count],
            )
            .map_err(|e| spool_error("Failed to append batch", e))?;
        }
        tx.commit()
            .map_err(|e| spool_error("Failed to commit batches", e))?;

        Ok(())
    }

    /// Load all spooled batches, oldest first.
    ///
    /// Rows that no longer deserialize are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<SpoolEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, batch_json FROM spooled_batches ORDER BY id")
            .map_err(|e| spool_error("Failed to prepare query", e))?;

        let entries = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                Ok((id, json))
            })
            .map_err(|e| spool_error("Failed to query batches", e))?
            .filter_map(|row| match row {
                Ok((id, json)) => match serde_json::from_str::<MeasurementBatch>(&json) {
                    Ok(batch) => Some(SpoolEntry { id, batch }),
                    Err(e) => {
                        warn!("Failed to deserialize spooled batch (id={}): {}", id, e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Failed to read spool row: {}", e);
                    None
                }
            })
            .collect();

        Ok(entries)
    }

    /// Delete specific rows. Returns the number deleted.
    pub fn delete_ids(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let placeholders: Vec<_> = ids.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM spooled_batches WHERE id IN ({})",
            placeholders.join(", ")
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| spool_error("Failed to prepare delete query", e))?;
        let deleted = stmt
            .execute(rusqlite::params_from_iter(ids.iter()))
            .map_err(|e| spool_error("Failed to delete batches", e))?;

        Ok(deleted)
    }

    /// Number of spooled batches.
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM spooled_batches", [], |row| row.get(0))
            .map_err(|e| spool_error("Failed to count batches", e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Total measurements across all spooled batches.
    pub fn measurement_count(&self) -> Result<usize> {
        let count: i64 = self
            .lock()?
            .query_row(
                "SELECT COALESCE(SUM(measurement_count), 0) FROM spooled_batches",
                [],
                |row| row.get(0),
            )
            .map_err(|e| spool_error("Failed to count measurements", e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Writes batches to a SQLite spool file instead of the network.
///
/// The path comes from the persister itself, then the client's
/// [`spool_path`](crate::config::ClientConfig::spool_path), then the platform
/// cache directory (e.g. `~/.cache/metrics-relay/spool.db` on Linux).
#[derive(Debug, Clone, Default)]
pub struct FilePersister {
    path: Option<PathBuf>,
}

impl FilePersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always spool to `path`.
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
        }
    }

    fn resolve_path(&self, client: &MetricsClient) -> Result<PathBuf> {
        if let Some(p) = &self.path {
            return Ok(p.clone());
        }
        if let Some(p) = client.config().spool_path() {
            return Ok(p.to_path_buf());
        }
        ProjectDirs::from("dev", "metrics-relay", "metrics-relay")
            .map(|dirs| dirs.cache_dir().join("spool.db"))
            .ok_or_else(|| RelayError::Configuration {
                message: "Could not determine spool directory".to_string(),
            })
    }
}

#[async_trait]
impl Persister for FilePersister {
    #[instrument(skip_all, fields(count = batch.len(), batch_size = options.batch_size()))]
    async fn persist(
        &self,
        client: &MetricsClient,
        batch: &MeasurementBatch,
        options: PersistOptions,
    ) -> Result<bool> {
        let path = self.resolve_path(client)?;
        let chunks = batch.chunks(options.batch_size());

        let written = tokio::task::spawn_blocking(move || -> Result<usize> {
            Spool::open(&path)?.append_all(&chunks)?;
            Ok(chunks.len())
        })
        .await
        .map_err(|e| RelayError::Internal(format!("Spool task failed: {e}")))??;

        debug!(rows = written, "Spooled batch");
        Ok(true)
    }
}

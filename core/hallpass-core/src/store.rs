//! Persistence collaborator contract and the file-backed reference store.
//!
//! The hosted realtime store the deployment targets sits behind
//! [`AttendanceStore`]; the core only ever sees this trait. [`StateStore`]
//! is the reference implementation: an in-memory map, optionally backed by
//! a versioned JSON file written atomically (temp file + rename), with
//! change fan-out over a broadcast channel.
//!
//! # Conditional writes
//!
//! `put_record_if` and `batch_commit` are compare-and-set: every write
//! carries the record value the writer read, and nothing is written when the
//! stored value has moved on. This is what makes the read-decide-write
//! toggle safe against concurrent scans of the same identity.
//!
//! # Defensive loads
//!
//! The state file is shared with whatever wrote it last, so loading handles
//! empty files, corrupt JSON, and version mismatches by degrading to an
//! empty store with a warning rather than failing startup.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::error::{PassError, Result};
use crate::types::{AttendanceRecord, LogEntry};

/// Schema version of the on-disk state file.
const STORE_VERSION: u32 = 1;

/// Capacity of the change-notification channel. Slow subscribers that lag
/// behind simply miss intermediate notifications and re-snapshot.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Change notification pushed to presentation-layer subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    RecordsChanged,
    LogsChanged,
}

/// One conditional record write inside a batch.
#[derive(Debug, Clone)]
pub struct ConditionalWrite {
    pub unique_id: String,
    /// The value the writer read; the batch aborts if the stored value no
    /// longer matches.
    pub expected: Option<AttendanceRecord>,
    pub record: AttendanceRecord,
}

/// Contract the core requires from the persistence layer.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Point read of one attendance record.
    async fn get_record(&self, unique_id: &str) -> Result<Option<AttendanceRecord>>;

    /// Conditional overwrite. Returns `false` (writing nothing) when the
    /// stored record no longer matches `expected`.
    async fn put_record_if(
        &self,
        unique_id: &str,
        expected: Option<&AttendanceRecord>,
        record: AttendanceRecord,
    ) -> Result<bool>;

    /// Appends one immutable audit entry.
    async fn append_log(&self, entry: LogEntry) -> Result<()>;

    /// Commits a set of conditional writes plus their log entries as one
    /// unit. Any failed expectation aborts the whole batch with
    /// [`PassError::WriteConflict`]. Returns the number of records written.
    async fn batch_commit(
        &self,
        writes: Vec<ConditionalWrite>,
        logs: Vec<LogEntry>,
    ) -> Result<usize>;

    /// Snapshot of every attendance record.
    async fn all_records(&self) -> Result<HashMap<String, AttendanceRecord>>;

    /// Log entries whose date falls in the inclusive `[from, to]` range;
    /// open bounds when None.
    async fn logs(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<LogEntry>>;

    /// Administrative bulk clear of the audit log.
    async fn delete_all_logs(&self) -> Result<()>;

    /// Push-based change notification. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// The on-disk JSON structure for the state file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    records: HashMap<String, AttendanceRecord>,
    #[serde(default)]
    logs: Vec<LogEntry>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, AttendanceRecord>,
    logs: Vec<LogEntry>,
}

/// In-memory store, optionally backed by a JSON file.
///
/// Create with [`StateStore::load`] to read from a state file, or
/// [`StateStore::new_in_memory`] for tests and ephemeral stations.
pub struct StateStore {
    inner: Mutex<Inner>,
    file_path: Option<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    pub fn new_in_memory() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        StateStore {
            inner: Mutex::new(Inner::default()),
            file_path: None,
            events,
        }
    }

    pub fn new(file_path: &Path) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        StateStore {
            inner: Mutex::new(Inner::default()),
            file_path: Some(file_path.to_path_buf()),
            events,
        }
    }

    /// Loads the state file, degrading to an empty store on anything but an
    /// unreadable file.
    pub fn load(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            return Ok(StateStore::new(file_path));
        }

        let content =
            fs_err::read_to_string(file_path).map_err(|err| PassError::PersistenceUnavailable {
                context: "read state file".to_string(),
                source: err,
            })?;

        if content.trim().is_empty() {
            warn!(path = %file_path.display(), "Empty state file, starting with empty store");
            return Ok(StateStore::new(file_path));
        }

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(store_file) if store_file.version == STORE_VERSION => {
                let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
                Ok(StateStore {
                    inner: Mutex::new(Inner {
                        records: store_file.records,
                        logs: store_file.logs,
                    }),
                    file_path: Some(file_path.to_path_buf()),
                    events,
                })
            }
            Ok(store_file) => {
                warn!(
                    path = %file_path.display(),
                    version = store_file.version,
                    expected = STORE_VERSION,
                    "Unsupported state file version, starting with empty store"
                );
                Ok(StateStore::new(file_path))
            }
            Err(err) => {
                warn!(
                    path = %file_path.display(),
                    error = %err,
                    "Failed to parse state file, starting with empty store"
                );
                Ok(StateStore::new(file_path))
            }
        }
    }

    /// Writes the current state through a temp file + rename so a crash can
    /// never leave a partial file behind.
    fn persist(&self, inner: &Inner) -> Result<()> {
        let Some(file_path) = self.file_path.as_ref() else {
            return Ok(());
        };

        let store_file = StoreFile {
            version: STORE_VERSION,
            records: inner.records.clone(),
            logs: inner.logs.clone(),
        };
        let content =
            serde_json::to_string_pretty(&store_file).map_err(|err| PassError::Json {
                context: "serialize state file".to_string(),
                source: err,
            })?;

        let parent_dir = file_path
            .parent()
            .ok_or_else(|| PassError::PersistenceUnavailable {
                context: "state file path has no parent directory".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(|err| PassError::PersistenceUnavailable {
                context: "create temp state file".to_string(),
                source: err,
            })?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| PassError::PersistenceUnavailable {
                context: "write temp state file".to_string(),
                source: err,
            })?;
        temp_file
            .flush()
            .map_err(|err| PassError::PersistenceUnavailable {
                context: "flush temp state file".to_string(),
                source: err,
            })?;
        temp_file
            .persist(file_path)
            .map_err(|err| PassError::PersistenceUnavailable {
                context: "replace state file".to_string(),
                source: err.error,
            })?;

        Ok(())
    }

    fn notify(&self, event: StoreEvent) {
        // No receivers is fine; subscribers come and go.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl AttendanceStore for StateStore {
    async fn get_record(&self, unique_id: &str) -> Result<Option<AttendanceRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(unique_id).cloned())
    }

    async fn put_record_if(
        &self,
        unique_id: &str,
        expected: Option<&AttendanceRecord>,
        record: AttendanceRecord,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;

        if inner.records.get(unique_id) != expected {
            return Ok(false);
        }

        let prior = inner.records.insert(unique_id.to_string(), record);
        if let Err(err) = self.persist(&inner) {
            // Roll back the in-memory change so state and file stay in step.
            match prior {
                Some(prev) => {
                    inner.records.insert(unique_id.to_string(), prev);
                }
                None => {
                    inner.records.remove(unique_id);
                }
            }
            return Err(err);
        }

        drop(inner);
        self.notify(StoreEvent::RecordsChanged);
        Ok(true)
    }

    async fn append_log(&self, entry: LogEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.logs.push(entry);
        if let Err(err) = self.persist(&inner) {
            inner.logs.pop();
            return Err(err);
        }
        drop(inner);
        self.notify(StoreEvent::LogsChanged);
        Ok(())
    }

    async fn batch_commit(
        &self,
        writes: Vec<ConditionalWrite>,
        logs: Vec<LogEntry>,
    ) -> Result<usize> {
        if writes.is_empty() && logs.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.lock().await;

        // Verify every expectation before touching anything: the batch is
        // all-or-nothing.
        for write in &writes {
            if inner.records.get(&write.unique_id) != write.expected.as_ref() {
                return Err(PassError::WriteConflict(write.unique_id.clone()));
            }
        }

        let written = writes.len();
        let mut priors = Vec::with_capacity(written);
        for write in writes {
            let prior = inner.records.insert(write.unique_id.clone(), write.record);
            priors.push((write.unique_id, prior));
        }
        let log_count = logs.len();
        inner.logs.extend(logs);

        if let Err(err) = self.persist(&inner) {
            let keep = inner.logs.len() - log_count;
            inner.logs.truncate(keep);
            for (unique_id, prior) in priors.into_iter().rev() {
                match prior {
                    Some(prev) => {
                        inner.records.insert(unique_id, prev);
                    }
                    None => {
                        inner.records.remove(&unique_id);
                    }
                }
            }
            return Err(err);
        }

        drop(inner);
        if written > 0 {
            self.notify(StoreEvent::RecordsChanged);
        }
        if log_count > 0 {
            self.notify(StoreEvent::LogsChanged);
        }
        Ok(written)
    }

    async fn all_records(&self) -> Result<HashMap<String, AttendanceRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.clone())
    }

    async fn logs(&self, from: Option<&str>, to: Option<&str>) -> Result<Vec<LogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .logs
            .iter()
            .filter(|entry| {
                from.map_or(true, |from| entry.date.as_str() >= from)
                    && to.map_or(true, |to| entry.date.as_str() <= to)
            })
            .cloned()
            .collect())
    }

    async fn delete_all_logs(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let cleared = std::mem::take(&mut inner.logs);
        if let Err(err) = self.persist(&inner) {
            inner.logs = cleared;
            return Err(err);
        }
        drop(inner);
        self.notify(StoreEvent::LogsChanged);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

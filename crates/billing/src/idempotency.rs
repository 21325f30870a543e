//! Processed-event witnesses
//!
//! A payment event id must move money at most once. The durable witness is a
//! record table keyed by event id; an append-only local file takes over only
//! when the table itself cannot be reached. "Could not check" is never read
//! as "already processed".

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use blogify_shared::{Fields, Formula, RecordStore};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{BillingError, BillingResult};

/// Default name of the processed events table
pub const DEFAULT_PROCESSED_EVENTS_TABLE: &str = "processed_events";

/// A place that remembers which event ids were handled
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn is_processed(&self, event_id: &str) -> BillingResult<bool>;

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> BillingResult<()>;
}

/// Witness table in the record store
pub struct RecordEventStore {
    store: Arc<dyn RecordStore>,
    table: String,
}

impl RecordEventStore {
    pub fn new(store: Arc<dyn RecordStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }
}

#[async_trait]
impl ProcessedEventStore for RecordEventStore {
    fn name(&self) -> &'static str {
        "record_store"
    }

    async fn is_processed(&self, event_id: &str) -> BillingResult<bool> {
        let found = self
            .store
            .first(&self.table, &Formula::eq("event_id", event_id))
            .await?;
        Ok(found.is_some())
    }

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> BillingResult<()> {
        let processed_at = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|e| BillingError::Internal(e.to_string()))?;

        let mut fields = Fields::new();
        fields.insert("event_id".into(), Value::from(event_id));
        fields.insert("event_type".into(), Value::from(event_type));
        fields.insert("processed_at".into(), Value::from(processed_at));
        self.store.create(&self.table, fields).await?;
        Ok(())
    }
}

/// Newline-delimited file of processed event ids
pub struct FileEventStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ProcessedEventStore for FileEventStore {
    fn name(&self) -> &'static str {
        "local_file"
    }

    async fn is_processed(&self, event_id: &str) -> BillingResult<bool> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(BillingError::Internal(format!(
                    "reading {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        Ok(contents.lines().any(|line| line.trim() == event_id))
    }

    async fn mark_processed(&self, event_id: &str, _event_type: &str) -> BillingResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                BillingError::Internal(format!("opening {}: {}", self.path.display(), e))
            })?;
        file.write_all(format!("{}\n", event_id).as_bytes())
            .await
            .map_err(|e| {
                BillingError::Internal(format!("appending to {}: {}", self.path.display(), e))
            })?;
        file.flush()
            .await
            .map_err(|e| BillingError::Internal(e.to_string()))?;
        Ok(())
    }
}

/// Which witness answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Witness {
    Primary,
    Fallback,
}

/// Layered witness: primary store, file fallback on primary failure
#[derive(Clone)]
pub struct IdempotencyGuard {
    primary: Arc<dyn ProcessedEventStore>,
    fallback: Arc<dyn ProcessedEventStore>,
}

impl IdempotencyGuard {
    pub fn new(
        primary: Arc<dyn ProcessedEventStore>,
        fallback: Arc<dyn ProcessedEventStore>,
    ) -> Self {
        Self { primary, fallback }
    }

    /// Whether the event was already handled, and which witness said so.
    ///
    /// The fallback is only consulted when the primary check errors. If both
    /// fail the event is treated as not processed.
    pub async fn processed_by(&self, event_id: &str) -> Option<Witness> {
        match self.primary.is_processed(event_id).await {
            Ok(true) => Some(Witness::Primary),
            Ok(false) => None,
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    store = self.primary.name(),
                    error = %e,
                    "Idempotency check failed, consulting fallback"
                );
                match self.fallback.is_processed(event_id).await {
                    Ok(true) => Some(Witness::Fallback),
                    Ok(false) => None,
                    Err(e) => {
                        warn!(
                            event_id = %event_id,
                            store = self.fallback.name(),
                            error = %e,
                            "Fallback idempotency check failed, treating event as new"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Record the event, preferring the durable witness
    pub async fn mark(&self, event_id: &str, event_type: &str) -> BillingResult<Witness> {
        match self.primary.mark_processed(event_id, event_type).await {
            Ok(()) => Ok(Witness::Primary),
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    store = self.primary.name(),
                    error = %e,
                    "Could not record processed event, using fallback"
                );
                self.fallback.mark_processed(event_id, event_type).await?;
                Ok(Witness::Fallback)
            }
        }
    }
}

/// Event ids currently being applied in this process
#[derive(Debug, Default)]
pub struct InFlightEvents {
    ids: Mutex<HashSet<String>>,
}

impl InFlightEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an event id; `None` when another delivery already holds it
    pub fn claim(self: &Arc<Self>, event_id: &str) -> Option<InFlightClaim> {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(event_id.to_string()) {
            return None;
        }
        Some(InFlightClaim {
            events: Arc::clone(self),
            event_id: event_id.to_string(),
        })
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(event_id)
    }
}

/// Releases its event id when dropped
#[derive(Debug)]
pub struct InFlightClaim {
    events: Arc<InFlightEvents>,
    event_id: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.events
            .ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogify_shared::store::MemoryStore;

    fn guard_over(store: Arc<MemoryStore>, dir: &tempfile::TempDir) -> IdempotencyGuard {
        IdempotencyGuard::new(
            Arc::new(RecordEventStore::new(store, DEFAULT_PROCESSED_EVENTS_TABLE)),
            Arc::new(FileEventStore::new(dir.path().join("processed_events.log"))),
        )
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileEventStore::new(dir.path().join("events.log"));
        assert!(!file.is_processed("evt_1").await.unwrap());
        file.mark_processed("evt_1", "invoice.payment_succeeded")
            .await
            .unwrap();
        file.mark_processed("evt_2", "invoice.payment_succeeded")
            .await
            .unwrap();
        assert!(file.is_processed("evt_1").await.unwrap());
        assert!(!file.is_processed("evt_").await.unwrap());

        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents, "evt_1\nevt_2\n");
    }

    #[tokio::test]
    async fn test_primary_answers_when_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(store.clone(), &dir);

        assert_eq!(guard.processed_by("evt_1").await, None);
        assert_eq!(guard.mark("evt_1", "x").await.unwrap(), Witness::Primary);
        assert_eq!(guard.processed_by("evt_1").await, Some(Witness::Primary));
        assert_eq!(store.count(DEFAULT_PROCESSED_EVENTS_TABLE).await, 1);
        assert!(!dir.path().join("processed_events.log").exists());
    }

    #[tokio::test]
    async fn test_fallback_used_only_when_primary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let guard = guard_over(store.clone(), &dir);

        store.set_unavailable(DEFAULT_PROCESSED_EVENTS_TABLE, true);
        assert_eq!(guard.processed_by("evt_1").await, None);
        assert_eq!(guard.mark("evt_1", "x").await.unwrap(), Witness::Fallback);
        assert_eq!(guard.processed_by("evt_1").await, Some(Witness::Fallback));

        // Once the primary is back it is authoritative again
        store.set_unavailable(DEFAULT_PROCESSED_EVENTS_TABLE, false);
        assert_eq!(guard.processed_by("evt_1").await, None);
    }

    #[test]
    fn test_in_flight_claim_released_on_drop() {
        let events = Arc::new(InFlightEvents::new());
        let claim = events.claim("evt_1").unwrap();
        assert!(events.claim("evt_1").is_none());
        assert!(events.contains("evt_1"));
        drop(claim);
        assert!(!events.contains("evt_1"));
        assert!(events.claim("evt_1").is_some());
    }
}

//! Change-log sink contract.
//!
//! Writes and their change-log records are independent asynchronous steps:
//! when emission fails the preceding write persists and the caller sees
//! [`DataError::Logging`]. This best-effort contract is deliberate; there is
//! no cross-write transactionality at this layer.
//!
//! [`DataError::Logging`]: crate::error::DataError::Logging

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::value::Record;

/// Kind of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
    /// A detail was added to a master's collection.
    Put,
    /// A detail was removed from a master's collection.
    Eject,
}

/// A recorded change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    /// Canonical class name of the changed item.
    pub class_name: String,
    pub item_id: String,
    /// The update set (or association description) that was applied.
    pub payload: Record,
    pub timestamp: DateTime<Utc>,
}

/// Sink for change events emitted by write operations.
#[async_trait]
pub trait ChangeLogger: Send + Sync {
    async fn log_change(
        &self,
        kind: ChangeKind,
        class_name: &str,
        item_id: &str,
        payload: &Record,
    ) -> Result<ChangeRecord, BoxError>;
}

/// In-memory change logger for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryChangeLogger {
    records: Mutex<Vec<ChangeRecord>>,
}

impl MemoryChangeLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn records(&self) -> Vec<ChangeRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ChangeLogger for MemoryChangeLogger {
    async fn log_change(
        &self,
        kind: ChangeKind,
        class_name: &str,
        item_id: &str,
        payload: &Record,
    ) -> Result<ChangeRecord, BoxError> {
        let record = ChangeRecord {
            kind,
            class_name: class_name.to_string(),
            item_id: item_id.to_string(),
            payload: payload.clone(),
            timestamp: Utc::now(),
        };
        self.records.lock().push(record.clone());
        Ok(record)
    }
}

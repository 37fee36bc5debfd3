//! The raw storage backend contract.
//!
//! Backends are schema-less: a "store" is a named bag of flat records.
//! The repository maps every class hierarchy onto its root class's store
//! and never assumes anything about the physical layout beyond these seven
//! operations. Cancellation and timeouts are the backend's concern; a
//! cancelled backend call surfaces as a regular [`DataError::Storage`].
//!
//! [`DataError::Storage`]: crate::error::DataError::Storage

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::{DataQuery, Filter};
use crate::value::Record;

/// Result of a raw fetch: the page of records, plus the unpaged total when
/// the query asked for it.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub records: Vec<Record>,
    pub total: Option<u64>,
}

/// Generic asynchronous storage backend.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch records matching the query, honoring filter/sort/paging.
    async fn fetch(&self, store: &str, query: &DataQuery) -> Result<FetchResult>;

    /// Point lookup by key conditions (exact-match field map).
    async fn get(&self, store: &str, conditions: &Record) -> Result<Option<Record>>;

    /// Count records matching the filter.
    async fn count(&self, store: &str, filter: Option<&Filter>) -> Result<u64>;

    /// Insert a record, returning the stored form.
    async fn insert(&self, store: &str, data: Record) -> Result<Record>;

    /// Update the record matching the key conditions with the given fields,
    /// returning the updated stored form.
    async fn update(&self, store: &str, conditions: &Record, data: Record) -> Result<Record>;

    /// Update the record matching the conditions or insert a new one.
    async fn upsert(&self, store: &str, conditions: &Record, data: Record) -> Result<Record>;

    /// Delete the record matching the key conditions.
    async fn delete(&self, store: &str, conditions: &Record) -> Result<()>;
}

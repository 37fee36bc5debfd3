//! In-memory storage backend.
//!
//! Reference implementation of [`DataSource`] over plain vectors behind an
//! `RwLock`. It exists for tests and embedded use; its filter semantics
//! (via [`Filter::matches`]) are the reference behavior a real backend is
//! expected to reproduce. Fetch calls are counted per store so tests can
//! assert batching properties (one query per enrichment slot, not per item).

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::datasource::{DataSource, FetchResult};
use crate::error::{DataError, Result};
use crate::filter::{DataQuery, Filter, SortDirection};
use crate::value::{Record, Value};

/// In-memory [`DataSource`].
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    stores: RwLock<HashMap<String, Vec<Record>>>,
    fetch_calls: RwLock<HashMap<String, usize>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with raw records, bypassing the repository. Intended for
    /// test fixtures.
    pub fn seed(&self, store: &str, records: Vec<Record>) {
        self.stores
            .write()
            .entry(store.to_string())
            .or_default()
            .extend(records);
    }

    /// Raw snapshot of a store's records.
    pub fn dump(&self, store: &str) -> Vec<Record> {
        self.stores.read().get(store).cloned().unwrap_or_default()
    }

    /// How many `fetch` calls this store has served.
    pub fn fetch_count(&self, store: &str) -> usize {
        self.fetch_calls.read().get(store).copied().unwrap_or(0)
    }

    fn matches_conditions(record: &Record, conditions: &Record) -> bool {
        conditions.iter().all(|(field, value)| {
            record
                .get(field)
                .is_some_and(|v| crate::filter::values_eq(v, value))
        })
    }
}

/// Total order over values for sorting: nulls first, then numerics, then
/// everything else by its canonical key form.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Real(x), Value::Real(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Real(y)) => (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Real(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal),
        (Value::DateTime(x), Value::DateTime(y)) => x.cmp(y),
        _ => a
            .as_key()
            .unwrap_or_default()
            .cmp(&b.as_key().unwrap_or_default()),
    }
}

#[async_trait]
impl DataSource for MemoryDataSource {
    async fn fetch(&self, store: &str, query: &DataQuery) -> Result<FetchResult> {
        *self
            .fetch_calls
            .write()
            .entry(store.to_string())
            .or_insert(0) += 1;

        let stores = self.stores.read();
        let records = stores.get(store).map(Vec::as_slice).unwrap_or_default();

        let mut matched: Vec<Record> = records
            .iter()
            .filter(|r| query.filter.as_ref().is_none_or(|f| f.matches(r)))
            .cloned()
            .collect();

        for spec in query.sort.iter().rev() {
            matched.sort_by(|a, b| {
                let ord = cmp_values(
                    a.get(&spec.field).unwrap_or(&Value::Null),
                    b.get(&spec.field).unwrap_or(&Value::Null),
                );
                match spec.direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                }
            });
        }

        let total = query.count_total.then_some(matched.len() as u64);
        let offset = query.offset.unwrap_or(0) as usize;
        let mut page: Vec<Record> = matched.into_iter().skip(offset).collect();
        if let Some(count) = query.count {
            page.truncate(count as usize);
        }

        Ok(FetchResult { records: page, total })
    }

    async fn get(&self, store: &str, conditions: &Record) -> Result<Option<Record>> {
        let stores = self.stores.read();
        Ok(stores
            .get(store)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| Self::matches_conditions(r, conditions))
            })
            .cloned())
    }

    async fn count(&self, store: &str, filter: Option<&Filter>) -> Result<u64> {
        let stores = self.stores.read();
        let records = stores.get(store).map(Vec::as_slice).unwrap_or_default();
        Ok(records
            .iter()
            .filter(|r| filter.is_none_or(|f| f.matches(r)))
            .count() as u64)
    }

    async fn insert(&self, store: &str, data: Record) -> Result<Record> {
        let mut stores = self.stores.write();
        stores.entry(store.to_string()).or_default().push(data.clone());
        Ok(data)
    }

    async fn update(&self, store: &str, conditions: &Record, data: Record) -> Result<Record> {
        let mut stores = self.stores.write();
        let records = stores.get_mut(store).ok_or_else(|| {
            DataError::storage(
                format!("update on {store}"),
                format!("unknown store {store}"),
            )
        })?;
        let record = records
            .iter_mut()
            .find(|r| Self::matches_conditions(r, conditions))
            .ok_or_else(|| {
                DataError::storage(
                    format!("update on {store}"),
                    format!("no record matching {conditions:?}"),
                )
            })?;
        for (field, value) in data {
            record.insert(field, value);
        }
        Ok(record.clone())
    }

    async fn upsert(&self, store: &str, conditions: &Record, data: Record) -> Result<Record> {
        let exists = {
            let stores = self.stores.read();
            stores
                .get(store)
                .is_some_and(|rs| rs.iter().any(|r| Self::matches_conditions(r, conditions)))
        };
        if !exists {
            let mut merged = conditions.clone();
            for (field, value) in data {
                merged.insert(field, value);
            }
            return self.insert(store, merged).await;
        }
        self.update(store, conditions, data).await
    }

    async fn delete(&self, store: &str, conditions: &Record) -> Result<()> {
        let mut stores = self.stores.write();
        if let Some(records) = stores.get_mut(store) {
            records.retain(|r| !Self::matches_conditions(r, conditions));
        }
        Ok(())
    }
}

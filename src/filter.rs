//! Filter and query types of the backend contract.
//!
//! Filters are a small structural AST rather than a query language: the
//! repository only ever needs equality, membership, array containment, and
//! conjunction. Backends interpret the AST against their native query
//! representation.

use serde::{Deserialize, Serialize};

use crate::value::{Record, Value};

/// A structural filter over record fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Field equals value.
    Eq(String, Value),
    /// Field value is one of the listed values.
    In(String, Vec<Value>),
    /// Array-valued field contains the value.
    Contains(String, Value),
    /// All sub-filters hold.
    And(Vec<Filter>),
}

impl Filter {
    /// Conjoin two optional filters, flattening nested `And`s one level.
    pub fn and(lhs: Option<Filter>, rhs: Filter) -> Filter {
        match lhs {
            None => rhs,
            Some(Filter::And(mut parts)) => {
                parts.push(rhs);
                Filter::And(parts)
            }
            Some(other) => Filter::And(vec![other, rhs]),
        }
    }

    /// Whether a record satisfies this filter. Used by the in-memory backend
    /// and handy for backend implementors as the reference semantics.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Filter::Eq(field, value) => record.get(field).is_some_and(|v| values_eq(v, value)),
            Filter::In(field, values) => record
                .get(field)
                .is_some_and(|v| values.iter().any(|w| values_eq(v, w))),
            Filter::Contains(field, value) => record
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.iter().any(|v| values_eq(v, value))),
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
        }
    }
}

/// Value equality for filtering: compares through the canonical key form so
/// an integer key matches its string rendition, the way schema-less stores
/// behave when ids cross serialization boundaries.
pub(crate) fn values_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_key(), b.as_key()) {
        (Some(ka), Some(kb)) => ka == kb,
        _ => false,
    }
}

/// Sort direction for list fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// A single sort criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Options for a raw backend fetch.
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    pub filter: Option<Filter>,
    pub offset: Option<u64>,
    pub count: Option<u64>,
    pub sort: Vec<SortSpec>,
    /// Ask the backend to also report the unpaged total.
    pub count_total: bool,
}

/// Options for a repository list operation. Superset of [`DataQuery`] with
/// the enrichment depth the caller wants on the returned items.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filter: Option<Filter>,
    pub offset: Option<u64>,
    pub count: Option<u64>,
    pub sort: Vec<SortSpec>,
    pub count_total: bool,
    /// Graph enrichment depth; 0 returns bare items.
    pub nesting_depth: u32,
}

impl ListOptions {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.nesting_depth = depth;
        self
    }

    pub(crate) fn to_query(&self) -> DataQuery {
        DataQuery {
            filter: self.filter.clone(),
            offset: self.offset,
            count: self.count,
            sort: self.sort.clone(),
            count_total: self.count_total,
        }
    }
}

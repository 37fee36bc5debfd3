//! Metadata-driven object persistence over pluggable storage backends.
//!
//! `polystore` turns a class metamodel plus a schema-less async backend into
//! a CRUD repository of polymorphic business objects. The engine itself
//! never touches a concrete database: it speaks to storage through the
//! [`DataSource`] trait, reads class declarations through [`MetaRegistry`],
//! forms identifiers through [`KeyProvider`], and optionally reports writes
//! to a [`ChangeLogger`].
//!
//! The moving parts:
//!
//! * inheritance chains share the root class's physical store, with rows
//!   discriminated by a stored `_class` field, so listing a base class
//!   transparently returns subclass instances,
//! * list and get results are enriched to a requested nesting depth, with
//!   one batched query per (class, property) slot per level instead of one
//!   query per item,
//! * collection properties on writes are reconciled bidirectionally:
//!   one-to-many via back-references on the detail side, many-to-many via
//!   mirror arrays on both sides,
//! * incoming values are cast to their declared property types before they
//!   reach the backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use polystore::{
//!     ClassMeta, DataRepository, ListOptions, MemoryDataSource, MetaKeyProvider,
//!     PropertyMeta, PropertyType, StaticMetaRegistry,
//! };
//!
//! # async fn demo() -> polystore::Result<()> {
//! let mut registry = StaticMetaRegistry::default();
//! registry.register(
//!     ClassMeta::new("Order")
//!         .namespace("sales")
//!         .property(PropertyMeta::new("id", PropertyType::Guid).autoassigned())
//!         .property(PropertyMeta::new("total", PropertyType::Real))
//!         .keys(&["id"]),
//! );
//! let registry = Arc::new(registry);
//!
//! let repo = DataRepository::new(
//!     Arc::new(MemoryDataSource::new()),
//!     registry.clone(),
//!     Arc::new(MetaKeyProvider::new(registry)),
//! );
//! let orders = repo.get_list("sales.Order".into(), ListOptions::default()).await?;
//! # let _ = orders;
//! # Ok(())
//! # }
//! ```

pub mod cast;
pub mod changelog;
pub mod datasource;
pub mod error;
pub mod filter;
pub mod item;
pub mod keys;
pub mod memory;
pub mod meta;
pub mod repo;
pub mod value;

pub use cast::cast_value;
pub use changelog::{ChangeKind, ChangeLogger, ChangeRecord, MemoryChangeLogger};
pub use datasource::{DataSource, FetchResult};
pub use error::{BoxError, DataError, Result};
pub use filter::{DataQuery, Filter, ListOptions, SortDirection, SortSpec};
pub use item::{ClassRef, Item, ItemList};
pub use keys::{KeyProvider, MetaKeyProvider};
pub use memory::MemoryDataSource;
pub use meta::{ClassMeta, MetaRegistry, PropertyMeta, PropertyType, StaticMetaRegistry};
pub use repo::{DataRepository, RepositoryConfig};
pub use value::{record_from_json, Record, Value};

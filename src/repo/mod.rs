//! The item repository: CRUD façade over a storage backend and a metamodel.
//!
//! All reads go through the discriminator filter so that querying a base
//! class returns instances of the whole registered hierarchy out of the
//! root class's physical store. All writes route values through the type
//! caster and, for collection properties, the collection synchronizer.
//! Returned items are enriched to the requested nesting depth.
//!
//! Writes, peer-collection edits and change-log emission are independent
//! asynchronous steps. A failure partway leaves earlier steps applied;
//! callers get the documented error but no rollback happens here.

mod collections;
mod enrich;

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::changelog::{ChangeKind, ChangeLogger};
use crate::datasource::DataSource;
use crate::error::{DataError, Result};
use crate::filter::{DataQuery, Filter, ListOptions};
use crate::item::{ClassRef, Item, ItemList};
use crate::keys::KeyProvider;
use crate::meta::{ClassMeta, MetaRegistry, PropertyMeta, PropertyType};
use crate::value::{Record, Value};

/// Name of the stored discriminator field.
pub(crate) const CLASS_FIELD: &str = "_class";
/// Name of the stored metamodel-version field.
pub(crate) const CLASS_VER_FIELD: &str = "_classVer";

/// Repository tuning knobs.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Separator between namespace and class name in physical store names.
    pub namespace_separator: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            namespace_separator: "__".to_string(),
        }
    }
}

/// Metadata-driven repository of polymorphic items.
pub struct DataRepository {
    ds: Arc<dyn DataSource>,
    meta: Arc<dyn MetaRegistry>,
    keys: Arc<dyn KeyProvider>,
    config: RepositoryConfig,
}

/// Update set produced from caller data: the fields to write, plus
/// collection synchronizations that must wait for the owner id to exist.
struct UpdateSet {
    updates: Record,
    deferred: Vec<(PropertyMeta, Vec<Value>)>,
}

impl DataRepository {
    pub fn new(
        ds: Arc<dyn DataSource>,
        meta: Arc<dyn MetaRegistry>,
        keys: Arc<dyn KeyProvider>,
    ) -> Self {
        Self::with_config(ds, meta, keys, RepositoryConfig::default())
    }

    pub fn with_config(
        ds: Arc<dyn DataSource>,
        meta: Arc<dyn MetaRegistry>,
        keys: Arc<dyn KeyProvider>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            ds,
            meta,
            keys,
            config,
        }
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Physical store name of a class: `namespace<sep>name`, or the bare
    /// name without a namespace. Callers pass the hierarchy root.
    pub(crate) fn store_name(&self, cm: &ClassMeta) -> String {
        match cm.get_namespace() {
            Some(ns) => format!("{ns}{}{}", self.config.namespace_separator, cm.get_name()),
            None => cm.get_name().to_string(),
        }
    }

    pub(crate) fn registry(&self) -> &dyn MetaRegistry {
        self.meta.as_ref()
    }

    /// Resolve the class a read operation addresses.
    fn resolve_ref(&self, class: ClassRef<'_>) -> Result<Arc<ClassMeta>> {
        match class {
            ClassRef::Name(name) => self.resolve_class(name, None),
            ClassRef::Item(item) => Ok(item.class_meta().clone()),
        }
    }

    pub(crate) fn resolve_class(&self, name: &str, version: Option<&str>) -> Result<Arc<ClassMeta>> {
        self.meta
            .get_meta(name, version, None)
            .ok_or_else(|| DataError::ClassNotFound(name.to_string()))
    }

    /// Expand a filter to match the class and all registered descendants.
    /// Pure with respect to storage; only consults the registry.
    fn discriminator_filter(&self, filter: Option<Filter>, cm: &ClassMeta) -> Filter {
        let mut names: Vec<Value> = vec![Value::String(cm.canonical_name())];
        for descendant in self.meta.list_meta(
            cm.get_name(),
            Some(cm.get_version()),
            false,
            cm.get_namespace(),
        ) {
            names.push(Value::String(descendant.canonical_name()));
        }
        Filter::and(filter, Filter::In(CLASS_FIELD.to_string(), names))
    }

    /// When the caller addressed the operation through an item, narrow the
    /// filter to that item's identity via its key properties.
    fn identity_filter(filter: Option<Filter>, class: ClassRef<'_>) -> Option<Filter> {
        let ClassRef::Item(item) = class else {
            return filter;
        };
        let mut result = filter;
        for name in item.class_meta().key_properties() {
            if let Some(value) = item.get(name) {
                result = Some(Filter::and(result, Filter::Eq(name.clone(), value.clone())));
            }
        }
        result
    }

    /// Wrap a stored row into an item using the class named by the row's own
    /// discriminator fields. This is what makes heterogeneous polymorphic
    /// result sets work: each row resolves its exact class.
    pub(crate) fn wrap_row(&self, row: Record) -> Result<Item> {
        let class_name = row
            .get(CLASS_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| DataError::validation("stored row carries no _class discriminator"))?
            .to_string();
        let version = row.get(CLASS_VER_FIELD).and_then(Value::as_key);
        self.wrap(&class_name, row, version.as_deref())
    }

    fn wrap(&self, class_name: &str, row: Record, version: Option<&str>) -> Result<Item> {
        let acm = self
            .meta
            .get_meta(class_name, version, None)
            .ok_or_else(|| DataError::ClassNotFound(class_name.to_string()))?;
        let id = self
            .keys
            .form_key(acm.get_name(), &row, acm.get_namespace())
            .ok_or_else(|| {
                DataError::validation(format!(
                    "stored {class_name} row is missing its key properties"
                ))
            })?;
        Ok(Item::new(id, row, acm))
    }

    async fn emit(
        &self,
        logger: Option<&dyn ChangeLogger>,
        kind: ChangeKind,
        class_name: &str,
        item_id: &str,
        payload: &Record,
    ) -> Result<()> {
        if let Some(logger) = logger {
            logger
                .log_change(kind, class_name, item_id, payload)
                .await
                .map_err(|source| DataError::Logging { source })?;
        }
        Ok(())
    }

    /// Route caller data through the caster / collection synchronizer to
    /// build the update set. `owner_id` is absent on the create path, where
    /// id-dependent collection syncs are deferred until after the insert.
    async fn build_updates(
        &self,
        cm: &ClassMeta,
        data: Record,
        owner_id: Option<&str>,
    ) -> Result<UpdateSet> {
        let mut updates = Record::new();
        let mut deferred = Vec::new();

        for (name, value) in data {
            let Some(pm) = cm.property_meta(&name) else {
                // Unknown fields are dropped, not stored.
                debug!(class = %cm.canonical_name(), field = %name, "ignoring undeclared field");
                continue;
            };

            if pm.property_type == PropertyType::Collection && pm.items_class.is_some() {
                let membership = collection_membership(&name, value)?;
                match owner_id {
                    Some(id) => {
                        if let Some(resolved) =
                            self.sync_collection(cm, pm, membership, id).await?
                        {
                            updates.insert(name, resolved);
                        }
                    }
                    None => {
                        // The stored side of a many-to-many / plain array is
                        // known now; peer edits wait for the fresh id.
                        if let Some(stored) = self.collection_stored_value(cm, pm, &membership)? {
                            updates.insert(name.clone(), stored);
                        }
                        if self.collection_needs_owner(cm, pm)? {
                            deferred.push((pm.clone(), membership));
                        }
                    }
                }
            } else {
                let casted =
                    crate::cast::cast_value(value, pm, cm.get_namespace(), self.meta.as_ref())?;
                updates.insert(name, casted);
            }
        }

        Ok(UpdateSet { updates, deferred })
    }

    /// Generated and defaulted fields on the create path.
    fn apply_autoassignments(&self, cm: &ClassMeta, updates: &mut Record) -> Result<()> {
        for pm in cm.properties() {
            if pm.autoassigned {
                match pm.property_type {
                    PropertyType::Guid => {
                        updates.insert(pm.name.clone(), Value::String(Uuid::new_v4().to_string()));
                    }
                    PropertyType::DateTime => {
                        updates.insert(pm.name.clone(), Value::DateTime(Utc::now()));
                    }
                    PropertyType::Int => {
                        return Err(DataError::validation(format!(
                            "{}.{}: integer autoassignment (autoincrement) is not implemented",
                            cm.canonical_name(),
                            pm.name
                        )));
                    }
                    _ => {}
                }
            } else if let Some(default) = &pm.default_value {
                if updates.contains_key(&pm.name) {
                    continue;
                }
                match crate::cast::cast_value(
                    default.clone(),
                    pm,
                    cm.get_namespace(),
                    self.meta.as_ref(),
                ) {
                    Ok(value) => {
                        updates.insert(pm.name.clone(), value);
                    }
                    Err(err) => {
                        // Defaults are metamodel data, not caller input: a bad
                        // one must not fail the write, but it must be visible.
                        tracing::warn!(
                            class = %cm.canonical_name(),
                            property = %pm.name,
                            error = %err,
                            "skipping uncastable default value"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Run collection syncs that waited for the owner id to exist.
    async fn run_deferred(
        &self,
        cm: &ClassMeta,
        deferred: Vec<(PropertyMeta, Vec<Value>)>,
        owner_id: &str,
    ) -> Result<()> {
        for (pm, membership) in deferred {
            self.sync_collection(cm, &pm, membership, owner_id).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Read operations
    // ========================================================================

    /// Count items of a class (including registered descendants).
    pub async fn count(&self, class: ClassRef<'_>, filter: Option<Filter>) -> Result<u64> {
        let cm = self.resolve_ref(class)?;
        let rcm = cm.root();
        let filter = Self::identity_filter(filter, class);
        let filter = self.discriminator_filter(filter, &cm);
        debug!(class = %cm.canonical_name(), store = %self.store_name(rcm), "counting items");
        self.ds
            .count(&self.store_name(rcm), Some(&filter))
            .await
    }

    /// Fetch a page of items, each wrapped with its exact stored class and
    /// enriched to `options.nesting_depth`.
    pub async fn get_list(&self, class: ClassRef<'_>, options: ListOptions) -> Result<ItemList> {
        let cm = self.resolve_ref(class)?;
        let rcm = cm.root();
        let store = self.store_name(rcm);

        let filter = Self::identity_filter(options.filter.clone(), class);
        let filter = self.discriminator_filter(filter, &cm);
        let mut query = options.to_query();
        query.filter = Some(filter);

        debug!(class = %cm.canonical_name(), store = %store, depth = options.nesting_depth, "listing items");
        let fetched = self.ds.fetch(&store, &query).await?;

        let mut items = Vec::with_capacity(fetched.records.len());
        for row in fetched.records {
            items.push(self.wrap_row(row)?);
        }
        self.enrich(&mut items, options.nesting_depth).await?;

        Ok(ItemList {
            items,
            total: fetched.total,
        })
    }

    /// Fetch a single item: by key when `id` is given, else the first match
    /// for the class reference (narrowed to the item's identity when the
    /// caller passed an item).
    pub async fn get_item(
        &self,
        class: ClassRef<'_>,
        id: Option<&str>,
        nesting_depth: u32,
    ) -> Result<Option<Item>> {
        let cm = self.resolve_ref(class)?;
        let rcm = cm.root();
        let store = self.store_name(rcm);

        let row = match id {
            Some(id) => {
                let conditions =
                    self.keys
                        .key_to_conditions(rcm.get_name(), id, rcm.get_namespace())?;
                self.ds.get(&store, &conditions).await?
            }
            None => {
                let filter = Self::identity_filter(None, class);
                let filter = self.discriminator_filter(filter, &cm);
                let query = DataQuery {
                    filter: Some(filter),
                    count: Some(1),
                    ..DataQuery::default()
                };
                self.ds.fetch(&store, &query).await?.records.into_iter().next()
            }
        };

        let Some(row) = row else {
            return Ok(None);
        };
        let mut items = vec![self.wrap_row(row)?];
        self.enrich(&mut items, nesting_depth).await?;
        Ok(items.pop())
    }

    // ========================================================================
    // Write operations
    // ========================================================================

    /// Create an item. Collection fields are synchronized (peer edits run
    /// after the insert, once the id exists), autoassigned and defaulted
    /// properties are generated, and a CREATE event is emitted when a
    /// change logger is supplied.
    pub async fn create_item(
        &self,
        class_name: &str,
        data: Record,
        version: Option<&str>,
        logger: Option<&dyn ChangeLogger>,
        nesting_depth: Option<u32>,
    ) -> Result<Item> {
        let cm = self.resolve_class(class_name, version)?;
        let rcm = cm.root();
        let store = self.store_name(rcm);

        let UpdateSet {
            mut updates,
            deferred,
        } = self.build_updates(&cm, data, None).await?;
        self.apply_autoassignments(&cm, &mut updates)?;
        updates.insert(
            CLASS_FIELD.to_string(),
            Value::String(cm.canonical_name()),
        );
        updates.insert(
            CLASS_VER_FIELD.to_string(),
            Value::String(cm.get_version().to_string()),
        );

        debug!(class = %cm.canonical_name(), store = %store, "creating item");
        let row = self.ds.insert(&store, updates.clone()).await?;
        let mut item = self.wrap_row(row)?;

        self.run_deferred(&cm, deferred, item.id()).await?;
        self.emit(logger, ChangeKind::Create, &cm.canonical_name(), item.id(), &updates)
            .await?;

        self.enrich(std::slice::from_mut(&mut item), nesting_depth.unwrap_or(1))
            .await?;
        Ok(item)
    }

    /// Update an existing item by key.
    pub async fn edit_item(
        &self,
        class_name: &str,
        id: &str,
        data: Record,
        logger: Option<&dyn ChangeLogger>,
        nesting_depth: Option<u32>,
    ) -> Result<Item> {
        if id.is_empty() {
            return Err(DataError::validation("object identifier is required for edit"));
        }
        let cm = self.resolve_class(class_name, None)?;
        let rcm = cm.root();
        let store = self.store_name(rcm);

        let UpdateSet { updates, .. } = self.build_updates(&cm, data, Some(id)).await?;
        let conditions = self
            .keys
            .key_to_conditions(rcm.get_name(), id, rcm.get_namespace())?;

        debug!(class = %cm.canonical_name(), store = %store, id = %id, "editing item");
        let row = self.ds.update(&store, &conditions, updates.clone()).await?;
        let mut item = self.wrap_row(row)?;

        self.emit(logger, ChangeKind::Update, &cm.canonical_name(), item.id(), &updates)
            .await?;

        self.enrich(std::slice::from_mut(&mut item), nesting_depth.unwrap_or(1))
            .await?;
        Ok(item)
    }

    /// Upsert: update by key when `id` is given, otherwise derive the
    /// natural key from the update set itself.
    pub async fn save_item(
        &self,
        class_name: &str,
        id: Option<&str>,
        data: Record,
        version: Option<&str>,
        logger: Option<&dyn ChangeLogger>,
        nesting_depth: Option<u32>,
    ) -> Result<Item> {
        let cm = self.resolve_class(class_name, version)?;
        let rcm = cm.root();
        let store = self.store_name(rcm);

        let UpdateSet {
            mut updates,
            deferred,
        } = self.build_updates(&cm, data, id).await?;

        let conditions = match id {
            Some(id) => self
                .keys
                .key_to_conditions(rcm.get_name(), id, rcm.get_namespace())?,
            None => {
                let natural = self
                    .keys
                    .key_data(rcm.get_name(), &updates, rcm.get_namespace());
                if natural.is_empty() {
                    return Err(DataError::validation(format!(
                        "cannot derive a natural key for {class_name} from the supplied data"
                    )));
                }
                natural
            }
        };

        updates.insert(
            CLASS_FIELD.to_string(),
            Value::String(cm.canonical_name()),
        );
        updates.insert(
            CLASS_VER_FIELD.to_string(),
            Value::String(cm.get_version().to_string()),
        );

        debug!(class = %cm.canonical_name(), store = %store, "saving item");
        let row = self.ds.upsert(&store, &conditions, updates.clone()).await?;
        let mut item = self.wrap_row(row)?;

        self.run_deferred(&cm, deferred, item.id()).await?;
        self.emit(logger, ChangeKind::Update, &cm.canonical_name(), item.id(), &updates)
            .await?;

        self.enrich(std::slice::from_mut(&mut item), nesting_depth.unwrap_or(1))
            .await?;
        Ok(item)
    }

    /// Delete an item by key.
    pub async fn delete_item(
        &self,
        class_name: &str,
        id: &str,
        logger: Option<&dyn ChangeLogger>,
    ) -> Result<()> {
        let cm = self.resolve_class(class_name, None)?;
        let rcm = cm.root();
        let store = self.store_name(rcm);
        let conditions = self
            .keys
            .key_to_conditions(rcm.get_name(), id, rcm.get_namespace())?;

        debug!(class = %cm.canonical_name(), store = %store, id = %id, "deleting item");
        self.ds.delete(&store, &conditions).await?;
        self.emit(logger, ChangeKind::Delete, &cm.canonical_name(), id, &Record::new())
            .await
    }

    // ========================================================================
    // Detail associations (unordered master-detail links)
    // ========================================================================

    /// Append a detail to a master's named collection. Degrades to a single
    /// back-reference edit on the detail when the collection is derived.
    /// Already-present members are left untouched (no event).
    pub async fn put(
        &self,
        master: &Item,
        collection: &str,
        detail: &Item,
        logger: Option<&dyn ChangeLogger>,
    ) -> Result<()> {
        let pm = collection_property(master, collection)?;
        if let Some(back_ref) = pm.back_ref.clone() {
            let data: Record = [(back_ref, Value::String(master.id().to_string()))]
                .into_iter()
                .collect();
            self.edit_item(
                &detail.class_meta().canonical_name(),
                detail.id(),
                data,
                logger,
                Some(0),
            )
            .await?;
            return Ok(());
        }

        let mrcm = master.class_meta().root();
        let store = self.store_name(mrcm);
        let conditions =
            self.keys
                .key_to_conditions(mrcm.get_name(), master.id(), mrcm.get_namespace())?;
        let row = self.ds.get(&store, &conditions).await?.ok_or_else(|| {
            DataError::validation(format!("master {} no longer exists", master.id()))
        })?;

        let mut members = row
            .get(collection)
            .and_then(Value::as_array)
            .map(<[Value]>::to_vec)
            .unwrap_or_default();
        let detail_key = detail.id().to_string();
        if members.iter().any(|v| v.as_key().as_deref() == Some(detail_key.as_str())) {
            return Ok(());
        }
        members.push(Value::String(detail_key));

        let data: Record = [(collection.to_string(), Value::Array(members))]
            .into_iter()
            .collect();
        self.ds.update(&store, &conditions, data).await?;

        let payload = association_payload(collection, detail);
        self.emit(
            logger,
            ChangeKind::Put,
            &master.class_meta().canonical_name(),
            master.id(),
            &payload,
        )
        .await
    }

    /// Remove a detail from a master's named collection. Resolves without
    /// error (and without an event) when the detail was not a member.
    pub async fn eject(
        &self,
        master: &Item,
        collection: &str,
        detail: &Item,
        logger: Option<&dyn ChangeLogger>,
    ) -> Result<()> {
        let pm = collection_property(master, collection)?;
        if let Some(back_ref) = pm.back_ref.clone() {
            let data: Record = [(back_ref, Value::Null)].into_iter().collect();
            self.edit_item(
                &detail.class_meta().canonical_name(),
                detail.id(),
                data,
                logger,
                Some(0),
            )
            .await?;
            return Ok(());
        }

        let mrcm = master.class_meta().root();
        let store = self.store_name(mrcm);
        let conditions =
            self.keys
                .key_to_conditions(mrcm.get_name(), master.id(), mrcm.get_namespace())?;
        let Some(row) = self.ds.get(&store, &conditions).await? else {
            return Ok(());
        };

        let Some(members) = row.get(collection).and_then(Value::as_array) else {
            return Ok(());
        };
        let detail_key = detail.id();
        let remaining: Vec<Value> = members
            .iter()
            .filter(|v| v.as_key().as_deref() != Some(detail_key))
            .cloned()
            .collect();
        if remaining.len() == members.len() {
            return Ok(());
        }

        let data: Record = [(collection.to_string(), Value::Array(remaining))]
            .into_iter()
            .collect();
        self.ds.update(&store, &conditions, data).await?;

        let payload = association_payload(collection, detail);
        self.emit(
            logger,
            ChangeKind::Eject,
            &master.class_meta().canonical_name(),
            master.id(),
            &payload,
        )
        .await
    }

    /// List the details stored in a master's collection, applying the caller
    /// filter on top of the membership and enriching per the options.
    pub async fn get_associations_list(
        &self,
        master: &Item,
        collection: &str,
        options: ListOptions,
    ) -> Result<ItemList> {
        let Some((key_prop, ids, detail_cm)) =
            self.association_membership(master, collection).await?
        else {
            return Ok(ItemList::default());
        };

        let filter = Filter::and(options.filter.clone(), Filter::In(key_prop, ids));
        let mut narrowed = options;
        narrowed.filter = Some(filter);
        self.get_list(ClassRef::Name(&detail_cm.canonical_name()), narrowed)
            .await
    }

    /// Count the details stored in a master's collection.
    pub async fn get_associations_count(
        &self,
        master: &Item,
        collection: &str,
        filter: Option<Filter>,
    ) -> Result<u64> {
        let Some((key_prop, ids, detail_cm)) =
            self.association_membership(master, collection).await?
        else {
            return Ok(0);
        };

        let filter = Filter::and(filter, Filter::In(key_prop, ids));
        self.count(ClassRef::Name(&detail_cm.canonical_name()), Some(filter))
            .await
    }

    /// Shared read of a master's stored membership array: the detail root's
    /// key property name, the stored ids, and the detail class. `None` when
    /// the master row or the stored array is absent.
    async fn association_membership(
        &self,
        master: &Item,
        collection: &str,
    ) -> Result<Option<(String, Vec<Value>, Arc<ClassMeta>)>> {
        let pm = collection_property(master, collection)?;
        let items_class = pm.items_class.clone().ok_or_else(|| {
            DataError::validation(format!("collection {collection} declares no item class"))
        })?;
        let detail_cm = self
            .meta
            .get_meta(&items_class, None, master.class_meta().get_namespace())
            .ok_or_else(|| DataError::ClassNotFound(items_class.clone()))?;

        let mrcm = master.class_meta().root();
        let conditions =
            self.keys
                .key_to_conditions(mrcm.get_name(), master.id(), mrcm.get_namespace())?;
        let Some(row) = self.ds.get(&self.store_name(mrcm), &conditions).await? else {
            return Ok(None);
        };
        let Some(ids) = row.get(collection).and_then(Value::as_array) else {
            return Ok(None);
        };

        let key_prop = detail_cm
            .root()
            .key_property()
            .ok_or_else(|| {
                DataError::validation(format!("{items_class} declares no key property"))
            })?
            .to_string();
        Ok(Some((key_prop, ids.to_vec(), detail_cm)))
    }
}

/// Interpret a caller-supplied collection value as a membership id list.
fn collection_membership(name: &str, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(DataError::validation(format!(
            "{name}: collection value must be an array of ids, got {other:?}"
        ))),
    }
}

fn collection_property<'a>(master: &'a Item, collection: &str) -> Result<&'a PropertyMeta> {
    let pm = master
        .class_meta()
        .property_meta(collection)
        .ok_or_else(|| {
            DataError::validation(format!(
                "{} has no property {collection}",
                master.class_meta().canonical_name()
            ))
        })?;
    if pm.property_type != PropertyType::Collection {
        return Err(DataError::validation(format!(
            "{collection} is not a collection property"
        )));
    }
    Ok(pm)
}

fn association_payload(collection: &str, detail: &Item) -> Record {
    [
        (
            collection.to_string(),
            Value::String(detail.id().to_string()),
        ),
        (
            "_detailClass".to_string(),
            Value::String(detail.class_meta().canonical_name()),
        ),
    ]
    .into_iter()
    .collect()
}

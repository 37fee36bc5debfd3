//! Bidirectional collection synchronization on writes.
//!
//! A collection property value arriving in an update set is a membership id
//! list. What actually gets stored depends on how the property is declared:
//!
//! * back-reference collections store nothing on the owner; membership is
//!   reconciled by editing the back-reference field on the target items,
//! * many-to-many collections (declared via `back_coll`, or inferred from a
//!   mirror declaration on the peer class) store the array on the owner AND
//!   reconcile the mirror arrays on the peers,
//! * plain arrays are stored verbatim.
//!
//! Peer corrective edits go straight to the backend, keyed by the peer's
//! identity. Routing them through the write façade would re-enter collection
//! processing on the peer's mirror property and recurse. Edits of one
//! reconciliation run concurrently and are best-effort: a failure surfaces
//! to the caller, already-applied edits stay.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future;
use tracing::debug;

use crate::error::{DataError, Result};
use crate::filter::{Filter, ListOptions};
use crate::item::ClassRef;
use crate::meta::{ClassMeta, PropertyMeta, PropertyType};
use crate::value::{Record, Value};

use super::DataRepository;

/// Resolved synchronization strategy for one collection property.
pub(crate) enum CollectionStrategy {
    /// One-to-many: reconcile `field` on items of `target`.
    BackRef { target: Arc<ClassMeta>, field: String },
    /// Many-to-many: reconcile the `peer_attr` mirror array on `target`.
    Symmetric {
        target: Arc<ClassMeta>,
        peer_attr: String,
    },
    /// Stored verbatim on the owner, no peer side.
    Plain,
}

impl DataRepository {
    /// Classify a collection property. `back_ref` wins over `back_coll` when
    /// both are declared; without either, a symmetric link is inferred from a
    /// mirror collection on the target class pointing back at this property.
    pub(crate) fn collection_strategy(
        &self,
        cm: &ClassMeta,
        pm: &PropertyMeta,
    ) -> Result<CollectionStrategy> {
        let items_class = pm.items_class.as_deref().ok_or_else(|| {
            DataError::validation(format!("collection {} declares no item class", pm.name))
        })?;
        let target = self
            .registry()
            .get_meta(items_class, None, cm.get_namespace())
            .ok_or_else(|| DataError::ClassNotFound(items_class.to_string()))?;

        if let Some(field) = &pm.back_ref {
            return Ok(CollectionStrategy::BackRef {
                target,
                field: field.clone(),
            });
        }
        if let Some(peer_attr) = &pm.back_coll {
            return Ok(CollectionStrategy::Symmetric {
                target,
                peer_attr: peer_attr.clone(),
            });
        }

        let mirror = target
            .properties()
            .iter()
            .find(|peer| {
                peer.property_type == PropertyType::Collection
                    && peer
                        .items_class
                        .as_deref()
                        .is_some_and(|c| c == cm.get_name() || c == cm.canonical_name())
                    && peer.back_coll.as_deref() == Some(&pm.name)
            })
            .map(|peer| peer.name.clone());
        match mirror {
            Some(peer_attr) => Ok(CollectionStrategy::Symmetric { target, peer_attr }),
            None => Ok(CollectionStrategy::Plain),
        }
    }

    /// What goes into the owner's own record for this collection, if
    /// anything. Usable before the owner id exists.
    pub(crate) fn collection_stored_value(
        &self,
        cm: &ClassMeta,
        pm: &PropertyMeta,
        membership: &[Value],
    ) -> Result<Option<Value>> {
        match self.collection_strategy(cm, pm)? {
            CollectionStrategy::BackRef { .. } => Ok(None),
            CollectionStrategy::Symmetric { .. } | CollectionStrategy::Plain => {
                Ok(Some(Value::Array(membership.to_vec())))
            }
        }
    }

    /// Whether synchronizing this collection needs the owner id (and must be
    /// deferred on the create path until after the insert).
    pub(crate) fn collection_needs_owner(
        &self,
        cm: &ClassMeta,
        pm: &PropertyMeta,
    ) -> Result<bool> {
        Ok(!matches!(
            self.collection_strategy(cm, pm)?,
            CollectionStrategy::Plain
        ))
    }

    /// Reconcile a collection property to the supplied membership, returning
    /// the value to store on the owner (when there is one).
    pub(crate) async fn sync_collection(
        &self,
        cm: &ClassMeta,
        pm: &PropertyMeta,
        membership: Vec<Value>,
        owner_id: &str,
    ) -> Result<Option<Value>> {
        match self.collection_strategy(cm, pm)? {
            CollectionStrategy::BackRef { target, field } => {
                self.sync_back_ref(&target, &field, &membership, owner_id)
                    .await?;
                Ok(None)
            }
            CollectionStrategy::Symmetric { target, peer_attr } => {
                self.sync_symmetric(&target, &peer_attr, &membership, owner_id)
                    .await?;
                Ok(Some(Value::Array(membership)))
            }
            CollectionStrategy::Plain => Ok(Some(Value::Array(membership))),
        }
    }

    /// One-to-many reconciliation: clear the back-reference on current
    /// members that left, set it on new members.
    async fn sync_back_ref(
        &self,
        target: &ClassMeta,
        field: &str,
        membership: &[Value],
        owner_id: &str,
    ) -> Result<()> {
        let canonical = target.canonical_name();
        let current = self
            .get_list(
                ClassRef::Name(&canonical),
                ListOptions::filtered(Filter::Eq(
                    field.to_string(),
                    Value::String(owner_id.to_string()),
                )),
            )
            .await?;

        let member_keys: HashSet<String> = membership.iter().filter_map(Value::as_key).collect();
        let mut current_ids: HashSet<String> = HashSet::new();
        let mut edits = Vec::new();

        for peer in &current.items {
            current_ids.insert(peer.id().to_string());
            if !member_keys.contains(peer.id()) {
                edits.push(self.apply_peer_edit(
                    target,
                    peer.id().to_string(),
                    field.to_string(),
                    Value::Null,
                ));
            }
        }
        for key in &member_keys {
            if !current_ids.contains(key) {
                edits.push(self.apply_peer_edit(
                    target,
                    key.clone(),
                    field.to_string(),
                    Value::String(owner_id.to_string()),
                ));
            }
        }

        debug!(class = %canonical, field, edits = edits.len(), "reconciling back-reference collection");
        future::try_join_all(edits).await?;
        Ok(())
    }

    /// Many-to-many reconciliation via symmetric difference: remove the
    /// owner id from mirror arrays of peers that left, append it on peers
    /// that joined.
    async fn sync_symmetric(
        &self,
        target: &ClassMeta,
        peer_attr: &str,
        membership: &[Value],
        owner_id: &str,
    ) -> Result<()> {
        let canonical = target.canonical_name();
        let holders = self
            .get_list(
                ClassRef::Name(&canonical),
                ListOptions::filtered(Filter::Contains(
                    peer_attr.to_string(),
                    Value::String(owner_id.to_string()),
                )),
            )
            .await?;

        let member_keys: HashSet<String> = membership.iter().filter_map(Value::as_key).collect();
        let mut holder_ids: HashSet<String> = HashSet::new();
        let mut edits = Vec::new();

        for holder in &holders.items {
            holder_ids.insert(holder.id().to_string());
            if !member_keys.contains(holder.id()) {
                let remaining: Vec<Value> = holder
                    .get(peer_attr)
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter(|v| v.as_key().as_deref() != Some(owner_id))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                edits.push(self.apply_peer_edit(
                    target,
                    holder.id().to_string(),
                    peer_attr.to_string(),
                    Value::Array(remaining),
                ));
            }
        }

        let newcomer_keys: Vec<Value> = member_keys
            .iter()
            .filter(|key| !holder_ids.contains(*key))
            .map(|key| Value::String(key.clone()))
            .collect();
        if !newcomer_keys.is_empty() {
            let key_prop = target.key_property().ok_or_else(|| {
                DataError::validation(format!("{canonical} declares no key property"))
            })?;
            let joined = self
                .get_list(
                    ClassRef::Name(&canonical),
                    ListOptions::filtered(Filter::In(key_prop.to_string(), newcomer_keys)),
                )
                .await?;
            for peer in &joined.items {
                let mut mirror: Vec<Value> = peer
                    .get(peer_attr)
                    .and_then(Value::as_array)
                    .map(<[Value]>::to_vec)
                    .unwrap_or_default();
                mirror.push(Value::String(owner_id.to_string()));
                edits.push(self.apply_peer_edit(
                    target,
                    peer.id().to_string(),
                    peer_attr.to_string(),
                    Value::Array(mirror),
                ));
            }
        }

        debug!(class = %canonical, attr = peer_attr, edits = edits.len(), "reconciling symmetric collection");
        future::try_join_all(edits).await?;
        Ok(())
    }

    /// A single corrective edit on a peer record, keyed by its identity and
    /// applied directly at the backend.
    async fn apply_peer_edit(
        &self,
        target: &ClassMeta,
        peer_id: String,
        field: String,
        value: Value,
    ) -> Result<()> {
        let rcm = target.root();
        let store = self.store_name(rcm);
        let conditions =
            self.keys
                .key_to_conditions(rcm.get_name(), &peer_id, rcm.get_namespace())?;
        let data: Record = [(field, value)].into_iter().collect();
        self.ds.update(&store, &conditions, data).await?;
        Ok(())
    }
}

//! Graph enrichment: resolving REFERENCE and eager COLLECTION properties.
//!
//! Enrichment is planned per level, not per item. All items of one level are
//! scanned into slots keyed by (owner class, property); each slot turns into
//! exactly one batched list query, and the slot queries of a level run
//! concurrently. Each batch is itself fetched at depth - 1, so a depth-n
//! request issues at most one query per distinct (class, property) pair per
//! level regardless of how many items the level holds.

use std::collections::{HashMap, HashSet};

use futures::future::{self, BoxFuture};
use tracing::debug;

use crate::error::Result;
use crate::filter::{Filter, ListOptions};
use crate::item::{ClassRef, Item};
use crate::meta::PropertyType;
use crate::value::Value;

use super::DataRepository;

/// How a slot's batch maps back onto its source items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    /// Single object per source, looked up by the source's stored value.
    Reference,
    /// Members carry the owner's id in a back-reference field.
    BackRefCollection,
    /// The owner stores an ordered array of member ids.
    ArrayCollection,
}

/// One pending batch query: every value of one property across one owner
/// class, for one enrichment level.
#[derive(Debug)]
struct Slot {
    /// Canonical name of the class whose items feed this slot.
    owner_class: String,
    /// Property being resolved.
    attr: String,
    /// Canonical name of the class the batch is fetched from.
    target: String,
    /// Field the membership filter applies to: the target's key property,
    /// or the back-reference field for derived collections.
    filter_field: String,
    ids: Vec<Value>,
    kind: SlotKind,
}

impl Slot {
    fn filter(&self) -> Filter {
        Filter::In(self.filter_field.clone(), self.ids.clone())
    }
}

impl DataRepository {
    /// Scan one level of items into deduplicated batch slots.
    fn plan_slots(&self, items: &[Item]) -> Vec<Slot> {
        let mut slots: Vec<Slot> = Vec::new();
        let mut seen: Vec<HashSet<String>> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();

        let mut push_id =
            |slots: &mut Vec<Slot>, seen: &mut Vec<HashSet<String>>, slot: Slot, id: Value| {
                let key = (slot.owner_class.clone(), slot.attr.clone());
                let at = *index.entry(key).or_insert_with(|| {
                    slots.push(slot);
                    seen.push(HashSet::new());
                    slots.len() - 1
                });
                if let Some(form) = id.as_key() {
                    if seen[at].insert(form) {
                        slots[at].ids.push(id);
                    }
                }
            };

        for item in items {
            let cm = item.class_meta();
            let owner = cm.canonical_name();
            for pm in cm.properties() {
                match pm.property_type {
                    PropertyType::Reference => {
                        let Some(ref_class) = pm.ref_class.as_deref() else {
                            continue;
                        };
                        let Some(refc) =
                            self.registry().get_meta(ref_class, None, cm.get_namespace())
                        else {
                            continue;
                        };
                        let Some(key_prop) = refc.key_property() else {
                            continue;
                        };
                        let Some(value) = item.get(&pm.name).filter(|v| !v.is_null()) else {
                            continue;
                        };
                        push_id(
                            &mut slots,
                            &mut seen,
                            Slot {
                                owner_class: owner.clone(),
                                attr: pm.name.clone(),
                                target: refc.canonical_name(),
                                filter_field: key_prop.to_string(),
                                ids: Vec::new(),
                                kind: SlotKind::Reference,
                            },
                            value.clone(),
                        );
                    }
                    PropertyType::Collection if pm.eager_loading => {
                        let Some(items_class) = pm.items_class.as_deref() else {
                            continue;
                        };
                        let Some(refc) =
                            self.registry().get_meta(items_class, None, cm.get_namespace())
                        else {
                            continue;
                        };
                        if let (Some(back_ref), None) = (&pm.back_ref, &pm.back_coll) {
                            push_id(
                                &mut slots,
                                &mut seen,
                                Slot {
                                    owner_class: owner.clone(),
                                    attr: pm.name.clone(),
                                    target: refc.canonical_name(),
                                    filter_field: back_ref.clone(),
                                    ids: Vec::new(),
                                    kind: SlotKind::BackRefCollection,
                                },
                                Value::String(item.id().to_string()),
                            );
                        } else {
                            let Some(key_prop) = refc.key_property() else {
                                continue;
                            };
                            let Some(members) = item.get(&pm.name).and_then(Value::as_array)
                            else {
                                continue;
                            };
                            for member in members {
                                push_id(
                                    &mut slots,
                                    &mut seen,
                                    Slot {
                                        owner_class: owner.clone(),
                                        attr: pm.name.clone(),
                                        target: refc.canonical_name(),
                                        filter_field: key_prop.to_string(),
                                        ids: Vec::new(),
                                        kind: SlotKind::ArrayCollection,
                                    },
                                    member.clone(),
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        // A slot with no collected ids has nothing to fetch.
        let mut result: Vec<Slot> = Vec::new();
        for slot in slots {
            if !slot.ids.is_empty() {
                result.push(slot);
            }
        }
        result
    }

    /// Resolve one enrichment level for `items`, recursing into fetched
    /// batches at `depth - 1`. Depth 0 is a terminal no-op: no planning, no
    /// queries. Boxed because it is mutually recursive with `get_list`.
    pub(crate) fn enrich<'a>(
        &'a self,
        items: &'a mut [Item],
        depth: u32,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if depth == 0 || items.is_empty() {
                return Ok(());
            }
            let slots = self.plan_slots(items);
            if slots.is_empty() {
                return Ok(());
            }
            debug!(slots = slots.len(), depth, "resolving enrichment level");

            let fetches = slots.iter().map(|slot| {
                self.get_list(
                    ClassRef::Name(&slot.target),
                    ListOptions::filtered(slot.filter()).with_depth(depth - 1),
                )
            });
            let batches = future::try_join_all(fetches).await?;

            for (slot, batch) in slots.iter().zip(batches) {
                // Nothing matched anywhere; the slot's sources stay bare.
                if batch.items.is_empty() {
                    continue;
                }
                match slot.kind {
                    SlotKind::Reference => attach_references(items, slot, batch.items),
                    SlotKind::BackRefCollection => {
                        attach_back_ref_collections(items, slot, batch.items)
                    }
                    SlotKind::ArrayCollection => attach_array_collections(items, slot, batch.items),
                }
            }
            Ok(())
        })
    }
}

fn owns_slot(item: &Item, slot: &Slot) -> bool {
    item.class_meta().canonical_name() == slot.owner_class
}

/// Attach single objects: batch indexed by item id, sources looked up by the
/// canonical key form of their stored value. Dangling references simply stay
/// absent.
fn attach_references(items: &mut [Item], slot: &Slot, batch: Vec<Item>) {
    let by_id: HashMap<String, Item> = batch
        .into_iter()
        .map(|item| (item.id().to_string(), item))
        .collect();
    for item in items.iter_mut() {
        if !owns_slot(item, slot) {
            continue;
        }
        let Some(key) = item.get(&slot.attr).and_then(Value::as_key) else {
            continue;
        };
        if let Some(target) = by_id.get(&key) {
            item.set_reference(&slot.attr, target.clone());
        }
    }
}

/// Attach derived collections: batch grouped by the back-reference value.
/// Sources with no group get an explicit empty collection, distinguishing
/// "resolved to nothing" from "never enriched".
fn attach_back_ref_collections(items: &mut [Item], slot: &Slot, batch: Vec<Item>) {
    let mut groups: HashMap<String, Vec<Item>> = HashMap::new();
    for member in batch {
        let Some(key) = member.get(&slot.filter_field).and_then(Value::as_key) else {
            continue;
        };
        groups.entry(key).or_default().push(member);
    }
    for item in items.iter_mut() {
        if !owns_slot(item, slot) {
            continue;
        }
        let members = groups.remove(item.id()).unwrap_or_default();
        item.set_collection(&slot.attr, members);
    }
}

/// Attach stored-array collections, preserving each source's id order.
fn attach_array_collections(items: &mut [Item], slot: &Slot, batch: Vec<Item>) {
    let by_id: HashMap<String, Item> = batch
        .into_iter()
        .map(|item| (item.id().to_string(), item))
        .collect();
    for item in items.iter_mut() {
        if !owns_slot(item, slot) {
            continue;
        }
        let keys: Vec<String> = match item.get(&slot.attr).and_then(Value::as_array) {
            Some(stored) => stored.iter().filter_map(Value::as_key).collect(),
            None => continue,
        };
        let members: Vec<Item> = keys
            .iter()
            .filter_map(|key| by_id.get(key).cloned())
            .collect();
        item.set_collection(&slot.attr, members);
    }
}

//! Bundle store
//!
//! An arena of bundles keyed by stable [`BundleId`]s.
//!
//! # Design
//!
//! - DashMap of `Arc<BundleEntry>`: lookups clone the `Arc` out of the shard,
//!   so no shard guard is held while hooks run
//! - Each entry guards its strands with its own `RwLock`; unrelated bundles
//!   never contend
//! - Ownership is a tree: a `bundleptr` value owns its target, and the target
//!   records a non-owning [`Container`] back-reference
//! - Operations that move ownership serialise on one store-wide mutex so the
//!   cycle check and the reparent commit are atomic
//! - Destroyed bundles leave the arena and become zombies; later access fails
//!   with [`Error::Zombie`]

mod handle;
mod keyed;
mod snapshot;

pub use handle::{BundleBuilder, BundleGuard, BundleHandle};

use crate::registry::BlueprintRegistry;
use dashmap::DashMap;
use nirva_concurrency::RefCounter;
use nirva_core::{
    short_name, Blueprint, BundleId, Error, HookId, ObjectState, Result, Strand, StrandDef,
    StrandType, StrandValue, Uid,
};
use nirva_hooks::{HookDispatcher, HookEvent, HookPayload, RetryPolicy};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Owner of a bundle: the bundle and strand holding the owning pointer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Container {
    /// Owning bundle
    pub bundle: BundleId,
    /// Strand holding the pointer
    pub strand: String,
}

pub(crate) struct BundleEntry {
    pub(crate) id: BundleId,
    pub(crate) uid: Uid,
    pub(crate) blueprint: Arc<Blueprint>,
    pub(crate) data: RwLock<BundleData>,
    pub(crate) hooks: Arc<HookDispatcher>,
    refs: RefCounter,
}

#[derive(Clone, Default)]
pub(crate) struct BundleData {
    pub(crate) strands: FxHashMap<String, Strand>,
    pub(crate) order: Vec<String>,
    pub(crate) container: Option<Container>,
    written: FxHashSet<String>,
}

impl BundleData {
    fn insert(&mut self, key: String, strand: Strand) {
        if self.strands.insert(key.clone(), strand).is_none() {
            self.order.push(key);
        }
    }

    fn delete(&mut self, key: &str) -> Option<Strand> {
        let strand = self.strands.remove(key)?;
        self.order.retain(|k| k != key);
        self.written.remove(key);
        Some(strand)
    }

    fn owned_children(&self) -> Vec<BundleId> {
        self.strands.values().flat_map(|s| owned_in(s.values())).collect()
    }
}

fn owned_in(values: &[StrandValue]) -> impl Iterator<Item = BundleId> + '_ {
    values.iter().filter_map(|v| match v {
        StrandValue::BundlePtr(Some(id)) => Some(*id),
        _ => None,
    })
}

fn strip_value(strand: &mut Strand, target: &StrandValue) {
    let positions: Vec<usize> = strand
        .values()
        .iter()
        .enumerate()
        .filter(|(_, v)| *v == target)
        .map(|(i, _)| i)
        .collect();
    for i in positions.into_iter().rev() {
        strand.remove(i);
    }
}

/// A strand mutation
#[derive(Debug, Clone)]
pub(crate) enum Edit {
    Replace(Vec<StrandValue>),
    SetItem(usize, StrandValue),
    Append(StrandValue),
    Remove(usize),
    Clear,
}

impl Edit {
    fn incoming(&self) -> &[StrandValue] {
        match self {
            Edit::Replace(v) => v,
            Edit::SetItem(_, v) | Edit::Append(v) => std::slice::from_ref(v),
            Edit::Remove(_) | Edit::Clear => &[],
        }
    }

    fn apply(&self, name: &str, strand: &mut Strand) -> Result<Option<StrandValue>> {
        match self {
            Edit::Replace(values) => strand.set_values(name, values.clone()).map(|_| None),
            Edit::SetItem(idx, value) => {
                if *idx >= strand.len() {
                    return Err(index_error(name, *idx));
                }
                let mut values = strand.values().to_vec();
                let old = std::mem::replace(&mut values[*idx], value.clone());
                strand.set_values(name, values)?;
                Ok(Some(old))
            }
            Edit::Append(value) => strand.push(name, value.clone()).map(|_| None),
            Edit::Remove(idx) => strand
                .remove(*idx)
                .map(Some)
                .ok_or_else(|| index_error(name, *idx)),
            Edit::Clear => {
                strand.clear();
                Ok(None)
            }
        }
    }

    fn hooks(&self) -> (HookId, HookId) {
        match self {
            Edit::Replace(_) | Edit::SetItem(..) => (HookId::UPDATING_VALUE, HookId::VALUE_UPDATED),
            Edit::Append(_) => (HookId::APPENDING_ITEM, HookId::ITEM_APPENDED),
            Edit::Remove(_) => (HookId::REMOVING_ITEM, HookId::ITEM_REMOVED),
            Edit::Clear => (HookId::CLEARING_ITEMS, HookId::ITEMS_CLEARED),
        }
    }

    fn creates(&self) -> bool {
        matches!(self, Edit::Replace(_) | Edit::Append(_))
    }
}

enum Attempt {
    Done(Option<StrandValue>),
    // the strand moved between planning and commit
    Stale,
}

fn index_error(name: &str, idx: usize) -> Error {
    Error::not_found(format!("index {} of strand '{}'", idx, name))
}

/// Arena of live bundles
pub struct BundleStore {
    entries: DashMap<BundleId, Arc<BundleEntry>>,
    next_id: AtomicU64,
    registry: Arc<BlueprintRegistry>,
    structure_app: RwLock<Option<BundleId>>,
    ownership: Mutex<()>,
    strict_ownership: bool,
    retry: RetryPolicy,
}

impl BundleStore {
    /// Empty store resolving bundle types through `registry`
    pub fn new(registry: Arc<BlueprintRegistry>) -> Self {
        Self::with_options(registry, true, RetryPolicy::default())
    }

    /// Store with explicit ownership and hook retry settings
    pub fn with_options(
        registry: Arc<BlueprintRegistry>,
        strict_ownership: bool,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            registry,
            structure_app: RwLock::new(None),
            ownership: Mutex::new(()),
            strict_ownership,
            retry,
        }
    }

    /// Registry this store creates bundles from
    pub fn registry(&self) -> &Arc<BlueprintRegistry> {
        &self.registry
    }

    /// Number of live bundles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no bundle is live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn live(&self, id: BundleId) -> Result<Arc<BundleEntry>> {
        if let Some(e) = self.entries.get(&id) {
            return Ok(Arc::clone(e.value()));
        }
        if self.retired(id) {
            return Err(Error::Zombie(id.0));
        }
        Err(Error::not_found(format!("bundle {}", id)))
    }

    // Ids are never reused, so any issued id that is no longer live was
    // destroyed. No per-zombie record is kept.
    fn retired(&self, id: BundleId) -> bool {
        id.0 != 0 && id.0 < self.next_id.load(Ordering::Acquire)
    }

    /// Lifecycle state: NORMAL, ZOMBIE, or UNDEFINED for unknown ids
    pub fn state(&self, id: BundleId) -> ObjectState {
        if self.entries.contains_key(&id) {
            ObjectState::Normal
        } else if self.retired(id) {
            ObjectState::Zombie
        } else {
            ObjectState::Undefined
        }
    }

    /// True if the bundle is live
    pub fn contains(&self, id: BundleId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Unique id of a live bundle
    pub fn uid(&self, id: BundleId) -> Result<Uid> {
        Ok(self.live(id)?.uid)
    }

    /// Bundle type of a live bundle
    pub fn bundle_type(&self, id: BundleId) -> Result<String> {
        Ok(self.live(id)?.blueprint.bundle_type().to_string())
    }

    /// Blueprint of a live bundle
    pub fn blueprint(&self, id: BundleId) -> Result<Arc<Blueprint>> {
        Ok(Arc::clone(&self.live(id)?.blueprint))
    }

    /// Hook dispatcher of a live bundle
    pub fn hooks(&self, id: BundleId) -> Result<Arc<HookDispatcher>> {
        Ok(Arc::clone(&self.live(id)?.hooks))
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a bundle holding its blueprint's mandatory strands
    ///
    /// # Errors
    ///
    /// `Schema` if the bundle type is not registered.
    pub fn create(&self, bundle_type: &str) -> Result<BundleId> {
        self.create_with(bundle_type, Vec::new())
    }

    /// Create a bundle and set the supplied strands
    ///
    /// Mandatory strands start from their defaults; each `(name, values)`
    /// pair is then written as by [`set_array`](Self::set_array). If any
    /// write fails the bundle is destroyed and the error returned.
    pub fn create_with(
        &self,
        bundle_type: &str,
        strands: Vec<(String, Vec<StrandValue>)>,
    ) -> Result<BundleId> {
        let blueprint = self.registry.get(bundle_type).ok_or_else(|| {
            Error::schema(format!("no blueprint registered for {}", bundle_type))
        })?;
        let mut data = BundleData::default();
        for def in blueprint.mandatory() {
            data.insert(def.short_name.clone(), def.new_strand()?);
        }
        let id = BundleId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let uid = Uid::new();
        let entry = Arc::new(BundleEntry {
            id,
            uid,
            blueprint,
            data: RwLock::new(data),
            hooks: Arc::new(HookDispatcher::with_retry(uid, self.retry)),
            refs: RefCounter::new(),
        });
        self.entries.insert(id, Arc::clone(&entry));

        for (name, values) in strands {
            if let Err(e) = self.edit(id, &name, Edit::Replace(values)) {
                self.destroy(entry);
                return Err(e);
            }
        }
        debug!(target: "nirva::bundle", id = %id, uid = %uid, bundle_type = %bundle_type, "created bundle");
        entry
            .hooks
            .trigger_spontaneous(&HookEvent::new(HookId::OBJECT_CREATED, uid));
        Ok(id)
    }

    /// Start a typed construction of a bundle
    pub fn build(&self, bundle_type: impl Into<String>) -> BundleBuilder<'_> {
        BundleBuilder::new(self, bundle_type.into())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// True if the strand is present
    pub fn has_strand(&self, id: BundleId, strand: &str) -> Result<bool> {
        let entry = self.live(id)?;
        let key = short_name(strand);
        let present = entry.data.read().strands.contains_key(&key);
        Ok(present)
    }

    /// Names of the strands present, in the order they were added
    pub fn list_strands(&self, id: BundleId) -> Result<Vec<String>> {
        let entry = self.live(id)?;
        let names = entry.data.read().order.clone();
        Ok(names)
    }

    fn read_strand<T>(&self, id: BundleId, strand: &str, f: impl FnOnce(&Strand) -> T) -> Result<T> {
        let entry = self.live(id)?;
        let key = short_name(strand);
        let data = entry.data.read();
        data.strands
            .get(&key)
            .map(f)
            .ok_or_else(|| Error::not_found(format!("strand '{}' in bundle {}", strand, id)))
    }

    /// All elements of a strand
    pub fn get_array(&self, id: BundleId, strand: &str) -> Result<Vec<StrandValue>> {
        self.read_strand(id, strand, |s| s.values().to_vec())
    }

    /// First element of a strand
    pub fn get_value(&self, id: BundleId, strand: &str) -> Result<StrandValue> {
        self.read_strand(id, strand, |s| s.first().cloned())?
            .ok_or_else(|| Error::not_found(format!("value of empty strand '{}'", strand)))
    }

    /// Element `idx` of a strand
    pub fn array_get(&self, id: BundleId, strand: &str, idx: usize) -> Result<StrandValue> {
        self.read_strand(id, strand, |s| s.get(idx).cloned())?
            .ok_or_else(|| index_error(strand, idx))
    }

    /// Number of elements in a strand
    pub fn array_get_size(&self, id: BundleId, strand: &str) -> Result<usize> {
        self.read_strand(id, strand, |s| s.len())
    }

    /// Effective type of a strand
    pub fn strand_type(&self, id: BundleId, strand: &str) -> Result<StrandType> {
        self.read_strand(id, strand, |s| s.effective_type())
    }

    /// True if the strand holds an array
    pub fn is_array(&self, id: BundleId, strand: &str) -> Result<bool> {
        self.read_strand(id, strand, |s| s.is_array())
    }

    /// Owner of a bundle; `None` for roots
    pub fn container_of(&self, id: BundleId) -> Result<Option<Container>> {
        let entry = self.live(id)?;
        let container = entry.data.read().container.clone();
        Ok(container)
    }

    /// Follow container links up to the root
    pub fn root_of(&self, id: BundleId) -> Result<BundleId> {
        let mut current = id;
        for _ in 0..=self.entries.len() {
            match self.container_of(current)? {
                Some(c) => current = c.bundle,
                None => return Ok(current),
            }
        }
        Err(Error::Ownership(format!("container chain of {} does not terminate", id)))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Replace the contents of a strand, creating it if the blueprint allows
    ///
    /// # Errors
    ///
    /// - `WrongType` if a value does not match the strand's type
    /// - `NotOwner` if an owning pointer is written to a `const-bundleptr` strand
    /// - `Ownership` if the write would create a cycle
    /// - `ReadOnly` if a read-only strand was already written
    /// - `Vetoed` if a before-hook refused the change
    ///
    /// The strand is unchanged on error.
    pub fn set_array(&self, id: BundleId, strand: &str, values: Vec<StrandValue>) -> Result<()> {
        self.edit(id, strand, Edit::Replace(values)).map(|_| ())
    }

    /// Set a scalar value
    pub fn set_value(&self, id: BundleId, strand: &str, value: impl Into<StrandValue>) -> Result<()> {
        self.edit(id, strand, Edit::Replace(vec![value.into()]))
            .map(|_| ())
    }

    /// Replace element `idx` of a strand
    pub fn array_set(&self, id: BundleId, strand: &str, idx: usize, value: StrandValue) -> Result<()> {
        self.edit(id, strand, Edit::SetItem(idx, value)).map(|_| ())
    }

    /// Append one element, creating the strand if the blueprint allows
    pub fn array_append(&self, id: BundleId, strand: &str, value: StrandValue) -> Result<()> {
        self.edit(id, strand, Edit::Append(value)).map(|_| ())
    }

    /// Remove and return element `idx`
    ///
    /// An owned bundle removed this way loses its owner and is unreferenced.
    pub fn array_remove(&self, id: BundleId, strand: &str, idx: usize) -> Result<StrandValue> {
        self.edit(id, strand, Edit::Remove(idx))?
            .ok_or_else(|| Error::internal("remove returned no element"))
    }

    /// Remove every element, keeping the strand and its type
    pub fn array_clear(&self, id: BundleId, strand: &str) -> Result<()> {
        self.edit(id, strand, Edit::Clear).map(|_| ())
    }

    /// Delete a strand
    ///
    /// # Errors
    ///
    /// `InvalidInput` for mandatory strands, `NotFound` if absent.
    pub fn strand_delete(&self, id: BundleId, strand: &str) -> Result<()> {
        let entry = self.live(id)?;
        let key = short_name(strand);
        if entry.blueprint.get(&key).is_some_and(|d| !d.optional) {
            return Err(Error::invalid_input(format!(
                "mandatory strand '{}' cannot be deleted",
                strand
            )));
        }
        if !entry.data.read().strands.contains_key(&key) {
            return Err(Error::not_found(format!("strand '{}' in bundle {}", strand, id)));
        }
        let payload = HookPayload::StrandChange { strand: key.clone() };
        entry.hooks.trigger_data_before(
            &HookEvent::new(HookId::DELETING_STRAND, entry.uid).with_payload(payload.clone()),
        )?;

        let released = {
            let _own = self.ownership.lock();
            let removed = entry.data.write().delete(&key);
            let released: Vec<BundleId> = removed
                .map(|s| owned_in(s.values()).collect())
                .unwrap_or_default();
            for child in &released {
                self.detach(*child, id);
            }
            released
        };
        entry.hooks.trigger_data_after(
            &HookEvent::new(HookId::STRAND_DELETED, entry.uid).with_payload(payload),
        );
        self.release(released);
        Ok(())
    }

    fn def_for(&self, entry: &BundleEntry, key: &str) -> Result<StrandDef> {
        if let Some(def) = entry.blueprint.get(key) {
            return Ok(def.clone());
        }
        match entry.blueprint.template() {
            Some(t) => {
                let mut def = t.clone();
                def.name = key.to_string();
                def.short_name = key.to_string();
                def.optional = true;
                Ok(def)
            }
            None => Err(Error::schema(format!(
                "{} has no strand '{}'",
                entry.blueprint.bundle_type(),
                key
            ))),
        }
    }

    /// Apply an edit with hooks and ownership bookkeeping
    ///
    /// Returns the element displaced by `SetItem` or `Remove`.
    pub(crate) fn edit(&self, id: BundleId, strand: &str, edit: Edit) -> Result<Option<StrandValue>> {
        for attempt in 0..=self.retry.limit {
            match self.edit_once(id, strand, &edit)? {
                Attempt::Done(displaced) => return Ok(displaced),
                Attempt::Stale => {
                    debug!(target: "nirva::bundle", bundle = %id, strand, attempt, "strand changed before commit, replanning")
                }
            }
        }
        Err(Error::Internal(format!(
            "strand '{}' of {} kept changing during the edit",
            short_name(strand),
            id
        )))
    }

    fn edit_once(&self, id: BundleId, strand: &str, edit: &Edit) -> Result<Attempt> {
        let entry = self.live(id)?;
        let key = short_name(strand);

        // Plan against a copy; nothing is committed until the hooks agree.
        let readonly = entry.blueprint.get(&key).is_some_and(|d| d.readonly);
        let (is_new, old, planned) = {
            let data = entry.data.read();
            let existing = data.strands.get(&key).cloned();
            if readonly && data.written.contains(&key) {
                return Err(Error::ReadOnly(key));
            }
            let is_new = existing.is_none();
            let mut strand = match existing {
                Some(s) => s,
                None if edit.creates() => self.def_for(&entry, &key)?.new_strand()?,
                None => return Err(Error::not_found(format!("strand '{}' in bundle {}", key, id))),
            };
            if strand.effective_type() == StrandType::ConstBundlePtr
                && edit
                    .incoming()
                    .iter()
                    .any(|v| matches!(v, StrandValue::BundlePtr(_)))
            {
                return Err(Error::NotOwner(format!(
                    "strand '{}' of {} holds const pointers",
                    key, id
                )));
            }
            let old = strand.values().to_vec();
            edit.apply(&key, &mut strand)?;
            (is_new, old, strand.values().to_vec())
        };

        let old_owned: FxHashSet<BundleId> = owned_in(&old).collect();
        let new_owned: FxHashSet<BundleId> = owned_in(&planned).collect();
        let adopted: Vec<BundleId> = new_owned.difference(&old_owned).copied().collect();
        for child in &adopted {
            self.check_adoption(id, &key, *child, true)?;
        }

        if is_new {
            entry.hooks.trigger_data_before(
                &HookEvent::new(HookId::ADDING_STRAND, entry.uid)
                    .with_payload(HookPayload::StrandChange { strand: key.clone() }),
            )?;
        }
        let (before, after) = edit.hooks();
        let before_payload = match edit {
            Edit::Append(v) => HookPayload::ItemChange {
                strand: key.clone(),
                index: old.len(),
                value: Some(v.clone()),
            },
            Edit::Remove(idx) => HookPayload::ItemChange {
                strand: key.clone(),
                index: *idx,
                value: old.get(*idx).cloned(),
            },
            Edit::Clear => HookPayload::StrandChange { strand: key.clone() },
            Edit::Replace(_) | Edit::SetItem(..) => HookPayload::ValueChange {
                strand: key.clone(),
                old: old.clone(),
                new: planned.clone(),
            },
        };
        entry
            .hooks
            .trigger_data_before(&HookEvent::new(before, entry.uid).with_payload(before_payload.clone()))?;

        let (displaced, committed, released) = {
            let _own = (!adopted.is_empty() || !old_owned.is_empty()).then(|| self.ownership.lock());
            for child in &adopted {
                self.check_adoption(id, &key, *child, false)?;
            }
            let (displaced, committed) = {
                let mut data = entry.data.write();
                // Hooks approved the planned change; recheck what they saw.
                if readonly && data.written.contains(&key) {
                    return Err(Error::ReadOnly(key));
                }
                let stale = match data.strands.get(&key) {
                    Some(s) => is_new || s.values() != old.as_slice(),
                    None => !is_new,
                };
                if stale {
                    return Ok(Attempt::Stale);
                }
                let mut strand = match data.strands.get(&key) {
                    Some(s) => s.clone(),
                    None => self.def_for(&entry, &key)?.new_strand()?,
                };
                let displaced = edit.apply(&key, &mut strand)?;
                let committed = strand.values().to_vec();
                data.insert(key.clone(), strand);
                data.written.insert(key.clone());
                (displaced, committed)
            };
            let now_owned: FxHashSet<BundleId> = owned_in(&committed).collect();
            for child in now_owned.difference(&old_owned) {
                self.adopt(*child, id, &key);
            }
            let released: Vec<BundleId> = old_owned.difference(&now_owned).copied().collect();
            for child in &released {
                self.detach(*child, id);
            }
            (displaced, committed, released)
        };

        if is_new {
            entry.hooks.trigger_data_after(
                &HookEvent::new(HookId::STRAND_ADDED, entry.uid)
                    .with_payload(HookPayload::StrandChange { strand: key.clone() }),
            );
        }
        let after_payload = match before_payload {
            HookPayload::ValueChange { strand, old, .. } => HookPayload::ValueChange {
                strand,
                old,
                new: committed,
            },
            other => other,
        };
        entry
            .hooks
            .trigger_data_after(&HookEvent::new(after, entry.uid).with_payload(after_payload));
        self.release(released);
        Ok(Attempt::Done(displaced))
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    fn is_ancestor_or_self(&self, candidate: BundleId, of: BundleId) -> bool {
        let mut current = Some(of);
        let mut steps = 0usize;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            steps += 1;
            if steps > self.entries.len() {
                return true;
            }
            current = self
                .entries
                .get(&id)
                .and_then(|e| e.value().data.read().container.as_ref().map(|c| c.bundle));
        }
        false
    }

    fn check_adoption(
        &self,
        owner: BundleId,
        strand: &str,
        child: BundleId,
        ask_transfer: bool,
    ) -> Result<()> {
        let child_entry = self.live(child)?;
        if self.is_ancestor_or_self(child, owner) {
            warn!(target: "nirva::bundle", owner = %owner, child = %child, "ownership cycle refused");
            return Err(Error::Ownership(format!(
                "{} cannot own {}: it is {} ancestor",
                owner,
                child,
                if child == owner { "its own" } else { "an" }
            )));
        }
        let current = child_entry.data.read().container.clone();
        if let Some(c) = current {
            if c.bundle == owner {
                return Ok(());
            }
            if self.strict_ownership && self.structure_app().is_some() {
                return Err(Error::Ownership(format!(
                    "{} is owned by {} and cannot move to {}",
                    child, c.bundle, owner
                )));
            }
            if !ask_transfer {
                return Ok(());
            }
            let granted = child_entry.hooks.trigger_request(
                &HookEvent::new(HookId::TRANSFER_REQUEST, child_entry.uid).with_payload(
                    HookPayload::Request {
                        requester: None,
                        detail: format!("{}:{}", owner, strand),
                    },
                ),
            );
            if !granted.is_yes() {
                return Err(Error::Ownership(format!("transfer of {} refused", child)));
            }
        }
        Ok(())
    }

    // Caller holds the ownership lock
    fn adopt(&self, child: BundleId, owner: BundleId, strand: &str) {
        let Ok(child_entry) = self.live(child) else {
            return;
        };
        let previous = child_entry.data.write().container.replace(Container {
            bundle: owner,
            strand: strand.to_string(),
        });
        if let Some(prev) = previous {
            if prev.bundle != owner || prev.strand != strand {
                if let Ok(old_owner) = self.live(prev.bundle) {
                    if let Some(s) = old_owner.data.write().strands.get_mut(&prev.strand) {
                        strip_value(s, &StrandValue::BundlePtr(Some(child)));
                    }
                }
                debug!(target: "nirva::bundle", child = %child, from = %prev.bundle, to = %owner, "reparented bundle");
            }
        }
    }

    // Caller holds the ownership lock
    fn detach(&self, child: BundleId, owner: BundleId) {
        if let Ok(child_entry) = self.live(child) {
            let mut data = child_entry.data.write();
            if data.container.as_ref().is_some_and(|c| c.bundle == owner) {
                data.container = None;
            }
        }
    }

    fn release(&self, children: Vec<BundleId>) {
        for child in children {
            if let Err(e) = self.unref_bundle(child) {
                debug!(target: "nirva::bundle", child = %child, error = %e, "released child already gone");
            }
        }
    }

    /// Declare the structure root
    ///
    /// Once set, and with strict ownership, owned bundles can no longer move
    /// between owners.
    pub fn set_structure_app(&self, id: BundleId) -> Result<()> {
        let entry = self.live(id)?;
        if entry.data.read().container.is_some() {
            return Err(Error::Ownership(format!("{} is owned and cannot be the root", id)));
        }
        *self.structure_app.write() = Some(id);
        debug!(target: "nirva::bundle", id = %id, "structure app set");
        Ok(())
    }

    /// Current structure root
    pub fn structure_app(&self) -> Option<BundleId> {
        *self.structure_app.read()
    }

    // ========================================================================
    // Reference counting and destruction
    // ========================================================================

    /// Add a reference; returns the new count
    ///
    /// # Errors
    ///
    /// `Zombie` once the bundle has been destroyed.
    pub fn ref_bundle(&self, id: BundleId) -> Result<i32> {
        self.live(id)?.refs.add_ref().ok_or(Error::Zombie(id.0))
    }

    /// Drop a reference; returns true if this destroyed the bundle
    ///
    /// The count starts at zero, so an unreferenced bundle is destroyed by
    /// its first `unref`.
    pub fn unref_bundle(&self, id: BundleId) -> Result<bool> {
        let entry = self.live(id)?;
        if entry.refs.unref() {
            self.destroy(entry);
            return Ok(true);
        }
        Ok(false)
    }

    /// Current reference count
    pub fn ref_count(&self, id: BundleId) -> Result<i32> {
        Ok(self.live(id)?.refs.count())
    }

    fn destroy(&self, entry: Arc<BundleEntry>) {
        entry.refs.make_zombie();
        entry
            .hooks
            .trigger_spontaneous(&HookEvent::new(HookId::DESTRUCTION, entry.uid));
        let children = {
            let _own = self.ownership.lock();
            let container = entry.data.write().container.take();
            if let Some(c) = container {
                if let Ok(owner) = self.live(c.bundle) {
                    if let Some(s) = owner.data.write().strands.get_mut(&c.strand) {
                        strip_value(s, &StrandValue::BundlePtr(Some(entry.id)));
                    }
                }
            }
            self.entries.remove(&entry.id);
            {
                let mut app = self.structure_app.write();
                if *app == Some(entry.id) {
                    *app = None;
                }
            }
            let children = entry.data.read().owned_children();
            for child in &children {
                self.detach(*child, entry.id);
            }
            children
        };
        entry.hooks.clear_all();
        debug!(target: "nirva::bundle", id = %entry.id, uid = %entry.uid, children = children.len(), "destroyed bundle");
        self.release(children);
    }

    // ========================================================================
    // Copies
    // ========================================================================

    /// Deep copy; owned sub-bundles are copied too, const pointers are shared
    ///
    /// The copy is a root and fires INSTANCE_COPIED.
    pub fn copy_bundle(&self, id: BundleId) -> Result<BundleId> {
        let copy = self.copy_tree(id, None)?;
        let entry = self.live(copy)?;
        entry
            .hooks
            .trigger_spontaneous(&HookEvent::new(HookId::INSTANCE_COPIED, entry.uid));
        Ok(copy)
    }

    fn copy_tree(&self, id: BundleId, container: Option<Container>) -> Result<BundleId> {
        let source = self.live(id)?;
        let mut data = source.data.read().clone();
        data.container = container;
        let new_id = BundleId(self.next_id.fetch_add(1, Ordering::AcqRel));
        let mut copies = Vec::new();
        if let Err(e) = self.copy_children(&mut data, new_id, &mut copies) {
            for child in copies {
                self.discard_copy(child);
            }
            return Err(e);
        }
        let uid = Uid::new();
        self.entries.insert(
            new_id,
            Arc::new(BundleEntry {
                id: new_id,
                uid,
                blueprint: Arc::clone(&source.blueprint),
                data: RwLock::new(data),
                hooks: Arc::new(HookDispatcher::with_retry(uid, self.retry)),
                refs: RefCounter::new(),
            }),
        );
        debug!(target: "nirva::bundle", from = %id, to = %new_id, "copied bundle");
        Ok(new_id)
    }

    fn copy_children(
        &self,
        data: &mut BundleData,
        new_id: BundleId,
        copies: &mut Vec<BundleId>,
    ) -> Result<()> {
        for key in data.order.clone() {
            let Some(strand) = data.strands.get(&key) else {
                continue;
            };
            if !strand.values().iter().any(|v| matches!(v, StrandValue::BundlePtr(Some(_)))) {
                continue;
            }
            let mut values = Vec::with_capacity(strand.len());
            for v in strand.values() {
                values.push(match v {
                    StrandValue::BundlePtr(Some(child)) => {
                        let copy = self.copy_tree(
                            *child,
                            Some(Container {
                                bundle: new_id,
                                strand: key.clone(),
                            }),
                        )?;
                        copies.push(copy);
                        StrandValue::BundlePtr(Some(copy))
                    }
                    other => other.clone(),
                });
            }
            let mut copied = strand.clone();
            copied.set_values(&key, values)?;
            data.strands.insert(key, copied);
        }
        Ok(())
    }

    // Drop a half-built copy subtree; no hooks have fired for it yet.
    fn discard_copy(&self, id: BundleId) {
        if let Some((_, entry)) = self.entries.remove(&id) {
            let children = entry.data.read().owned_children();
            for child in children {
                self.discard_copy(child);
            }
        }
    }
}

impl std::fmt::Debug for BundleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleStore")
            .field("live", &self.entries.len())
            .field("issued", &(self.next_id.load(Ordering::Relaxed) - 1))
            .field("structure_app", &self.structure_app())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirva_core::{bundle_types, Bundledef};
    use nirva_hooks::Callback;

    fn store() -> BundleStore {
        let reg = BlueprintRegistry::standard().unwrap();
        reg.register(
            "NODE",
            &Bundledef::new([
                "?BSTRAND_NODE_CHILDREN",
                "1 NULL",
                "?CSTRAND_NODE_PEER",
                "0 NULL",
                "?*STRAND_NODE_PAYLOAD",
                "0 NULL",
                "iSTRAND_NODE_WEIGHT",
                "0 5",
                "?sSTRAND_NODE_LABEL",
                "0 NULL",
                "@BEGIN make_readonly",
                "STRAND_NODE_LABEL",
                "@END make_readonly",
            ]),
        )
        .unwrap();
        BundleStore::new(Arc::new(reg))
    }

    #[test]
    fn test_create_populates_mandatory_defaults() {
        let s = store();
        let id = s.create("NODE").unwrap();
        assert_eq!(s.get_value(id, "STRAND_NODE_WEIGHT").unwrap(), StrandValue::Int(5));
        assert_eq!(s.list_strands(id).unwrap(), vec![".weight".to_string()]);
        assert!(!s.has_strand(id, ".children").unwrap());
        assert!(s.create("NO_SUCH_TYPE").is_err());
    }

    #[test]
    fn test_create_with_failure_leaves_nothing() {
        let s = store();
        let err = s
            .create_with("NODE", vec![(".weight".into(), vec![StrandValue::Double(1.0)])])
            .unwrap_err();
        assert!(matches!(err, Error::WrongType { .. }));
        assert!(s.is_empty());
    }

    #[test]
    fn test_unknown_strand_rejected_without_template() {
        let s = store();
        let id = s.create("NODE").unwrap();
        assert!(matches!(
            s.set_value(id, "nonsense", 1).unwrap_err(),
            Error::Schema(_)
        ));
        let keyed = s.create(bundle_types::KEYED_NAME).unwrap();
        s.array_append(keyed, "anything", "x".into()).unwrap();
        assert!(s.has_strand(keyed, "anything").unwrap());
    }

    #[test]
    fn test_proxied_type_lock_in() {
        let s = store();
        let id = s.create("NODE").unwrap();
        s.set_value(id, ".payload", 42).unwrap();
        assert_eq!(s.strand_type(id, ".payload").unwrap(), StrandType::Int);
        let err = s.set_value(id, ".payload", "text").unwrap_err();
        assert!(matches!(err, Error::WrongType { .. }));
        assert_eq!(s.get_value(id, ".payload").unwrap(), StrandValue::Int(42));
    }

    #[test]
    fn test_readonly_after_first_set() {
        let s = store();
        let id = s.create("NODE").unwrap();
        s.set_value(id, ".label", "first").unwrap();
        assert!(matches!(
            s.set_value(id, ".label", "second").unwrap_err(),
            Error::ReadOnly(_)
        ));
        assert_eq!(s.get_value(id, ".label").unwrap(), StrandValue::from("first"));
    }

    #[test]
    fn test_racing_first_writes_to_readonly_strand() {
        let s = store();
        let id = s.create("NODE").unwrap();
        // both writers plan before either commits
        let gate = Arc::new(std::sync::Barrier::new(2));
        let g = Arc::clone(&gate);
        s.hooks(id)
            .unwrap()
            .add(
                HookId::UPDATING_VALUE,
                Callback::check("gate", move |_| {
                    g.wait();
                    true
                }),
            )
            .unwrap();
        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let writers: Vec<_> = ["left", "right"]
                .into_iter()
                .map(|label| {
                    let s = &s;
                    scope.spawn(move || s.set_value(id, ".label", label))
                })
                .collect();
            writers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::ReadOnly(_)))));
        let winner = s.get_value(id, ".label").unwrap();
        assert!(winner == StrandValue::from("left") || winner == StrandValue::from("right"));
    }

    #[test]
    fn test_before_hook_veto_keeps_old_value() {
        let s = store();
        let id = s.create("NODE").unwrap();
        s.hooks(id)
            .unwrap()
            .add(HookId::UPDATING_VALUE, Callback::check("deny", |_| false))
            .unwrap();
        let err = s.set_value(id, ".weight", 9).unwrap_err();
        assert!(err.is_vetoed());
        assert_eq!(s.get_value(id, ".weight").unwrap(), StrandValue::Int(5));
    }

    #[test]
    fn test_after_hook_sees_new_value() {
        let s = store();
        let id = s.create("NODE").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        s.hooks(id)
            .unwrap()
            .add(
                HookId::VALUE_UPDATED,
                Callback::check("watch", move |ev| {
                    if let Some(v) = ev.new_values() {
                        sink.lock().extend_from_slice(v);
                    }
                    true
                }),
            )
            .unwrap();
        s.set_value(id, ".weight", 11).unwrap();
        assert_eq!(*seen.lock(), vec![StrandValue::Int(11)]);
    }

    #[test]
    fn test_append_reparents_and_remove_destroys() {
        let s = store();
        let parent = s.create("NODE").unwrap();
        let child = s.create("NODE").unwrap();
        s.array_append(parent, ".children", StrandValue::BundlePtr(Some(child)))
            .unwrap();
        assert_eq!(
            s.container_of(child).unwrap(),
            Some(Container {
                bundle: parent,
                strand: ".children".into()
            })
        );
        assert_eq!(s.root_of(child).unwrap(), parent);

        s.array_remove(parent, ".children", 0).unwrap();
        assert_eq!(s.state(child), ObjectState::Zombie);
        assert!(matches!(s.get_value(child, ".weight"), Err(Error::Zombie(_))));
    }

    #[test]
    fn test_const_pointer_does_not_transfer() {
        let s = store();
        let a = s.create("NODE").unwrap();
        let b = s.create("NODE").unwrap();
        s.set_value(a, ".peer", StrandValue::ConstBundlePtr(Some(b)))
            .unwrap();
        assert_eq!(s.container_of(b).unwrap(), None);
        let err = s
            .set_value(a, ".peer", StrandValue::BundlePtr(Some(b)))
            .unwrap_err();
        assert!(matches!(err, Error::NotOwner(_)));
    }

    #[test]
    fn test_cycles_refused() {
        let s = store();
        let a = s.create("NODE").unwrap();
        let b = s.create("NODE").unwrap();
        s.array_append(a, ".children", StrandValue::BundlePtr(Some(b)))
            .unwrap();
        let err = s
            .array_append(b, ".children", StrandValue::BundlePtr(Some(a)))
            .unwrap_err();
        assert!(matches!(err, Error::Ownership(_)));
        let err = s
            .array_append(a, ".children", StrandValue::BundlePtr(Some(a)))
            .unwrap_err();
        assert!(matches!(err, Error::Ownership(_)));
        assert_eq!(s.array_get_size(b, ".children").ok(), None);
    }

    #[test]
    fn test_reparent_moves_and_strict_root_blocks() {
        let s = store();
        let a = s.create("NODE").unwrap();
        let b = s.create("NODE").unwrap();
        let child = s.create("NODE").unwrap();
        s.array_append(a, ".children", StrandValue::BundlePtr(Some(child)))
            .unwrap();
        s.array_append(b, ".children", StrandValue::BundlePtr(Some(child)))
            .unwrap();
        assert_eq!(s.container_of(child).unwrap().unwrap().bundle, b);
        assert_eq!(s.array_get_size(a, ".children").unwrap(), 0);

        s.set_structure_app(a).unwrap();
        let err = s
            .array_append(a, ".children", StrandValue::BundlePtr(Some(child)))
            .unwrap_err();
        assert!(matches!(err, Error::Ownership(_)));
        assert_eq!(s.container_of(child).unwrap().unwrap().bundle, b);
    }

    #[test]
    fn test_destruction_fires_once_and_cascades() {
        let s = store();
        let parent = s.create("NODE").unwrap();
        let child = s.create("NODE").unwrap();
        s.array_append(parent, ".children", StrandValue::BundlePtr(Some(child)))
            .unwrap();
        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for id in [parent, child] {
            let f = Arc::clone(&fired);
            s.hooks(id)
                .unwrap()
                .add(
                    HookId::DESTRUCTION,
                    Callback::check("count", move |_| {
                        f.fetch_add(1, Ordering::SeqCst);
                        true
                    }),
                )
                .unwrap();
        }
        assert_eq!(s.ref_bundle(parent).unwrap(), 1);
        assert!(!s.unref_bundle(parent).unwrap());
        assert!(s.unref_bundle(parent).unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(s.state(child), ObjectState::Zombie);
        assert!(matches!(s.unref_bundle(parent), Err(Error::Zombie(_))));
        assert!(matches!(s.ref_bundle(parent), Err(Error::Zombie(_))));
        assert!(s.is_empty());
    }

    #[test]
    fn test_copy_is_deep_for_owned_pointers() {
        let s = store();
        let parent = s.create("NODE").unwrap();
        let child = s.create("NODE").unwrap();
        let peer = s.create("NODE").unwrap();
        s.array_append(parent, ".children", StrandValue::BundlePtr(Some(child)))
            .unwrap();
        s.set_value(parent, ".peer", StrandValue::ConstBundlePtr(Some(peer)))
            .unwrap();
        s.set_value(child, ".weight", 77).unwrap();

        let copy = s.copy_bundle(parent).unwrap();
        let copied_child = s.array_get(copy, ".children", 0).unwrap().as_bundle().unwrap();
        assert_ne!(copied_child, child);
        assert_eq!(s.get_value(copied_child, ".weight").unwrap(), StrandValue::Int(77));
        assert_eq!(s.container_of(copied_child).unwrap().unwrap().bundle, copy);
        assert_eq!(
            s.get_value(copy, ".peer").unwrap(),
            StrandValue::ConstBundlePtr(Some(peer))
        );
        assert_eq!(s.container_of(copy).unwrap(), None);
    }

    #[test]
    fn test_failed_copy_leaves_no_partial_children() {
        let s = store();
        let parent = s.create("NODE").unwrap();
        let kept = s.create("NODE").unwrap();
        let grandchild = s.create("NODE").unwrap();
        let lost = s.create("NODE").unwrap();
        s.array_append(kept, ".children", StrandValue::BundlePtr(Some(grandchild)))
            .unwrap();
        s.array_append(parent, ".children", StrandValue::BundlePtr(Some(kept)))
            .unwrap();
        s.array_append(parent, ".children", StrandValue::BundlePtr(Some(lost)))
            .unwrap();
        // a destroy racing the copy: the entry is gone but the pointer is not yet stripped
        s.entries.remove(&lost);
        let before = s.len();

        assert!(s.copy_bundle(parent).is_err());
        assert_eq!(s.len(), before);
        assert_eq!(s.array_get_size(parent, ".children").unwrap(), 2);
        assert_eq!(s.container_of(grandchild).unwrap().unwrap().bundle, kept);
    }

    #[test]
    fn test_destroyed_ids_stay_zombies_without_records() {
        let s = store();
        let first = s.create("NODE").unwrap();
        assert!(s.unref_bundle(first).unwrap());
        for _ in 0..1_000 {
            let id = s.create("NODE").unwrap();
            s.unref_bundle(id).unwrap();
        }
        assert!(s.is_empty());
        assert_eq!(s.state(first), ObjectState::Zombie);
        assert!(matches!(s.get_value(first, ".weight"), Err(Error::Zombie(_))));
        assert_eq!(s.state(BundleId(1_000_000)), ObjectState::Undefined);
        assert_eq!(s.state(BundleId(0)), ObjectState::Undefined);
    }

    #[test]
    fn test_strand_delete() {
        let s = store();
        let id = s.create("NODE").unwrap();
        s.set_value(id, ".payload", 1.5).unwrap();
        s.strand_delete(id, ".payload").unwrap();
        assert!(!s.has_strand(id, ".payload").unwrap());
        assert!(s.strand_delete(id, ".weight").is_err());
        assert!(matches!(
            s.strand_delete(id, ".payload").unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_structure_app_must_be_root() {
        let s = store();
        let a = s.create("NODE").unwrap();
        let b = s.create("NODE").unwrap();
        s.array_append(a, ".children", StrandValue::BundlePtr(Some(b)))
            .unwrap();
        assert!(s.set_structure_app(b).is_err());
        s.set_structure_app(a).unwrap();
        assert_eq!(s.structure_app(), Some(a));
    }
}

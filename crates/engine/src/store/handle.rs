//! Handles onto store bundles

use super::BundleStore;
use nirva_core::{BundleId, BundleLike, Result, StrandType, StrandValue, Uid};
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// A bundle id paired with its store
///
/// Does not hold a reference: the bundle may be destroyed while the handle
/// lives, after which every call fails with `Zombie`.
#[derive(Debug, Clone)]
pub struct BundleHandle {
    store: Arc<BundleStore>,
    id: BundleId,
}

impl BundleHandle {
    /// Handle onto `id`
    pub fn new(store: Arc<BundleStore>, id: BundleId) -> Self {
        Self { store, id }
    }

    /// Bundle id
    pub fn id(&self) -> BundleId {
        self.id
    }

    /// Unique id
    pub fn uid(&self) -> Result<Uid> {
        self.store.uid(self.id)
    }

    /// Owning store
    pub fn store(&self) -> &Arc<BundleStore> {
        &self.store
    }

    /// Element `idx` of a strand
    pub fn array_get(&self, strand: &str, idx: usize) -> Result<StrandValue> {
        self.store.array_get(self.id, strand, idx)
    }

    /// Remove element `idx` of a strand
    pub fn array_remove(&self, strand: &str, idx: usize) -> Result<StrandValue> {
        self.store.array_remove(self.id, strand, idx)
    }

    /// Take a counted reference
    pub fn acquire(&self) -> Result<BundleGuard> {
        BundleGuard::acquire(Arc::clone(&self.store), self.id)
    }
}

impl BundleLike for BundleHandle {
    fn bundle_type(&self) -> String {
        self.store.bundle_type(self.id).unwrap_or_default()
    }

    fn has_strand(&self, strand: &str) -> bool {
        self.store.has_strand(self.id, strand).unwrap_or(false)
    }

    fn list_strands(&self) -> Vec<String> {
        self.store.list_strands(self.id).unwrap_or_default()
    }

    fn strand_type(&self, strand: &str) -> Result<StrandType> {
        self.store.strand_type(self.id, strand)
    }

    fn get_array(&self, strand: &str) -> Result<Vec<StrandValue>> {
        self.store.get_array(self.id, strand)
    }

    fn set_array(&self, strand: &str, values: Vec<StrandValue>) -> Result<()> {
        self.store.set_array(self.id, strand, values)
    }

    fn array_append(&self, strand: &str, value: StrandValue) -> Result<()> {
        self.store.array_append(self.id, strand, value)
    }

    fn array_clear(&self, strand: &str) -> Result<()> {
        self.store.array_clear(self.id, strand)
    }

    fn strand_delete(&self, strand: &str) -> Result<()> {
        self.store.strand_delete(self.id, strand)
    }

    fn get_value(&self, strand: &str) -> Result<StrandValue> {
        self.store.get_value(self.id, strand)
    }

    fn array_get_size(&self, strand: &str) -> Result<usize> {
        self.store.array_get_size(self.id, strand)
    }
}

/// A counted reference to a bundle
///
/// Acquiring adds a reference; dropping the guard removes it, destroying the
/// bundle if that was the transition below zero.
#[derive(Debug)]
pub struct BundleGuard {
    handle: BundleHandle,
}

impl BundleGuard {
    /// Add a reference to `id`
    ///
    /// # Errors
    ///
    /// `Zombie` if the bundle is already destroyed.
    pub fn acquire(store: Arc<BundleStore>, id: BundleId) -> Result<Self> {
        store.ref_bundle(id)?;
        Ok(Self {
            handle: BundleHandle::new(store, id),
        })
    }
}

impl Deref for BundleGuard {
    type Target = BundleHandle;

    fn deref(&self) -> &BundleHandle {
        &self.handle
    }
}

impl Drop for BundleGuard {
    fn drop(&mut self) {
        if let Err(e) = self.handle.store.unref_bundle(self.handle.id) {
            debug!(target: "nirva::bundle", id = %self.handle.id, error = %e, "guard dropped after destruction");
        }
    }
}

/// Typed construction of a bundle
///
/// Collects strand values and creates the bundle in one step; nothing is
/// allocated until [`create`](BundleBuilder::create).
#[must_use]
pub struct BundleBuilder<'a> {
    store: &'a BundleStore,
    bundle_type: String,
    strands: Vec<(String, Vec<StrandValue>)>,
}

impl<'a> BundleBuilder<'a> {
    pub(super) fn new(store: &'a BundleStore, bundle_type: String) -> Self {
        Self {
            store,
            bundle_type,
            strands: Vec::new(),
        }
    }

    /// Set a scalar strand
    pub fn value(mut self, strand: impl Into<String>, value: impl Into<StrandValue>) -> Self {
        self.strands.push((strand.into(), vec![value.into()]));
        self
    }

    /// Set an array strand
    pub fn array(mut self, strand: impl Into<String>, values: Vec<StrandValue>) -> Self {
        self.strands.push((strand.into(), values));
        self
    }

    /// Create the bundle
    pub fn create(self) -> Result<BundleId> {
        self.store.create_with(&self.bundle_type, self.strands)
    }
}

impl BundleStore {
    /// Handle onto a live bundle
    pub fn handle(self: &Arc<Self>, id: BundleId) -> Result<BundleHandle> {
        self.live(id)?;
        Ok(BundleHandle::new(Arc::clone(self), id))
    }

    /// Counted reference to a live bundle
    pub fn acquire(self: &Arc<Self>, id: BundleId) -> Result<BundleGuard> {
        BundleGuard::acquire(Arc::clone(self), id)
    }
}

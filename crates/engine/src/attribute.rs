//! Attributes and connections
//!
//! An [`Attribute`] is a named, typed value with a default, flags and an
//! optional connection to a remote attribute. Reading a connected attribute
//! returns the remote's own value; the link is followed once, never chained.
//! A plain connection makes the local end read-only; `READ_WRITE` forwards
//! writes to the remote.
//!
//! An [`AttrGroup`] is the set of attributes owned by one object. It gates
//! connect and disconnect through its self-only CONNECT_REQUEST and
//! DISCONNECT_REQUEST hooks, and exposes its attributes as strands through
//! [`BundleLike`].

use nirva_core::{
    AttrFlags, BundleLike, ConnFlags, Error, HookId, Result, Strand, StrandType, StrandValue, Uid,
};
use nirva_hooks::{HookDispatcher, HookEvent, HookPayload};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Bundle type reported by attribute groups
pub const ATTR_GROUP_TYPE: &str = "ATTR_GROUP";

/// Template an attribute is created from
#[derive(Debug, Clone, PartialEq)]
pub struct AttrDef {
    /// Attribute name
    pub name: String,
    /// Flags copied to the attribute
    pub flags: AttrFlags,
    /// Value type; `Proxied` locks on first write
    pub stype: StrandType,
    /// Holds an array rather than a scalar
    pub is_array: bool,
    /// Value copied in at creation unless the def is optional
    pub default: Option<Vec<StrandValue>>,
    /// Upper bound on the number of elements
    pub max_values: Option<usize>,
}

impl AttrDef {
    /// Scalar attribute def without a default
    pub fn new(name: impl Into<String>, stype: StrandType) -> Self {
        Self {
            name: name.into(),
            flags: AttrFlags::empty(),
            stype,
            is_array: false,
            default: None,
            max_values: None,
        }
    }

    /// Scalar def with a default value
    pub fn with_default(name: impl Into<String>, value: impl Into<StrandValue>) -> Self {
        let value = value.into();
        let mut def = Self::new(name, value.strand_type());
        def.default = Some(vec![value]);
        def
    }

    /// Builder: add flags
    pub fn flags(mut self, flags: AttrFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Builder: mark optional
    pub fn optional(self) -> Self {
        self.flags(AttrFlags::OPTIONAL)
    }

    /// Builder: mark read-only
    pub fn readonly(self) -> Self {
        self.flags(AttrFlags::READONLY)
    }

    /// Builder: array valued
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Builder: default contents
    pub fn default_values(mut self, values: Vec<StrandValue>) -> Self {
        self.default = Some(values);
        self
    }

    /// Builder: element bound
    pub fn max_values(mut self, n: usize) -> Self {
        self.max_values = Some(n);
        self
    }

    /// True if flagged optional
    pub fn is_optional(&self) -> bool {
        self.flags.contains(AttrFlags::OPTIONAL)
    }
}

#[derive(Debug, Clone)]
struct Connection {
    remote: Arc<Attribute>,
    flags: ConnFlags,
}

#[derive(Debug)]
struct AttrState {
    flags: AttrFlags,
    data: Strand,
    default: Option<Vec<StrandValue>>,
    connection: Option<Connection>,
    inbound: Vec<Weak<Attribute>>,
    locked: bool,
}

/// A named value with default, flags and optional remote connection
#[derive(Debug)]
pub struct Attribute {
    uid: Uid,
    name: String,
    max_values: Option<usize>,
    state: RwLock<AttrState>,
    hooks: Arc<HookDispatcher>,
}

impl Attribute {
    /// Create from a def
    ///
    /// Copies name, flags, type and default; unless the def is optional the
    /// default becomes the initial value.
    ///
    /// # Errors
    ///
    /// `WrongType` if the default does not match the declared type.
    pub fn from_def(def: &AttrDef) -> Result<Self> {
        let mut data = Strand::new(def.stype, def.is_array);
        let mut default_strand = Strand::new(def.stype, def.is_array);
        if let Some(d) = &def.default {
            default_strand.set_values(&def.name, d.clone())?;
            if !def.is_optional() {
                data.set_values(&def.name, d.clone())?;
            }
        }
        let uid = Uid::new();
        Ok(Self {
            uid,
            name: def.name.clone(),
            max_values: def.max_values,
            state: RwLock::new(AttrState {
                flags: def.flags,
                data,
                default: def.default.clone(),
                connection: None,
                inbound: Vec::new(),
                locked: false,
            }),
            hooks: Arc::new(HookDispatcher::new(uid)),
        })
    }

    /// Unique id
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current flags
    pub fn flags(&self) -> AttrFlags {
        self.state.read().flags
    }

    /// Add or clear flags
    pub fn set_flags(&self, flags: AttrFlags, on: bool) {
        self.state.write().flags.set(flags, on);
    }

    /// Effective value type
    pub fn stype(&self) -> StrandType {
        self.state.read().data.effective_type()
    }

    /// Value-change hooks of this attribute
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.hooks
    }

    /// Value, following a connection once
    pub fn get(&self) -> Vec<StrandValue> {
        let remote = self.state.read().connection.as_ref().map(|c| Arc::clone(&c.remote));
        match remote {
            Some(r) => r.local_values(),
            None => self.local_values(),
        }
    }

    /// First element of the value
    pub fn get_value(&self) -> Result<StrandValue> {
        self.get()
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(format!("value of attribute '{}'", self.name)))
    }

    /// Value of the connected remote attribute
    ///
    /// # Errors
    ///
    /// `NotFound` if not connected.
    pub fn read_connected(&self) -> Result<Vec<StrandValue>> {
        let remote = self.state.read().connection.as_ref().map(|c| Arc::clone(&c.remote));
        remote
            .map(|r| r.local_values())
            .ok_or_else(|| Error::not_found(format!("connection of attribute '{}'", self.name)))
    }

    fn local_values(&self) -> Vec<StrandValue> {
        self.state.read().data.values().to_vec()
    }

    /// True if a value is present
    pub fn has_value(&self) -> bool {
        !self.get().is_empty()
    }

    /// Replace the value
    ///
    /// # Errors
    ///
    /// - `ReadOnly` if flagged read-only, locked by a running transform, or
    ///   connected without `READ_WRITE`
    /// - `WrongType`, `InvalidInput` (too many elements), `Vetoed`
    pub fn set(&self, values: Vec<StrandValue>) -> Result<()> {
        let forward = {
            let st = self.state.read();
            if st.flags.contains(AttrFlags::READONLY) || st.locked {
                return Err(Error::ReadOnly(self.name.clone()));
            }
            match &st.connection {
                Some(c) if c.flags.contains(ConnFlags::READ_WRITE) => Some(Arc::clone(&c.remote)),
                Some(_) => return Err(Error::ReadOnly(self.name.clone())),
                None => None,
            }
        };
        match forward {
            Some(remote) => remote.write_values(values, true),
            None => self.write_values(values, true),
        }
    }

    /// Set a scalar value
    pub fn set_value(&self, value: impl Into<StrandValue>) -> Result<()> {
        self.set(vec![value.into()])
    }

    /// Append one element
    pub fn append(&self, value: StrandValue) -> Result<()> {
        let mut values = self.get();
        values.push(value);
        self.set(values)
    }

    pub(crate) fn write_local(&self, values: Vec<StrandValue>) -> Result<()> {
        self.write_values(values, false)
    }

    fn refuse_if_readonly(&self, st: &AttrState) -> Result<()> {
        if st.flags.contains(AttrFlags::READONLY) || st.locked {
            return Err(Error::ReadOnly(self.name.clone()));
        }
        Ok(())
    }

    // `guarded` writes honour READONLY and the transform lock up to the commit
    fn write_values(&self, values: Vec<StrandValue>, guarded: bool) -> Result<()> {
        if let Some(max) = self.max_values {
            if values.len() > max {
                return Err(Error::invalid_input(format!(
                    "attribute '{}' holds at most {} values",
                    self.name, max
                )));
            }
        }
        let old = {
            let st = self.state.read();
            if guarded {
                self.refuse_if_readonly(&st)?;
            }
            st.data.check(&self.name, &values)?;
            st.data.values().to_vec()
        };
        let payload = HookPayload::ValueChange {
            strand: self.name.clone(),
            old,
            new: values.clone(),
        };
        self.hooks.trigger_data_before(
            &HookEvent::new(HookId::UPDATING_VALUE, self.uid).with_payload(payload.clone()),
        )?;
        {
            let mut st = self.state.write();
            if guarded {
                self.refuse_if_readonly(&st)?;
            }
            st.data.set_values(&self.name, values)?;
        }
        self.hooks
            .trigger_data_after(&HookEvent::new(HookId::VALUE_UPDATED, self.uid).with_payload(payload));
        Ok(())
    }

    /// Restore the default, or clear the value if there is none
    pub fn reset_to_default(&self) -> Result<()> {
        let mut st = self.state.write();
        match st.default.clone() {
            Some(d) => st.data.set_values(&self.name, d),
            None => {
                st.data.clear();
                Ok(())
            }
        }
    }

    /// Replace the default; the current value is untouched
    pub fn set_default(&self, values: Vec<StrandValue>) -> Result<()> {
        let mut st = self.state.write();
        st.data.check(&self.name, &values)?;
        st.default = Some(values);
        Ok(())
    }

    /// Current default
    pub fn default_values(&self) -> Option<Vec<StrandValue>> {
        self.state.read().default.clone()
    }

    /// True while connected to a remote attribute
    pub fn is_connected(&self) -> bool {
        self.state.read().connection.is_some()
    }

    /// Connected remote attribute
    pub fn remote(&self) -> Option<Arc<Attribute>> {
        self.state
            .read()
            .connection
            .as_ref()
            .map(|c| Arc::clone(&c.remote))
    }

    /// Number of attributes connected to this one
    pub fn inbound_count(&self) -> usize {
        self.state
            .read()
            .inbound
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// True while locked read-only by a running transform
    pub fn is_locked(&self) -> bool {
        self.state.read().locked
    }

    pub(crate) fn set_locked(&self, locked: bool) {
        self.state.write().locked = locked;
    }

    fn attach(self: &Arc<Self>, remote: &Arc<Attribute>, flags: ConnFlags) {
        {
            let mut st = self.state.write();
            st.connection = Some(Connection {
                remote: Arc::clone(remote),
                flags,
            });
            st.flags.insert(AttrFlags::CONNECTED);
        }
        let mut rs = remote.state.write();
        rs.inbound.retain(|w| w.strong_count() > 0);
        rs.inbound.push(Arc::downgrade(self));
        rs.flags.insert(AttrFlags::CONNECTED);
    }

    // Returns the connection flags that were in force
    fn detach(self: &Arc<Self>) -> Option<ConnFlags> {
        let conn = {
            let mut st = self.state.write();
            let conn = st.connection.take()?;
            if st.inbound.iter().all(|w| w.strong_count() == 0) {
                st.flags.remove(AttrFlags::CONNECTED);
            }
            conn
        };
        let copied = conn
            .flags
            .contains(ConnFlags::COPY_ON_DISCONNECT)
            .then(|| conn.remote.local_values());
        {
            let mut rs = conn.remote.state.write();
            let me = Arc::as_ptr(self);
            rs.inbound
                .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), me));
            if rs.inbound.is_empty() && rs.connection.is_none() {
                rs.flags.remove(AttrFlags::CONNECTED);
            }
        }
        let old = self.local_values();
        let restored = match copied {
            Some(values) => self.state.write().data.set_values(&self.name, values),
            None => self.reset_to_default(),
        };
        match restored {
            Ok(()) => {
                let new = self.local_values();
                if new != old {
                    let payload = HookPayload::ValueChange {
                        strand: self.name.clone(),
                        old,
                        new,
                    };
                    self.hooks.trigger_data_after(
                        &HookEvent::new(HookId::VALUE_UPDATED, self.uid).with_payload(payload),
                    );
                }
            }
            Err(e) => {
                warn!(target: "nirva::attr", attr = %self.name, error = %e, "could not restore value after disconnect");
            }
        }
        Some(conn.flags)
    }

    fn inbound(&self) -> Vec<Arc<Attribute>> {
        self.state
            .read()
            .inbound
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

/// Attributes owned by one object
#[derive(Debug)]
pub struct AttrGroup {
    uid: Uid,
    hooks: Arc<HookDispatcher>,
    attrs: RwLock<Vec<Arc<Attribute>>>,
}

impl Default for AttrGroup {
    fn default() -> Self {
        Self::new(Uid::new())
    }
}

impl AttrGroup {
    /// Empty group owned by `owner`
    pub fn new(owner: Uid) -> Self {
        Self {
            uid: owner,
            hooks: Arc::new(HookDispatcher::new(owner)),
            attrs: RwLock::new(Vec::new()),
        }
    }

    /// Owner uid
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Hooks guarding connections and reporting changes
    pub fn hooks(&self) -> &Arc<HookDispatcher> {
        &self.hooks
    }

    /// Create an attribute from `def` and add it
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the name is taken; errors from
    /// [`Attribute::from_def`].
    pub fn add(&self, def: &AttrDef) -> Result<Arc<Attribute>> {
        let attr = Arc::new(Attribute::from_def(def)?);
        self.insert(Arc::clone(&attr))?;
        Ok(attr)
    }

    /// Add an existing attribute
    pub fn insert(&self, attr: Arc<Attribute>) -> Result<()> {
        {
            let mut attrs = self.attrs.write();
            if attrs.iter().any(|a| a.name == attr.name) {
                return Err(Error::invalid_input(format!(
                    "attribute '{}' already exists",
                    attr.name
                )));
            }
            attrs.push(attr);
        }
        self.updated();
        Ok(())
    }

    /// Attribute by name
    pub fn get(&self, name: &str) -> Option<Arc<Attribute>> {
        self.attrs.read().iter().find(|a| a.name == name).cloned()
    }

    fn require(&self, name: &str) -> Result<Arc<Attribute>> {
        self.get(name)
            .ok_or_else(|| Error::not_found(format!("attribute '{}'", name)))
    }

    /// Remove an attribute, disconnecting it and everything connected to it
    pub fn remove(&self, name: &str) -> Result<Arc<Attribute>> {
        let attr = self.require(name)?;
        for peer in attr.inbound() {
            peer.detach();
        }
        attr.detach();
        self.attrs.write().retain(|a| !Arc::ptr_eq(a, &attr));
        self.updated();
        Ok(attr)
    }

    /// Remove every attribute
    pub fn clear(&self) {
        for name in self.names() {
            if let Err(e) = self.remove(&name) {
                debug!(target: "nirva::attr", attr = %name, error = %e, "attribute vanished during clear");
            }
        }
    }

    /// Attribute names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.attrs.read().iter().map(|a| a.name.clone()).collect()
    }

    /// All attributes
    pub fn attributes(&self) -> Vec<Arc<Attribute>> {
        self.attrs.read().clone()
    }

    /// Number of attributes
    pub fn len(&self) -> usize {
        self.attrs.read().len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.attrs.read().is_empty()
    }

    fn updated(&self) {
        self.hooks
            .trigger_spontaneous(&HookEvent::new(HookId::ATTRS_UPDATED, self.uid));
    }

    /// Connect local attribute `name` to `remote`
    ///
    /// # Errors
    ///
    /// - `NotFound` if there is no such local attribute
    /// - `InvalidInput` if already connected or connecting to itself
    /// - `WrongType` if the types are incompatible
    /// - `Vetoed` if CONNECT_REQUEST, or ATTR_CONNECT_RW_REQUEST on the remote
    ///   for `READ_WRITE` connections, is not granted
    pub fn connect(&self, name: &str, remote: &Arc<Attribute>, flags: ConnFlags) -> Result<()> {
        let local = self.require(name)?;
        if Arc::ptr_eq(&local, remote) {
            return Err(Error::invalid_input(format!(
                "attribute '{}' cannot connect to itself",
                name
            )));
        }
        if local.is_connected() {
            return Err(Error::invalid_input(format!(
                "attribute '{}' is already connected",
                name
            )));
        }
        let (lt, rt) = (local.stype(), remote.stype());
        if !(lt == rt || lt.accepts(rt) || rt.is_deferred()) {
            return Err(Error::WrongType {
                strand: name.to_string(),
                expected: lt,
                actual: rt,
            });
        }
        let answer = self.hooks.trigger_request(
            &HookEvent::new(HookId::CONNECT_REQUEST, self.uid).with_payload(HookPayload::Request {
                requester: Some(remote.uid),
                detail: name.to_string(),
            }),
        );
        if !answer.is_yes() {
            warn!(target: "nirva::attr", attr = %name, answer = ?answer, "connection refused");
            return Err(Error::Vetoed {
                strand: name.to_string(),
                callback: "CONNECT_REQUEST".to_string(),
            });
        }
        if flags.contains(ConnFlags::READ_WRITE) {
            let answer = remote.hooks.trigger_request(
                &HookEvent::new(HookId::ATTR_CONNECT_RW_REQUEST, remote.uid).with_payload(
                    HookPayload::Request {
                        requester: Some(local.uid),
                        detail: remote.name.clone(),
                    },
                ),
            );
            if !answer.is_yes() {
                return Err(Error::Vetoed {
                    strand: name.to_string(),
                    callback: "ATTR_CONNECT_RW_REQUEST".to_string(),
                });
            }
        }
        local.attach(remote, flags);
        debug!(target: "nirva::attr", attr = %name, remote = %remote.name, flags = ?flags, "connected");
        Ok(())
    }

    /// Disconnect local attribute `name`
    ///
    /// The remote value is copied back when the connection was made with
    /// `COPY_ON_DISCONNECT`; otherwise the default is restored. With
    /// `DESTROY_ON_DISCONNECT` an optional attribute is also removed.
    pub fn disconnect(&self, name: &str) -> Result<()> {
        let local = self.require(name)?;
        if !local.is_connected() {
            return Err(Error::not_found(format!("connection of attribute '{}'", name)));
        }
        let answer = self.hooks.trigger_request(
            &HookEvent::new(HookId::DISCONNECT_REQUEST, self.uid).with_payload(
                HookPayload::Request {
                    requester: None,
                    detail: name.to_string(),
                },
            ),
        );
        if !answer.is_yes() {
            return Err(Error::Vetoed {
                strand: name.to_string(),
                callback: "DISCONNECT_REQUEST".to_string(),
            });
        }
        let flags = local.detach().unwrap_or_default();
        debug!(target: "nirva::attr", attr = %name, "disconnected");
        if flags.contains(ConnFlags::DESTROY_ON_DISCONNECT)
            && local.flags().contains(AttrFlags::OPTIONAL)
        {
            self.remove(name)?;
        }
        Ok(())
    }
}

impl Drop for AttrGroup {
    fn drop(&mut self) {
        for attr in self.attrs.get_mut().drain(..) {
            attr.detach();
        }
    }
}

impl BundleLike for AttrGroup {
    fn bundle_type(&self) -> String {
        ATTR_GROUP_TYPE.to_string()
    }

    fn has_strand(&self, strand: &str) -> bool {
        self.get(strand).is_some()
    }

    fn list_strands(&self) -> Vec<String> {
        self.names()
    }

    fn strand_type(&self, strand: &str) -> Result<StrandType> {
        Ok(self.require(strand)?.stype())
    }

    fn get_array(&self, strand: &str) -> Result<Vec<StrandValue>> {
        Ok(self.require(strand)?.get())
    }

    fn set_array(&self, strand: &str, values: Vec<StrandValue>) -> Result<()> {
        self.require(strand)?.set(values)
    }

    fn array_append(&self, strand: &str, value: StrandValue) -> Result<()> {
        self.require(strand)?.append(value)
    }

    fn array_clear(&self, strand: &str) -> Result<()> {
        self.require(strand)?.set(Vec::new())
    }

    fn strand_delete(&self, strand: &str) -> Result<()> {
        self.remove(strand).map(|_| ())
    }
}

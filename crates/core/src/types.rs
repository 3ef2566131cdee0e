//! Identifier types for the nirva runtime
//!
//! This module defines:
//! - Uid: random, immutable 64-bit identity carried by every bundle
//! - BundleId: stable arena index of a live bundle
//! - ObjectType: 8-byte type tag packed into a u64 (e.g. `obj.CLIP`)
//! - ObjectState: coarse state of an object instance

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identity of a bundle
///
/// Uids are random and never reused. A Uid of zero is never generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(u64);

impl Uid {
    /// Create a new random Uid
    pub fn new() -> Self {
        loop {
            let (hi, lo) = Uuid::new_v4().as_u64_pair();
            let v = hi ^ lo;
            if v != 0 {
                return Self(v);
            }
        }
    }

    /// Wrap a raw value (used when restoring from a snapshot)
    pub const fn from_raw(v: u64) -> Self {
        Self(v)
    }

    /// Raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Stable arena index of a bundle
///
/// BundleIds are allocated sequentially by the store and are never reused
/// for the lifetime of a runtime, so a dangling id resolves to "not found"
/// rather than to a different bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleId(pub u64);

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Object type tag: up to 8 ASCII bytes packed big-endian into a u64
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectType(pub u64);

impl ObjectType {
    /// No type
    pub const NONE: ObjectType = ObjectType(0);
    /// Contract objects
    pub const CONTRACT: ObjectType = ObjectType::pack(b"obj.CONT");
    /// Clip objects
    pub const CLIP: ObjectType = ObjectType::pack(b"obj.CLIP");
    /// Plugin objects
    pub const PLUGIN: ObjectType = ObjectType::pack(b"obj.PLUG");
    /// Widget objects
    pub const WIDGET: ObjectType = ObjectType::pack(b"obj.WIDG");
    /// Thread objects
    pub const THREAD: ObjectType = ObjectType::pack(b"obj.THRD");
    /// Video playback plugins
    pub const PLAYER: ObjectType = ObjectType::pack(b"obj.VPLY");

    /// Pack exactly 8 bytes
    pub const fn pack(tag: &[u8; 8]) -> Self {
        ObjectType(u64::from_be_bytes(*tag))
    }

    /// Pack a tag of up to 8 bytes, right-padding with NUL
    pub fn from_tag(tag: &str) -> Self {
        let mut buf = [0u8; 8];
        for (d, s) in buf.iter_mut().zip(tag.bytes()) {
            *d = s;
        }
        ObjectType(u64::from_be_bytes(buf))
    }

    /// The tag text with trailing NULs removed
    pub fn tag(&self) -> String {
        self.0
            .to_be_bytes()
            .iter()
            .take_while(|b| **b != 0)
            .map(|b| *b as char)
            .collect()
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectType({})", self.tag())
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Coarse state of an object instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    /// Not yet created
    Undefined,
    /// Passive and usable
    Normal,
    /// Exists but cannot yet accept transforms
    NotReady,
    /// Prepared for a transform
    Prepared,
    /// Active but idle
    ActiveIdle,
    /// Being updated
    Updating,
    /// Running a transform
    Busy,
    /// Destroyed, waiting for the last reference to go
    Zombie,
    /// Owned by something outside the runtime
    External,
}

impl ObjectState {
    /// Numeric code of the state
    pub fn code(&self) -> i32 {
        match self {
            ObjectState::Undefined => 0,
            ObjectState::Normal => 1,
            ObjectState::NotReady => 2,
            ObjectState::Prepared => 3,
            ObjectState::ActiveIdle => 4,
            ObjectState::Updating => 5,
            ObjectState::Busy => 6,
            ObjectState::Zombie => 32,
            ObjectState::External => 64,
        }
    }

    /// Decode a numeric state
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ObjectState::Undefined,
            1 => ObjectState::Normal,
            2 => ObjectState::NotReady,
            3 => ObjectState::Prepared,
            4 => ObjectState::ActiveIdle,
            5 => ObjectState::Updating,
            6 => ObjectState::Busy,
            32 => ObjectState::Zombie,
            64 => ObjectState::External,
            _ => return None,
        })
    }
}

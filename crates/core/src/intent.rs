//! Intents and capacities
//!
//! Intents are the verbs other code uses to ask the runtime for behaviour;
//! capacities qualify them. Both are open sets.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Intent number
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intent(pub u32);

macro_rules! intents {
    ($($(#[$m:meta])* $name:ident = $v:literal;)*) => {
        impl Intent {
            $(
                $(#[$m])*
                pub const $name: Intent = Intent($v);
            )*

            /// Symbolic name of a known intent
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($v => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

intents! {
    /// No intent
    NONE = 0;
    /// Unknown intent
    UNKNOWN = 1;
    /// Create a bundle or instance
    CREATE_BUNDLE = 0x100;
    /// Ask for an update
    REQUEST_UPDATE = 0x101;
    /// Generic processing
    PROCESS = 0x102;
    /// Change object state
    CHANGE_STATE = 0x103;
    /// Change object subtype
    CHANGE_SUBTYPE = 0x104;
    /// Reorder a sequence
    MANIPULATE_SEQUENCE = 0x105;
    /// Record
    RECORD = 0x106;
    /// Render
    RENDER = 0x107;
    /// Edit data in place
    EDIT_DATA = 0x108;
    /// Play
    PLAY = 0x200;
    /// Stream
    STREAM = 0x201;
    /// Transcode
    TRANSCODE = 0x202;
    /// Encode
    ENCODE = 0x899;
    /// Backup
    BACKUP = 0x89A;
    /// Restore
    RESTORE = 0x89B;
    /// Import
    IMPORT = 0xC00;
    /// Export
    EXPORT = 0xC01;
    /// Decode
    DECODE = 0x1000;
    /// Apply an effect
    EFFECT = 0x1400;
    /// Analyse
    ANALYSE = 0x1401;
    /// Convert
    CONVERT = 0x1402;
    /// Mix
    MIX = 0x1403;
    /// Split
    SPLIT = 0x1404;
    /// Duplicate
    DUPLICATE = 0x1405;
    /// Destroy an instance
    DESTROY_INSTANCE = 0x2000;
    /// First intent available to applications
    FIRST_CUSTOM = 0x8000_0000;
}

impl fmt::Debug for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => write!(f, "Intent({})", n),
            None => write!(f, "Intent({:#x})", self.0),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None => write!(f, "intent#{:#x}", self.0),
        }
    }
}

/// Well-known capacity names
pub mod caps {
    /// Local resource
    pub const LOCAL: &str = "local";
    /// Remote resource
    pub const REMOTE: &str = "remote";
    /// Realtime operation
    pub const REALTIME: &str = "realtime";
    /// Drives a display
    pub const DISPLAY: &str = "display";
    /// Video data
    pub const VIDEO: &str = "video";
    /// Audio data
    pub const AUDIO: &str = "audio";
    /// Text data
    pub const TEXT: &str = "text";
    /// Generic data
    pub const DATA: &str = "data";
    /// Backup
    pub const BACKUP: &str = "backup";
    /// Lossy encoding
    pub const LOSSY: &str = "lossy";
    /// Lossless encoding
    pub const LOSSLESS: &str = "lossless";
}

static KNOWN_CAPS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        caps::LOCAL,
        caps::REMOTE,
        caps::REALTIME,
        caps::DISPLAY,
        caps::VIDEO,
        caps::AUDIO,
        caps::TEXT,
        caps::DATA,
        caps::BACKUP,
        caps::LOSSY,
        caps::LOSSLESS,
    ]
    .into_iter()
    .collect()
});

/// True for the capacities the runtime itself defines
pub fn is_known_cap(name: &str) -> bool {
    KNOWN_CAPS.contains(name)
}

/// Ordered set of capacity names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapSet(BTreeSet<String>);

impl CapSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capacity; returns false if already present
    pub fn add(&mut self, cap: impl Into<String>) -> bool {
        self.0.insert(cap.into())
    }

    /// Builder-style add
    pub fn with(mut self, cap: impl Into<String>) -> Self {
        self.add(cap);
        self
    }

    /// Remove a capacity
    pub fn remove(&mut self, cap: &str) -> bool {
        self.0.remove(cap)
    }

    /// True if present
    pub fn has(&self, cap: &str) -> bool {
        self.0.contains(cap)
    }

    /// True if every capacity of `other` is present
    pub fn is_superset(&self, other: &CapSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Number of capacities
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for CapSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        CapSet(iter.into_iter().map(Into::into).collect())
    }
}

/// An intent qualified by the capacities it requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentCap {
    /// The verb
    pub intent: Intent,
    /// Capacities
    pub caps: CapSet,
}

impl IntentCap {
    /// New intent/capacity pair
    pub fn new(intent: Intent, caps: CapSet) -> Self {
        Self { intent, caps }
    }
}

//! Standard bundledefs
//!
//! Texts for the bundle types the runtime itself uses. Derived types extend a
//! base by concatenating its bundledef; the merge rules in
//! [`Bundledef::validate`](crate::bundledef::Bundledef::validate) drop the
//! resulting duplicates.

use crate::bundledef::Bundledef;
use once_cell::sync::Lazy;

/// Names of the standard bundle types
pub mod bundle_types {
    /// Base for named, flagged definitions
    pub const DEF: &str = "DEF";
    /// Typed value with a proxied data strand
    pub const VALUE: &str = "VALUE";
    /// A strand declaration as a bundle
    pub const STRAND_DEF: &str = "STRAND_DEF";
    /// A blueprint as a bundle
    pub const BLUEPRINT: &str = "BLUEPRINT";
    /// Attribute template
    pub const ATTR_DEF: &str = "ATTR_DEF";
    /// Live attribute
    pub const ATTRIBUTE: &str = "ATTRIBUTE";
    /// Connection from an attribute to a remote attribute
    pub const ATTR_CONNECTION: &str = "ATTR_CONNECTION";
    /// Array of non-owning pointers
    pub const INDEX: &str = "INDEX";
    /// Keyed array of values
    pub const KEYED_NAME: &str = "KEYED_NAME";
    /// Hook stack header
    pub const HOOK_STACK: &str = "HOOK_STACK";
    /// Contract record
    pub const CONTRACT: &str = "CONTRACT";
    /// Transform record
    pub const TRANSFORM: &str = "TRANSFORM";
    /// Object instance
    pub const OBJECT_INSTANCE: &str = "OBJECT_INSTANCE";
}

fn def(items: &[&str]) -> Bundledef {
    Bundledef::new(items.iter().copied())
}

static DEF: Lazy<Bundledef> = Lazy::new(|| {
    def(&[
        "?sSTRAND_GENERIC_NAME",
        "0 NULL",
        "?iSTRAND_GENERIC_FLAGS",
        "0 0",
        "?sSTRAND_GENERIC_DESCRIPTION",
        "0 NULL",
    ])
});

static VALUE: Lazy<Bundledef> = Lazy::new(|| {
    def(&[
        "sSTRAND_VALUE_STRAND_TYPE",
        "0 NULL",
        "?*STRAND_VALUE_DATA",
        "0 NULL",
    ])
});

static STRAND_DEF: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "@BEGIN make_mandatory",
            "STRAND_GENERIC_NAME",
            "STRAND_GENERIC_FLAGS",
            "@END make_mandatory",
            "sSTRAND_VALUE_STRAND_TYPE",
            "0 NULL",
            "?*STRAND_VALUE_DEFAULT",
            "0 NULL",
            "@BEGIN make_readonly",
            "STRAND_VALUE_STRAND_TYPE",
            "@END make_readonly",
        ]),
    ])
});

static BLUEPRINT: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "sSTRAND_BLUEPRINT_BUNDLE_TYPE",
            "0 NULL",
            "?BSTRAND_BLUEPRINT_STRAND_DEFS",
            "1 NULL",
            "?USTRAND_BLUEPRINT_FINGERPRINT",
            "0 0",
        ]),
    ])
});

static ATTR_DEF: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "@BEGIN make_mandatory",
            "STRAND_GENERIC_NAME",
            "STRAND_GENERIC_FLAGS",
            "@END make_mandatory",
            "sSTRAND_VALUE_STRAND_TYPE",
            "0 NULL",
            "?iSTRAND_VALUE_MAX_VALUES",
            "0 -1",
            "?*STRAND_VALUE_DEFAULT",
            "0 NULL",
            "?*STRAND_VALUE_NEW_DEFAULT",
            "0 NULL",
        ]),
    ])
});

static ATTRIBUTE: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*ATTR_DEF,
        &*VALUE,
        &def(&[
            "?CSTRAND_PARENT_TEMPLATE",
            "0 NULL",
            "?BSTRAND_ATTRIBUTE_CONNECTION_OUT",
            "0 NULL",
        ]),
    ])
});

static ATTR_CONNECTION: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "@BEGIN make_mandatory",
            "STRAND_GENERIC_FLAGS",
            "@END make_mandatory",
            "CSTRAND_REMOTE_CONNECTION",
            "0 NULL",
        ]),
    ])
});

static INDEX: Lazy<Bundledef> = Lazy::new(|| def(&["?CSTRAND_INDEX_POINTERS", "1 NULL"]));

static KEYED_NAME: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*INDEX,
        &def(&[
            "?*STRAND_INDEX_ENTRIES",
            "1 NULL",
            "@BEGIN template",
            "sCONT",
            "1 NULL",
            "@END template",
        ]),
    ])
});

static HOOK_STACK: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "uSTRAND_HOOK_NUMBER",
            "0 0",
            "?uSTRAND_HOOK_DETAILS",
            "0 0",
            "?CSTRAND_HOOK_CALLBACKS",
            "1 NULL",
        ]),
    ])
});

static CONTRACT: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "@BEGIN make_mandatory",
            "STRAND_GENERIC_NAME",
            "@END make_mandatory",
            "uSTRAND_CONTRACT_INTENTION",
            "0 0",
            "?sSTRAND_CONTRACT_CAPS",
            "1 NULL",
            "?BSTRAND_CONTRACT_ATTR_DEFS",
            "1 NULL",
            "?uSTRAND_CONTRACT_TRAJECTORIES",
            "0 0",
        ]),
    ])
});

static TRANSFORM: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "sSTRAND_TRANSFORM_CONTRACT",
            "0 NULL",
            "iSTRAND_TRANSFORM_STATUS",
            "0 0",
            "iSTRAND_TRANSFORM_RESULT",
            "0 0",
            "?sSTRAND_TRANSFORM_CAPS",
            "1 NULL",
            "?BSTRAND_TRANSFORM_ATTRIBUTES",
            "1 NULL",
        ]),
    ])
});

static OBJECT_INSTANCE: Lazy<Bundledef> = Lazy::new(|| {
    Bundledef::concat([
        &*DEF,
        &def(&[
            "USTRAND_OBJECT_TYPE",
            "0 0",
            "?USTRAND_OBJECT_SUBTYPE",
            "0 0",
            "iSTRAND_OBJECT_STATE",
            "0 0",
            "?BSTRAND_OBJECT_ATTRIBUTES",
            "1 NULL",
            "?BSTRAND_OBJECT_TRANSFORMS",
            "1 NULL",
        ]),
    ])
});

/// Bundledef text for a standard bundle type
pub fn standard_bundledef(bundle_type: &str) -> Option<&'static Bundledef> {
    let def: &'static Lazy<Bundledef> = match bundle_type {
        bundle_types::DEF => &DEF,
        bundle_types::VALUE => &VALUE,
        bundle_types::STRAND_DEF => &STRAND_DEF,
        bundle_types::BLUEPRINT => &BLUEPRINT,
        bundle_types::ATTR_DEF => &ATTR_DEF,
        bundle_types::ATTRIBUTE => &ATTRIBUTE,
        bundle_types::ATTR_CONNECTION => &ATTR_CONNECTION,
        bundle_types::INDEX => &INDEX,
        bundle_types::KEYED_NAME => &KEYED_NAME,
        bundle_types::HOOK_STACK => &HOOK_STACK,
        bundle_types::CONTRACT => &CONTRACT,
        bundle_types::TRANSFORM => &TRANSFORM,
        bundle_types::OBJECT_INSTANCE => &OBJECT_INSTANCE,
        _ => return None,
    };
    Some(Lazy::force(def))
}

/// Every standard bundle type, bases before derived types
pub const STANDARD_BUNDLE_TYPES: &[&str] = &[
    bundle_types::DEF,
    bundle_types::VALUE,
    bundle_types::STRAND_DEF,
    bundle_types::BLUEPRINT,
    bundle_types::ATTR_DEF,
    bundle_types::ATTRIBUTE,
    bundle_types::ATTR_CONNECTION,
    bundle_types::INDEX,
    bundle_types::KEYED_NAME,
    bundle_types::HOOK_STACK,
    bundle_types::CONTRACT,
    bundle_types::TRANSFORM,
    bundle_types::OBJECT_INSTANCE,
];

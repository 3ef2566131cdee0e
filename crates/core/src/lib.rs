//! Core types for the nirva bundle runtime
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: error hierarchy shared by the upper layers
//! - StrandType / StrandValue / Strand: typed strand contents with type lock-in
//! - Uid, BundleId, ObjectType, ObjectState: identities
//! - HookId, Intent, CapSet: the open vocabulary other code uses to ask the
//!   runtime for behaviour
//! - CondResult, RequestResponse, TxStatus, TxResult: numeric result codes
//! - AttrFlags, ConnFlags, MapFlags, TxFlags: attribute and transform flags
//! - Funcsig: packed function signatures
//! - Bundledef / Blueprint: schema text, validation, flattening, fingerprint
//! - BundleLike: named-strand access trait
//! - flag_set!: flag-set newtypes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod flags;

pub mod bundledef;
pub mod codes;
pub mod error;
pub mod funcsig;
pub mod hook_id;
pub mod intent;
pub mod standard;
pub mod traits;
pub mod types;
pub mod value;
pub mod vocab;

pub use bundledef::{short_name, ArrayFlags, Blueprint, Bundledef, BundledefItem, Directive, StrandDef};
pub use codes::{CondResult, RequestResponse, TxResult, TxStatus};
pub use error::{Error, NirvaError, Result};
pub use funcsig::Funcsig;
pub use hook_id::{HookDetails, HookId, HookPattern};
pub use intent::{caps, is_known_cap, CapSet, Intent, IntentCap};
pub use standard::{bundle_types, standard_bundledef, STANDARD_BUNDLE_TYPES};
pub use traits::BundleLike;
pub use types::{BundleId, ObjectState, ObjectType, Uid};
pub use value::{Strand, StrandType, StrandValue};
pub use vocab::{AttrFlags, ConnFlags, MapFlags, TxFlags};

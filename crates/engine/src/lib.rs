//! Runtime engine for nirva
//!
//! This crate builds the object model on top of the lower layers:
//! - Runtime: the context every entry point is handed (blueprints, store,
//!   thread pool, configuration)
//! - Bundle store: arena of schema-checked bundles with ownership trees
//! - Attributes: typed values with defaults and connections
//! - Contracts, transforms, trajectories, segments and functionals
//! - Conditions and cascades used to validate capacities and pick
//!   trajectories
//! - Object templates/instances and the playback plugin boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod condition;
pub mod config;
pub mod contract;
pub mod error;
pub mod marshal;
pub mod object;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod script;
pub mod store;
pub mod trajectory;
pub mod transform;

pub use attribute::{AttrDef, AttrGroup, Attribute};
pub use condition::{Branch, Cascade, CascadeNode, CondContext, Condition, Decision, Operand};
pub use config::RuntimeConfig;
pub use contract::{Contract, ContractBuilder};
pub use error::{TxError, TxOutcome};
pub use marshal::{ArraySize, Blob, NativeCall};
pub use object::{ObjectInstance, ObjectTemplate};
pub use plugin::{plugin_instance, select_palette, PlaybackPlugin};
pub use registry::BlueprintRegistry;
pub use runtime::Runtime;
pub use script::Script;
pub use store::{BundleBuilder, BundleGuard, BundleHandle, BundleStore, Container};
pub use trajectory::{
    AttrMap, Functional, FunctionalCategory, FunctionalKind, NextSegment, Segment, Trajectory,
};
pub use transform::Transform;

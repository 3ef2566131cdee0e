//! nirva - a bundle/attribute/hook/transform object runtime
//!
//! Everything is built on one generic key-value "bundle" structure whose
//! shape is declared by textual blueprints. On top of it sit typed
//! attributes with connections, hook stacks around every state edge, and
//! contracts whose transforms run as proc-threads on a shared pool.
//!
//! # Quick Start
//!
//! ```no_run
//! use nirva::{AttrDef, AttrMap, CapSet, Contract, Functional, Intent, Runtime, Segment,
//!     StrandType, Trajectory, TxResult, BundleLike};
//!
//! let rt = Runtime::new()?;
//! let add = Contract::builder("add", Intent::PROCESS)
//!     .input(AttrDef::with_default("a", 0))
//!     .input(AttrDef::with_default("b", 0))
//!     .output(AttrDef::new("out", StrandType::Int))
//!     .trajectory(Trajectory::new("sum").segment(Segment::new("compute").functional(
//!         Functional::native("add", |call| {
//!             let sum = call.int(0)? + call.int(1)?;
//!             call.set_param(2, vec![sum.into()])
//!         })
//!         .map(AttrMap::input("a", StrandType::Int))
//!         .map(AttrMap::input("b", StrandType::Int))
//!         .map(AttrMap::output("out", StrandType::Int)),
//!     )))
//!     .build()?;
//!
//! let tx = add.action(CapSet::new());
//! tx.set_input("a", 3)?;
//! tx.set_input("b", 4)?;
//! assert_eq!(tx.execute(&rt), TxResult::Success);
//! assert_eq!(tx.attrs().get_int("out")?, 7);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Layout
//!
//! - [`nirva_core`]: values, blueprints, vocabulary and result codes
//! - [`nirva_hooks`]: hook stacks and dispatch
//! - [`nirva_concurrency`]: thread pool and proc-threads
//! - [`nirva_engine`]: runtime context, bundle store, attributes, contracts
//!   and transforms, object instances

pub use nirva_concurrency::{
    CancellationToken, PoolConfig, PoolStats, ProcThread, ProcThreadBuilder, RefCounter, Step,
    ThreadAttrs, ThreadConfig, ThreadContext, ThreadError, ThreadPool, ThreadResult, ThreadSlot,
    ThreadState,
};
pub use nirva_core::{
    bundle_types, caps, short_name, AttrFlags, Blueprint, BundleId, BundleLike, Bundledef, BundledefItem,
    CapSet, CondResult, ConnFlags, Error, Funcsig, HookDetails, HookId, HookPattern, Intent,
    IntentCap, MapFlags, ObjectState, ObjectType, RequestResponse, Result, Strand, StrandDef,
    StrandType, StrandValue, TxFlags, TxResult, TxStatus, Uid, STANDARD_BUNDLE_TYPES,
};
pub use nirva_engine::{
    plugin_instance, select_palette, ArraySize, AttrDef, AttrGroup, AttrMap, Attribute, Blob,
    BlueprintRegistry, Branch, BundleHandle, BundleStore, Cascade, CascadeNode, CondContext, Condition,
    Contract, ContractBuilder, Decision, Functional, FunctionalCategory, FunctionalKind,
    NativeCall, NextSegment, ObjectInstance, ObjectTemplate, Operand, PlaybackPlugin, Runtime,
    RuntimeConfig, Script, Segment, Trajectory, Transform, TxError, TxOutcome,
};
pub use nirva_hooks::{
    AddMode, AddOutcome, Callback, HookDispatcher, HookEvent, HookHandle, HookPayload, RetryPolicy,
};

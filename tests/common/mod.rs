//! Shared helpers for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

pub use nirva::{
    AttrDef, AttrMap, BundleLike, Bundledef, CapSet, Contract, Functional, Intent, Runtime,
    RuntimeConfig, Segment, StrandType, StrandValue, Trajectory, TxResult, TxStatus,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness, once per binary.
///
/// Set `RUST_LOG=nirva=debug` to see it.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Runtime with a small pool
pub fn runtime() -> Arc<Runtime> {
    init_tracing();
    Runtime::with_config(RuntimeConfig {
        pool_min_threads: 2,
        pool_max_threads: 8,
        ..RuntimeConfig::default()
    })
    .expect("runtime")
}

/// Blueprint used across the bundle tests: a tree node with an owned child
/// array, a non-owning peer, a proxied payload, a weight and a readonly label
pub fn node_bundledef() -> Bundledef {
    Bundledef::new([
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
    ])
}

/// `add`: out = a + b through a native functional
pub fn adder() -> Arc<Contract> {
    Contract::builder("add", Intent::PROCESS)
        .input(AttrDef::with_default("a", 0))
        .input(AttrDef::with_default("b", 0))
        .output(AttrDef::new("out", StrandType::Int))
        .trajectory(
            Trajectory::new("sum").segment(
                Segment::new("compute").functional(
                    Functional::native("add", |call| {
                        let sum = call.int(0)? + call.int(1)?;
                        call.set_param(2, vec![sum.into()])
                    })
                    .map(AttrMap::input("a", StrandType::Int))
                    .map(AttrMap::input("b", StrandType::Int))
                    .map(AttrMap::output("out", StrandType::Int)),
                ),
            ),
        )
        .build()
        .expect("adder contract")
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

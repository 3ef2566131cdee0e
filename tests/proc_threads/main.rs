//! Proc thread and pool integration tests
//!
//! Run with: cargo test --test proc_threads

#[path = "../common/mod.rs"]
mod common;

mod lifecycle;
mod pool;
mod states;

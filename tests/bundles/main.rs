//! Bundle store integration tests
//!
//! Runs against a full runtime so the standard blueprints, the registry and
//! the store are wired together the way applications see them.

#[path = "../common/mod.rs"]
mod common;

mod blueprints;
mod concurrent;
mod store_ops;

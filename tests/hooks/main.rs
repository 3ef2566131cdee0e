//! Hook integration tests
//!
//! Hooks as objects see them: transform lifecycle ordering, attribute value
//! and connection hooks, object state vetoes.

#[path = "../common/mod.rs"]
mod common;

mod attributes;
mod lifecycle;
mod objects;

//! Contract and transform integration tests

#[path = "../common/mod.rs"]
mod common;

mod cascade;
mod control;
mod scenarios;

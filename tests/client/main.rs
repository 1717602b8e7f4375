//! Client integration tests
//!
//! Lifecycle of the client and the guarantees of the primitive cache and
//! builder, exercised against the in-process cluster.

#[path = "../common/mod.rs"]
mod common;

mod builder;
mod lifecycle;

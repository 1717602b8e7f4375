//! Primitive integration tests
//!
//! End-to-end behaviour of the primitives built through a client: routing
//! across partitions, cache coherence between clients, change events and the
//! blocking facades.

#[path = "../common/mod.rs"]
mod common;

mod blocking;
mod caching;
mod events;
mod map;
mod set;

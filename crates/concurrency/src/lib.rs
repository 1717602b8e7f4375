//! Concurrency layer for tessera
//!
//! This crate implements the execution model primitives run on:
//! - ExecutionContext: a serial, FIFO executor a primitive is pinned to
//! - ExecutionContextFactory: the bounded worker pool contexts are drawn from
//!
//! Network I/O never happens on a context; contexts only run the short,
//! non-blocking bookkeeping and callbacks of the primitives bound to them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;

pub use context::{ContextStats, ExecutionContext, ExecutionContextFactory};

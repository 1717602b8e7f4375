//! Session layer for tessera
//!
//! This crate implements the protocol every managed primitive is built on:
//! - ManagedSession: open / command / query / keep-alive / close against one
//!   partition, with the Connecting -> Connected -> Suspended -> Closed
//!   lifecycle and per-session command sequencing
//! - EventSubscription: a listener-driven, reconnecting event stream scoped to
//!   a session

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod managed;
pub mod subscription;

#[cfg(test)]
pub(crate) mod test_support;

pub use managed::{ManagedSession, SessionConfig};
pub use subscription::{EventListener, EventSubscription};

//! Core types for tessera
//!
//! This crate defines the foundational types shared by every layer:
//! - Error: the error taxonomy (transport, session, capability, timeout)
//! - PrimitiveName / PartitionGroupId / PartitionId / SessionId: identifiers
//! - Versioned: server-versioned values
//! - PrimitiveKind: the closed set of primitive types
//! - PrimitiveState / SessionState / StreamState: lifecycle states and listeners
//! - Serializer: pluggable value encoding
//! - ClientConfig: `tessera.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod serializer;
pub mod state;
pub mod types;

pub use config::{ClientConfig, ReadConsistency, CONFIG_FILE_NAME};
pub use error::{Error, ErrorCategory, Result};
pub use serializer::Serializer;
pub use state::{PrimitiveState, SessionState, StateListener, StreamListener, StreamState};
pub use types::{
    ListenerId, PartitionGroupId, PartitionId, PrimitiveKind, PrimitiveName, SessionId, Versioned,
};

//! Partition layer for tessera
//!
//! This crate defines how the client reaches the service:
//! - Partitioner: deterministic key -> partition routing (MurmurHash3 by default)
//! - Partition / PartitionGroup: an ordered, read-only view of a group's replica sets
//! - PartitionService: group discovery
//! - PartitionChannel: the transport contract every backend implements

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod group;
pub mod partitioner;

pub use channel::{
    CloseSessionRequest, EventStream, KeepAliveRequest, OpenSessionRequest, OpenSessionResponse,
    PartitionChannel, RequestHeader,
};
pub use group::{Partition, PartitionGroup, PartitionService, StaticPartitionService};
pub use partitioner::{default_partitioner, FnPartitioner, Murmur3Partitioner, Partitioner};

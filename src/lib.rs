//! Tessera - client runtime for distributed primitives
//!
//! Tessera gives applications counters, values, maps, sets and logs whose
//! state lives in a partitioned, replicated service. Every primitive talks to
//! the service through managed sessions that are kept alive, sequenced and
//! reconnected for you.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig::default(), partitions)?;
//! client.start()?;
//!
//! let hits = client.atomic_counter_builder("hits")?.get_async().await?;
//! hits.increment_and_get().await?;
//!
//! let users = client.map_builder::<String>("users")?.with_cache(true).get_async().await?;
//! users.put("alice", &"admin".to_string()).await?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: errors, identifiers, configuration
//! - `tessera-concurrency`: execution contexts
//! - `tessera-partition`: partitioners and the transport contract
//! - `tessera-session`: managed sessions and event subscriptions
//! - `tessera-primitives`: the primitives and their decorators
//! - `tessera-client`: the client, primitive cache and builders

pub use tessera_client::*;
pub use tessera_core::{
    ClientConfig, Error, ErrorCategory, ListenerId, PartitionGroupId, PartitionId, PrimitiveKind,
    PrimitiveName, PrimitiveState, ReadConsistency, Result, Serializer, StreamState, Versioned,
    CONFIG_FILE_NAME,
};
pub use tessera_partition::{
    default_partitioner, FnPartitioner, Murmur3Partitioner, Partition, PartitionChannel,
    PartitionGroup, PartitionService, Partitioner, StaticPartitionService,
};
pub use tessera_primitives::{
    AtomicCounter, AtomicValue, BlockingCounter, BlockingIterator, BlockingLog, BlockingMap,
    BlockingSet, BlockingValue, DistributedLog, DistributedMap, DistributedSet, LogEntry,
    MapEvent, MapEventType, SetEvent, SetEventType, Value, ValueEvent,
};

/// The primitive layer, including the in-process `testing` backend
pub mod primitives {
    pub use tessera_primitives::*;
}

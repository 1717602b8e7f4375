//! Distributed primitives for tessera
//!
//! Every primitive is layered the same way:
//! - **session**: the raw, byte-oriented primitive bound to one managed
//!   session on one partition
//! - **partitioned**: maps and sets spread over every partition of a group,
//!   routed per key by a `Partitioner`
//! - **caching** / **unmodifiable**: optional decorators adding a coherent
//!   read cache or rejecting mutations locally
//! - **typed**: the user-facing handles that encode values with a `Serializer`
//! - **blocking**: synchronous facades with a per-call timeout
//!
//! ## Events
//!
//! Listeners are registered through the asynchronous API and are invoked on
//! the execution context of the session that received the event, in server
//! order per partition.
//!
//! ## Testing
//!
//! [`testing::LocalCluster`] is an in-process implementation of the partition
//! contract with fault injection, used by this workspace's tests and
//! available to applications for their own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod blocking;
pub mod caching;
pub mod events;
pub mod partitioned;
pub mod protocol;
mod proxy;
pub mod session;
pub mod testing;
pub mod typed;
pub mod unmodifiable;

#[cfg(test)]
pub(crate) mod test_util;

pub use api::{
    AsyncAtomicCounter, AsyncAtomicMap, AsyncAtomicValue, AsyncDistributedLog,
    AsyncDistributedSet, AsyncPrimitive, LogEventListener, MapEventListener, SetEventListener,
    ValueEventListener,
};
pub use blocking::{
    BlockingCounter, BlockingExecutor, BlockingIterator, BlockingLog, BlockingMap, BlockingSet,
    BlockingValue,
};
pub use caching::{CacheStats, CachingMap, CachingSet, CachingValue};
pub use events::{LogEntry, MapEvent, MapEventType, SetEvent, SetEventType, ValueEvent};
pub use partitioned::{PartitionedMap, PartitionedSet};
pub use protocol::RawValue;
pub use session::{SessionCounter, SessionLog, SessionMap, SessionSet, SessionValue};
pub use typed::{
    AtomicCounter, AtomicValue, DistributedLog, DistributedMap, DistributedSet, Listener, Value,
};
pub use unmodifiable::{ReadOnlyCounter, ReadOnlyLog, ReadOnlyMap, ReadOnlySet, ReadOnlyValue};

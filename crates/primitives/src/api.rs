//! Capability traits of the raw (untyped) primitive layer
//!
//! Every primitive implementation, whether session-backed, partition-routed,
//! caching or read-only, implements [`AsyncPrimitive`] plus the trait of its
//! kind. Decorators wrap an `Arc<dyn Trait>` and implement the same trait, so
//! they stack in any order.
//!
//! Keys and set elements are routing strings; values are opaque bytes. Typed
//! handles in [`crate::typed`] add value encoding on top.

use crate::events::{LogEntry, MapEvent, SetEvent, ValueEvent};
use crate::protocol::RawValue;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::sync::Arc;
use tessera_core::{
    ListenerId, PrimitiveKind, PrimitiveName, PrimitiveState, Result, StateListener,
    StreamListener,
};

/// Map event callback
pub type MapEventListener = Arc<dyn Fn(&MapEvent) + Send + Sync>;
/// Value event callback
pub type ValueEventListener = Arc<dyn Fn(&ValueEvent) + Send + Sync>;
/// Set event callback
pub type SetEventListener = Arc<dyn Fn(&SetEvent) + Send + Sync>;
/// Log append callback
pub type LogEventListener = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Lifecycle surface shared by all primitives
#[async_trait]
pub trait AsyncPrimitive: Send + Sync {
    /// Primitive name
    fn name(&self) -> &PrimitiveName;

    /// Primitive kind
    fn kind(&self) -> PrimitiveKind;

    /// Current lifecycle state (the most degraded partition for sharded kinds)
    fn state(&self) -> PrimitiveState;

    /// Register a lifecycle listener
    fn add_state_listener(&self, listener: StateListener) -> ListenerId;

    /// Remove a lifecycle listener
    fn remove_state_listener(&self, id: ListenerId) -> bool;

    /// Register a listener for event stream loss and reopen
    ///
    /// Kinds without events never notify it.
    fn add_stream_listener(&self, listener: StreamListener) -> ListenerId;

    /// Remove an event stream listener
    fn remove_stream_listener(&self, id: ListenerId) -> bool;

    /// Reopen event streams abandoned after repeated failures
    fn resume_events(&self);

    /// Close the session(s). The primitive's server state is kept.
    async fn close(&self) -> Result<()>;

    /// Close the session(s) and destroy the primitive's server state
    async fn delete(&self) -> Result<()>;
}

/// Atomic 64-bit counter
#[async_trait]
pub trait AsyncAtomicCounter: AsyncPrimitive {
    /// Current value
    async fn get(&self) -> Result<i64>;

    /// Overwrite the value
    async fn set(&self, value: i64) -> Result<()>;

    /// Set to `update` if the current value is `expect`
    async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool>;

    /// Add `delta`, returning the new value
    async fn add_and_get(&self, delta: i64) -> Result<i64>;

    /// Add `delta`, returning the previous value
    async fn get_and_add(&self, delta: i64) -> Result<i64>;

    /// Add one, returning the new value
    async fn increment_and_get(&self) -> Result<i64> {
        self.add_and_get(1).await
    }

    /// Subtract one, returning the new value
    async fn decrement_and_get(&self) -> Result<i64> {
        self.add_and_get(-1).await
    }

    /// Add one, returning the previous value
    async fn get_and_increment(&self) -> Result<i64> {
        self.get_and_add(1).await
    }

    /// Subtract one, returning the previous value
    async fn get_and_decrement(&self) -> Result<i64> {
        self.get_and_add(-1).await
    }
}

/// Atomic versioned value
#[async_trait]
pub trait AsyncAtomicValue: AsyncPrimitive {
    /// Current value
    async fn get(&self) -> Result<Option<RawValue>>;

    /// Overwrite the value (`None` clears it)
    async fn set(&self, value: Option<Vec<u8>>) -> Result<()>;

    /// Overwrite, returning the previous value
    async fn get_and_set(&self, value: Option<Vec<u8>>) -> Result<Option<RawValue>>;

    /// Overwrite if the current bytes equal `expect`
    async fn compare_and_set(
        &self,
        expect: Option<Vec<u8>>,
        update: Option<Vec<u8>>,
    ) -> Result<bool>;

    /// Overwrite if the current version is `version`
    async fn compare_and_set_version(&self, version: u64, update: Option<Vec<u8>>)
        -> Result<bool>;

    /// Register a change listener; resolves once the event stream is open
    async fn add_listener(&self, listener: ValueEventListener) -> Result<ListenerId>;

    /// Remove a change listener
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// String-keyed map of versioned values
#[async_trait]
pub trait AsyncAtomicMap: AsyncPrimitive {
    /// Entry count
    async fn size(&self) -> Result<u64>;

    /// Whether the map has no entries
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// Whether `key` has an entry
    async fn contains_key(&self, key: &str) -> Result<bool>;

    /// Whether any entry holds `value`
    async fn contains_value(&self, value: &[u8]) -> Result<bool>;

    /// Entry for `key`
    async fn get(&self, key: &str) -> Result<Option<RawValue>>;

    /// Write `key`, returning the previous entry
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>>;

    /// Write `key` if absent, returning the existing entry if there was one
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>>;

    /// Write `key` if present, returning the replaced entry
    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>>;

    /// Remove `key`, returning the removed entry
    async fn remove(&self, key: &str) -> Result<Option<RawValue>>;

    /// Remove `key` if its entry is at `version`
    async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Keys, partition-major
    fn key_stream(&self) -> BoxStream<'static, Result<String>>;

    /// Entries, partition-major
    fn entry_stream(&self) -> BoxStream<'static, Result<(String, RawValue)>>;

    /// Collect [`key_stream`](Self::key_stream)
    async fn keys(&self) -> Result<Vec<String>> {
        self.key_stream().try_collect().await
    }

    /// Collect [`entry_stream`](Self::entry_stream)
    async fn entries(&self) -> Result<Vec<(String, RawValue)>> {
        self.entry_stream().try_collect().await
    }

    /// Register a change listener; resolves once the event stream is open
    async fn add_listener(&self, listener: MapEventListener) -> Result<ListenerId>;

    /// Remove a change listener
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Set of strings
#[async_trait]
pub trait AsyncDistributedSet: AsyncPrimitive {
    /// Element count
    async fn size(&self) -> Result<u64>;

    /// Whether the set is empty
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    /// Membership
    async fn contains(&self, element: &str) -> Result<bool>;

    /// Insert; true if the set changed
    async fn add(&self, element: &str) -> Result<bool>;

    /// Remove; true if the set changed
    async fn remove(&self, element: &str) -> Result<bool>;

    /// Remove every element
    async fn clear(&self) -> Result<()>;

    /// Whether every element is present
    async fn contains_all(&self, elements: &[String]) -> Result<bool>;

    /// Insert several; true if the set changed
    async fn add_all(&self, elements: &[String]) -> Result<bool>;

    /// Remove several; true if the set changed
    async fn remove_all(&self, elements: &[String]) -> Result<bool>;

    /// Keep only `elements`; true if the set changed
    async fn retain_all(&self, elements: &[String]) -> Result<bool>;

    /// Elements, partition-major
    fn element_stream(&self) -> BoxStream<'static, Result<String>>;

    /// Collect [`element_stream`](Self::element_stream)
    async fn elements(&self) -> Result<Vec<String>> {
        self.element_stream().try_collect().await
    }

    /// Register a change listener; resolves once the event stream is open
    async fn add_listener(&self, listener: SetEventListener) -> Result<ListenerId>;

    /// Remove a change listener
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Append-only log
#[async_trait]
pub trait AsyncDistributedLog: AsyncPrimitive {
    /// Append, returning the new entry's index
    async fn append(&self, value: Vec<u8>) -> Result<u64>;

    /// Entry at `index`
    async fn get(&self, index: u64) -> Result<Option<LogEntry>>;

    /// Entry count
    async fn size(&self) -> Result<u64>;

    /// Entries in index order
    fn entry_stream(&self) -> BoxStream<'static, Result<LogEntry>>;

    /// Collect [`entry_stream`](Self::entry_stream)
    async fn entries(&self) -> Result<Vec<LogEntry>> {
        self.entry_stream().try_collect().await
    }

    /// Register an append listener; resolves once the event stream is open
    async fn add_listener(&self, listener: LogEventListener) -> Result<ListenerId>;

    /// Remove an append listener
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// Implement [`AsyncPrimitive`] for a wrapper by forwarding to one field
macro_rules! delegate_async_primitive {
    ($ty:ty => $field:ident) => {
        #[async_trait::async_trait]
        impl $crate::api::AsyncPrimitive for $ty {
            fn name(&self) -> &tessera_core::PrimitiveName {
                self.$field.name()
            }

            fn kind(&self) -> tessera_core::PrimitiveKind {
                self.$field.kind()
            }

            fn state(&self) -> tessera_core::PrimitiveState {
                self.$field.state()
            }

            fn add_state_listener(
                &self,
                listener: tessera_core::StateListener,
            ) -> tessera_core::ListenerId {
                self.$field.add_state_listener(listener)
            }

            fn remove_state_listener(&self, id: tessera_core::ListenerId) -> bool {
                self.$field.remove_state_listener(id)
            }

            fn add_stream_listener(
                &self,
                listener: tessera_core::StreamListener,
            ) -> tessera_core::ListenerId {
                self.$field.add_stream_listener(listener)
            }

            fn remove_stream_listener(&self, id: tessera_core::ListenerId) -> bool {
                self.$field.remove_stream_listener(id)
            }

            fn resume_events(&self) {
                self.$field.resume_events()
            }

            async fn close(&self) -> tessera_core::Result<()> {
                self.$field.close().await
            }

            async fn delete(&self) -> tessera_core::Result<()> {
                self.$field.delete().await
            }
        }
    };
}

pub(crate) use delegate_async_primitive;

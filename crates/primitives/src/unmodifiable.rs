//! Read-only decorators
//!
//! Every mutating call fails with [`Error::Unsupported`] before anything is
//! sent. Reads, iteration, listeners and `close` pass through; `delete` is a
//! mutation and is rejected too.

use crate::api::{
    AsyncAtomicCounter, AsyncAtomicMap, AsyncAtomicValue, AsyncDistributedLog,
    AsyncDistributedSet, AsyncPrimitive, LogEventListener, MapEventListener, SetEventListener,
    ValueEventListener,
};
use crate::events::LogEntry;
use crate::protocol::RawValue;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tessera_core::{
    Error, ListenerId, PrimitiveKind, PrimitiveName, PrimitiveState, Result, StateListener,
    StreamListener,
};

fn rejected<T>(name: &PrimitiveName, operation: &str) -> Result<T> {
    Err(Error::unsupported(format!(
        "{} on read-only {}",
        operation, name
    )))
}

macro_rules! read_only_primitive {
    ($ty:ident, $inner:ty) => {
        impl $ty {
            /// Wrap `inner`
            pub fn new(inner: Arc<$inner>) -> Self {
                Self { inner }
            }
        }

        #[async_trait]
        impl AsyncPrimitive for $ty {
            fn name(&self) -> &PrimitiveName {
                self.inner.name()
            }

            fn kind(&self) -> PrimitiveKind {
                self.inner.kind()
            }

            fn state(&self) -> PrimitiveState {
                self.inner.state()
            }

            fn add_state_listener(&self, listener: StateListener) -> ListenerId {
                self.inner.add_state_listener(listener)
            }

            fn remove_state_listener(&self, id: ListenerId) -> bool {
                self.inner.remove_state_listener(id)
            }

            fn add_stream_listener(&self, listener: StreamListener) -> ListenerId {
                self.inner.add_stream_listener(listener)
            }

            fn remove_stream_listener(&self, id: ListenerId) -> bool {
                self.inner.remove_stream_listener(id)
            }

            fn resume_events(&self) {
                self.inner.resume_events()
            }

            async fn close(&self) -> Result<()> {
                self.inner.close().await
            }

            async fn delete(&self) -> Result<()> {
                rejected(self.name(), "delete")
            }
        }
    };
}

/// Read-only counter
pub struct ReadOnlyCounter {
    inner: Arc<dyn AsyncAtomicCounter>,
}

read_only_primitive!(ReadOnlyCounter, dyn AsyncAtomicCounter);

#[async_trait]
impl AsyncAtomicCounter for ReadOnlyCounter {
    async fn get(&self) -> Result<i64> {
        self.inner.get().await
    }

    async fn set(&self, _value: i64) -> Result<()> {
        rejected(self.name(), "counter.set")
    }

    async fn compare_and_set(&self, _expect: i64, _update: i64) -> Result<bool> {
        rejected(self.name(), "counter.compare_and_set")
    }

    async fn add_and_get(&self, _delta: i64) -> Result<i64> {
        rejected(self.name(), "counter.add_and_get")
    }

    async fn get_and_add(&self, _delta: i64) -> Result<i64> {
        rejected(self.name(), "counter.get_and_add")
    }
}

/// Read-only value
pub struct ReadOnlyValue {
    inner: Arc<dyn AsyncAtomicValue>,
}

read_only_primitive!(ReadOnlyValue, dyn AsyncAtomicValue);

#[async_trait]
impl AsyncAtomicValue for ReadOnlyValue {
    async fn get(&self) -> Result<Option<RawValue>> {
        self.inner.get().await
    }

    async fn set(&self, _value: Option<Vec<u8>>) -> Result<()> {
        rejected(self.name(), "value.set")
    }

    async fn get_and_set(&self, _value: Option<Vec<u8>>) -> Result<Option<RawValue>> {
        rejected(self.name(), "value.get_and_set")
    }

    async fn compare_and_set(
        &self,
        _expect: Option<Vec<u8>>,
        _update: Option<Vec<u8>>,
    ) -> Result<bool> {
        rejected(self.name(), "value.compare_and_set")
    }

    async fn compare_and_set_version(
        &self,
        _version: u64,
        _update: Option<Vec<u8>>,
    ) -> Result<bool> {
        rejected(self.name(), "value.compare_and_set_version")
    }

    async fn add_listener(&self, listener: ValueEventListener) -> Result<ListenerId> {
        self.inner.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Read-only map
pub struct ReadOnlyMap {
    inner: Arc<dyn AsyncAtomicMap>,
}

read_only_primitive!(ReadOnlyMap, dyn AsyncAtomicMap);

#[async_trait]
impl AsyncAtomicMap for ReadOnlyMap {
    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        self.inner.contains_key(key).await
    }

    async fn contains_value(&self, value: &[u8]) -> Result<bool> {
        self.inner.contains_value(value).await
    }

    async fn get(&self, key: &str) -> Result<Option<RawValue>> {
        self.inner.get(key).await
    }

    async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<Option<RawValue>> {
        rejected(self.name(), "map.put")
    }

    async fn put_if_absent(&self, _key: &str, _value: Vec<u8>) -> Result<Option<RawValue>> {
        rejected(self.name(), "map.put_if_absent")
    }

    async fn replace(&self, _key: &str, _value: Vec<u8>) -> Result<Option<RawValue>> {
        rejected(self.name(), "map.replace")
    }

    async fn remove(&self, _key: &str) -> Result<Option<RawValue>> {
        rejected(self.name(), "map.remove")
    }

    async fn remove_if_version(&self, _key: &str, _version: u64) -> Result<bool> {
        rejected(self.name(), "map.remove_if_version")
    }

    async fn clear(&self) -> Result<()> {
        rejected(self.name(), "map.clear")
    }

    fn key_stream(&self) -> BoxStream<'static, Result<String>> {
        self.inner.key_stream()
    }

    fn entry_stream(&self) -> BoxStream<'static, Result<(String, RawValue)>> {
        self.inner.entry_stream()
    }

    async fn add_listener(&self, listener: MapEventListener) -> Result<ListenerId> {
        self.inner.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Read-only set
pub struct ReadOnlySet {
    inner: Arc<dyn AsyncDistributedSet>,
}

read_only_primitive!(ReadOnlySet, dyn AsyncDistributedSet);

#[async_trait]
impl AsyncDistributedSet for ReadOnlySet {
    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    async fn contains(&self, element: &str) -> Result<bool> {
        self.inner.contains(element).await
    }

    async fn add(&self, _element: &str) -> Result<bool> {
        rejected(self.name(), "set.add")
    }

    async fn remove(&self, _element: &str) -> Result<bool> {
        rejected(self.name(), "set.remove")
    }

    async fn clear(&self) -> Result<()> {
        rejected(self.name(), "set.clear")
    }

    async fn contains_all(&self, elements: &[String]) -> Result<bool> {
        self.inner.contains_all(elements).await
    }

    async fn add_all(&self, _elements: &[String]) -> Result<bool> {
        rejected(self.name(), "set.add_all")
    }

    async fn remove_all(&self, _elements: &[String]) -> Result<bool> {
        rejected(self.name(), "set.remove_all")
    }

    async fn retain_all(&self, _elements: &[String]) -> Result<bool> {
        rejected(self.name(), "set.retain_all")
    }

    fn element_stream(&self) -> BoxStream<'static, Result<String>> {
        self.inner.element_stream()
    }

    async fn add_listener(&self, listener: SetEventListener) -> Result<ListenerId> {
        self.inner.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Read-only log
pub struct ReadOnlyLog {
    inner: Arc<dyn AsyncDistributedLog>,
}

read_only_primitive!(ReadOnlyLog, dyn AsyncDistributedLog);

#[async_trait]
impl AsyncDistributedLog for ReadOnlyLog {
    async fn append(&self, _value: Vec<u8>) -> Result<u64> {
        rejected(self.name(), "log.append")
    }

    async fn get(&self, index: u64) -> Result<Option<LogEntry>> {
        self.inner.get(index).await
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    fn entry_stream(&self) -> BoxStream<'static, Result<LogEntry>> {
        self.inner.entry_stream()
    }

    async fn add_listener(&self, listener: LogEventListener) -> Result<ListenerId> {
        self.inner.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionCounter, SessionMap, SessionSet};
    use crate::test_util::Harness;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_map_mutations_never_reach_the_partition() {
        let harness = Harness::new(1);
        let inner = SessionMap::new(harness.open("config", PrimitiveKind::Map, 0).await);
        inner.put("a", vec![1]).await.unwrap();
        let map = ReadOnlyMap::new(Arc::new(inner));
        let partition = harness.cluster.partition(0).unwrap();
        let before = partition.stats().commands;

        for result in [
            map.put("a", vec![2]).await,
            map.put_if_absent("b", vec![2]).await,
            map.replace("a", vec![2]).await,
            map.remove("a").await,
        ] {
            assert!(matches!(result, Err(Error::Unsupported { .. })));
        }
        assert!(matches!(map.clear().await, Err(Error::Unsupported { .. })));
        assert!(matches!(map.delete().await, Err(Error::Unsupported { .. })));
        assert_eq!(partition.stats().commands, before);

        assert_eq!(map.get("a").await.unwrap().unwrap().value, vec![1]);
        assert_eq!(map.keys().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counter_reads_pass_through() {
        let harness = Harness::new(1);
        let inner = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);
        inner.set(5).await.unwrap();
        let counter = ReadOnlyCounter::new(Arc::new(inner));

        assert_eq!(counter.get().await.unwrap(), 5);
        let err = counter.increment_and_get().await.unwrap_err();
        assert_eq!(
            err,
            Error::unsupported("counter.add_and_get on read-only test/hits")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_is_allowed() {
        let harness = Harness::new(1);
        let inner = SessionSet::new(harness.open("tags", PrimitiveKind::Set, 0).await);
        let set = ReadOnlySet::new(Arc::new(inner));
        assert!(matches!(set.add("x").await, Err(Error::Unsupported { .. })));
        set.close().await.unwrap();
        assert_eq!(set.state(), PrimitiveState::Closed);
    }
}

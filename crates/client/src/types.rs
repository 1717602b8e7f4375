//! Primitive kinds the builder can assemble
//!
//! Each marker type ties a [`PrimitiveKind`] to its asynchronous handle, its
//! blocking facade and the recipe that stacks session, partition router,
//! cache and read-only layers into one instance. Counter, value and log live
//! on the single partition their name routes to; map and set are sharded
//! across every partition of the group.

use crate::builder::BuildRequest;
use crate::cache::Cacheable;
use futures::future::{BoxFuture, FutureExt};
use std::marker::PhantomData;
use std::sync::Arc;
use tessera_core::{ListenerId, PrimitiveKind, Result, StateListener};
use tessera_primitives::{
    AsyncAtomicCounter, AsyncAtomicMap, AsyncAtomicValue, AsyncDistributedLog,
    AsyncDistributedSet, AsyncPrimitive, AtomicCounter, AtomicValue, BlockingCounter,
    BlockingExecutor, BlockingLog, BlockingMap, BlockingSet, BlockingValue, CachingMap,
    CachingSet, CachingValue, DistributedLog, DistributedMap, DistributedSet, PartitionedMap,
    PartitionedSet, ReadOnlyCounter, ReadOnlyLog, ReadOnlyMap, ReadOnlySet, ReadOnlyValue,
    SessionCounter, SessionLog, SessionMap, SessionSet, SessionValue, Value,
};
use tracing::warn;

/// A buildable primitive kind
pub trait PrimitiveType: Send + Sync + 'static {
    /// Asynchronous handle
    type Async: Cacheable;
    /// Blocking facade over [`Self::Async`]
    type Blocking;

    /// Kind sent when opening sessions
    const KIND: PrimitiveKind;

    /// Assemble one instance. Sessions opened before a failure are closed.
    fn build(request: BuildRequest) -> BoxFuture<'static, Result<Self::Async>>;

    /// Wrap an instance for synchronous callers
    fn blocking(primitive: Self::Async, executor: BlockingExecutor) -> Self::Blocking;
}

/// Pass `result` through, closing `primitive` if it is an error
async fn close_on_error<P, T>(primitive: &P, result: Result<T>) -> Result<T>
where
    P: AsyncPrimitive + ?Sized,
{
    if let Err(e) = &result {
        if let Err(close) = primitive.close().await {
            warn!(target: "tessera::client", name = %primitive.name(), error = %close, "Failed to release primitive after build error: {}", e);
        }
    }
    result
}

macro_rules! cacheable {
    ($ty:ty $(, $param:ident)?) => {
        impl$(<$param: Value>)? Cacheable for $ty {
            fn add_state_listener(&self, listener: StateListener) -> ListenerId {
                self.add_state_listener(listener)
            }

            fn close(&self) -> BoxFuture<'static, Result<()>> {
                let primitive = self.clone();
                async move { primitive.close().await }.boxed()
            }
        }
    };
}

cacheable!(AtomicCounter);
cacheable!(AtomicValue<V>, V);
cacheable!(DistributedMap<V>, V);
cacheable!(DistributedSet);
cacheable!(DistributedLog<V>, V);

/// Atomic counter
pub struct AtomicCounterType;

impl PrimitiveType for AtomicCounterType {
    type Async = AtomicCounter;
    type Blocking = BlockingCounter;

    const KIND: PrimitiveKind = PrimitiveKind::Counter;

    fn build(request: BuildRequest) -> BoxFuture<'static, Result<AtomicCounter>> {
        async move {
            let session = request.open_routed().await?;
            let mut counter: Arc<dyn AsyncAtomicCounter> = Arc::new(SessionCounter::new(session));
            if request.read_only() {
                counter = Arc::new(ReadOnlyCounter::new(counter));
            }
            Ok(AtomicCounter::new(counter))
        }
        .boxed()
    }

    fn blocking(primitive: AtomicCounter, executor: BlockingExecutor) -> BlockingCounter {
        BlockingCounter::new(primitive, executor)
    }
}

/// Atomic value holding a `V`
pub struct AtomicValueType<V>(PhantomData<fn() -> V>);

impl<V: Value> PrimitiveType for AtomicValueType<V> {
    type Async = AtomicValue<V>;
    type Blocking = BlockingValue<V>;

    const KIND: PrimitiveKind = PrimitiveKind::Value;

    fn build(request: BuildRequest) -> BoxFuture<'static, Result<AtomicValue<V>>> {
        async move {
            let session = request.open_routed().await?;
            let mut value: Arc<dyn AsyncAtomicValue> = Arc::new(SessionValue::new(session));
            if request.cache_enabled() {
                let cached = close_on_error(value.as_ref(), CachingValue::create(Arc::clone(&value)).await).await?;
                value = Arc::new(cached);
            }
            if request.read_only() {
                value = Arc::new(ReadOnlyValue::new(value));
            }
            Ok(AtomicValue::new(value, request.serializer()))
        }
        .boxed()
    }

    fn blocking(primitive: AtomicValue<V>, executor: BlockingExecutor) -> BlockingValue<V> {
        BlockingValue::new(primitive, executor)
    }
}

/// Map from string keys to `V`, sharded by key
pub struct MapType<V>(PhantomData<fn() -> V>);

impl<V: Value> PrimitiveType for MapType<V> {
    type Async = DistributedMap<V>;
    type Blocking = BlockingMap<V>;

    const KIND: PrimitiveKind = PrimitiveKind::Map;

    fn build(request: BuildRequest) -> BoxFuture<'static, Result<DistributedMap<V>>> {
        async move {
            let partitions = request
                .open_all()
                .await?
                .into_iter()
                .map(|(id, session)| (id, Arc::new(SessionMap::new(session)) as Arc<dyn AsyncAtomicMap>))
                .collect();
            let mut map: Arc<dyn AsyncAtomicMap> = Arc::new(PartitionedMap::new(
                request.name().clone(),
                Arc::clone(request.partitioner()),
                partitions,
            )?);
            if request.cache_enabled() {
                let cached = CachingMap::create(Arc::clone(&map), request.cache_size()).await;
                map = Arc::new(close_on_error(map.as_ref(), cached).await?);
            }
            if request.read_only() {
                map = Arc::new(ReadOnlyMap::new(map));
            }
            Ok(DistributedMap::new(map, request.serializer()))
        }
        .boxed()
    }

    fn blocking(primitive: DistributedMap<V>, executor: BlockingExecutor) -> BlockingMap<V> {
        BlockingMap::new(primitive, executor)
    }
}

/// Set of strings, sharded by element
pub struct SetType;

impl PrimitiveType for SetType {
    type Async = DistributedSet;
    type Blocking = BlockingSet;

    const KIND: PrimitiveKind = PrimitiveKind::Set;

    fn build(request: BuildRequest) -> BoxFuture<'static, Result<DistributedSet>> {
        async move {
            let partitions = request
                .open_all()
                .await?
                .into_iter()
                .map(|(id, session)| (id, Arc::new(SessionSet::new(session)) as Arc<dyn AsyncDistributedSet>))
                .collect();
            let mut set: Arc<dyn AsyncDistributedSet> = Arc::new(PartitionedSet::new(
                request.name().clone(),
                Arc::clone(request.partitioner()),
                partitions,
            )?);
            if request.cache_enabled() {
                let cached = CachingSet::create(Arc::clone(&set), request.cache_size()).await;
                set = Arc::new(close_on_error(set.as_ref(), cached).await?);
            }
            if request.read_only() {
                set = Arc::new(ReadOnlySet::new(set));
            }
            Ok(DistributedSet::new(set))
        }
        .boxed()
    }

    fn blocking(primitive: DistributedSet, executor: BlockingExecutor) -> BlockingSet {
        BlockingSet::new(primitive, executor)
    }
}

/// Append-only log of `V`
pub struct LogType<V>(PhantomData<fn() -> V>);

impl<V: Value> PrimitiveType for LogType<V> {
    type Async = DistributedLog<V>;
    type Blocking = BlockingLog<V>;

    const KIND: PrimitiveKind = PrimitiveKind::Log;

    fn build(request: BuildRequest) -> BoxFuture<'static, Result<DistributedLog<V>>> {
        async move {
            let session = request.open_routed().await?;
            let mut log: Arc<dyn AsyncDistributedLog> = Arc::new(SessionLog::new(session));
            if request.read_only() {
                log = Arc::new(ReadOnlyLog::new(log));
            }
            Ok(DistributedLog::new(log, request.serializer()))
        }
        .boxed()
    }

    fn blocking(primitive: DistributedLog<V>, executor: BlockingExecutor) -> BlockingLog<V> {
        BlockingLog::new(primitive, executor)
    }
}

//! Key-sharded primitives spanning every partition of a group
//!
//! A [`PartitionedMap`] or [`PartitionedSet`] holds one backing primitive per
//! partition. Keyed operations hash the key with the group's
//! [`Partitioner`] and go to exactly one partition; whole-collection
//! operations fan out and aggregate:
//!
//! | Operation | Aggregation |
//! |-----------|-------------|
//! | `size` | sum |
//! | `contains_value` | OR, resolves on the first `true` |
//! | `clear` | parallel, completes when every partition acknowledged |
//! | iteration | partition-major in partition id order |
//!
//! The composite state is the most degraded partition state. The composite
//! event stream is `Lost` while any partition's stream is down and `Open`
//! once all of them are back.

use crate::api::{
    delegate_async_primitive, AsyncAtomicMap, AsyncDistributedSet, AsyncPrimitive,
    MapEventListener, SetEventListener,
};
use crate::protocol::RawValue;
use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use futures::stream::{self, BoxStream, FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tessera_core::{
    Error, ListenerId, PartitionId, PrimitiveKind, PrimitiveName, PrimitiveState, Result,
    StateListener, StreamListener, StreamState,
};
use tessera_partition::Partitioner;
use tracing::debug;

/// Tracks per-partition states and notifies on composite changes
struct CompositeState {
    inner: Mutex<CompositeInner>,
}

struct CompositeInner {
    states: Vec<PrimitiveState>,
    current: PrimitiveState,
    listeners: Vec<(ListenerId, StateListener)>,
}

impl CompositeState {
    fn new(states: Vec<PrimitiveState>) -> Self {
        let current = PrimitiveState::worst(states.iter().copied());
        Self {
            inner: Mutex::new(CompositeInner {
                states,
                current,
                listeners: Vec::new(),
            }),
        }
    }

    fn current(&self) -> PrimitiveState {
        self.inner.lock().current
    }

    fn update(&self, index: usize, state: PrimitiveState) {
        let (changed, listeners) = {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.states.get_mut(index) {
                *slot = state;
            }
            let next = PrimitiveState::worst(inner.states.iter().copied());
            if next == inner.current {
                return;
            }
            inner.current = next;
            let listeners: Vec<StateListener> =
                inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (next, listeners)
        };
        for listener in listeners {
            listener(changed);
        }
    }

    fn add(&self, listener: StateListener) -> ListenerId {
        let id = ListenerId::next();
        self.inner.lock().listeners.push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(existing, _)| *existing != id);
        inner.listeners.len() != before
    }
}

/// Tracks per-partition stream liveness
struct CompositeStream {
    inner: Mutex<CompositeStreamInner>,
}

struct CompositeStreamInner {
    lost: Vec<bool>,
    listeners: Vec<(ListenerId, StreamListener)>,
}

impl CompositeStream {
    fn new(partitions: usize) -> Self {
        Self {
            inner: Mutex::new(CompositeStreamInner {
                lost: vec![false; partitions],
                listeners: Vec::new(),
            }),
        }
    }

    /// Every loss is forwarded; a reopen only when no partition is still down
    fn update(&self, index: usize, state: StreamState) {
        let listeners: Vec<StreamListener> = {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.lost.get_mut(index) {
                *slot = state == StreamState::Lost;
            }
            if state == StreamState::Open && inner.lost.iter().any(|lost| *lost) {
                return;
            }
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            listener(state);
        }
    }

    fn add(&self, listener: StreamListener) -> ListenerId {
        let id = ListenerId::next();
        self.inner.lock().listeners.push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(existing, _)| *existing != id);
        inner.listeners.len() != before
    }
}

/// Routing and fan-out shared by the partitioned kinds
struct Router<P: ?Sized> {
    name: PrimitiveName,
    kind: PrimitiveKind,
    partitioner: Arc<dyn Partitioner>,
    ids: Vec<PartitionId>,
    partitions: Vec<Arc<P>>,
    state: Arc<CompositeState>,
    stream: Arc<CompositeStream>,
    event_listeners: Mutex<HashMap<ListenerId, Vec<(usize, ListenerId)>>>,
}

impl<P: AsyncPrimitive + ?Sized> Router<P> {
    fn new(
        name: PrimitiveName,
        kind: PrimitiveKind,
        partitioner: Arc<dyn Partitioner>,
        mut partitions: Vec<(PartitionId, Arc<P>)>,
    ) -> Result<Self> {
        if partitions.is_empty() {
            return Err(Error::NoPartitions {
                group: name.to_string(),
            });
        }
        partitions.sort_by_key(|(id, _)| *id);
        let (ids, partitions): (Vec<_>, Vec<_>) = partitions.into_iter().unzip();

        let state = Arc::new(CompositeState::new(
            partitions.iter().map(|p| p.state()).collect(),
        ));
        for (index, partition) in partitions.iter().enumerate() {
            let composite = Arc::clone(&state);
            partition.add_state_listener(Arc::new(move |s| composite.update(index, s)));
        }
        let stream = Arc::new(CompositeStream::new(partitions.len()));
        for (index, partition) in partitions.iter().enumerate() {
            let composite = Arc::clone(&stream);
            partition.add_stream_listener(Arc::new(move |s: StreamState| composite.update(index, s)));
        }

        Ok(Self {
            name,
            kind,
            partitioner,
            ids,
            partitions,
            state,
            stream,
            event_listeners: Mutex::new(HashMap::new()),
        })
    }

    fn index_of(&self, key: &str) -> Result<usize> {
        let id = self.partitioner.partition(key, &self.ids)?;
        self.ids.binary_search(&id).map_err(|_| {
            Error::internal(format!(
                "partitioner {:?} chose {} outside of {:?}",
                self.partitioner, id, self.ids
            ))
        })
    }

    fn route(&self, key: &str) -> Result<&Arc<P>> {
        let index = self.index_of(key)?;
        debug!(target: "tessera::router", primitive = %self.name, key, partition = %self.ids[index], "Routed");
        Ok(&self.partitions[index])
    }

    /// Group `keys` by owning partition index
    fn group(&self, keys: &[String]) -> Result<BTreeMap<usize, Vec<String>>> {
        let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for key in keys {
            grouped.entry(self.index_of(key)?).or_default().push(key.clone());
        }
        Ok(grouped)
    }

    fn partitions(&self) -> &[Arc<P>] {
        &self.partitions
    }

    /// Concatenate per-partition streams in partition id order
    fn concat<T, F>(&self, per_partition: F) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
        F: Fn(&Arc<P>) -> BoxStream<'static, Result<T>> + Send + 'static,
        P: 'static,
    {
        stream::iter(self.partitions.clone())
            .flat_map(move |partition| per_partition(&partition))
            .boxed()
    }

    /// Register on every partition; on failure the partial registration is
    /// rolled back with `remove`
    async fn add_event_listener<F, Fut, R>(&self, register: F, remove: R) -> Result<ListenerId>
    where
        F: Fn(Arc<P>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<ListenerId>> + Send,
        R: Fn(&P, ListenerId) -> bool + Send + Sync,
        P: 'static,
    {
        let mut registered = Vec::with_capacity(self.partitions.len());
        for (index, partition) in self.partitions.iter().enumerate() {
            match register(Arc::clone(partition)).await {
                Ok(id) => registered.push((index, id)),
                Err(e) => {
                    self.unregister(&registered, remove);
                    return Err(e);
                }
            }
        }
        let id = ListenerId::next();
        self.event_listeners.lock().insert(id, registered);
        Ok(id)
    }

    fn remove_event_listener(&self, id: ListenerId, remove: impl Fn(&P, ListenerId) -> bool) -> bool {
        let registered = self.event_listeners.lock().remove(&id);
        match registered {
            Some(registered) => {
                self.unregister(&registered, remove);
                true
            }
            None => false,
        }
    }

    fn unregister(&self, registered: &[(usize, ListenerId)], remove: impl Fn(&P, ListenerId) -> bool) {
        for (index, id) in registered {
            remove(&self.partitions[*index], *id);
        }
    }

    fn name(&self) -> &PrimitiveName {
        &self.name
    }

    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn state(&self) -> PrimitiveState {
        self.state.current()
    }

    fn add_state_listener(&self, listener: StateListener) -> ListenerId {
        self.state.add(listener)
    }

    fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.state.remove(id)
    }

    fn add_stream_listener(&self, listener: StreamListener) -> ListenerId {
        self.stream.add(listener)
    }

    fn remove_stream_listener(&self, id: ListenerId) -> bool {
        self.stream.remove(id)
    }

    fn resume_events(&self) {
        for partition in &self.partitions {
            partition.resume_events();
        }
    }

    async fn close(&self) -> Result<()> {
        first_error(join_all(self.partitions.iter().map(|p| p.close())).await)
    }

    async fn delete(&self) -> Result<()> {
        first_error(join_all(self.partitions.iter().map(|p| p.delete())).await)
    }
}

/// Every partition is closed even if some fail; the first failure is reported
fn first_error(results: Vec<Result<()>>) -> Result<()> {
    results.into_iter().collect()
}

/// Map sharded by key across a partition group
pub struct PartitionedMap {
    router: Router<dyn AsyncAtomicMap>,
}

impl PartitionedMap {
    /// Compose per-partition maps. `partitions` may come in any order.
    pub fn new(
        name: PrimitiveName,
        partitioner: Arc<dyn Partitioner>,
        partitions: Vec<(PartitionId, Arc<dyn AsyncAtomicMap>)>,
    ) -> Result<Self> {
        Ok(Self {
            router: Router::new(name, PrimitiveKind::Map, partitioner, partitions)?,
        })
    }

    /// Partition ids in routing order
    pub fn partition_ids(&self) -> &[PartitionId] {
        &self.router.ids
    }
}

delegate_async_primitive!(PartitionedMap => router);

#[async_trait]
impl AsyncAtomicMap for PartitionedMap {
    async fn size(&self) -> Result<u64> {
        let sizes = try_join_all(self.router.partitions().iter().map(|p| p.size())).await?;
        Ok(sizes.into_iter().sum())
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        self.router.route(key)?.contains_key(key).await
    }

    async fn contains_value(&self, value: &[u8]) -> Result<bool> {
        let mut pending: FuturesUnordered<_> = self
            .router
            .partitions()
            .iter()
            .map(|p| p.contains_value(value))
            .collect();
        while let Some(found) = pending.next().await {
            if found? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get(&self, key: &str) -> Result<Option<RawValue>> {
        self.router.route(key)?.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        self.router.route(key)?.put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        self.router.route(key)?.put_if_absent(key, value).await
    }

    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        self.router.route(key)?.replace(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<Option<RawValue>> {
        self.router.route(key)?.remove(key).await
    }

    async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool> {
        self.router.route(key)?.remove_if_version(key, version).await
    }

    async fn clear(&self) -> Result<()> {
        debug!(target: "tessera::router", primitive = %self.router.name, partitions = self.router.ids.len(), "Clearing all partitions");
        try_join_all(self.router.partitions().iter().map(|p| p.clear())).await?;
        Ok(())
    }

    fn key_stream(&self) -> BoxStream<'static, Result<String>> {
        self.router.concat(|p| p.key_stream())
    }

    fn entry_stream(&self) -> BoxStream<'static, Result<(String, RawValue)>> {
        self.router.concat(|p| p.entry_stream())
    }

    async fn add_listener(&self, listener: MapEventListener) -> Result<ListenerId> {
        self.router
            .add_event_listener(
                move |p| {
                    let listener = Arc::clone(&listener);
                    async move { p.add_listener(listener).await }
                },
                |p, inner| p.remove_listener(inner),
            )
            .await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.router
            .remove_event_listener(id, |p, inner| p.remove_listener(inner))
    }
}

/// Set sharded by element across a partition group
pub struct PartitionedSet {
    router: Router<dyn AsyncDistributedSet>,
}

impl PartitionedSet {
    /// Compose per-partition sets. `partitions` may come in any order.
    pub fn new(
        name: PrimitiveName,
        partitioner: Arc<dyn Partitioner>,
        partitions: Vec<(PartitionId, Arc<dyn AsyncDistributedSet>)>,
    ) -> Result<Self> {
        Ok(Self {
            router: Router::new(name, PrimitiveKind::Set, partitioner, partitions)?,
        })
    }

    /// Partition ids in routing order
    pub fn partition_ids(&self) -> &[PartitionId] {
        &self.router.ids
    }

    /// Apply `op` to each partition owning some of `elements`, OR-ing the results
    async fn any_grouped<'a, F, Fut>(&'a self, elements: &[String], op: F) -> Result<bool>
    where
        F: Fn(&'a Arc<dyn AsyncDistributedSet>, Vec<String>) -> Fut,
        Fut: Future<Output = Result<bool>> + Send + 'a,
    {
        let grouped = self.router.group(elements)?;
        let results = try_join_all(
            grouped
                .into_iter()
                .map(|(index, subset)| op(&self.router.partitions()[index], subset)),
        )
        .await?;
        Ok(results.into_iter().any(|changed| changed))
    }
}

delegate_async_primitive!(PartitionedSet => router);

#[async_trait]
impl AsyncDistributedSet for PartitionedSet {
    async fn size(&self) -> Result<u64> {
        let sizes = try_join_all(self.router.partitions().iter().map(|p| p.size())).await?;
        Ok(sizes.into_iter().sum())
    }

    async fn contains(&self, element: &str) -> Result<bool> {
        self.router.route(element)?.contains(element).await
    }

    async fn add(&self, element: &str) -> Result<bool> {
        self.router.route(element)?.add(element).await
    }

    async fn remove(&self, element: &str) -> Result<bool> {
        self.router.route(element)?.remove(element).await
    }

    async fn clear(&self) -> Result<()> {
        try_join_all(self.router.partitions().iter().map(|p| p.clear())).await?;
        Ok(())
    }

    async fn contains_all(&self, elements: &[String]) -> Result<bool> {
        let grouped = self.router.group(elements)?;
        let results = try_join_all(grouped.into_iter().map(|(index, subset)| async move {
            self.router.partitions()[index].contains_all(&subset).await
        }))
        .await?;
        Ok(results.into_iter().all(|present| present))
    }

    async fn add_all(&self, elements: &[String]) -> Result<bool> {
        self.any_grouped(elements, |p, subset| async move { p.add_all(&subset).await })
            .await
    }

    async fn remove_all(&self, elements: &[String]) -> Result<bool> {
        self.any_grouped(elements, |p, subset| async move { p.remove_all(&subset).await })
            .await
    }

    async fn retain_all(&self, elements: &[String]) -> Result<bool> {
        // Partitions owning none of `elements` are emptied.
        let mut grouped = self.router.group(elements)?;
        let results = try_join_all(self.router.partitions().iter().enumerate().map(|(index, p)| {
            let subset = grouped.remove(&index).unwrap_or_default();
            async move { p.retain_all(&subset).await }
        }))
        .await?;
        Ok(results.into_iter().any(|changed| changed))
    }

    fn element_stream(&self) -> BoxStream<'static, Result<String>> {
        self.router.concat(|p| p.element_stream())
    }

    async fn add_listener(&self, listener: SetEventListener) -> Result<ListenerId> {
        self.router
            .add_event_listener(
                move |p| {
                    let listener = Arc::clone(&listener);
                    async move { p.add_listener(listener).await }
                },
                |p, inner| p.remove_listener(inner),
            )
            .await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.router
            .remove_event_listener(id, |p, inner| p.remove_listener(inner))
    }
}

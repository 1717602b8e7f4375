//! Read-through, write-invalidate caching decorators
//!
//! A caching decorator memoizes reads in a bounded LRU of shared futures, so
//! concurrent reads of one key collapse into one request. Entries are dropped:
//!
//! - after a local mutation of the key *succeeds* (never before, so a failed
//!   write cannot surface as a miss that re-reads stale state)
//! - when the backing primitive publishes an event for the key, whichever
//!   client caused it
//! - all at once when the backing primitive becomes `Suspended` or `Closed`,
//!   since events may have been missed while disconnected
//! - all at once when the backing event stream is lost and again when it
//!   reopens
//!
//! While the event stream is down nothing is cached: reads go straight to
//! the backing primitive and ask it to resume its events, since the session
//! can stay `Connected` with no stream behind it.
//!
//! Eviction by capacity is only a memory bound; invalidation is what keeps
//! the cache coherent.

use crate::api::{
    AsyncAtomicMap, AsyncAtomicValue, AsyncDistributedSet, AsyncPrimitive, MapEventListener,
    SetEventListener, ValueEventListener,
};
use crate::events::{MapEvent, SetEvent, ValueEvent};
use crate::protocol::RawValue;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::BoxStream;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tessera_core::{
    Error, ListenerId, PrimitiveKind, PrimitiveName, PrimitiveState, Result, StateListener,
    StreamListener, StreamState,
};
use tracing::debug;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V>>>;

struct CacheEntry<V: Clone> {
    stamp: u64,
    load: SharedLoad<V>,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served by an existing entry, resolved or in flight
    pub hits: u64,
    /// Reads that issued a load
    pub misses: u64,
    /// Current entry count
    pub entries: usize,
}

/// Bounded key to in-flight-or-resolved read map
pub(crate) struct ReadCache<K: Hash + Eq, V: Clone> {
    name: PrimitiveName,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    /// Cleared while the backing event stream is down
    live: AtomicBool,
    next_stamp: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> ReadCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(name: PrimitiveName, capacity: usize) -> Result<Arc<Self>> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::invalid_config("cache size must be at least 1"))?;
        Ok(Arc::new(Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            live: AtomicBool::new(true),
            next_stamp: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }))
    }

    /// Return the cached read for `key`, or install the one `load` starts
    ///
    /// A load that fails removes its own entry so the next read retries.
    /// While not live every call loads and nothing is stored.
    pub(crate) fn get_or_load<F>(self: &Arc<Self>, key: K, load: F) -> SharedLoad<V>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V>>,
    {
        let mut entries = self.entries.lock();
        if !self.is_live() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return load().shared();
        }
        if let Some(entry) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.load.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let stamp = self.next_stamp.fetch_add(1, Ordering::Relaxed);
        let cache: Weak<Self> = Arc::downgrade(self);
        let evict_key = key.clone();
        let pending = load();
        let shared = async move {
            let result = pending.await;
            if result.is_err() {
                if let Some(cache) = cache.upgrade() {
                    cache.remove_if_stamp(&evict_key, stamp);
                }
            }
            result
        }
        .boxed()
        .shared();
        entries.put(
            key,
            CacheEntry {
                stamp,
                load: shared.clone(),
            },
        );
        shared
    }

    fn remove_if_stamp(&self, key: &K, stamp: u64) {
        let mut entries = self.entries.lock();
        if entries.peek(key).map(|e| e.stamp) == Some(stamp) {
            entries.pop(key);
        }
    }

    pub(crate) fn invalidate(&self, key: &K) {
        self.entries.lock().pop(key);
    }

    pub(crate) fn invalidate_all(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!(target: "tessera::cache", primitive = %self.name, entries = entries.len(), "Invalidating cache");
        }
        entries.clear();
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop caching until [`stream_opened`](Self::stream_opened)
    pub(crate) fn stream_lost(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.invalidate_all();
    }

    /// Resume caching from an empty cache
    pub(crate) fn stream_opened(&self) {
        let mut entries = self.entries.lock();
        self.live.store(true, Ordering::SeqCst);
        entries.clear();
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }
}

/// Listeners registered on a decorator, fed from the backing stream
struct Forwarder<E> {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn Fn(&E) + Send + Sync>)>>,
}

impl<E> Forwarder<E> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn add(&self, listener: Arc<dyn Fn(&E) + Send + Sync>) -> ListenerId {
        let id = ListenerId::next();
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn dispatch(&self, event: &E) {
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Clear `cache` whenever `backing` loses its guarantee of seeing every event
fn invalidate_on_disconnect<P, K, V>(backing: &P, cache: &Arc<ReadCache<K, V>>) -> ListenerId
where
    P: AsyncPrimitive + ?Sized,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let cache = Arc::clone(cache);
    let listener: StateListener = Arc::new(move |state: PrimitiveState| {
        if matches!(state, PrimitiveState::Suspended | PrimitiveState::Closed) {
            cache.invalidate_all();
        }
    });
    backing.add_state_listener(listener)
}

/// Stop caching while `backing` has no live event stream
fn follow_stream<P, K, V>(backing: &P, cache: &Arc<ReadCache<K, V>>) -> ListenerId
where
    P: AsyncPrimitive + ?Sized,
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let cache = Arc::clone(cache);
    let listener: StreamListener = Arc::new(move |state: StreamState| match state {
        StreamState::Lost => cache.stream_lost(),
        StreamState::Open => cache.stream_opened(),
    });
    backing.add_stream_listener(listener)
}

/// Forward lifecycle calls to `$backing`, detaching the decorator first on
/// close and delete
macro_rules! caching_primitive {
    ($ty:ty) => {
        #[async_trait]
        impl AsyncPrimitive for $ty {
            fn name(&self) -> &PrimitiveName {
                self.backing.name()
            }

            fn kind(&self) -> PrimitiveKind {
                self.backing.kind()
            }

            fn state(&self) -> PrimitiveState {
                self.backing.state()
            }

            fn add_state_listener(&self, listener: StateListener) -> ListenerId {
                self.backing.add_state_listener(listener)
            }

            fn remove_state_listener(&self, id: ListenerId) -> bool {
                self.backing.remove_state_listener(id)
            }

            fn add_stream_listener(&self, listener: StreamListener) -> ListenerId {
                self.backing.add_stream_listener(listener)
            }

            fn remove_stream_listener(&self, id: ListenerId) -> bool {
                self.backing.remove_stream_listener(id)
            }

            fn resume_events(&self) {
                self.backing.resume_events()
            }

            async fn close(&self) -> Result<()> {
                self.detach();
                self.backing.close().await
            }

            async fn delete(&self) -> Result<()> {
                self.detach();
                self.backing.delete().await
            }
        }
    };
}

/// Caching decorator over a map; caches `get`
pub struct CachingMap {
    backing: Arc<dyn AsyncAtomicMap>,
    cache: Arc<ReadCache<String, Option<RawValue>>>,
    forwarder: Arc<Forwarder<MapEvent>>,
    event_id: ListenerId,
    state_id: ListenerId,
    stream_id: ListenerId,
}

impl CachingMap {
    /// Wrap `backing`, subscribing to its events and state
    pub async fn create(backing: Arc<dyn AsyncAtomicMap>, capacity: usize) -> Result<Self> {
        let cache = ReadCache::new(backing.name().clone(), capacity)?;
        let forwarder = Forwarder::new();

        let stream_id = follow_stream(backing.as_ref(), &cache);
        let (c, f) = (Arc::clone(&cache), Arc::clone(&forwarder));
        let event_id = match backing
            .add_listener(Arc::new(move |event: &MapEvent| {
                c.invalidate(&event.key);
                f.dispatch(event);
            }))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                backing.remove_stream_listener(stream_id);
                return Err(e);
            }
        };
        let state_id = invalidate_on_disconnect(backing.as_ref(), &cache);

        Ok(Self {
            backing,
            cache,
            forwarder,
            event_id,
            state_id,
            stream_id,
        })
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn detach(&self) {
        self.backing.remove_listener(self.event_id);
        self.backing.remove_state_listener(self.state_id);
        self.backing.remove_stream_listener(self.stream_id);
        self.cache.invalidate_all();
    }

    fn written<T>(&self, key: &str, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.cache.invalidate(&key.to_string());
        }
        result
    }
}

caching_primitive!(CachingMap);

#[async_trait]
impl AsyncAtomicMap for CachingMap {
    async fn size(&self) -> Result<u64> {
        self.backing.size().await
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        self.backing.contains_key(key).await
    }

    async fn contains_value(&self, value: &[u8]) -> Result<bool> {
        self.backing.contains_value(value).await
    }

    async fn get(&self, key: &str) -> Result<Option<RawValue>> {
        if !self.cache.is_live() {
            self.backing.resume_events();
        }
        let backing = Arc::clone(&self.backing);
        let owned = key.to_string();
        self.cache
            .get_or_load(owned.clone(), move || {
                async move { backing.get(&owned).await }.boxed()
            })
            .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        let result = self.backing.put(key, value).await;
        self.written(key, result)
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        let result = self.backing.put_if_absent(key, value).await;
        self.written(key, result)
    }

    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        let result = self.backing.replace(key, value).await;
        self.written(key, result)
    }

    async fn remove(&self, key: &str) -> Result<Option<RawValue>> {
        let result = self.backing.remove(key).await;
        self.written(key, result)
    }

    async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool> {
        let result = self.backing.remove_if_version(key, version).await;
        self.written(key, result)
    }

    async fn clear(&self) -> Result<()> {
        self.backing.clear().await?;
        self.cache.invalidate_all();
        Ok(())
    }

    fn key_stream(&self) -> BoxStream<'static, Result<String>> {
        self.backing.key_stream()
    }

    fn entry_stream(&self) -> BoxStream<'static, Result<(String, RawValue)>> {
        self.backing.entry_stream()
    }

    async fn add_listener(&self, listener: MapEventListener) -> Result<ListenerId> {
        Ok(self.forwarder.add(listener))
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.forwarder.remove(id)
    }
}

/// Caching decorator over a value; caches `get`
pub struct CachingValue {
    backing: Arc<dyn AsyncAtomicValue>,
    cache: Arc<ReadCache<(), Option<RawValue>>>,
    forwarder: Arc<Forwarder<ValueEvent>>,
    event_id: ListenerId,
    state_id: ListenerId,
    stream_id: ListenerId,
}

impl CachingValue {
    /// Wrap `backing`, subscribing to its events and state
    pub async fn create(backing: Arc<dyn AsyncAtomicValue>) -> Result<Self> {
        let cache = ReadCache::new(backing.name().clone(), 1)?;
        let forwarder = Forwarder::new();

        let stream_id = follow_stream(backing.as_ref(), &cache);
        let (c, f) = (Arc::clone(&cache), Arc::clone(&forwarder));
        let event_id = match backing
            .add_listener(Arc::new(move |event: &ValueEvent| {
                c.invalidate(&());
                f.dispatch(event);
            }))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                backing.remove_stream_listener(stream_id);
                return Err(e);
            }
        };
        let state_id = invalidate_on_disconnect(backing.as_ref(), &cache);

        Ok(Self {
            backing,
            cache,
            forwarder,
            event_id,
            state_id,
            stream_id,
        })
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn detach(&self) {
        self.backing.remove_listener(self.event_id);
        self.backing.remove_state_listener(self.state_id);
        self.backing.remove_stream_listener(self.stream_id);
        self.cache.invalidate_all();
    }

    fn written<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.cache.invalidate(&());
        }
        result
    }
}

caching_primitive!(CachingValue);

#[async_trait]
impl AsyncAtomicValue for CachingValue {
    async fn get(&self) -> Result<Option<RawValue>> {
        if !self.cache.is_live() {
            self.backing.resume_events();
        }
        let backing = Arc::clone(&self.backing);
        self.cache
            .get_or_load((), move || async move { backing.get().await }.boxed())
            .await
    }

    async fn set(&self, value: Option<Vec<u8>>) -> Result<()> {
        let result = self.backing.set(value).await;
        self.written(result)
    }

    async fn get_and_set(&self, value: Option<Vec<u8>>) -> Result<Option<RawValue>> {
        let result = self.backing.get_and_set(value).await;
        self.written(result)
    }

    async fn compare_and_set(
        &self,
        expect: Option<Vec<u8>>,
        update: Option<Vec<u8>>,
    ) -> Result<bool> {
        let result = self.backing.compare_and_set(expect, update).await;
        self.written(result)
    }

    async fn compare_and_set_version(
        &self,
        version: u64,
        update: Option<Vec<u8>>,
    ) -> Result<bool> {
        let result = self.backing.compare_and_set_version(version, update).await;
        self.written(result)
    }

    async fn add_listener(&self, listener: ValueEventListener) -> Result<ListenerId> {
        Ok(self.forwarder.add(listener))
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.forwarder.remove(id)
    }
}

/// Caching decorator over a set; caches `contains`
pub struct CachingSet {
    backing: Arc<dyn AsyncDistributedSet>,
    cache: Arc<ReadCache<String, bool>>,
    forwarder: Arc<Forwarder<SetEvent>>,
    event_id: ListenerId,
    state_id: ListenerId,
    stream_id: ListenerId,
}

impl CachingSet {
    /// Wrap `backing`, subscribing to its events and state
    pub async fn create(backing: Arc<dyn AsyncDistributedSet>, capacity: usize) -> Result<Self> {
        let cache = ReadCache::new(backing.name().clone(), capacity)?;
        let forwarder = Forwarder::new();

        let stream_id = follow_stream(backing.as_ref(), &cache);
        let (c, f) = (Arc::clone(&cache), Arc::clone(&forwarder));
        let event_id = match backing
            .add_listener(Arc::new(move |event: &SetEvent| {
                c.invalidate(&event.element);
                f.dispatch(event);
            }))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                backing.remove_stream_listener(stream_id);
                return Err(e);
            }
        };
        let state_id = invalidate_on_disconnect(backing.as_ref(), &cache);

        Ok(Self {
            backing,
            cache,
            forwarder,
            event_id,
            state_id,
            stream_id,
        })
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn detach(&self) {
        self.backing.remove_listener(self.event_id);
        self.backing.remove_state_listener(self.state_id);
        self.backing.remove_stream_listener(self.stream_id);
        self.cache.invalidate_all();
    }

    fn written<T>(&self, elements: &[String], result: Result<T>) -> Result<T> {
        if result.is_ok() {
            for element in elements {
                self.cache.invalidate(element);
            }
        }
        result
    }
}

caching_primitive!(CachingSet);

#[async_trait]
impl AsyncDistributedSet for CachingSet {
    async fn size(&self) -> Result<u64> {
        self.backing.size().await
    }

    async fn contains(&self, element: &str) -> Result<bool> {
        if !self.cache.is_live() {
            self.backing.resume_events();
        }
        let backing = Arc::clone(&self.backing);
        let owned = element.to_string();
        self.cache
            .get_or_load(owned.clone(), move || {
                async move { backing.contains(&owned).await }.boxed()
            })
            .await
    }

    async fn add(&self, element: &str) -> Result<bool> {
        let result = self.backing.add(element).await;
        self.written(&[element.to_string()], result)
    }

    async fn remove(&self, element: &str) -> Result<bool> {
        let result = self.backing.remove(element).await;
        self.written(&[element.to_string()], result)
    }

    async fn clear(&self) -> Result<()> {
        self.backing.clear().await?;
        self.cache.invalidate_all();
        Ok(())
    }

    async fn contains_all(&self, elements: &[String]) -> Result<bool> {
        self.backing.contains_all(elements).await
    }

    async fn add_all(&self, elements: &[String]) -> Result<bool> {
        let result = self.backing.add_all(elements).await;
        self.written(elements, result)
    }

    async fn remove_all(&self, elements: &[String]) -> Result<bool> {
        let result = self.backing.remove_all(elements).await;
        self.written(elements, result)
    }

    async fn retain_all(&self, elements: &[String]) -> Result<bool> {
        // Any element outside `elements` may have gone.
        let changed = self.backing.retain_all(elements).await?;
        self.cache.invalidate_all();
        Ok(changed)
    }

    fn element_stream(&self) -> BoxStream<'static, Result<String>> {
        self.backing.element_stream()
    }

    async fn add_listener(&self, listener: SetEventListener) -> Result<ListenerId> {
        Ok(self.forwarder.add(listener))
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.forwarder.remove(id)
    }
}

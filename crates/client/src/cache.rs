//! Process-scoped primitive cache
//!
//! Guarantees at most one build per primitive name: the first caller installs
//! an in-flight build and every later caller for the same name awaits that
//! same build. Entries remove themselves when their build fails or when the
//! built primitive reaches `Closed`, so the next lookup rebuilds.
//!
//! Fresh instances from `build` are not shared, but the cache still holds a
//! handle to each until it closes, so stopping the client releases their
//! sessions too.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::any::{type_name, Any, TypeId};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tessera_core::{Error, ListenerId, PrimitiveName, PrimitiveState, Result, StateListener};
use tracing::{debug, warn};

/// A primitive handle the cache can hold
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// Observe lifecycle transitions
    fn add_state_listener(&self, listener: StateListener) -> ListenerId;

    /// Close, keeping server state
    fn close(&self) -> BoxFuture<'static, Result<()>>;
}

type Closer = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Type-erased completed build
#[derive(Clone)]
struct CachedPrimitive {
    primitive: Arc<dyn Any + Send + Sync>,
    close: Closer,
}

type SharedBuild = Shared<BoxFuture<'static, Result<CachedPrimitive>>>;

struct CacheSlot {
    generation: u64,
    type_id: TypeId,
    type_name: &'static str,
    build: SharedBuild,
}

/// Name-keyed registry of built primitives
#[derive(Default)]
pub struct PrimitiveCache {
    entries: DashMap<PrimitiveName, CacheSlot>,
    /// Open fresh instances by registration id
    fresh: DashMap<u64, (PrimitiveName, Closer)>,
    generations: AtomicU64,
}

impl PrimitiveCache {
    /// Empty cache
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Return the primitive cached under `name`, building it with `build` if
    /// there is none.
    ///
    /// `build` is invoked at most once per installed entry, and only when no
    /// entry (in flight or complete) exists. Concurrent callers share the
    /// outcome, failures included.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if `name` is cached as a different primitive type, or
    /// whatever the build returned.
    pub async fn get_or_build<P, F, Fut>(self: &Arc<Self>, name: &PrimitiveName, build: F) -> Result<P>
    where
        P: Cacheable,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<P>> + Send + 'static,
    {
        let build = match self.entries.entry(name.clone()) {
            Entry::Occupied(slot) => {
                let slot = slot.get();
                if slot.type_id != TypeId::of::<P>() {
                    return Err(Error::TypeMismatch {
                        name: name.to_string(),
                        expected: type_name::<P>().to_string(),
                        actual: slot.type_name.to_string(),
                    });
                }
                debug!(target: "tessera::client", name = %name, "Primitive cache hit");
                slot.build.clone()
            }
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                debug!(target: "tessera::client", name = %name, generation, "Building cached primitive");
                let shared = self
                    .track::<P, Fut>(name.clone(), generation, build()).boxed().shared();
                vacant.insert(CacheSlot {
                    generation,
                    type_id: TypeId::of::<P>(),
                    type_name: type_name::<P>(),
                    build: shared.clone(),
                });
                shared
            }
        };

        let cached = build.await?;
        cached
            .primitive
            .downcast_ref::<P>()
            .cloned()
            .ok_or_else(|| Error::internal(format!("cached primitive {} has an unexpected type", name)))
    }

    /// Wrap a build so its entry is dropped on failure or once the primitive closes
    fn track<P, Fut>(
        self: &Arc<Self>,
        name: PrimitiveName,
        generation: u64,
        build: Fut,
    ) -> impl Future<Output = Result<CachedPrimitive>> + Send + 'static
    where
        P: Cacheable,
        Fut: Future<Output = Result<P>> + Send + 'static,
    {
        let cache = Arc::downgrade(self);
        async move {
            match build.await {
                Ok(primitive) => {
                    let (watcher, watched) = (cache.clone(), name.clone());
                    primitive.add_state_listener(Arc::new(move |state: PrimitiveState| {
                        if state == PrimitiveState::Closed {
                            evict(&watcher, &watched, generation);
                        }
                    }));
                    let closer = primitive.clone();
                    Ok(CachedPrimitive {
                        primitive: Arc::new(primitive),
                        close: Arc::new(move || closer.close()),
                    })
                }
                Err(e) => {
                    debug!(target: "tessera::client", name = %name, error = %e, "Primitive build failed");
                    evict(&cache, &name, generation);
                    Err(e)
                }
            }
        }
    }

    fn remove_generation(&self, name: &PrimitiveName, generation: u64) -> bool {
        self.entries
            .remove_if(name, |_, slot| slot.generation == generation)
            .is_some()
    }

    /// Drop the entry for `name` without closing it
    pub fn invalidate(&self, name: &PrimitiveName) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Whether `name` has an entry (in flight or complete)
    pub fn contains(&self, name: &PrimitiveName) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hold on to a fresh instance so [`close_all`](Self::close_all) closes
    /// it. Forgotten once it reaches `Closed`.
    pub fn track_fresh<P: Cacheable>(self: &Arc<Self>, name: &PrimitiveName, primitive: &P) {
        let id = self.generations.fetch_add(1, Ordering::Relaxed);
        let closer = primitive.clone();
        self.fresh
            .insert(id, (name.clone(), Arc::new(move || closer.close())));
        let cache = Arc::downgrade(self);
        primitive.add_state_listener(Arc::new(move |state: PrimitiveState| {
            if state == PrimitiveState::Closed {
                if let Some(cache) = cache.upgrade() {
                    cache.fresh.remove(&id);
                }
            }
        }));
    }

    /// Number of fresh instances still open
    pub fn fresh_len(&self) -> usize {
        self.fresh.len()
    }

    /// Empty the cache and close every primitive it held.
    ///
    /// In-flight builds are awaited first, and tracked fresh instances are
    /// closed too. Every primitive is closed even if some closes fail; the
    /// first failure is returned.
    pub async fn close_all(&self) -> Result<()> {
        let names: Vec<PrimitiveName> = self.entries.iter().map(|e| e.key().clone()).collect();
        let builds: Vec<(PrimitiveName, SharedBuild)> = names
            .into_iter()
            .filter_map(|name| self.entries.remove(&name).map(|(name, slot)| (name, slot.build)))
            .collect();
        let ids: Vec<u64> = self.fresh.iter().map(|e| *e.key()).collect();
        let fresh: Vec<(PrimitiveName, Closer)> = ids
            .into_iter()
            .filter_map(|id| self.fresh.remove(&id).map(|(_, entry)| entry))
            .collect();
        debug!(
            target: "tessera::client",
            entries = builds.len(),
            fresh = fresh.len(),
            "Closing cached primitives"
        );

        let mut closes: Vec<BoxFuture<'static, Result<()>>> = builds
            .into_iter()
            .map(|(name, build)| {
                async move {
                    match build.await {
                        Ok(cached) => close_logged(&name, (cached.close)()).await,
                        // Never built, nothing to release
                        Err(_) => Ok(()),
                    }
                }
                .boxed()
            })
            .collect();
        closes.extend(
            fresh
                .into_iter()
                .map(|(name, close)| async move { close_logged(&name, close()).await }.boxed()),
        );
        join_all(closes).await.into_iter().collect()
    }
}

async fn close_logged(name: &PrimitiveName, close: BoxFuture<'static, Result<()>>) -> Result<()> {
    close.await.map_err(|e| {
        warn!(target: "tessera::client", name = %name, error = %e, "Failed to close primitive");
        e
    })
}

fn evict(cache: &Weak<PrimitiveCache>, name: &PrimitiveName, generation: u64) {
    if let Some(cache) = cache.upgrade() {
        if cache.remove_generation(name, generation) {
            debug!(target: "tessera::client", name = %name, generation, "Evicted cached primitive");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Stand-in primitive whose state the test drives by hand
    #[derive(Clone, Default)]
    struct Stub {
        listeners: Arc<Mutex<Vec<StateListener>>>,
        closes: Arc<AtomicUsize>,
    }

    impl Stub {
        fn fire(&self, state: PrimitiveState) {
            for listener in self.listeners.lock().iter() {
                listener(state);
            }
        }
    }

    impl Cacheable for Stub {
        fn add_state_listener(&self, listener: StateListener) -> ListenerId {
            self.listeners.lock().push(listener);
            ListenerId::next()
        }

        fn close(&self) -> BoxFuture<'static, Result<()>> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            let stub = self.clone();
            async move {
                stub.fire(PrimitiveState::Closed);
                Ok(())
            }
            .boxed()
        }
    }

    #[derive(Clone, Default)]
    struct OtherStub(Stub);

    impl Cacheable for OtherStub {
        fn add_state_listener(&self, listener: StateListener) -> ListenerId {
            self.0.add_state_listener(listener)
        }

        fn close(&self) -> BoxFuture<'static, Result<()>> {
            self.0.close()
        }
    }

    fn name(n: &str) -> PrimitiveName {
        PrimitiveName::new("test", n)
    }

    #[tokio::test]
    async fn test_concurrent_gets_build_once() {
        let cache = PrimitiveCache::new();
        let builds = Arc::new(AtomicUsize::new(0));
        let stub = Stub::default();

        let gets = (0..8).map(|_| {
            let (builds, stub) = (Arc::clone(&builds), stub.clone());
            let cache = Arc::clone(&cache);
            async move {
                cache
                    .get_or_build(&name("counter"), move || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(stub)
                    })
                    .await
            }
        });
        let results = join_all(gets).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_shared_then_evicted() {
        let cache = PrimitiveCache::new();
        let first = cache
            .get_or_build(&name("map"), || async { Err::<Stub, _>(Error::unavailable("no leader")) })
            .await;
        assert_eq!(first.err(), Some(Error::unavailable("no leader")));
        assert!(!cache.contains(&name("map")));

        let second = cache
            .get_or_build(&name("map"), || async { Ok(Stub::default()) })
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let cache = PrimitiveCache::new();
        cache
            .get_or_build(&name("x"), || async { Ok(Stub::default()) })
            .await
            .unwrap();
        let err = cache
            .get_or_build(&name("x"), || async { Ok(OtherStub::default()) })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_closed_primitive_is_evicted() {
        let cache = PrimitiveCache::new();
        let stub = cache
            .get_or_build(&name("set"), || async { Ok(Stub::default()) })
            .await
            .unwrap();
        stub.fire(PrimitiveState::Suspended);
        assert!(cache.contains(&name("set")));
        stub.fire(PrimitiveState::Closed);
        assert!(!cache.contains(&name("set")));
    }

    #[tokio::test]
    async fn test_stale_eviction_keeps_newer_entry() {
        let cache = PrimitiveCache::new();
        let old = cache
            .get_or_build(&name("v"), || async { Ok(Stub::default()) })
            .await
            .unwrap();
        cache.invalidate(&name("v"));
        cache
            .get_or_build(&name("v"), || async { Ok(Stub::default()) })
            .await
            .unwrap();

        old.fire(PrimitiveState::Closed);
        assert!(cache.contains(&name("v")));
    }

    #[tokio::test]
    async fn test_close_all() {
        let cache = PrimitiveCache::new();
        let a = cache
            .get_or_build(&name("a"), || async { Ok(Stub::default()) })
            .await
            .unwrap();
        let b = cache
            .get_or_build(&name("b"), || async { Ok(Stub::default()) })
            .await
            .unwrap();

        cache.close_all().await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_instances_closed_until_they_close_themselves() {
        let cache = PrimitiveCache::new();
        let kept = Stub::default();
        let released = Stub::default();
        cache.track_fresh(&name("a"), &kept);
        cache.track_fresh(&name("a"), &released);
        assert_eq!(cache.fresh_len(), 2);
        assert!(cache.is_empty());

        released.fire(PrimitiveState::Closed);
        assert_eq!(cache.fresh_len(), 1);

        cache.close_all().await.unwrap();
        assert_eq!(cache.fresh_len(), 0);
        assert_eq!(kept.closes.load(Ordering::SeqCst), 1);
        assert_eq!(released.closes.load(Ordering::SeqCst), 0);
    }
}

//! Blocking facades over the typed handles
//!
//! Each call spawns the asynchronous operation on the client runtime and
//! blocks the *calling* thread until it completes or the facade's timeout
//! elapses. A timeout returns [`Error::Timeout`] but does not cancel the
//! operation, which still runs to completion. Any other failure is returned
//! exactly as the asynchronous API would return it.
//!
//! These facades must be used from threads that are not driving the runtime.

use crate::events::{LogEntry, MapEvent, SetEvent, ValueEvent};
use crate::typed::{
    AtomicCounter, AtomicValue, DistributedLog, DistributedMap, DistributedSet, Listener, Value,
};
use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tessera_core::{Error, ListenerId, PrimitiveName, PrimitiveState, Result, Versioned};
use tokio::runtime::Handle;

/// Runs futures to completion on behalf of a blocked caller
#[derive(Clone, Debug)]
pub struct BlockingExecutor {
    handle: Handle,
    timeout: Duration,
}

impl BlockingExecutor {
    /// Executor spawning onto `handle`, waiting at most `timeout` per call
    pub fn new(handle: Handle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Per-call wait budget
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Same executor with a different wait budget
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            handle: self.handle.clone(),
            timeout,
        }
    }

    /// Spawn `future` and block until it resolves or the budget is spent
    pub fn wait<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.handle.spawn(future);
        self.handle.block_on(async {
            match tokio::time::timeout(self.timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(Error::internal(format!("{} failed to complete: {}", operation, e))),
                Err(_) => Err(self.timed_out(operation)),
            }
        })
    }

    fn timed_out(&self, operation: &str) -> Error {
        Error::Timeout {
            operation: operation.to_string(),
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

/// Blocking iterator over a primitive stream
///
/// Each `next` waits at most the executor's timeout for the next item; a
/// timeout is yielded as an error and ends the iteration.
pub struct BlockingIterator<T> {
    stream: Option<BoxStream<'static, Result<T>>>,
    executor: BlockingExecutor,
    operation: &'static str,
}

impl<T> BlockingIterator<T> {
    fn new(stream: BoxStream<'static, Result<T>>, executor: BlockingExecutor, operation: &'static str) -> Self {
        Self {
            stream: Some(stream),
            executor,
            operation,
        }
    }
}

impl<T> Iterator for BlockingIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        let stream = self.stream.as_mut()?;
        let timeout = self.executor.timeout;
        let next = self
            .executor
            .handle
            .block_on(async { tokio::time::timeout(timeout, stream.next()).await });
        match next {
            Ok(item) => {
                if item.is_none() {
                    self.stream = None;
                }
                item
            }
            Err(_) => {
                self.stream = None;
                Some(Err(self.executor.timed_out(self.operation)))
            }
        }
    }
}

macro_rules! blocking_lifecycle {
    () => {
        /// Primitive name
        pub fn name(&self) -> &PrimitiveName {
            self.inner.name()
        }

        /// Current lifecycle state
        pub fn state(&self) -> PrimitiveState {
            self.inner.state()
        }

        /// Close, keeping server state
        pub fn close(&self) -> Result<()> {
            let inner = self.inner.clone();
            self.executor.wait("close", async move { inner.close().await })
        }

        /// Close and destroy server state
        pub fn delete(&self) -> Result<()> {
            let inner = self.inner.clone();
            self.executor.wait("delete", async move { inner.delete().await })
        }
    };
}

/// Run `$call` on a clone of the inner handle
macro_rules! call {
    ($self:ident, $op:literal, |$inner:ident| $body:expr) => {{
        let $inner = $self.inner.clone();
        $self.executor.wait($op, async move { $body })
    }};
}

/// Blocking counter
#[derive(Clone)]
pub struct BlockingCounter {
    inner: AtomicCounter,
    executor: BlockingExecutor,
}

impl BlockingCounter {
    /// Wrap an asynchronous counter
    pub fn new(inner: AtomicCounter, executor: BlockingExecutor) -> Self {
        Self { inner, executor }
    }

    /// The asynchronous handle underneath
    pub fn as_async(&self) -> &AtomicCounter {
        &self.inner
    }

    blocking_lifecycle!();

    /// Current value
    pub fn get(&self) -> Result<i64> {
        call!(self, "counter.get", |c| c.get().await)
    }

    /// Overwrite the value
    pub fn set(&self, value: i64) -> Result<()> {
        call!(self, "counter.set", |c| c.set(value).await)
    }

    /// Set to `update` if the value is `expect`
    pub fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        call!(self, "counter.compare_and_set", |c| c.compare_and_set(expect, update).await)
    }

    /// Add `delta`, returning the new value
    pub fn add_and_get(&self, delta: i64) -> Result<i64> {
        call!(self, "counter.add_and_get", |c| c.add_and_get(delta).await)
    }

    /// Add `delta`, returning the previous value
    pub fn get_and_add(&self, delta: i64) -> Result<i64> {
        call!(self, "counter.get_and_add", |c| c.get_and_add(delta).await)
    }

    /// Add one, returning the new value
    pub fn increment_and_get(&self) -> Result<i64> {
        self.add_and_get(1)
    }

    /// Subtract one, returning the new value
    pub fn decrement_and_get(&self) -> Result<i64> {
        self.add_and_get(-1)
    }
}

/// Blocking value
pub struct BlockingValue<V> {
    inner: AtomicValue<V>,
    executor: BlockingExecutor,
}

impl<V> Clone for BlockingValue<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<V: Value> BlockingValue<V> {
    /// Wrap an asynchronous value
    pub fn new(inner: AtomicValue<V>, executor: BlockingExecutor) -> Self {
        Self { inner, executor }
    }

    /// The asynchronous handle underneath
    pub fn as_async(&self) -> &AtomicValue<V> {
        &self.inner
    }

    blocking_lifecycle!();

    /// Current value
    pub fn get(&self) -> Result<Option<Versioned<V>>> {
        call!(self, "value.get", |v| v.get().await)
    }

    /// Overwrite the value
    pub fn set(&self, value: V) -> Result<()> {
        call!(self, "value.set", |v| v.set(&value).await)
    }

    /// Clear the value
    pub fn clear(&self) -> Result<()> {
        call!(self, "value.clear", |v| v.clear().await)
    }

    /// Overwrite, returning the previous value
    pub fn get_and_set(&self, value: V) -> Result<Option<Versioned<V>>> {
        call!(self, "value.get_and_set", |v| v.get_and_set(&value).await)
    }

    /// Overwrite if the current value encodes the same as `expect`
    pub fn compare_and_set(&self, expect: Option<V>, update: Option<V>) -> Result<bool> {
        call!(self, "value.compare_and_set", |v| {
            v.compare_and_set(expect.as_ref(), update.as_ref()).await
        })
    }

    /// Overwrite if the current version is `version`
    pub fn compare_and_set_version(&self, version: u64, update: Option<V>) -> Result<bool> {
        call!(self, "value.compare_and_set_version", |v| {
            v.compare_and_set_version(version, update.as_ref()).await
        })
    }

    /// Register a change listener
    pub fn add_listener(&self, listener: Listener<ValueEvent<V>>) -> Result<ListenerId> {
        call!(self, "value.add_listener", |v| v.add_listener(listener).await)
    }

    /// Remove a change listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Blocking map
pub struct BlockingMap<V> {
    inner: DistributedMap<V>,
    executor: BlockingExecutor,
}

impl<V> Clone for BlockingMap<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<V: Value> BlockingMap<V> {
    /// Wrap an asynchronous map
    pub fn new(inner: DistributedMap<V>, executor: BlockingExecutor) -> Self {
        Self { inner, executor }
    }

    /// The asynchronous handle underneath
    pub fn as_async(&self) -> &DistributedMap<V> {
        &self.inner
    }

    blocking_lifecycle!();

    /// Entry count
    pub fn size(&self) -> Result<u64> {
        call!(self, "map.size", |m| m.size().await)
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> Result<bool> {
        call!(self, "map.is_empty", |m| m.is_empty().await)
    }

    /// Whether `key` has an entry
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        call!(self, "map.contains_key", |m| m.contains_key(&key).await)
    }

    /// Whether any entry holds `value`
    pub fn contains_value(&self, value: V) -> Result<bool> {
        call!(self, "map.contains_value", |m| m.contains_value(&value).await)
    }

    /// Entry for `key`
    pub fn get(&self, key: &str) -> Result<Option<Versioned<V>>> {
        let key = key.to_string();
        call!(self, "map.get", |m| m.get(&key).await)
    }

    /// Write `key`, returning the previous entry
    pub fn put(&self, key: &str, value: V) -> Result<Option<Versioned<V>>> {
        let key = key.to_string();
        call!(self, "map.put", |m| m.put(&key, &value).await)
    }

    /// Write `key` if absent, returning the existing entry if there was one
    pub fn put_if_absent(&self, key: &str, value: V) -> Result<Option<Versioned<V>>> {
        let key = key.to_string();
        call!(self, "map.put_if_absent", |m| m.put_if_absent(&key, &value).await)
    }

    /// Write `key` if present, returning the replaced entry
    pub fn replace(&self, key: &str, value: V) -> Result<Option<Versioned<V>>> {
        let key = key.to_string();
        call!(self, "map.replace", |m| m.replace(&key, &value).await)
    }

    /// Remove `key`, returning the removed entry
    pub fn remove(&self, key: &str) -> Result<Option<Versioned<V>>> {
        let key = key.to_string();
        call!(self, "map.remove", |m| m.remove(&key).await)
    }

    /// Remove `key` if its entry is at `version`
    pub fn remove_if_version(&self, key: &str, version: u64) -> Result<bool> {
        let key = key.to_string();
        call!(self, "map.remove_if_version", |m| m.remove_if_version(&key, version).await)
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<()> {
        call!(self, "map.clear", |m| m.clear().await)
    }

    /// Keys, partition-major
    pub fn keys(&self) -> BlockingIterator<String> {
        BlockingIterator::new(self.inner.key_stream(), self.executor.clone(), "map.keys")
    }

    /// Entries, partition-major
    pub fn entries(&self) -> BlockingIterator<(String, Versioned<V>)> {
        BlockingIterator::new(self.inner.entry_stream(), self.executor.clone(), "map.entries")
    }

    /// Register a change listener
    pub fn add_listener(&self, listener: Listener<MapEvent<V>>) -> Result<ListenerId> {
        call!(self, "map.add_listener", |m| m.add_listener(listener).await)
    }

    /// Remove a change listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Blocking set
#[derive(Clone)]
pub struct BlockingSet {
    inner: DistributedSet,
    executor: BlockingExecutor,
}

impl BlockingSet {
    /// Wrap an asynchronous set
    pub fn new(inner: DistributedSet, executor: BlockingExecutor) -> Self {
        Self { inner, executor }
    }

    /// The asynchronous handle underneath
    pub fn as_async(&self) -> &DistributedSet {
        &self.inner
    }

    blocking_lifecycle!();

    /// Element count
    pub fn size(&self) -> Result<u64> {
        call!(self, "set.size", |s| s.size().await)
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> Result<bool> {
        call!(self, "set.is_empty", |s| s.is_empty().await)
    }

    /// Membership
    pub fn contains(&self, element: &str) -> Result<bool> {
        let element = element.to_string();
        call!(self, "set.contains", |s| s.contains(&element).await)
    }

    /// Insert; true if the set changed
    pub fn add(&self, element: &str) -> Result<bool> {
        let element = element.to_string();
        call!(self, "set.add", |s| s.add(&element).await)
    }

    /// Remove; true if the set changed
    pub fn remove(&self, element: &str) -> Result<bool> {
        let element = element.to_string();
        call!(self, "set.remove", |s| s.remove(&element).await)
    }

    /// Remove every element
    pub fn clear(&self) -> Result<()> {
        call!(self, "set.clear", |s| s.clear().await)
    }

    /// Whether every element is present
    pub fn contains_all(&self, elements: Vec<String>) -> Result<bool> {
        call!(self, "set.contains_all", |s| s.contains_all(&elements).await)
    }

    /// Insert several; true if the set changed
    pub fn add_all(&self, elements: Vec<String>) -> Result<bool> {
        call!(self, "set.add_all", |s| s.add_all(&elements).await)
    }

    /// Remove several; true if the set changed
    pub fn remove_all(&self, elements: Vec<String>) -> Result<bool> {
        call!(self, "set.remove_all", |s| s.remove_all(&elements).await)
    }

    /// Keep only `elements`; true if the set changed
    pub fn retain_all(&self, elements: Vec<String>) -> Result<bool> {
        call!(self, "set.retain_all", |s| s.retain_all(&elements).await)
    }

    /// Elements, partition-major
    pub fn elements(&self) -> BlockingIterator<String> {
        BlockingIterator::new(self.inner.element_stream(), self.executor.clone(), "set.elements")
    }

    /// Register a change listener
    pub fn add_listener(&self, listener: Listener<SetEvent>) -> Result<ListenerId> {
        call!(self, "set.add_listener", |s| s.add_listener(listener).await)
    }

    /// Remove a change listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Blocking log
pub struct BlockingLog<V> {
    inner: DistributedLog<V>,
    executor: BlockingExecutor,
}

impl<V> Clone for BlockingLog<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl<V: Value> BlockingLog<V> {
    /// Wrap an asynchronous log
    pub fn new(inner: DistributedLog<V>, executor: BlockingExecutor) -> Self {
        Self { inner, executor }
    }

    /// The asynchronous handle underneath
    pub fn as_async(&self) -> &DistributedLog<V> {
        &self.inner
    }

    blocking_lifecycle!();

    /// Append, returning the entry's index
    pub fn append(&self, value: V) -> Result<u64> {
        call!(self, "log.append", |l| l.append(&value).await)
    }

    /// Entry at `index`
    pub fn get(&self, index: u64) -> Result<Option<LogEntry<V>>> {
        call!(self, "log.get", |l| l.get(index).await)
    }

    /// Entry count
    pub fn size(&self) -> Result<u64> {
        call!(self, "log.size", |l| l.size().await)
    }

    /// Entries in index order
    pub fn entries(&self) -> BlockingIterator<LogEntry<V>> {
        BlockingIterator::new(self.inner.entry_stream(), self.executor.clone(), "log.entries")
    }

    /// Register an append listener
    pub fn add_listener(&self, listener: Listener<LogEntry<V>>) -> Result<ListenerId> {
        call!(self, "log.add_listener", |l| l.add_listener(listener).await)
    }

    /// Remove an append listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

//! Typed handles over the raw primitive layer
//!
//! Values are encoded with the handle's [`Serializer`]; keys and set elements
//! stay strings since they are what the partitioner hashes. Comparisons that
//! the server performs (`compare_and_set`, `contains_value`) compare encoded
//! bytes, so they rely on the serializer being deterministic for `V`.

use crate::api::{
    AsyncAtomicCounter, AsyncAtomicMap, AsyncAtomicValue, AsyncDistributedLog,
    AsyncDistributedSet, AsyncPrimitive,
};
use crate::events::{LogEntry, MapEvent, SetEvent, ValueEvent};
use crate::protocol::RawValue;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tessera_core::{
    ListenerId, PrimitiveKind, PrimitiveName, PrimitiveState, Result, Serializer, StateListener,
    Versioned,
};
use tracing::warn;

/// Bound on values stored through typed handles
pub trait Value: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Value for T {}

/// Typed event callback
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Adapt a typed listener to the raw event type, dropping events that fail
/// to decode
fn decoding<R, E>(
    name: &PrimitiveName,
    decode: impl Fn(&R) -> Result<E> + Send + Sync + 'static,
    listener: Listener<E>,
) -> Arc<dyn Fn(&R) + Send + Sync>
where
    R: 'static,
    E: 'static,
{
    let name = name.clone();
    Arc::new(move |raw: &R| match decode(raw) {
        Ok(event) => listener(&event),
        Err(e) => {
            warn!(target: "tessera::subscription", primitive = %name, error = %e, "Dropping event that failed to decode")
        }
    })
}

macro_rules! lifecycle {
    ($inner:ty) => {
        /// Primitive name
        pub fn name(&self) -> &PrimitiveName {
            self.inner.name()
        }

        /// Primitive kind
        pub fn kind(&self) -> PrimitiveKind {
            self.inner.kind()
        }

        /// Current lifecycle state
        pub fn state(&self) -> PrimitiveState {
            self.inner.state()
        }

        /// Register a lifecycle listener
        pub fn add_state_listener(&self, listener: StateListener) -> ListenerId {
            self.inner.add_state_listener(listener)
        }

        /// Remove a lifecycle listener
        pub fn remove_state_listener(&self, id: ListenerId) -> bool {
            self.inner.remove_state_listener(id)
        }

        /// Close, keeping server state
        pub async fn close(&self) -> Result<()> {
            self.inner.close().await
        }

        /// Close and destroy server state
        pub async fn delete(&self) -> Result<()> {
            self.inner.delete().await
        }

        /// The untyped primitive underneath
        pub fn raw(&self) -> &Arc<$inner> {
            &self.inner
        }
    };
}

/// Atomic 64-bit counter
#[derive(Clone)]
pub struct AtomicCounter {
    inner: Arc<dyn AsyncAtomicCounter>,
}

impl AtomicCounter {
    /// Wrap a raw counter
    pub fn new(inner: Arc<dyn AsyncAtomicCounter>) -> Self {
        Self { inner }
    }

    lifecycle!(dyn AsyncAtomicCounter);

    /// Current value
    pub async fn get(&self) -> Result<i64> {
        self.inner.get().await
    }

    /// Overwrite the value
    pub async fn set(&self, value: i64) -> Result<()> {
        self.inner.set(value).await
    }

    /// Set to `update` if the value is `expect`
    pub async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        self.inner.compare_and_set(expect, update).await
    }

    /// Add `delta`, returning the new value
    pub async fn add_and_get(&self, delta: i64) -> Result<i64> {
        self.inner.add_and_get(delta).await
    }

    /// Add `delta`, returning the previous value
    pub async fn get_and_add(&self, delta: i64) -> Result<i64> {
        self.inner.get_and_add(delta).await
    }

    /// Add one, returning the new value
    pub async fn increment_and_get(&self) -> Result<i64> {
        self.inner.increment_and_get().await
    }

    /// Subtract one, returning the new value
    pub async fn decrement_and_get(&self) -> Result<i64> {
        self.inner.decrement_and_get().await
    }

    /// Add one, returning the previous value
    pub async fn get_and_increment(&self) -> Result<i64> {
        self.inner.get_and_increment().await
    }

    /// Subtract one, returning the previous value
    pub async fn get_and_decrement(&self) -> Result<i64> {
        self.inner.get_and_decrement().await
    }
}

/// Atomic versioned value of type `V`
pub struct AtomicValue<V> {
    inner: Arc<dyn AsyncAtomicValue>,
    serializer: Serializer,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for AtomicValue<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            serializer: self.serializer,
            _value: PhantomData,
        }
    }
}

impl<V: Value> AtomicValue<V> {
    /// Wrap a raw value
    pub fn new(inner: Arc<dyn AsyncAtomicValue>, serializer: Serializer) -> Self {
        Self {
            inner,
            serializer,
            _value: PhantomData,
        }
    }

    lifecycle!(dyn AsyncAtomicValue);

    fn encode(&self, value: Option<&V>) -> Result<Option<Vec<u8>>> {
        value.map(|v| self.serializer.encode(v)).transpose()
    }

    fn decode(&self, raw: Option<RawValue>) -> Result<Option<Versioned<V>>> {
        raw.map(|v| v.try_map(|bytes| self.serializer.decode(&bytes)))
            .transpose()
    }

    /// Current value
    pub async fn get(&self) -> Result<Option<Versioned<V>>> {
        let raw = self.inner.get().await?;
        self.decode(raw)
    }

    /// Overwrite the value
    pub async fn set(&self, value: &V) -> Result<()> {
        self.inner.set(self.encode(Some(value))?).await
    }

    /// Clear the value
    pub async fn clear(&self) -> Result<()> {
        self.inner.set(None).await
    }

    /// Overwrite, returning the previous value
    pub async fn get_and_set(&self, value: &V) -> Result<Option<Versioned<V>>> {
        let raw = self.inner.get_and_set(self.encode(Some(value))?).await?;
        self.decode(raw)
    }

    /// Overwrite if the current value encodes the same as `expect`
    pub async fn compare_and_set(&self, expect: Option<&V>, update: Option<&V>) -> Result<bool> {
        self.inner
            .compare_and_set(self.encode(expect)?, self.encode(update)?)
            .await
    }

    /// Overwrite if the current version is `version`
    pub async fn compare_and_set_version(&self, version: u64, update: Option<&V>) -> Result<bool> {
        self.inner
            .compare_and_set_version(version, self.encode(update)?)
            .await
    }

    /// Register a change listener
    pub async fn add_listener(&self, listener: Listener<ValueEvent<V>>) -> Result<ListenerId> {
        let serializer = self.serializer;
        let adapted = decoding(
            self.name(),
            move |raw: &ValueEvent| raw.clone().try_map(|bytes| serializer.decode(&bytes)),
            listener,
        );
        self.inner.add_listener(adapted).await
    }

    /// Remove a change listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Key-sharded map of `String` to `V`
pub struct DistributedMap<V> {
    inner: Arc<dyn AsyncAtomicMap>,
    serializer: Serializer,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for DistributedMap<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            serializer: self.serializer,
            _value: PhantomData,
        }
    }
}

impl<V: Value> DistributedMap<V> {
    /// Wrap a raw map
    pub fn new(inner: Arc<dyn AsyncAtomicMap>, serializer: Serializer) -> Self {
        Self {
            inner,
            serializer,
            _value: PhantomData,
        }
    }

    lifecycle!(dyn AsyncAtomicMap);

    fn decode(&self, raw: Option<RawValue>) -> Result<Option<Versioned<V>>> {
        raw.map(|v| v.try_map(|bytes| self.serializer.decode(&bytes)))
            .transpose()
    }

    /// Entry count
    pub async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    /// Whether the map is empty
    pub async fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty().await
    }

    /// Whether `key` has an entry
    pub async fn contains_key(&self, key: &str) -> Result<bool> {
        self.inner.contains_key(key).await
    }

    /// Whether any entry holds `value`
    pub async fn contains_value(&self, value: &V) -> Result<bool> {
        let bytes = self.serializer.encode(value)?;
        self.inner.contains_value(&bytes).await
    }

    /// Entry for `key`
    pub async fn get(&self, key: &str) -> Result<Option<Versioned<V>>> {
        let raw = self.inner.get(key).await?;
        self.decode(raw)
    }

    /// Write `key`, returning the previous entry
    pub async fn put(&self, key: &str, value: &V) -> Result<Option<Versioned<V>>> {
        let raw = self.inner.put(key, self.serializer.encode(value)?).await?;
        self.decode(raw)
    }

    /// Write `key` if absent, returning the existing entry if there was one
    pub async fn put_if_absent(&self, key: &str, value: &V) -> Result<Option<Versioned<V>>> {
        let raw = self
            .inner
            .put_if_absent(key, self.serializer.encode(value)?)
            .await?;
        self.decode(raw)
    }

    /// Write `key` if present, returning the replaced entry
    pub async fn replace(&self, key: &str, value: &V) -> Result<Option<Versioned<V>>> {
        let raw = self.inner.replace(key, self.serializer.encode(value)?).await?;
        self.decode(raw)
    }

    /// Remove `key`, returning the removed entry
    pub async fn remove(&self, key: &str) -> Result<Option<Versioned<V>>> {
        let raw = self.inner.remove(key).await?;
        self.decode(raw)
    }

    /// Remove `key` if its entry is at `version`
    pub async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool> {
        self.inner.remove_if_version(key, version).await
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    /// Keys, partition-major
    pub fn key_stream(&self) -> BoxStream<'static, Result<String>> {
        self.inner.key_stream()
    }

    /// Entries, partition-major
    pub fn entry_stream(&self) -> BoxStream<'static, Result<(String, Versioned<V>)>> {
        let serializer = self.serializer;
        self.inner
            .entry_stream()
            .map(move |entry| {
                entry.and_then(|(key, raw)| {
                    Ok((key, raw.try_map(|bytes| serializer.decode(&bytes))?))
                })
            })
            .boxed()
    }

    /// Collect [`key_stream`](Self::key_stream)
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.key_stream().try_collect().await
    }

    /// Collect [`entry_stream`](Self::entry_stream)
    pub async fn entries(&self) -> Result<Vec<(String, Versioned<V>)>> {
        self.entry_stream().try_collect().await
    }

    /// Register a change listener
    pub async fn add_listener(&self, listener: Listener<MapEvent<V>>) -> Result<ListenerId> {
        let serializer = self.serializer;
        let adapted = decoding(
            self.name(),
            move |raw: &MapEvent| raw.clone().try_map(|bytes| serializer.decode(&bytes)),
            listener,
        );
        self.inner.add_listener(adapted).await
    }

    /// Remove a change listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Element-sharded set of strings
#[derive(Clone)]
pub struct DistributedSet {
    inner: Arc<dyn AsyncDistributedSet>,
}

impl DistributedSet {
    /// Wrap a raw set
    pub fn new(inner: Arc<dyn AsyncDistributedSet>) -> Self {
        Self { inner }
    }

    lifecycle!(dyn AsyncDistributedSet);

    /// Element count
    pub async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    /// Whether the set is empty
    pub async fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty().await
    }

    /// Membership
    pub async fn contains(&self, element: &str) -> Result<bool> {
        self.inner.contains(element).await
    }

    /// Insert; true if the set changed
    pub async fn add(&self, element: &str) -> Result<bool> {
        self.inner.add(element).await
    }

    /// Remove; true if the set changed
    pub async fn remove(&self, element: &str) -> Result<bool> {
        self.inner.remove(element).await
    }

    /// Remove every element
    pub async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    /// Whether every element is present
    pub async fn contains_all(&self, elements: &[String]) -> Result<bool> {
        self.inner.contains_all(elements).await
    }

    /// Insert several; true if the set changed
    pub async fn add_all(&self, elements: &[String]) -> Result<bool> {
        self.inner.add_all(elements).await
    }

    /// Remove several; true if the set changed
    pub async fn remove_all(&self, elements: &[String]) -> Result<bool> {
        self.inner.remove_all(elements).await
    }

    /// Keep only `elements`; true if the set changed
    pub async fn retain_all(&self, elements: &[String]) -> Result<bool> {
        self.inner.retain_all(elements).await
    }

    /// Elements, partition-major
    pub fn element_stream(&self) -> BoxStream<'static, Result<String>> {
        self.inner.element_stream()
    }

    /// Collect [`element_stream`](Self::element_stream)
    pub async fn elements(&self) -> Result<Vec<String>> {
        self.inner.elements().await
    }

    /// Register a change listener
    pub async fn add_listener(&self, listener: Listener<SetEvent>) -> Result<ListenerId> {
        self.inner.add_listener(listener).await
    }

    /// Remove a change listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

/// Append-only log of `V`
pub struct DistributedLog<V> {
    inner: Arc<dyn AsyncDistributedLog>,
    serializer: Serializer,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for DistributedLog<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            serializer: self.serializer,
            _value: PhantomData,
        }
    }
}

impl<V: Value> DistributedLog<V> {
    /// Wrap a raw log
    pub fn new(inner: Arc<dyn AsyncDistributedLog>, serializer: Serializer) -> Self {
        Self {
            inner,
            serializer,
            _value: PhantomData,
        }
    }

    lifecycle!(dyn AsyncDistributedLog);

    /// Append, returning the entry's index
    pub async fn append(&self, value: &V) -> Result<u64> {
        self.inner.append(self.serializer.encode(value)?).await
    }

    /// Entry at `index`
    pub async fn get(&self, index: u64) -> Result<Option<LogEntry<V>>> {
        self.inner
            .get(index)
            .await?
            .map(|entry| entry.try_map(|bytes| self.serializer.decode(&bytes)))
            .transpose()
    }

    /// Entry count
    pub async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }

    /// Entries in index order
    pub fn entry_stream(&self) -> BoxStream<'static, Result<LogEntry<V>>> {
        let serializer = self.serializer;
        self.inner
            .entry_stream()
            .map(move |entry| entry.and_then(|e| e.try_map(|bytes| serializer.decode(&bytes))))
            .boxed()
    }

    /// Collect [`entry_stream`](Self::entry_stream)
    pub async fn entries(&self) -> Result<Vec<LogEntry<V>>> {
        self.entry_stream().try_collect().await
    }

    /// Register an append listener
    pub async fn add_listener(&self, listener: Listener<LogEntry<V>>) -> Result<ListenerId> {
        let serializer = self.serializer;
        let adapted = decoding(
            self.name(),
            move |raw: &LogEntry| raw.clone().try_map(|bytes| serializer.decode(&bytes)),
            listener,
        );
        self.inner.add_listener(adapted).await
    }

    /// Remove an append listener
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }
}

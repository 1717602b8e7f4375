//! Session-backed map partition

use crate::api::{delegate_async_primitive, AsyncAtomicMap, MapEventListener};
use crate::events::MapEvent;
use crate::protocol::{MapOperation, Operation, RawValue, Response};
use crate::proxy::{batch_stream, PrimitiveProxy};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tessera_core::{ListenerId, PartitionId, Result};
use tessera_session::ManagedSession;

/// The share of a map held by one partition
///
/// Used directly for single-partition groups and as the building block of
/// [`PartitionedMap`](crate::partitioned::PartitionedMap).
pub struct SessionMap {
    proxy: PrimitiveProxy<MapEvent>,
}

impl SessionMap {
    /// Wrap an opened session
    pub fn new(session: ManagedSession) -> Self {
        Self {
            proxy: PrimitiveProxy::with_events(session),
        }
    }

    /// Partition this share lives on
    pub fn partition_id(&self) -> PartitionId {
        self.proxy.session().partition_id()
    }

    fn map_op(op: MapOperation) -> Operation {
        Operation::Map(op)
    }
}

delegate_async_primitive!(SessionMap => proxy);

#[async_trait]
impl AsyncAtomicMap for SessionMap {
    async fn size(&self) -> Result<u64> {
        self.proxy.query(Self::map_op(MapOperation::Size)).await?.into_size()
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        self.proxy
            .query(Self::map_op(MapOperation::ContainsKey(key.to_string())))
            .await?
            .into_bool()
    }

    async fn contains_value(&self, value: &[u8]) -> Result<bool> {
        self.proxy
            .query(Self::map_op(MapOperation::ContainsValue(value.to_vec())))
            .await?
            .into_bool()
    }

    async fn get(&self, key: &str) -> Result<Option<RawValue>> {
        self.proxy
            .query(Self::map_op(MapOperation::Get(key.to_string())))
            .await?
            .into_value()
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        self.proxy
            .command(Self::map_op(MapOperation::Put(key.to_string(), value)))
            .await?
            .into_value()
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        self.proxy
            .command(Self::map_op(MapOperation::PutIfAbsent(key.to_string(), value)))
            .await?
            .into_value()
    }

    async fn replace(&self, key: &str, value: Vec<u8>) -> Result<Option<RawValue>> {
        self.proxy
            .command(Self::map_op(MapOperation::Replace(key.to_string(), value)))
            .await?
            .into_value()
    }

    async fn remove(&self, key: &str) -> Result<Option<RawValue>> {
        self.proxy
            .command(Self::map_op(MapOperation::Remove(key.to_string())))
            .await?
            .into_value()
    }

    async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool> {
        self.proxy
            .command(Self::map_op(MapOperation::RemoveIfVersion(key.to_string(), version)))
            .await?
            .into_bool()
    }

    async fn clear(&self) -> Result<()> {
        self.proxy
            .command(Self::map_op(MapOperation::Clear))
            .await?
            .into_unit()
    }

    fn key_stream(&self) -> BoxStream<'static, Result<String>> {
        batch_stream(
            self.proxy.query(Self::map_op(MapOperation::Keys)),
            Response::into_keys,
        )
    }

    fn entry_stream(&self) -> BoxStream<'static, Result<(String, RawValue)>> {
        batch_stream(
            self.proxy.query(Self::map_op(MapOperation::Entries)),
            Response::into_entries,
        )
    }

    async fn add_listener(&self, listener: MapEventListener) -> Result<ListenerId> {
        self.proxy.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.proxy.remove_listener(id)
    }
}

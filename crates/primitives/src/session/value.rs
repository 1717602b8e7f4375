//! Session-backed atomic value

use crate::api::{delegate_async_primitive, AsyncAtomicValue, ValueEventListener};
use crate::events::ValueEvent;
use crate::protocol::{Operation, RawValue, ValueOperation};
use crate::proxy::PrimitiveProxy;
use async_trait::async_trait;
use tessera_core::{ListenerId, Result};
use tessera_session::ManagedSession;

/// Atomic value living on a single partition
pub struct SessionValue {
    proxy: PrimitiveProxy<ValueEvent>,
}

impl SessionValue {
    /// Wrap an opened session
    pub fn new(session: ManagedSession) -> Self {
        Self {
            proxy: PrimitiveProxy::with_events(session),
        }
    }
}

delegate_async_primitive!(SessionValue => proxy);

#[async_trait]
impl AsyncAtomicValue for SessionValue {
    async fn get(&self) -> Result<Option<RawValue>> {
        self.proxy
            .query(Operation::Value(ValueOperation::Get))
            .await?
            .into_value()
    }

    async fn set(&self, value: Option<Vec<u8>>) -> Result<()> {
        self.proxy
            .command(Operation::Value(ValueOperation::Set(value)))
            .await?
            .into_unit()
    }

    async fn get_and_set(&self, value: Option<Vec<u8>>) -> Result<Option<RawValue>> {
        self.proxy
            .command(Operation::Value(ValueOperation::GetAndSet(value)))
            .await?
            .into_value()
    }

    async fn compare_and_set(
        &self,
        expect: Option<Vec<u8>>,
        update: Option<Vec<u8>>,
    ) -> Result<bool> {
        self.proxy
            .command(Operation::Value(ValueOperation::CompareAndSet { expect, update }))
            .await?
            .into_bool()
    }

    async fn compare_and_set_version(
        &self,
        version: u64,
        update: Option<Vec<u8>>,
    ) -> Result<bool> {
        self.proxy
            .command(Operation::Value(ValueOperation::CompareAndSetVersion {
                version,
                update,
            }))
            .await?
            .into_bool()
    }

    async fn add_listener(&self, listener: ValueEventListener) -> Result<ListenerId> {
        self.proxy.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.proxy.remove_listener(id)
    }
}

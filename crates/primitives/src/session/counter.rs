//! Session-backed atomic counter

use crate::api::{delegate_async_primitive, AsyncAtomicCounter};
use crate::protocol::{CounterOperation, Operation};
use crate::proxy::PrimitiveProxy;
use async_trait::async_trait;
use tessera_core::Result;
use tessera_session::ManagedSession;

/// Counter living on a single partition
pub struct SessionCounter {
    proxy: PrimitiveProxy<()>,
}

impl SessionCounter {
    /// Wrap an opened session
    pub fn new(session: ManagedSession) -> Self {
        Self {
            proxy: PrimitiveProxy::without_events(session),
        }
    }

    /// Underlying session
    pub fn session(&self) -> &ManagedSession {
        self.proxy.session()
    }
}

delegate_async_primitive!(SessionCounter => proxy);

#[async_trait]
impl AsyncAtomicCounter for SessionCounter {
    async fn get(&self) -> Result<i64> {
        self.proxy
            .query(Operation::Counter(CounterOperation::Get))
            .await?
            .into_long()
    }

    async fn set(&self, value: i64) -> Result<()> {
        self.proxy
            .command(Operation::Counter(CounterOperation::Set(value)))
            .await?
            .into_unit()
    }

    async fn compare_and_set(&self, expect: i64, update: i64) -> Result<bool> {
        self.proxy
            .command(Operation::Counter(CounterOperation::CompareAndSet {
                expect,
                update,
            }))
            .await?
            .into_bool()
    }

    async fn add_and_get(&self, delta: i64) -> Result<i64> {
        self.proxy
            .command(Operation::Counter(CounterOperation::AddAndGet(delta)))
            .await?
            .into_long()
    }

    async fn get_and_add(&self, delta: i64) -> Result<i64> {
        self.proxy
            .command(Operation::Counter(CounterOperation::GetAndAdd(delta)))
            .await?
            .into_long()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AsyncPrimitive;
    use crate::test_util::Harness;
    use tessera_core::{Error, PrimitiveKind, PrimitiveState};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_counter_operations() {
        let harness = Harness::new(1);
        let counter = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);

        assert_eq!(counter.get().await.unwrap(), 0);
        assert_eq!(counter.increment_and_get().await.unwrap(), 1);
        assert_eq!(counter.get_and_add(5).await.unwrap(), 1);
        assert_eq!(counter.decrement_and_get().await.unwrap(), 5);
        assert!(counter.compare_and_set(5, 10).await.unwrap());
        assert!(!counter.compare_and_set(5, 11).await.unwrap());
        counter.set(-3).await.unwrap();
        assert_eq!(counter.get_and_increment().await.unwrap(), -3);
        assert_eq!(counter.get().await.unwrap(), -2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_closed_counter_fails_fast() {
        let harness = Harness::new(1);
        let counter = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);
        counter.close().await.unwrap();

        assert_eq!(counter.state(), PrimitiveState::Closed);
        assert!(matches!(counter.get().await.unwrap_err(), Error::Closed { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_destroys_server_state() {
        let harness = Harness::new(1);
        let counter = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);
        counter.set(42).await.unwrap();
        counter.delete().await.unwrap();

        let again = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);
        assert_eq!(again.get().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_keeps_server_state() {
        let harness = Harness::new(1);
        let counter = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);
        counter.set(42).await.unwrap();
        counter.close().await.unwrap();

        let again = SessionCounter::new(harness.open("hits", PrimitiveKind::Counter, 0).await);
        assert_eq!(again.get().await.unwrap(), 42);
    }
}

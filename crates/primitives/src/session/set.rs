//! Session-backed set partition

use crate::api::{delegate_async_primitive, AsyncDistributedSet, SetEventListener};
use crate::events::SetEvent;
use crate::protocol::{Operation, Response, SetOperation};
use crate::proxy::{batch_stream, PrimitiveProxy};
use async_trait::async_trait;
use futures::stream::BoxStream;
use tessera_core::{ListenerId, PartitionId, Result};
use tessera_session::ManagedSession;

/// The share of a set held by one partition
pub struct SessionSet {
    proxy: PrimitiveProxy<SetEvent>,
}

impl SessionSet {
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

    async fn query_bool(&self, op: SetOperation) -> Result<bool> {
        self.proxy.query(Operation::Set(op)).await?.into_bool()
    }

    async fn command_bool(&self, op: SetOperation) -> Result<bool> {
        self.proxy.command(Operation::Set(op)).await?.into_bool()
    }
}

delegate_async_primitive!(SessionSet => proxy);

#[async_trait]
impl AsyncDistributedSet for SessionSet {
    async fn size(&self) -> Result<u64> {
        self.proxy
            .query(Operation::Set(SetOperation::Size))
            .await?
            .into_size()
    }

    async fn contains(&self, element: &str) -> Result<bool> {
        self.query_bool(SetOperation::Contains(element.to_string())).await
    }

    async fn add(&self, element: &str) -> Result<bool> {
        self.command_bool(SetOperation::Add(element.to_string())).await
    }

    async fn remove(&self, element: &str) -> Result<bool> {
        self.command_bool(SetOperation::Remove(element.to_string())).await
    }

    async fn clear(&self) -> Result<()> {
        self.proxy
            .command(Operation::Set(SetOperation::Clear))
            .await?
            .into_unit()
    }

    async fn contains_all(&self, elements: &[String]) -> Result<bool> {
        self.query_bool(SetOperation::ContainsAll(elements.to_vec())).await
    }

    async fn add_all(&self, elements: &[String]) -> Result<bool> {
        self.command_bool(SetOperation::AddAll(elements.to_vec())).await
    }

    async fn remove_all(&self, elements: &[String]) -> Result<bool> {
        self.command_bool(SetOperation::RemoveAll(elements.to_vec())).await
    }

    async fn retain_all(&self, elements: &[String]) -> Result<bool> {
        self.command_bool(SetOperation::RetainAll(elements.to_vec())).await
    }

    fn element_stream(&self) -> BoxStream<'static, Result<String>> {
        batch_stream(
            self.proxy.query(Operation::Set(SetOperation::Elements)),
            Response::into_elements,
        )
    }

    async fn add_listener(&self, listener: SetEventListener) -> Result<ListenerId> {
        self.proxy.add_listener(listener).await
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.proxy.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::Harness;
    use tessera_core::PrimitiveKind;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_partition_operations() {
        let harness = Harness::new(1);
        let set = SessionSet::new(harness.open("tags", PrimitiveKind::Set, 0).await);

        assert!(set.add("a").await.unwrap());
        assert!(!set.add("a").await.unwrap());
        assert!(set.add_all(&strings(&["b", "c"])).await.unwrap());
        assert!(set.contains_all(&strings(&["a", "b"])).await.unwrap());
        assert!(!set.contains_all(&strings(&["a", "z"])).await.unwrap());

        assert!(set.retain_all(&strings(&["a", "b"])).await.unwrap());
        assert!(!set.contains("c").await.unwrap());
        assert!(set.remove_all(&strings(&["a", "z"])).await.unwrap());
        assert_eq!(set.elements().await.unwrap(), strings(&["b"]));

        assert!(set.remove("b").await.unwrap());
        assert!(!set.remove("b").await.unwrap());
        set.add("d").await.unwrap();
        set.clear().await.unwrap();
        assert!(set.is_empty().await.unwrap());
    }
}

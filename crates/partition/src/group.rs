//! Partitions, partition groups and group discovery.

use crate::channel::PartitionChannel;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_core::{Error, PartitionGroupId, PartitionId, Result};
use tracing::debug;

/// One independently addressable replica set
#[derive(Clone)]
pub struct Partition {
    id: PartitionId,
    channel: Arc<dyn PartitionChannel>,
}

impl Partition {
    /// Create a partition handle
    pub fn new(id: PartitionId, channel: Arc<dyn PartitionChannel>) -> Self {
        Self { id, channel }
    }

    /// Partition id
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Channel to the partition's replica set
    pub fn channel(&self) -> &Arc<dyn PartitionChannel> {
        &self.channel
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition").field("id", &self.id).finish()
    }
}

/// Read-only snapshot of a partition group
///
/// Partitions are kept sorted by id; that order is the order routing and
/// partition-major iteration use.
#[derive(Clone, Debug)]
pub struct PartitionGroup {
    id: PartitionGroupId,
    partitions: Vec<Partition>,
}

impl PartitionGroup {
    /// Build a group snapshot
    ///
    /// # Errors
    ///
    /// `NoPartitions` if `partitions` is empty, `InvalidInput` on duplicate ids.
    pub fn new(id: PartitionGroupId, mut partitions: Vec<Partition>) -> Result<Self> {
        if partitions.is_empty() {
            return Err(Error::NoPartitions {
                group: id.to_string(),
            });
        }
        partitions.sort_by_key(|p| p.id());
        if partitions.windows(2).any(|w| w[0].id() == w[1].id()) {
            return Err(Error::invalid_input(format!(
                "duplicate partition id in group {}",
                id
            )));
        }
        Ok(Self { id, partitions })
    }

    /// Group id
    pub fn id(&self) -> &PartitionGroupId {
        &self.id
    }

    /// Partitions in id order
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    /// Partition ids in order
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        self.partitions.iter().map(|p| p.id()).collect()
    }

    /// Look up a partition by id
    pub fn partition(&self, id: PartitionId) -> Result<&Partition> {
        self.partitions
            .binary_search_by_key(&id, |p| p.id())
            .map(|idx| &self.partitions[idx])
            .map_err(|_| {
                Error::invalid_input(format!("partition {} not in group {}", id, self.id))
            })
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Always false; a group has at least one partition
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

/// Resolves partition group ids to group snapshots
#[async_trait]
pub trait PartitionService: Send + Sync {
    /// Fetch the current membership of a group.
    ///
    /// A default id (empty name) resolves to the namespace's default group.
    async fn partition_group(&self, id: &PartitionGroupId) -> Result<PartitionGroup>;
}

/// Partition service over a fixed, in-process set of groups
#[derive(Default)]
pub struct StaticPartitionService {
    groups: RwLock<BTreeMap<PartitionGroupId, PartitionGroup>>,
    defaults: RwLock<BTreeMap<String, PartitionGroupId>>,
}

impl StaticPartitionService {
    /// Empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group. The first group registered for a namespace becomes
    /// that namespace's default.
    pub fn register(&self, group: PartitionGroup) {
        let id = group.id().clone();
        debug!(target: "tessera::router", group = %id, partitions = group.len(), "Registered partition group");
        self.defaults
            .write()
            .entry(id.namespace.clone())
            .or_insert_with(|| id.clone());
        self.groups.write().insert(id, group);
    }

    fn resolve(&self, id: &PartitionGroupId) -> Option<PartitionGroupId> {
        if id.is_default() {
            self.defaults.read().get(&id.namespace).cloned()
        } else {
            Some(id.clone())
        }
    }
}

#[async_trait]
impl PartitionService for StaticPartitionService {
    async fn partition_group(&self, id: &PartitionGroupId) -> Result<PartitionGroup> {
        self.resolve(id)
            .and_then(|resolved| self.groups.read().get(&resolved).cloned())
            .ok_or_else(|| Error::PartitionGroupNotFound {
                group: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{
        CloseSessionRequest, EventStream, KeepAliveRequest, OpenSessionRequest,
        OpenSessionResponse, RequestHeader,
    };
    use futures::future::BoxFuture;
    use futures::FutureExt;

    struct DeadChannel;

    impl PartitionChannel for DeadChannel {
        fn open_session(
            &self,
            _request: OpenSessionRequest,
        ) -> BoxFuture<'static, Result<OpenSessionResponse>> {
            async { Err(Error::transport("dead")) }.boxed()
        }
        fn keep_alive(&self, _request: KeepAliveRequest) -> BoxFuture<'static, Result<()>> {
            async { Err(Error::transport("dead")) }.boxed()
        }
        fn close_session(&self, _request: CloseSessionRequest) -> BoxFuture<'static, Result<()>> {
            async { Err(Error::transport("dead")) }.boxed()
        }
        fn command(&self, _h: RequestHeader, _p: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
            async { Err(Error::transport("dead")) }.boxed()
        }
        fn query(&self, _h: RequestHeader, _p: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
            async { Err(Error::transport("dead")) }.boxed()
        }
        fn subscribe(
            &self,
            _h: RequestHeader,
            _p: Vec<u8>,
        ) -> BoxFuture<'static, Result<EventStream>> {
            async { Err(Error::transport("dead")) }.boxed()
        }
    }

    fn partition(id: u32) -> Partition {
        Partition::new(PartitionId(id), Arc::new(DeadChannel))
    }

    #[test]
    fn test_group_sorts_partitions() {
        let group = PartitionGroup::new(
            PartitionGroupId::new("ns", "raft"),
            vec![partition(3), partition(1), partition(2)],
        )
        .unwrap();
        assert_eq!(
            group.partition_ids(),
            vec![PartitionId(1), PartitionId(2), PartitionId(3)]
        );
        assert_eq!(group.partition(PartitionId(2)).unwrap().id(), PartitionId(2));
        assert!(group.partition(PartitionId(9)).is_err());
    }

    #[test]
    fn test_empty_group_rejected() {
        let err = PartitionGroup::new(PartitionGroupId::new("ns", "raft"), vec![]).unwrap_err();
        assert!(matches!(err, Error::NoPartitions { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = PartitionGroup::new(
            PartitionGroupId::new("ns", "raft"),
            vec![partition(1), partition(1)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_default_group_resolution() {
        let service = StaticPartitionService::new();
        service.register(
            PartitionGroup::new(PartitionGroupId::new("ns", "first"), vec![partition(1)]).unwrap(),
        );
        service.register(
            PartitionGroup::new(
                PartitionGroupId::new("ns", "second"),
                vec![partition(1), partition(2)],
            )
            .unwrap(),
        );

        let default = service
            .partition_group(&PartitionGroupId::default_for("ns"))
            .await
            .unwrap();
        assert_eq!(default.id().name, "first");

        let named = service
            .partition_group(&PartitionGroupId::new("ns", "second"))
            .await
            .unwrap();
        assert_eq!(named.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_group() {
        let service = StaticPartitionService::new();
        let err = service
            .partition_group(&PartitionGroupId::default_for("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PartitionGroupNotFound { .. }));
    }
}

//! In-memory partitions for tests and local development
//!
//! A [`LocalCluster`] is a [`PartitionService`] whose partitions are
//! [`LocalPartition`]s: in-process replica sets that run the primitive state
//! machines, deduplicate resent commands and stream events. Each partition
//! counts the requests it receives and can be told to fail in the ways a real
//! replica set does (unavailable leader, dropped responses, expired sessions,
//! unreachable node).

mod partition;
mod state;

pub use partition::{LocalPartition, PartitionStats};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{PartitionGroupId, PartitionId, Result};
use tessera_partition::{
    Partition, PartitionChannel, PartitionGroup, PartitionService, StaticPartitionService,
};

/// Name of the group [`LocalCluster::new`] creates
pub const DEFAULT_GROUP: &str = "raft";

/// A set of in-process partition groups
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    namespace: String,
    service: StaticPartitionService,
    partitions: RwLock<BTreeMap<String, Vec<Arc<LocalPartition>>>>,
}

impl LocalCluster {
    /// Cluster with one default group of `partitions` partitions, ids
    /// `0..partitions`
    pub fn new(namespace: impl Into<String>, partitions: u32) -> Result<Self> {
        let cluster = Self {
            inner: Arc::new(ClusterInner {
                namespace: namespace.into(),
                service: StaticPartitionService::new(),
                partitions: RwLock::new(BTreeMap::new()),
            }),
        };
        cluster.add_group(DEFAULT_GROUP, partitions)?;
        Ok(cluster)
    }

    /// Namespace the groups live in
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Add another group
    pub fn add_group(&self, name: &str, partitions: u32) -> Result<()> {
        let local: Vec<Arc<LocalPartition>> = (0..partitions)
            .map(|id| Arc::new(LocalPartition::new(PartitionId(id))))
            .collect();
        let handles = local
            .iter()
            .map(|p| Partition::new(p.id(), Arc::clone(p) as Arc<dyn PartitionChannel>))
            .collect();
        let group = PartitionGroup::new(PartitionGroupId::new(&self.inner.namespace, name), handles)?;
        self.inner.service.register(group);
        self.inner.partitions.write().insert(name.to_string(), local);
        Ok(())
    }

    /// Partitions of `group`, in id order
    pub fn partitions(&self, group: &str) -> Vec<Arc<LocalPartition>> {
        self.inner
            .partitions
            .read()
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Partition `id` of the default group
    pub fn partition(&self, id: u32) -> Option<Arc<LocalPartition>> {
        self.partitions(DEFAULT_GROUP).get(id as usize).cloned()
    }

    /// Summed request counters of every partition in `group`
    pub fn stats(&self, group: &str) -> PartitionStats {
        self.partitions(group)
            .iter()
            .map(|p| p.stats())
            .fold(PartitionStats::default(), |acc, s| acc + s)
    }
}

#[async_trait]
impl PartitionService for LocalCluster {
    async fn partition_group(&self, id: &PartitionGroupId) -> Result<PartitionGroup> {
        self.inner.service.partition_group(id).await
    }
}

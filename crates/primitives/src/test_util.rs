//! Shared fixtures for unit tests

use crate::testing::LocalCluster;
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::ExecutionContextFactory;
use tessera_core::{PartitionId, PrimitiveKind, PrimitiveName};
use tessera_partition::{Partition, PartitionChannel};
use tessera_session::{ManagedSession, SessionConfig};

pub(crate) const NAMESPACE: &str = "test";

pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_millis(200),
        retry_backoff: Duration::from_millis(1),
        reconnect_initial_backoff: Duration::from_millis(5),
        reconnect_max_backoff: Duration::from_millis(20),
        ..SessionConfig::default()
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// A local cluster plus the contexts sessions run on
pub(crate) struct Harness {
    pub cluster: LocalCluster,
    pub factory: ExecutionContextFactory,
}

impl Harness {
    pub fn new(partitions: u32) -> Self {
        Self {
            cluster: LocalCluster::new(NAMESPACE, partitions).unwrap(),
            factory: ExecutionContextFactory::new(2, "test-ctx"),
        }
    }

    /// Unopened session for `name` on default-group partition `partition`
    pub fn session(&self, name: &str, kind: PrimitiveKind, partition: u32) -> ManagedSession {
        let local = self.cluster.partition(partition).unwrap();
        ManagedSession::new(
            PrimitiveName::new(NAMESPACE, name),
            kind,
            Partition::new(PartitionId(partition), local as Arc<dyn PartitionChannel>),
            self.factory.create_context().unwrap(),
            fast_config(),
        )
    }

    /// Opened session for `name` on default-group partition `partition`
    pub async fn open(&self, name: &str, kind: PrimitiveKind, partition: u32) -> ManagedSession {
        let session = self.session(name, kind, partition);
        session.open().await.unwrap();
        session
    }
}

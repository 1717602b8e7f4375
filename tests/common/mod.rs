//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

pub use parking_lot::Mutex;
pub use std::sync::Arc;
pub use std::time::Duration;
pub use tessera::primitives::testing::{LocalCluster, LocalPartition, PartitionStats};
pub use tessera::{
    Client, ClientConfig, Error, FnPartitioner, MapEvent, MapEventType, PartitionService,
    Partitioner, PrimitiveState, Serializer, SetEvent, SetEventType, ValueEvent,
};

use std::sync::Once;

pub const NAMESPACE: &str = "it";
pub const GROUP: &str = "raft";

static INIT_TRACING: Once = Once::new();

/// Route library logs to the test harness output
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::INFO)
            .try_init();
    });
}

/// Client config with short timeouts so failure paths resolve quickly
pub fn test_config() -> ClientConfig {
    ClientConfig {
        namespace: NAMESPACE.to_string(),
        context_threads: 2,
        session_timeout_ms: 1000,
        operation_timeout_ms: 2000,
        retry_backoff_ms: 1,
        reconnect_initial_backoff_ms: 5,
        reconnect_max_backoff_ms: 50,
        ..ClientConfig::default()
    }
}

/// Partitioner sending keys starting with 'a' or 'c' to partition 0, 'b' to
/// partition 2 and everything else to partition 1
pub fn letter_partitioner() -> Arc<dyn Partitioner> {
    Arc::new(FnPartitioner::new("letters", |key: &str| {
        match key.chars().next() {
            Some('a') | Some('c') => 0,
            Some('b') => 2,
            _ => 1,
        }
    }))
}

// ============================================================================
// TestClient - a started client over a local cluster
// ============================================================================

pub struct TestClient {
    pub client: Client,
    pub cluster: LocalCluster,
}

impl TestClient {
    /// Started client on the current runtime
    pub fn new(partitions: u32) -> Self {
        Self::with_config(partitions, test_config())
    }

    pub fn with_config(partitions: u32, config: ClientConfig) -> Self {
        init_tracing();
        let cluster = LocalCluster::new(NAMESPACE, partitions).unwrap();
        let client = Client::new(config, Arc::new(cluster.clone())).unwrap();
        client.start().unwrap();
        Self { client, cluster }
    }

    /// Started client on an explicit runtime, for blocking callers
    pub fn on_runtime(partitions: u32, config: ClientConfig, runtime: &tokio::runtime::Runtime) -> Self {
        init_tracing();
        let cluster = LocalCluster::new(NAMESPACE, partitions).unwrap();
        let client = Client::new(config, Arc::new(cluster.clone()))
            .unwrap()
            .with_runtime(runtime.handle().clone());
        client.start().unwrap();
        Self { client, cluster }
    }

    /// A second, independent client over the same cluster
    pub fn peer(&self) -> Client {
        let client = Client::new(test_config(), Arc::new(self.cluster.clone())).unwrap();
        client.start().unwrap();
        client
    }

    pub fn partition(&self, id: u32) -> Arc<LocalPartition> {
        self.cluster.partition(id).unwrap()
    }

    pub fn stats(&self) -> PartitionStats {
        self.cluster.stats(GROUP)
    }
}

pub fn multi_thread_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// Poll `condition` until it holds, failing after two seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

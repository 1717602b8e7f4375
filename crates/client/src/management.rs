//! Process-scoped services shared by every builder of one client
//!
//! Created by [`Client::start`](crate::Client::start) and torn down by
//! [`Client::stop`](crate::Client::stop). Builders hold an `Arc` to it, so the
//! primitive cache, the execution context pool and the partition service are
//! always passed explicitly rather than reached through globals.

use crate::cache::PrimitiveCache;
use std::sync::Arc;
use tessera_concurrency::{ExecutionContext, ExecutionContextFactory};
use tessera_core::{ClientConfig, PartitionGroupId, Result};
use tessera_partition::{PartitionGroup, PartitionService};
use tessera_primitives::BlockingExecutor;
use tessera_session::SessionConfig;
use tokio::runtime::Handle;

/// Services a running client hands to its builders
pub struct ManagementService {
    config: ClientConfig,
    partitions: Arc<dyn PartitionService>,
    cache: Arc<PrimitiveCache>,
    contexts: ExecutionContextFactory,
    runtime: Handle,
}

impl ManagementService {
    pub(crate) fn new(config: ClientConfig, partitions: Arc<dyn PartitionService>, runtime: Handle) -> Self {
        let contexts = ExecutionContextFactory::new(config.context_threads, "tessera-ctx");
        Self {
            config,
            partitions,
            cache: PrimitiveCache::new(),
            contexts,
            runtime,
        }
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Partition group discovery
    pub fn partition_service(&self) -> &Arc<dyn PartitionService> {
        &self.partitions
    }

    /// Resolve a partition group
    pub async fn partition_group(&self, id: &PartitionGroupId) -> Result<PartitionGroup> {
        self.partitions.partition_group(id).await
    }

    /// The singleton registry used by `get` / `get_async`
    pub fn primitive_cache(&self) -> &Arc<PrimitiveCache> {
        &self.cache
    }

    /// Draw a context from the pool
    pub fn create_context(&self) -> Result<ExecutionContext> {
        self.contexts.create_context()
    }

    /// Runtime blocking facades and blocking builds run on
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Session settings derived from the client configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::from(&self.config)
    }

    /// Executor with the configured operation timeout
    pub fn blocking_executor(&self) -> BlockingExecutor {
        BlockingExecutor::new(self.runtime.clone(), self.config.operation_timeout())
    }

    /// Stop the context pool, joining its threads
    pub(crate) fn shutdown_contexts(&self) {
        self.contexts.shutdown();
    }
}

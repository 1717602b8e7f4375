//! Generic primitive builder
//!
//! One builder type serves every primitive kind; the kind-specific assembly
//! lives in [`PrimitiveType::build`]. `build`/`build_async` always create a
//! fresh instance with its own sessions, while `get`/`get_async` return the
//! client-wide instance for the name, building it on first access.

use crate::management::ManagementService;
use crate::types::PrimitiveType;
use futures::future::{join_all, BoxFuture};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{
    Error, PartitionGroupId, PartitionId, PrimitiveKind, PrimitiveName, Result, Serializer,
};
use tessera_partition::{default_partitioner, Partition, PartitionGroup, Partitioner};
use tessera_session::{ManagedSession, SessionConfig};
use tracing::{debug, info, warn};

/// Everything a [`PrimitiveType`] needs to assemble one instance
#[derive(Clone)]
pub struct BuildRequest {
    name: PrimitiveName,
    kind: PrimitiveKind,
    group: PartitionGroupId,
    partitioner: Arc<dyn Partitioner>,
    serializer: Serializer,
    read_only: bool,
    cache_enabled: bool,
    cache_size: usize,
    session_config: SessionConfig,
    management: Arc<ManagementService>,
}

impl BuildRequest {
    /// Primitive name
    pub fn name(&self) -> &PrimitiveName {
        &self.name
    }

    /// Key router for sharded kinds
    pub fn partitioner(&self) -> &Arc<dyn Partitioner> {
        &self.partitioner
    }

    /// Value encoding
    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    /// Whether mutations must be rejected locally
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Whether reads go through a coherent cache
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Read cache capacity
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Resolve the target partition group
    pub async fn partition_group(&self) -> Result<PartitionGroup> {
        self.management.partition_group(&self.group).await
    }

    /// Open a session for this primitive on `partition`
    pub async fn open_session(&self, partition: Partition) -> Result<ManagedSession> {
        let session = ManagedSession::new(
            self.name.clone(),
            self.kind,
            partition,
            self.management.create_context()?,
            self.session_config.clone(),
        );
        session.open().await?;
        Ok(session)
    }

    /// Open one session on the partition the primitive's name routes to
    pub async fn open_routed(&self) -> Result<ManagedSession> {
        let group = self.partition_group().await?;
        let id = self
            .partitioner
            .partition(&self.name.name, &group.partition_ids())?;
        debug!(target: "tessera::router", name = %self.name, partition = %id, "Routed primitive by name");
        self.open_session(group.partition(id)?.clone()).await
    }

    /// Open one session on every partition of the group.
    ///
    /// All-or-nothing: if any open fails, the sessions that did open are
    /// closed again and the first failure is returned.
    pub async fn open_all(&self) -> Result<Vec<(PartitionId, ManagedSession)>> {
        let group = self.partition_group().await?;
        let opens = group.partitions().iter().cloned().map(|partition| async move {
            let id = partition.id();
            (id, self.open_session(partition).await)
        });

        let mut opened = Vec::with_capacity(group.len());
        let mut failure = None;
        for (id, result) in join_all(opens).await {
            match result {
                Ok(session) => opened.push((id, session)),
                Err(e) => {
                    warn!(target: "tessera::client", name = %self.name, partition = %id, error = %e, "Failed to open session");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            None => Ok(opened),
            Some(e) => {
                join_all(opened.iter().map(|(_, session)| session.close(false))).await;
                Err(e)
            }
        }
    }
}

/// Builder for one named primitive of kind `T`
pub struct PrimitiveBuilder<T: PrimitiveType> {
    request: BuildRequest,
    _type: PhantomData<fn() -> T>,
}

impl<T: PrimitiveType> fmt::Debug for PrimitiveBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveBuilder")
            .field("name", &self.request.name)
            .field("kind", &self.request.kind)
            .field("group", &self.request.group)
            .field("partitioner", &self.request.partitioner)
            .field("serializer", &self.request.serializer)
            .field("read_only", &self.request.read_only)
            .field("cache_enabled", &self.request.cache_enabled)
            .finish()
    }
}

impl<T: PrimitiveType> PrimitiveBuilder<T> {
    pub(crate) fn new(name: PrimitiveName, management: Arc<ManagementService>) -> Self {
        let cache_size = management.config().cache_size;
        let session_config = management.session_config();
        let request = BuildRequest {
            group: PartitionGroupId::default_for(name.namespace.clone()),
            kind: T::KIND,
            partitioner: default_partitioner(),
            serializer: Serializer::default(),
            read_only: false,
            cache_enabled: false,
            cache_size,
            session_config,
            name,
            management,
        };
        Self {
            request,
            _type: PhantomData,
        }
    }

    /// Primitive name
    pub fn name(&self) -> &PrimitiveName {
        &self.request.name
    }

    /// Target partition group by name. An empty name selects the namespace's
    /// default group.
    pub fn with_group(mut self, group: &str) -> Self {
        self.request.group = PartitionGroupId::new(self.request.name.namespace.clone(), group);
        self
    }

    /// Key router (default MurmurHash3 with consistent bucketing)
    pub fn with_partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.request.partitioner = partitioner;
        self
    }

    /// Value encoding (default MessagePack)
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.request.serializer = serializer;
        self
    }

    /// Reject every mutating call locally
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.request.read_only = read_only;
        self
    }

    /// Put a coherent read cache in front of value, map and set reads
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.request.cache_enabled = enabled;
        self
    }

    /// Read cache capacity in entries
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.request.cache_size = size;
        self
    }

    /// Session timeout requested from the server
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.request.session_config = self.request.session_config.clone().with_timeout(timeout);
        self
    }

    fn build_future(&self) -> BoxFuture<'static, Result<T::Async>> {
        let request = self.request.clone();
        Box::pin(async move {
            let name = request.name.clone();
            let primitive = T::build(request).await?;
            info!(target: "tessera::client", name = %name, kind = %T::KIND, "Built primitive");
            Ok(primitive)
        })
    }

    /// A build the primitive cache holds until it closes, so client stop
    /// releases it
    fn fresh_future(&self) -> BoxFuture<'static, Result<T::Async>> {
        let cache = Arc::clone(self.request.management.primitive_cache());
        let name = self.request.name.clone();
        let build = self.build_future();
        Box::pin(async move {
            let primitive = build.await?;
            cache.track_fresh(&name, &primitive);
            Ok(primitive)
        })
    }

    fn get_future(&self) -> BoxFuture<'static, Result<T::Async>> {
        let cache = Arc::clone(self.request.management.primitive_cache());
        let name = self.request.name.clone();
        let build = self.build_future();
        Box::pin(async move { cache.get_or_build(&name, move || build).await })
    }

    /// Build a fresh instance with its own sessions.
    ///
    /// The caller may close it at any time; whatever is still open when the
    /// client stops is closed then.
    pub async fn build_async(&self) -> Result<T::Async> {
        self.fresh_future().await
    }

    /// The client-wide instance for this name, built on first access.
    ///
    /// Later calls return the same instance regardless of their builder
    /// options until it is closed.
    pub async fn get_async(&self) -> Result<T::Async> {
        self.get_future().await
    }

    /// Blocking [`build_async`](Self::build_async), wrapped in the kind's
    /// blocking facade.
    ///
    /// Must not be called from a runtime thread.
    pub fn build(&self) -> Result<T::Blocking> {
        let primitive = self.block_on(self.fresh_future())?;
        Ok(T::blocking(primitive, self.request.management.blocking_executor()))
    }

    /// Blocking [`get_async`](Self::get_async), wrapped in the kind's blocking
    /// facade.
    ///
    /// Must not be called from a runtime thread.
    pub fn get(&self) -> Result<T::Blocking> {
        let primitive = self.block_on(self.get_future())?;
        Ok(T::blocking(primitive, self.request.management.blocking_executor()))
    }

    /// Wait for `future` on the client runtime with no extra timeout. The
    /// build's own error is returned unchanged.
    fn block_on<R: Send + 'static>(&self, future: BoxFuture<'static, Result<R>>) -> Result<R> {
        let runtime = self.request.management.runtime();
        let task = runtime.spawn(future);
        runtime
            .block_on(task)
            .map_err(|e| Error::internal(format!("build of {} did not complete: {}", self.request.name, e)))?
    }
}

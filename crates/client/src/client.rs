//! Client entry point
//!
//! A [`Client`] binds a namespace and a partition service to a tokio runtime.
//! While running it owns a [`ManagementService`]; stopping it closes every
//! primitive it built and has not seen closed, empties the primitive cache
//! and shuts the execution context pool down.

use crate::builder::PrimitiveBuilder;
use crate::management::ManagementService;
use crate::types::{AtomicCounterType, AtomicValueType, LogType, MapType, PrimitiveType, SetType};
use parking_lot::RwLock;
use std::sync::Arc;
use tessera_core::{ClientConfig, Error, PrimitiveName, Result};
use tessera_partition::PartitionService;
use tessera_primitives::Value;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Entry point for building primitives
pub struct Client {
    config: ClientConfig,
    partitions: Arc<dyn PartitionService>,
    runtime: Option<Handle>,
    management: RwLock<Option<Arc<ManagementService>>>,
}

impl Client {
    /// Client over `partitions`. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` fails validation.
    pub fn new(config: ClientConfig, partitions: Arc<dyn PartitionService>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            partitions,
            runtime: None,
            management: RwLock::new(None),
        })
    }

    /// Run on `runtime` instead of the runtime current at `start`
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Namespace primitive names resolve in
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Start the context pool and management service. Idempotent.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if no runtime was given and none is current.
    pub fn start(&self) -> Result<()> {
        let mut management = self.management.write();
        if management.is_some() {
            return Ok(());
        }
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| {
                Error::invalid_config("no tokio runtime is running; use Client::with_runtime")
            })?,
        };
        *management = Some(Arc::new(ManagementService::new(
            self.config.clone(),
            Arc::clone(&self.partitions),
            runtime,
        )));
        info!(
            target: "tessera::client",
            namespace = %self.config.namespace,
            context_threads = self.config.context_threads,
            "Client started"
        );
        Ok(())
    }

    /// Whether the client is started
    pub fn is_running(&self) -> bool {
        self.management.read().is_some()
    }

    /// Close every primitive still open and stop the context pool.
    /// Idempotent.
    ///
    /// Covers instances from `get` and from `build` alike. Every primitive is
    /// closed even if some fail; the first failure is returned after the pool
    /// has stopped.
    pub async fn stop(&self) -> Result<()> {
        let management = self.management.write().take();
        let Some(management) = management else {
            return Ok(());
        };

        let closed = management.primitive_cache().close_all().await;
        if let Err(e) = &closed {
            warn!(target: "tessera::client", error = %e, "Some primitives failed to close");
        }

        let pool = Arc::clone(&management);
        tokio::task::spawn_blocking(move || pool.shutdown_contexts())
            .await
            .map_err(|e| Error::internal(format!("context pool shutdown failed: {}", e)))?;
        info!(target: "tessera::client", namespace = %self.config.namespace, "Client stopped");
        closed
    }

    /// Services of the running client
    ///
    /// # Errors
    ///
    /// `NotRunning` if the client is not started.
    pub fn management(&self) -> Result<Arc<ManagementService>> {
        self.management.read().clone().ok_or(Error::NotRunning)
    }

    /// Builder for primitive `name` of kind `T`
    pub fn primitive_builder<T: PrimitiveType>(&self, name: &str) -> Result<PrimitiveBuilder<T>> {
        let management = self.management()?;
        let name = PrimitiveName::new(self.config.namespace.clone(), name);
        Ok(PrimitiveBuilder::new(name, management))
    }

    /// Builder for an atomic counter
    pub fn atomic_counter_builder(&self, name: &str) -> Result<PrimitiveBuilder<AtomicCounterType>> {
        self.primitive_builder(name)
    }

    /// Builder for an atomic value of `V`
    pub fn atomic_value_builder<V: Value>(&self, name: &str) -> Result<PrimitiveBuilder<AtomicValueType<V>>> {
        self.primitive_builder(name)
    }

    /// Builder for a map of `V`
    pub fn map_builder<V: Value>(&self, name: &str) -> Result<PrimitiveBuilder<MapType<V>>> {
        self.primitive_builder(name)
    }

    /// Builder for a set
    pub fn set_builder(&self, name: &str) -> Result<PrimitiveBuilder<SetType>> {
        self.primitive_builder(name)
    }

    /// Builder for a log of `V`
    pub fn log_builder<V: Value>(&self, name: &str) -> Result<PrimitiveBuilder<LogType<V>>> {
        self.primitive_builder(name)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.config.namespace)
            .field("running", &self.is_running())
            .finish()
    }
}

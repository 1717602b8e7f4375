//! Client layer for tessera
//!
//! This crate is the user-facing entry point:
//! - Client: start / stop, namespaced builders
//! - ManagementService: the partition service, context pool and primitive
//!   cache shared by one running client
//! - PrimitiveCache: at most one build per primitive name
//! - PrimitiveBuilder: generic builder over a `PrimitiveType`
//!
//! ```ignore
//! let client = Client::new(ClientConfig::default(), partitions)?;
//! client.start()?;
//! let users = client.map_builder::<User>("users")?.with_cache(true).get_async().await?;
//! users.put("alice", &alice).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod cache;
pub mod client;
pub mod management;
pub mod types;

pub use builder::{BuildRequest, PrimitiveBuilder};
pub use cache::{Cacheable, PrimitiveCache};
pub use client::Client;
pub use management::ManagementService;
pub use types::{AtomicCounterType, AtomicValueType, LogType, MapType, PrimitiveType, SetType};

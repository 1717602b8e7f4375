//! Core identifiers and value wrappers
//!
//! - [`PrimitiveName`]: namespaced primitive name
//! - [`PartitionGroupId`]: target partition group, defaults to the primitive's namespace
//! - [`PartitionId`]: one partition of a group
//! - [`SessionId`]: server-assigned session handle
//! - [`Versioned`]: a value tagged with the version the server stored it at
//! - [`PrimitiveKind`]: the closed set of primitive types
//! - [`ListenerId`]: handle returned by listener registration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Namespaced primitive name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimitiveName {
    /// Namespace (tenant) the primitive lives in
    pub namespace: String,
    /// Primitive name within the namespace
    pub name: String,
}

impl PrimitiveName {
    /// Create a new primitive name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PrimitiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Identifier of a partition group
///
/// An empty `name` means "the default group of the namespace".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionGroupId {
    /// Namespace the group belongs to
    pub namespace: String,
    /// Group name (empty for the namespace default)
    pub name: String,
}

impl PartitionGroupId {
    /// Create a group identifier
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The default group of a namespace
    pub fn default_for(namespace: impl Into<String>) -> Self {
        Self::new(namespace, "")
    }

    /// Whether this identifier names the namespace default group
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for PartitionGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "{}/<default>", self.namespace)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Partition identifier within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl PartitionId {
    /// Raw identifier
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Raw identifier
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value tagged with the version it was stored at
///
/// Versions are assigned by the server and strictly increase per primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    /// Stored value
    pub value: T,
    /// Server-assigned version
    pub version: u64,
}

impl<T> Versioned<T> {
    /// Wrap a value with its version
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }

    /// Transform the value, keeping the version
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }

    /// Fallible transform of the value, keeping the version
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Versioned<U>, E> {
        Ok(Versioned {
            value: f(self.value)?,
            version: self.version,
        })
    }
}

/// The closed set of primitive types the client can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Atomic 64-bit counter, routed by name
    Counter,
    /// Atomic versioned value, routed by name
    Value,
    /// Key/value map, sharded by key
    Map,
    /// Set of strings, sharded by element
    Set,
    /// Append-only log, routed by name
    Log,
}

impl PrimitiveKind {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::Counter => "counter",
            PrimitiveKind::Value => "value",
            PrimitiveKind::Map => "map",
            PrimitiveKind::Set => "set",
            PrimitiveKind::Log => "log",
        }
    }

    /// Whether instances of this kind open one session per partition
    pub fn is_sharded(&self) -> bool {
        matches!(self, PrimitiveKind::Map | PrimitiveKind::Set)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    /// Allocate a process-unique listener id
    pub fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

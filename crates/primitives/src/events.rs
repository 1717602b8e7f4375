//! Change events published by primitives
//!
//! Every event carries the before/after pair the server observed, so a
//! consumer can tell an insert from an update without a second read. Events
//! are generic over the value type: the raw layer uses `Vec<u8>`, typed
//! handles decode into their own `V`.

use serde::{Deserialize, Serialize};
use tessera_core::{Result, Versioned};

/// Kind of map change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapEventType {
    /// Key was absent before
    Insert,
    /// Key was present and got a new value
    Update,
    /// Key was removed
    Remove,
}

/// A change to one map entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEvent<V = Vec<u8>> {
    /// What happened
    pub event_type: MapEventType,
    /// Affected key
    pub key: String,
    /// Value after the change (`None` on remove)
    pub new_value: Option<Versioned<V>>,
    /// Value before the change (`None` on insert)
    pub old_value: Option<Versioned<V>>,
}

impl<V> MapEvent<V> {
    /// Decode both values, keeping type, key and versions
    pub fn try_map<U>(self, f: impl Fn(V) -> Result<U>) -> Result<MapEvent<U>> {
        Ok(MapEvent {
            event_type: self.event_type,
            key: self.key,
            new_value: self.new_value.map(|v| v.try_map(&f)).transpose()?,
            old_value: self.old_value.map(|v| v.try_map(&f)).transpose()?,
        })
    }
}

/// A change to an atomic value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEvent<V = Vec<u8>> {
    /// Value after the change
    pub new_value: Option<Versioned<V>>,
    /// Value before the change
    pub old_value: Option<Versioned<V>>,
}

impl<V> ValueEvent<V> {
    /// Decode both values, keeping versions
    pub fn try_map<U>(self, f: impl Fn(V) -> Result<U>) -> Result<ValueEvent<U>> {
        Ok(ValueEvent {
            new_value: self.new_value.map(|v| v.try_map(&f)).transpose()?,
            old_value: self.old_value.map(|v| v.try_map(&f)).transpose()?,
        })
    }
}

/// Kind of set change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetEventType {
    /// Element added
    Add,
    /// Element removed
    Remove,
}

/// A change to set membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetEvent {
    /// What happened
    pub event_type: SetEventType,
    /// Affected element
    pub element: String,
}

/// One log record; also the event published on append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry<V = Vec<u8>> {
    /// Position in the log, starting at 0
    pub index: u64,
    /// Appended value
    pub value: V,
}

impl<V> LogEntry<V> {
    /// Decode the value, keeping the index
    pub fn try_map<U>(self, f: impl FnOnce(V) -> Result<U>) -> Result<LogEntry<U>> {
        Ok(LogEntry {
            index: self.index,
            value: f(self.value)?,
        })
    }
}

//! Request/response payloads of the primitive operations
//!
//! Payloads travel inside session commands and queries as MessagePack. The
//! session layer never looks inside them; only the session-backed primitives
//! and the in-memory backend do.

use crate::events::LogEntry;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_core::{Error, Result, Versioned};

/// Raw stored value
pub type RawValue = Versioned<Vec<u8>>;

/// Counter operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterOperation {
    /// Read
    Get,
    /// Overwrite
    Set(i64),
    /// Overwrite if the current value is `expect`
    CompareAndSet {
        /// Expected current value
        expect: i64,
        /// New value
        update: i64,
    },
    /// Add and return the new value
    AddAndGet(i64),
    /// Add and return the previous value
    GetAndAdd(i64),
}

/// Atomic value operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueOperation {
    /// Read
    Get,
    /// Overwrite (`None` clears)
    Set(Option<Vec<u8>>),
    /// Overwrite and return the previous value
    GetAndSet(Option<Vec<u8>>),
    /// Overwrite if the current bytes equal `expect`
    CompareAndSet {
        /// Expected current value
        expect: Option<Vec<u8>>,
        /// New value
        update: Option<Vec<u8>>,
    },
    /// Overwrite if the current version is `version`
    CompareAndSetVersion {
        /// Expected current version
        version: u64,
        /// New value
        update: Option<Vec<u8>>,
    },
}

/// Map operations (one partition's share of the map)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapOperation {
    /// Entry count
    Size,
    /// Key membership
    ContainsKey(String),
    /// Value membership
    ContainsValue(Vec<u8>),
    /// Read one entry
    Get(String),
    /// Write, returning the previous entry
    Put(String, Vec<u8>),
    /// Write if absent, returning the existing entry if any
    PutIfAbsent(String, Vec<u8>),
    /// Write if present, returning the replaced entry
    Replace(String, Vec<u8>),
    /// Remove, returning the removed entry
    Remove(String),
    /// Remove if the entry is at `version`
    RemoveIfVersion(String, u64),
    /// Remove everything
    Clear,
    /// All keys
    Keys,
    /// All entries
    Entries,
}

/// Set operations (one partition's share of the set)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOperation {
    /// Element count
    Size,
    /// Membership
    Contains(String),
    /// Insert, returning whether the set changed
    Add(String),
    /// Remove, returning whether the set changed
    Remove(String),
    /// Remove everything
    Clear,
    /// Membership of every element
    ContainsAll(Vec<String>),
    /// Insert several
    AddAll(Vec<String>),
    /// Remove several
    RemoveAll(Vec<String>),
    /// Keep only the listed elements
    RetainAll(Vec<String>),
    /// All elements
    Elements,
}

/// Log operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogOperation {
    /// Append, returning the new entry's index
    Append(Vec<u8>),
    /// Read one entry
    Get(u64),
    /// Entry count
    Size,
    /// All entries
    Entries,
}

/// Any primitive operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// See [`CounterOperation`]
    Counter(CounterOperation),
    /// See [`ValueOperation`]
    Value(ValueOperation),
    /// See [`MapOperation`]
    Map(MapOperation),
    /// See [`SetOperation`]
    Set(SetOperation),
    /// See [`LogOperation`]
    Log(LogOperation),
}

impl Operation {
    /// Short name for logs and errors, e.g. `map.put`
    pub fn label(&self) -> &'static str {
        match self {
            Operation::Counter(op) => match op {
                CounterOperation::Get => "counter.get",
                CounterOperation::Set(_) => "counter.set",
                CounterOperation::CompareAndSet { .. } => "counter.compare_and_set",
                CounterOperation::AddAndGet(_) => "counter.add_and_get",
                CounterOperation::GetAndAdd(_) => "counter.get_and_add",
            },
            Operation::Value(op) => match op {
                ValueOperation::Get => "value.get",
                ValueOperation::Set(_) => "value.set",
                ValueOperation::GetAndSet(_) => "value.get_and_set",
                ValueOperation::CompareAndSet { .. } => "value.compare_and_set",
                ValueOperation::CompareAndSetVersion { .. } => "value.compare_and_set_version",
            },
            Operation::Map(op) => match op {
                MapOperation::Size => "map.size",
                MapOperation::ContainsKey(_) => "map.contains_key",
                MapOperation::ContainsValue(_) => "map.contains_value",
                MapOperation::Get(_) => "map.get",
                MapOperation::Put(..) => "map.put",
                MapOperation::PutIfAbsent(..) => "map.put_if_absent",
                MapOperation::Replace(..) => "map.replace",
                MapOperation::Remove(_) => "map.remove",
                MapOperation::RemoveIfVersion(..) => "map.remove_if_version",
                MapOperation::Clear => "map.clear",
                MapOperation::Keys => "map.keys",
                MapOperation::Entries => "map.entries",
            },
            Operation::Set(op) => match op {
                SetOperation::Size => "set.size",
                SetOperation::Contains(_) => "set.contains",
                SetOperation::Add(_) => "set.add",
                SetOperation::Remove(_) => "set.remove",
                SetOperation::Clear => "set.clear",
                SetOperation::ContainsAll(_) => "set.contains_all",
                SetOperation::AddAll(_) => "set.add_all",
                SetOperation::RemoveAll(_) => "set.remove_all",
                SetOperation::RetainAll(_) => "set.retain_all",
                SetOperation::Elements => "set.elements",
            },
            Operation::Log(op) => match op {
                LogOperation::Append(_) => "log.append",
                LogOperation::Get(_) => "log.get",
                LogOperation::Size => "log.size",
                LogOperation::Entries => "log.entries",
            },
        }
    }
}

/// Any operation result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// No payload
    Unit,
    /// Boolean outcome
    Bool(bool),
    /// Counter value
    Long(i64),
    /// Element or entry count
    Size(u64),
    /// Log index
    Index(u64),
    /// Optional versioned value
    Value(Option<RawValue>),
    /// Map keys
    Keys(Vec<String>),
    /// Map entries
    Entries(Vec<(String, RawValue)>),
    /// Set elements
    Elements(Vec<String>),
    /// Optional log entry
    LogEntry(Option<LogEntry>),
    /// Log entries
    LogEntries(Vec<LogEntry>),
}

fn unexpected(response: &Response, expected: &str) -> Error {
    Error::internal(format!("expected {} response, got {:?}", expected, response))
}

impl Response {
    /// Expect `Unit`
    pub fn into_unit(self) -> Result<()> {
        match self {
            Response::Unit => Ok(()),
            other => Err(unexpected(&other, "unit")),
        }
    }

    /// Expect `Bool`
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Response::Bool(b) => Ok(b),
            other => Err(unexpected(&other, "bool")),
        }
    }

    /// Expect `Long`
    pub fn into_long(self) -> Result<i64> {
        match self {
            Response::Long(v) => Ok(v),
            other => Err(unexpected(&other, "long")),
        }
    }

    /// Expect `Size`
    pub fn into_size(self) -> Result<u64> {
        match self {
            Response::Size(n) => Ok(n),
            other => Err(unexpected(&other, "size")),
        }
    }

    /// Expect `Index`
    pub fn into_index(self) -> Result<u64> {
        match self {
            Response::Index(i) => Ok(i),
            other => Err(unexpected(&other, "index")),
        }
    }

    /// Expect `Value`
    pub fn into_value(self) -> Result<Option<RawValue>> {
        match self {
            Response::Value(v) => Ok(v),
            other => Err(unexpected(&other, "value")),
        }
    }

    /// Expect `Keys`
    pub fn into_keys(self) -> Result<Vec<String>> {
        match self {
            Response::Keys(keys) => Ok(keys),
            other => Err(unexpected(&other, "keys")),
        }
    }

    /// Expect `Entries`
    pub fn into_entries(self) -> Result<Vec<(String, RawValue)>> {
        match self {
            Response::Entries(entries) => Ok(entries),
            other => Err(unexpected(&other, "entries")),
        }
    }

    /// Expect `Elements`
    pub fn into_elements(self) -> Result<Vec<String>> {
        match self {
            Response::Elements(elements) => Ok(elements),
            other => Err(unexpected(&other, "elements")),
        }
    }

    /// Expect `LogEntry`
    pub fn into_log_entry(self) -> Result<Option<LogEntry>> {
        match self {
            Response::LogEntry(entry) => Ok(entry),
            other => Err(unexpected(&other, "log entry")),
        }
    }

    /// Expect `LogEntries`
    pub fn into_log_entries(self) -> Result<Vec<LogEntry>> {
        match self {
            Response::LogEntries(entries) => Ok(entries),
            other => Err(unexpected(&other, "log entries")),
        }
    }
}

/// Encode a payload
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Decode a payload
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

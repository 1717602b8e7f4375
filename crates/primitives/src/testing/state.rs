//! Primitive state machines of the in-memory backend

use crate::events::{LogEntry, MapEvent, MapEventType, SetEvent, SetEventType, ValueEvent};
use crate::protocol::{
    self, CounterOperation, LogOperation, MapOperation, Operation, RawValue, Response,
    SetOperation, ValueOperation,
};
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{Error, PrimitiveKind, PrimitiveName, Result, Versioned};

/// Stored state of one primitive
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PrimitiveData {
    Counter(i64),
    Value(Option<RawValue>),
    Map(BTreeMap<String, RawValue>),
    Set(BTreeSet<String>),
    Log(Vec<Vec<u8>>),
}

impl PrimitiveData {
    pub(crate) fn empty(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Counter => PrimitiveData::Counter(0),
            PrimitiveKind::Value => PrimitiveData::Value(None),
            PrimitiveKind::Map => PrimitiveData::Map(BTreeMap::new()),
            PrimitiveKind::Set => PrimitiveData::Set(BTreeSet::new()),
            PrimitiveKind::Log => PrimitiveData::Log(Vec::new()),
        }
    }

    pub(crate) fn kind(&self) -> PrimitiveKind {
        match self {
            PrimitiveData::Counter(_) => PrimitiveKind::Counter,
            PrimitiveData::Value(_) => PrimitiveKind::Value,
            PrimitiveData::Map(_) => PrimitiveKind::Map,
            PrimitiveData::Set(_) => PrimitiveKind::Set,
            PrimitiveData::Log(_) => PrimitiveKind::Log,
        }
    }
}

pub(crate) fn operation_kind(op: &Operation) -> PrimitiveKind {
    match op {
        Operation::Counter(_) => PrimitiveKind::Counter,
        Operation::Value(_) => PrimitiveKind::Value,
        Operation::Map(_) => PrimitiveKind::Map,
        Operation::Set(_) => PrimitiveKind::Set,
        Operation::Log(_) => PrimitiveKind::Log,
    }
}

/// Result of applying one operation: the response plus encoded events
pub(crate) type Applied = (Response, Vec<Vec<u8>>);

/// Apply `op` to `data`, assigning new versions from `versions`
pub(crate) fn apply(
    name: &PrimitiveName,
    data: &mut PrimitiveData,
    op: Operation,
    versions: &mut u64,
) -> Result<Applied> {
    let mut next_version = || {
        *versions += 1;
        *versions
    };

    match (data, op) {
        (PrimitiveData::Counter(value), Operation::Counter(op)) => Ok(match op {
            CounterOperation::Get => (Response::Long(*value), vec![]),
            CounterOperation::Set(v) => {
                *value = v;
                (Response::Unit, vec![])
            }
            CounterOperation::CompareAndSet { expect, update } => {
                let swapped = *value == expect;
                if swapped {
                    *value = update;
                }
                (Response::Bool(swapped), vec![])
            }
            CounterOperation::AddAndGet(delta) => {
                *value = value.wrapping_add(delta);
                (Response::Long(*value), vec![])
            }
            CounterOperation::GetAndAdd(delta) => {
                let previous = *value;
                *value = value.wrapping_add(delta);
                (Response::Long(previous), vec![])
            }
        }),

        (PrimitiveData::Value(current), Operation::Value(op)) => {
            let mut write = |current: &mut Option<RawValue>, update: Option<Vec<u8>>| {
                let new_value = update.map(|bytes| Versioned::new(bytes, next_version()));
                let old_value = std::mem::replace(current, new_value.clone());
                let event = protocol::encode(&ValueEvent {
                    new_value,
                    old_value: old_value.clone(),
                });
                (old_value, event)
            };
            match op {
                ValueOperation::Get => Ok((Response::Value(current.clone()), vec![])),
                ValueOperation::Set(update) => {
                    let (_, event) = write(current, update);
                    Ok((Response::Unit, vec![event?]))
                }
                ValueOperation::GetAndSet(update) => {
                    let (old, event) = write(current, update);
                    Ok((Response::Value(old), vec![event?]))
                }
                ValueOperation::CompareAndSet { expect, update } => {
                    if current.as_ref().map(|v| &v.value) != expect.as_ref() {
                        return Ok((Response::Bool(false), vec![]));
                    }
                    let (_, event) = write(current, update);
                    Ok((Response::Bool(true), vec![event?]))
                }
                ValueOperation::CompareAndSetVersion { version, update } => {
                    let current_version = current.as_ref().map(|v| v.version).unwrap_or(0);
                    if current_version != version {
                        return Ok((Response::Bool(false), vec![]));
                    }
                    let (_, event) = write(current, update);
                    Ok((Response::Bool(true), vec![event?]))
                }
            }
        }

        (PrimitiveData::Map(map), Operation::Map(op)) => {
            let event = |event_type: MapEventType,
                         key: &str,
                         new_value: Option<RawValue>,
                         old_value: Option<RawValue>| {
                protocol::encode(&MapEvent {
                    event_type,
                    key: key.to_string(),
                    new_value,
                    old_value,
                })
            };
            match op {
                MapOperation::Size => Ok((Response::Size(map.len() as u64), vec![])),
                MapOperation::ContainsKey(key) => {
                    Ok((Response::Bool(map.contains_key(&key)), vec![]))
                }
                MapOperation::ContainsValue(value) => Ok((
                    Response::Bool(map.values().any(|v| v.value == value)),
                    vec![],
                )),
                MapOperation::Get(key) => Ok((Response::Value(map.get(&key).cloned()), vec![])),
                MapOperation::Put(key, value) => {
                    let new_value = Versioned::new(value, next_version());
                    let old = map.insert(key.clone(), new_value.clone());
                    let event_type = if old.is_some() {
                        MapEventType::Update
                    } else {
                        MapEventType::Insert
                    };
                    let e = event(event_type, &key, Some(new_value), old.clone())?;
                    Ok((Response::Value(old), vec![e]))
                }
                MapOperation::PutIfAbsent(key, value) => {
                    if let Some(existing) = map.get(&key) {
                        return Ok((Response::Value(Some(existing.clone())), vec![]));
                    }
                    let new_value = Versioned::new(value, next_version());
                    map.insert(key.clone(), new_value.clone());
                    let e = event(MapEventType::Insert, &key, Some(new_value), None)?;
                    Ok((Response::Value(None), vec![e]))
                }
                MapOperation::Replace(key, value) => {
                    if !map.contains_key(&key) {
                        return Ok((Response::Value(None), vec![]));
                    }
                    let new_value = Versioned::new(value, next_version());
                    let old = map.insert(key.clone(), new_value.clone());
                    let e = event(MapEventType::Update, &key, Some(new_value), old.clone())?;
                    Ok((Response::Value(old), vec![e]))
                }
                MapOperation::Remove(key) => match map.remove(&key) {
                    Some(old) => {
                        let e = event(MapEventType::Remove, &key, None, Some(old.clone()))?;
                        Ok((Response::Value(Some(old)), vec![e]))
                    }
                    None => Ok((Response::Value(None), vec![])),
                },
                MapOperation::RemoveIfVersion(key, version) => {
                    if map.get(&key).map(|v| v.version) != Some(version) {
                        return Ok((Response::Bool(false), vec![]));
                    }
                    let old = map.remove(&key);
                    let e = event(MapEventType::Remove, &key, None, old)?;
                    Ok((Response::Bool(true), vec![e]))
                }
                MapOperation::Clear => {
                    let removed = std::mem::take(map);
                    let events = removed
                        .into_iter()
                        .map(|(key, old)| event(MapEventType::Remove, &key, None, Some(old)))
                        .collect::<Result<Vec<_>>>()?;
                    Ok((Response::Unit, events))
                }
                MapOperation::Keys => Ok((Response::Keys(map.keys().cloned().collect()), vec![])),
                MapOperation::Entries => Ok((
                    Response::Entries(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
                    vec![],
                )),
            }
        }

        (PrimitiveData::Set(set), Operation::Set(op)) => {
            let event = |event_type: SetEventType, element: &str| {
                protocol::encode(&SetEvent {
                    event_type,
                    element: element.to_string(),
                })
            };
            match op {
                SetOperation::Size => Ok((Response::Size(set.len() as u64), vec![])),
                SetOperation::Contains(element) => {
                    Ok((Response::Bool(set.contains(&element)), vec![]))
                }
                SetOperation::Add(element) => {
                    if set.insert(element.clone()) {
                        Ok((Response::Bool(true), vec![event(SetEventType::Add, &element)?]))
                    } else {
                        Ok((Response::Bool(false), vec![]))
                    }
                }
                SetOperation::Remove(element) => {
                    if set.remove(&element) {
                        Ok((Response::Bool(true), vec![event(SetEventType::Remove, &element)?]))
                    } else {
                        Ok((Response::Bool(false), vec![]))
                    }
                }
                SetOperation::Clear => {
                    let removed = std::mem::take(set);
                    let events = removed
                        .iter()
                        .map(|element| event(SetEventType::Remove, element))
                        .collect::<Result<Vec<_>>>()?;
                    Ok((Response::Unit, events))
                }
                SetOperation::ContainsAll(elements) => Ok((
                    Response::Bool(elements.iter().all(|e| set.contains(e))),
                    vec![],
                )),
                SetOperation::AddAll(elements) => {
                    let mut events = Vec::new();
                    for element in elements {
                        if set.insert(element.clone()) {
                            events.push(event(SetEventType::Add, &element)?);
                        }
                    }
                    Ok((Response::Bool(!events.is_empty()), events))
                }
                SetOperation::RemoveAll(elements) => {
                    let mut events = Vec::new();
                    for element in elements {
                        if set.remove(&element) {
                            events.push(event(SetEventType::Remove, &element)?);
                        }
                    }
                    Ok((Response::Bool(!events.is_empty()), events))
                }
                SetOperation::RetainAll(elements) => {
                    let keep: BTreeSet<String> = elements.into_iter().collect();
                    let dropped: Vec<String> =
                        set.iter().filter(|e| !keep.contains(*e)).cloned().collect();
                    let mut events = Vec::with_capacity(dropped.len());
                    for element in dropped {
                        set.remove(&element);
                        events.push(event(SetEventType::Remove, &element)?);
                    }
                    Ok((Response::Bool(!events.is_empty()), events))
                }
                SetOperation::Elements => {
                    Ok((Response::Elements(set.iter().cloned().collect()), vec![]))
                }
            }
        }

        (PrimitiveData::Log(log), Operation::Log(op)) => match op {
            LogOperation::Append(value) => {
                let index = log.len() as u64;
                log.push(value.clone());
                let e = protocol::encode(&LogEntry { index, value })?;
                Ok((Response::Index(index), vec![e]))
            }
            LogOperation::Get(index) => {
                let entry = log.get(index as usize).map(|value| LogEntry {
                    index,
                    value: value.clone(),
                });
                Ok((Response::LogEntry(entry), vec![]))
            }
            LogOperation::Size => Ok((Response::Size(log.len() as u64), vec![])),
            LogOperation::Entries => Ok((
                Response::LogEntries(
                    log.iter()
                        .enumerate()
                        .map(|(i, value)| LogEntry {
                            index: i as u64,
                            value: value.clone(),
                        })
                        .collect(),
                ),
                vec![],
            )),
        },

        (data, op) => Err(Error::TypeMismatch {
            name: name.to_string(),
            expected: operation_kind(&op).to_string(),
            actual: data.kind().to_string(),
        }),
    }
}

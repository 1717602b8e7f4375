//! In-memory partition replica set

use super::state::{apply, operation_kind, Applied, PrimitiveData};
use crate::protocol::{self, Operation};
use futures::channel::{mpsc, oneshot};
use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tessera_core::{Error, PartitionId, PrimitiveName, Result, SessionId};
use tessera_partition::{
    CloseSessionRequest, EventStream, KeepAliveRequest, OpenSessionRequest, OpenSessionResponse,
    PartitionChannel, RequestHeader,
};
use tracing::trace;

/// Responses kept per session for resent commands
const RESPONSE_CACHE_LEN: usize = 128;

/// Counts of requests a partition has received
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    /// Session opens
    pub opens: u64,
    /// Commands, including resends
    pub commands: u64,
    /// Queries
    pub queries: u64,
    /// Keep-alive rounds
    pub keep_alives: u64,
    /// Session closes
    pub closes: u64,
    /// Event subscriptions
    pub subscribes: u64,
}

impl std::ops::Add for PartitionStats {
    type Output = PartitionStats;

    fn add(self, other: PartitionStats) -> PartitionStats {
        PartitionStats {
            opens: self.opens + other.opens,
            commands: self.commands + other.commands,
            queries: self.queries + other.queries,
            keep_alives: self.keep_alives + other.keep_alives,
            closes: self.closes + other.closes,
            subscribes: self.subscribes + other.subscribes,
        }
    }
}

#[derive(Default)]
struct Counters {
    opens: AtomicU64,
    commands: AtomicU64,
    queries: AtomicU64,
    keep_alives: AtomicU64,
    closes: AtomicU64,
    subscribes: AtomicU64,
}

#[derive(Default)]
struct Faults {
    down: AtomicBool,
    stalled: AtomicBool,
    fail_keep_alives: AtomicBool,
    reject_subscriptions: AtomicBool,
    unavailable: AtomicUsize,
    lost_responses: AtomicUsize,
}

struct SessionRecord {
    last_sequence: u64,
    responses: VecDeque<(u64, Vec<u8>)>,
}

struct Subscriber {
    name: PrimitiveName,
    session_id: SessionId,
    sender: mpsc::UnboundedSender<Result<Vec<u8>>>,
}

#[derive(Default)]
struct PartitionState {
    next_session: u64,
    next_version: u64,
    sessions: HashMap<SessionId, SessionRecord>,
    primitives: HashMap<PrimitiveName, PrimitiveData>,
    subscribers: Vec<Subscriber>,
}

impl PartitionState {
    fn publish(&mut self, name: &PrimitiveName, events: Vec<Vec<u8>>) {
        if events.is_empty() {
            return;
        }
        self.subscribers.retain(|subscriber| {
            if &subscriber.name != name {
                return true;
            }
            events
                .iter()
                .all(|event| subscriber.sender.unbounded_send(Ok(event.clone())).is_ok())
        });
    }

    fn apply(&mut self, name: &PrimitiveName, op: Operation) -> Result<Applied> {
        let PartitionState {
            primitives,
            next_version,
            ..
        } = self;
        let data = primitives
            .entry(name.clone())
            .or_insert_with(|| PrimitiveData::empty(operation_kind(&op)));
        apply(name, data, op, next_version)
    }
}

/// One partition of a [`LocalCluster`](super::LocalCluster)
///
/// Commands are applied once per `(session, sequence)`: a resent command
/// gets the response recorded the first time.
pub struct LocalPartition {
    id: PartitionId,
    state: Mutex<PartitionState>,
    counters: Counters,
    faults: Faults,
    /// Commands received while stalled, answered on release
    held: Mutex<Vec<HeldCommand>>,
    command_log: Mutex<Vec<RequestHeader>>,
}

struct HeldCommand {
    header: RequestHeader,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

impl LocalPartition {
    /// Empty partition
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            state: Mutex::new(PartitionState::default()),
            counters: Counters::default(),
            faults: Faults::default(),
            held: Mutex::new(Vec::new()),
            command_log: Mutex::new(Vec::new()),
        }
    }

    /// Partition id
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// Snapshot of the request counters
    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            opens: self.counters.opens.load(Ordering::SeqCst),
            commands: self.counters.commands.load(Ordering::SeqCst),
            queries: self.counters.queries.load(Ordering::SeqCst),
            keep_alives: self.counters.keep_alives.load(Ordering::SeqCst),
            closes: self.counters.closes.load(Ordering::SeqCst),
            subscribes: self.counters.subscribes.load(Ordering::SeqCst),
        }
    }

    /// Headers of every command received, in arrival order
    pub fn command_log(&self) -> Vec<RequestHeader> {
        self.command_log.lock().clone()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Whether state exists for `name`
    pub fn contains_primitive(&self, name: &PrimitiveName) -> bool {
        self.state.lock().primitives.contains_key(name)
    }

    /// Fail every request with a transport error while `down` is set
    pub fn set_down(&self, down: bool) {
        self.faults.down.store(down, Ordering::SeqCst);
    }

    /// Hold commands unanswered while set. Clearing it applies the held
    /// commands in arrival order and answers them.
    pub fn stall_commands(&self, stall: bool) {
        let released = {
            let mut held = self.held.lock();
            self.faults.stalled.store(stall, Ordering::SeqCst);
            if stall {
                return;
            }
            std::mem::take(&mut *held)
        };
        for command in released {
            let _ = command
                .reply
                .send(self.handle_command(command.header, command.payload));
        }
    }

    /// Fail keep-alives with a transport error while set
    pub fn fail_keep_alives(&self, fail: bool) {
        self.faults.fail_keep_alives.store(fail, Ordering::SeqCst);
    }

    /// Refuse new event subscriptions while set; sessions stay healthy
    pub fn reject_subscriptions(&self, reject: bool) {
        self.faults.reject_subscriptions.store(reject, Ordering::SeqCst);
    }

    /// Reject the next `count` commands and queries as unavailable, without
    /// applying them
    pub fn reject_next(&self, count: usize) {
        self.faults.unavailable.store(count, Ordering::SeqCst);
    }

    /// Apply the next `count` commands but answer them as unavailable
    pub fn lose_next_responses(&self, count: usize) {
        self.faults.lost_responses.store(count, Ordering::SeqCst);
    }

    /// Forget every session and end their event streams
    pub fn expire_sessions(&self) {
        let mut state = self.state.lock();
        state.sessions.clear();
        state.subscribers.clear();
    }

    /// Complete every open event stream without touching the sessions
    pub fn end_streams(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Number of event streams whose receiver is still listening
    pub fn stream_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| !s.sender.is_closed());
        state.subscribers.len()
    }

    /// Push an event to every subscriber of `name`, as if another client
    /// had changed it
    pub fn inject_event<E: Serialize>(&self, name: &PrimitiveName, event: &E) -> Result<()> {
        let bytes = protocol::encode(event)?;
        self.state.lock().publish(name, vec![bytes]);
        Ok(())
    }

    /// Apply `op` directly, bypassing sessions, and publish its events.
    /// Simulates a write from another client.
    pub fn apply_external(&self, name: &PrimitiveName, op: Operation) -> Result<()> {
        let mut state = self.state.lock();
        let (_, events) = state.apply(name, op)?;
        state.publish(name, events);
        Ok(())
    }

    fn check_up(&self) -> Result<()> {
        if self.faults.down.load(Ordering::SeqCst) {
            return Err(Error::transport(format!("partition {} is down", self.id)));
        }
        Ok(())
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_session(state: &PartitionState, session_id: SessionId) -> Result<()> {
        if state.sessions.contains_key(&session_id) {
            Ok(())
        } else {
            Err(Error::SessionExpired {
                session_id: session_id.as_u64(),
            })
        }
    }

    fn handle_open(&self, request: OpenSessionRequest) -> Result<OpenSessionResponse> {
        self.check_up()?;
        let mut state = self.state.lock();
        state.next_session += 1;
        let session_id = SessionId(state.next_session);
        state
            .primitives
            .entry(request.name)
            .or_insert_with(|| PrimitiveData::empty(request.kind));
        state.sessions.insert(
            session_id,
            SessionRecord {
                last_sequence: 0,
                responses: VecDeque::new(),
            },
        );
        Ok(OpenSessionResponse {
            session_id,
            timeout: request.timeout,
        })
    }

    fn handle_keep_alive(&self, request: KeepAliveRequest) -> Result<()> {
        self.check_up()?;
        if self.faults.fail_keep_alives.load(Ordering::SeqCst) {
            return Err(Error::transport("keep-alive dropped"));
        }
        Self::check_session(&self.state.lock(), request.session_id)
    }

    fn handle_close(&self, request: CloseSessionRequest) -> Result<()> {
        self.check_up()?;
        let mut state = self.state.lock();
        let session_id = request.session_id;
        state.sessions.remove(&session_id);
        if request.delete {
            state.primitives.remove(&request.name);
            state.subscribers.retain(|s| s.name != request.name);
        } else {
            state.subscribers.retain(|s| s.session_id != session_id);
        }
        Ok(())
    }

    fn handle_command(&self, header: RequestHeader, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.check_up()?;
        self.command_log.lock().push(header.clone());
        if Self::take(&self.faults.unavailable) {
            return Err(Error::unavailable("leader election in progress"));
        }

        let mut state = self.state.lock();
        let last_sequence = match state.sessions.get(&header.session_id) {
            Some(record) => {
                if header.sequence <= record.last_sequence {
                    trace!(target: "tessera::session", session = %header.session_id, sequence = header.sequence, "Replaying command response");
                    return record
                        .responses
                        .iter()
                        .find(|(sequence, _)| *sequence == header.sequence)
                        .map(|(_, response)| response.clone())
                        .ok_or_else(|| {
                            Error::internal(format!(
                                "response to command {} is no longer cached",
                                header.sequence
                            ))
                        });
                }
                record.last_sequence
            }
            None => {
                return Err(Error::SessionExpired {
                    session_id: header.session_id.as_u64(),
                })
            }
        };
        debug_assert!(header.sequence > last_sequence);

        let op: Operation = protocol::decode(&payload)?;
        let (response, events) = state.apply(&header.name, op)?;
        let bytes = protocol::encode(&response)?;
        if let Some(record) = state.sessions.get_mut(&header.session_id) {
            record.last_sequence = header.sequence;
            record.responses.push_back((header.sequence, bytes.clone()));
            if record.responses.len() > RESPONSE_CACHE_LEN {
                record.responses.pop_front();
            }
        }
        state.publish(&header.name, events);
        drop(state);

        if Self::take(&self.faults.lost_responses) {
            return Err(Error::unavailable("response lost"));
        }
        Ok(bytes)
    }

    fn handle_query(&self, header: RequestHeader, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.check_up()?;
        if Self::take(&self.faults.unavailable) {
            return Err(Error::unavailable("leader election in progress"));
        }
        let op: Operation = protocol::decode(&payload)?;
        let mut state = self.state.lock();
        Self::check_session(&state, header.session_id)?;
        let (response, events) = state.apply(&header.name, op)?;
        if !events.is_empty() {
            return Err(Error::invalid_input(format!(
                "query on {} would modify state",
                header.name
            )));
        }
        protocol::encode(&response)
    }

    fn handle_subscribe(&self, header: RequestHeader) -> Result<EventStream> {
        self.check_up()?;
        if self.faults.reject_subscriptions.load(Ordering::SeqCst) {
            return Err(Error::unavailable("subscriptions refused"));
        }
        let mut state = self.state.lock();
        Self::check_session(&state, header.session_id)?;
        let (sender, receiver) = mpsc::unbounded();
        state.subscribers.push(Subscriber {
            name: header.name,
            session_id: header.session_id,
            sender,
        });
        Ok(receiver.boxed())
    }
}

impl PartitionChannel for LocalPartition {
    fn open_session(
        &self,
        request: OpenSessionRequest,
    ) -> BoxFuture<'static, Result<OpenSessionResponse>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        future::ready(self.handle_open(request)).boxed()
    }

    fn keep_alive(&self, request: KeepAliveRequest) -> BoxFuture<'static, Result<()>> {
        self.counters.keep_alives.fetch_add(1, Ordering::SeqCst);
        future::ready(self.handle_keep_alive(request)).boxed()
    }

    fn close_session(&self, request: CloseSessionRequest) -> BoxFuture<'static, Result<()>> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        future::ready(self.handle_close(request)).boxed()
    }

    fn command(
        &self,
        header: RequestHeader,
        payload: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<u8>>> {
        self.counters.commands.fetch_add(1, Ordering::SeqCst);
        {
            let mut held = self.held.lock();
            if self.faults.stalled.load(Ordering::SeqCst) {
                let (reply, answer) = oneshot::channel();
                held.push(HeldCommand {
                    header,
                    payload,
                    reply,
                });
                return answer
                    .map(|answer| {
                        answer.unwrap_or_else(|_| Err(Error::transport("held command dropped")))
                    })
                    .boxed();
            }
        }
        future::ready(self.handle_command(header, payload)).boxed()
    }

    fn query(&self, header: RequestHeader, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        future::ready(self.handle_query(header, payload)).boxed()
    }

    fn subscribe(
        &self,
        header: RequestHeader,
        _payload: Vec<u8>,
    ) -> BoxFuture<'static, Result<EventStream>> {
        self.counters.subscribes.fetch_add(1, Ordering::SeqCst);
        future::ready(self.handle_subscribe(header)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CounterOperation, Response};
    use tessera_core::PrimitiveKind;
    use std::time::Duration;

    fn name() -> PrimitiveName {
        PrimitiveName::new("test", "hits")
    }

    fn open(partition: &LocalPartition) -> SessionId {
        partition
            .handle_open(OpenSessionRequest {
                name: name(),
                kind: PrimitiveKind::Counter,
                partition: partition.id(),
                timeout: Duration::from_secs(5),
            })
            .unwrap()
            .session_id
    }

    fn header(session_id: SessionId, sequence: u64) -> RequestHeader {
        RequestHeader {
            name: name(),
            partition: PartitionId(0),
            session_id,
            sequence,
            consistency: None,
        }
    }

    fn increment() -> Vec<u8> {
        protocol::encode(&Operation::Counter(CounterOperation::AddAndGet(1))).unwrap()
    }

    #[test]
    fn test_resent_command_applied_once() {
        let partition = LocalPartition::new(PartitionId(0));
        let session = open(&partition);

        let first = partition.handle_command(header(session, 1), increment()).unwrap();
        let again = partition.handle_command(header(session, 1), increment()).unwrap();
        assert_eq!(first, again);

        let second = partition.handle_command(header(session, 2), increment()).unwrap();
        let response: Response = protocol::decode(&second).unwrap();
        assert_eq!(response, Response::Long(2));
    }

    #[tokio::test]
    async fn test_stalled_commands_answered_on_release() {
        let partition = LocalPartition::new(PartitionId(0));
        let session = open(&partition);

        partition.stall_commands(true);
        let mut pending = partition.command(header(session, 1), increment());
        assert!(futures::poll!(&mut pending).is_pending());
        assert!(partition.command_log().is_empty());

        partition.stall_commands(false);
        let response: Response = protocol::decode(&pending.await.unwrap()).unwrap();
        assert_eq!(response, Response::Long(1));
        assert_eq!(partition.command_log().len(), 1);
    }

    #[test]
    fn test_unknown_session_expired() {
        let partition = LocalPartition::new(PartitionId(0));
        let err = partition
            .handle_command(header(SessionId(42), 1), increment())
            .unwrap_err();
        assert_eq!(err, Error::SessionExpired { session_id: 42 });
    }

    #[test]
    fn test_close_with_delete_drops_state() {
        let partition = LocalPartition::new(PartitionId(0));
        let session = open(&partition);
        assert!(partition.contains_primitive(&name()));
        partition
            .handle_close(CloseSessionRequest {
                name: name(),
                partition: partition.id(),
                session_id: session,
                delete: true,
            })
            .unwrap();
        assert!(!partition.contains_primitive(&name()));
        assert_eq!(partition.session_count(), 0);
    }

    #[test]
    fn test_down_partition_fails_with_transport() {
        let partition = LocalPartition::new(PartitionId(0));
        partition.set_down(true);
        let err = partition
            .handle_open(OpenSessionRequest {
                name: name(),
                kind: PrimitiveKind::Counter,
                partition: partition.id(),
                timeout: Duration::from_secs(5),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }
}

//! Scripted partition channel for session tests

use crate::managed::{ManagedSession, SessionConfig};
use futures::channel::mpsc;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_concurrency::ExecutionContextFactory;
use tessera_core::{
    Error, PartitionId, PrimitiveKind, PrimitiveName, ReadConsistency, Result, SessionId,
};
use tessera_partition::{
    CloseSessionRequest, EventStream, KeepAliveRequest, OpenSessionRequest, OpenSessionResponse,
    Partition, PartitionChannel, RequestHeader,
};

pub(crate) fn fast_config() -> SessionConfig {
    SessionConfig {
        timeout: Duration::from_secs(5),
        keep_alive_failure_threshold: 1,
        max_command_retries: 3,
        retry_backoff: Duration::from_millis(1),
        read_consistency: ReadConsistency::Sequential,
        reconnect_initial_backoff: Duration::from_millis(5),
        reconnect_max_backoff: Duration::from_millis(20),
        max_reconnect_attempts: 3,
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Default)]
pub(crate) struct Script {
    next_session: AtomicU64,
    pub opens: AtomicUsize,
    pub keep_alives: AtomicUsize,
    pub subscriptions: AtomicUsize,
    pub commands: Mutex<Vec<RequestHeader>>,
    pub queries: Mutex<Vec<RequestHeader>>,
    pub keep_alive_sequences: Mutex<Vec<u64>>,
    pub closes: Mutex<Vec<CloseSessionRequest>>,
    pub fail_open: AtomicBool,
    pub fail_commands: AtomicBool,
    pub fail_keep_alive: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// Accept subscriptions but end each stream at once
    pub end_on_open: AtomicBool,
    pub expire: AtomicBool,
    /// Delay before an open is answered
    pub open_delay_ms: AtomicU64,
    pub unavailable: AtomicUsize,
    streams: Mutex<Vec<mpsc::UnboundedSender<Result<Vec<u8>>>>>,
}

impl Script {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session(self: &Arc<Self>, factory: &ExecutionContextFactory, config: SessionConfig) -> ManagedSession {
        let partition = Partition::new(PartitionId(1), Arc::new(ScriptedChannel(Arc::clone(self))));
        ManagedSession::new(
            PrimitiveName::new("test", "primitive"),
            PrimitiveKind::Counter,
            partition,
            factory.create_context().unwrap(),
            config,
        )
    }

    pub fn emit(&self, event: Vec<u8>) {
        self.streams
            .lock()
            .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
    }

    pub fn end_streams(&self) {
        self.streams.lock().clear();
    }

    pub fn live_streams(&self) -> usize {
        let mut streams = self.streams.lock();
        streams.retain(|tx| !tx.is_closed());
        streams.len()
    }
}

struct ScriptedChannel(Arc<Script>);

fn ready<T: Send + 'static>(value: Result<T>) -> BoxFuture<'static, Result<T>> {
    future::ready(value).boxed()
}

impl PartitionChannel for ScriptedChannel {
    fn open_session(&self, request: OpenSessionRequest) -> BoxFuture<'static, Result<OpenSessionResponse>> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_open.load(Ordering::SeqCst) {
            return ready(Err(Error::transport("open refused")));
        }
        let id = self.0.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let response = OpenSessionResponse {
            session_id: SessionId(id),
            timeout: request.timeout,
        };
        let delay = self.0.open_delay_ms.load(Ordering::SeqCst);
        if delay == 0 {
            return ready(Ok(response));
        }
        async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(response)
        }
        .boxed()
    }

    fn keep_alive(&self, request: KeepAliveRequest) -> BoxFuture<'static, Result<()>> {
        self.0.keep_alives.fetch_add(1, Ordering::SeqCst);
        self.0.keep_alive_sequences.lock().push(request.last_sequence);
        if self.0.expire.load(Ordering::SeqCst) {
            return ready(Err(Error::SessionExpired {
                session_id: request.session_id.as_u64(),
            }));
        }
        if self.0.fail_keep_alive.load(Ordering::SeqCst) {
            return ready(Err(Error::transport("keep-alive dropped")));
        }
        ready(Ok(()))
    }

    /// Recorded when polled, so an unawaited close never shows up
    fn close_session(&self, request: CloseSessionRequest) -> BoxFuture<'static, Result<()>> {
        let script = Arc::clone(&self.0);
        async move {
            script.closes.lock().push(request);
            if script.fail_close.load(Ordering::SeqCst) {
                return Err(Error::transport("close dropped"));
            }
            Ok(())
        }
        .boxed()
    }

    fn command(&self, header: RequestHeader, _payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
        let sequence = header.sequence;
        self.0.commands.lock().push(header);
        if self.0.fail_commands.load(Ordering::SeqCst) {
            return ready(Err(Error::transport("command dropped")));
        }
        let rejected = self
            .0
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return ready(Err(Error::unavailable("no leader")));
        }
        ready(Ok(sequence.to_le_bytes().to_vec()))
    }

    fn query(&self, header: RequestHeader, _payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
        let sequence = header.sequence;
        self.0.queries.lock().push(header);
        ready(Ok(sequence.to_le_bytes().to_vec()))
    }

    fn subscribe(&self, _header: RequestHeader, _payload: Vec<u8>) -> BoxFuture<'static, Result<EventStream>> {
        self.0.subscriptions.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_subscribe.load(Ordering::SeqCst) {
            return ready(Err(Error::transport("subscribe refused")));
        }
        let (tx, rx) = mpsc::unbounded();
        if !self.0.end_on_open.load(Ordering::SeqCst) {
            self.0.streams.lock().push(tx);
        }
        let stream: EventStream = Box::pin(rx);
        ready(Ok(stream))
    }
}

//! Managed sessions
//!
//! A [`ManagedSession`] is the session-oriented, lifecycle-aware channel every
//! primitive instance talks through. It owns exactly one server session on
//! one partition and drives the state machine
//!
//! ```text
//! Connecting -> Connected <-> Suspended
//!      |            |             |
//!      +------------+-------------+--> Closed
//! ```
//!
//! # Execution model
//!
//! All bookkeeping (sequence assignment, keep-alive outcomes, state
//! transitions, state listener callbacks) runs as jobs on the session's
//! [`ExecutionContext`]. Requests are handed to the transport from inside
//! those jobs, so commands leave in exactly the order their sequence numbers
//! were assigned. Waiting for responses happens off the context.
//!
//! # Failure handling
//!
//! Transport errors on commands and queries go straight back to the caller.
//! `Unavailable` is the one exception: the request is resent with the same
//! header (and so the same sequence number, letting the server deduplicate).
//! Keep-alive failures never surface per call; they move the session to
//! `Suspended` and eventually `Closed`.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tessera_concurrency::ExecutionContext;
use tessera_core::{
    ClientConfig, Error, ListenerId, PrimitiveKind, PrimitiveName, PrimitiveState,
    ReadConsistency, Result, SessionId, SessionState, StateListener,
};
use tessera_partition::{
    CloseSessionRequest, EventStream, KeepAliveRequest, OpenSessionRequest, OpenSessionResponse,
    Partition, RequestHeader,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-session tuning, derived from [`ClientConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Requested session timeout
    pub timeout: Duration,
    /// Consecutive keep-alive failures before the session is suspended
    pub keep_alive_failure_threshold: u32,
    /// Resends of a request rejected with `Unavailable`
    pub max_command_retries: u32,
    /// Base delay between resends (multiplied by the attempt number)
    pub retry_backoff: Duration,
    /// Consistency requested by queries
    pub read_consistency: ReadConsistency,
    /// First delay before re-opening a failed event stream
    pub reconnect_initial_backoff: Duration,
    /// Upper bound for the reconnect delay
    pub reconnect_max_backoff: Duration,
    /// Consecutive failed stream opens before the subscription gives up
    pub max_reconnect_attempts: u32,
}

impl SessionConfig {
    /// Override the session timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            timeout: config.session_timeout(),
            keep_alive_failure_threshold: config.keep_alive_failure_threshold.max(1),
            max_command_retries: config.max_command_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            read_consistency: config.read_consistency,
            reconnect_initial_backoff: Duration::from_millis(config.reconnect_initial_backoff_ms),
            reconnect_max_backoff: Duration::from_millis(config.reconnect_max_backoff_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Mutable session state, only written from jobs on the session's context
struct SessionCore {
    state: SessionState,
    session_id: Option<SessionId>,
    timeout: Duration,
    sequence: u64,
    keep_alive_failures: u32,
    last_keep_alive: Instant,
    open_started: bool,
}

struct SessionInner {
    name: PrimitiveName,
    kind: PrimitiveKind,
    partition: Partition,
    context: ExecutionContext,
    config: SessionConfig,
    core: Mutex<SessionCore>,
    listeners: Mutex<Vec<(ListenerId, StateListener)>>,
    keep_alive: CancellationToken,
}

type PendingResponse = BoxFuture<'static, Result<Vec<u8>>>;

/// What an answered open left behind
enum Opened {
    Connected,
    /// Closed while the open was in flight; the server side still needs
    /// releasing
    Superseded(BoxFuture<'static, Result<()>>),
}

impl SessionInner {
    fn closed_error(&self) -> Error {
        Error::closed(self.name.to_string())
    }

    fn not_connected_error(&self) -> Error {
        Error::NotConnected {
            name: self.name.to_string(),
        }
    }

    fn session_state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Session id if requests may be sent in the current state
    fn ready_session(&self, core: &SessionCore) -> Result<SessionId> {
        match core.state {
            SessionState::Closed => Err(self.closed_error()),
            SessionState::Connecting => Err(self.not_connected_error()),
            SessionState::Connected | SessionState::Suspended => {
                core.session_id.ok_or_else(|| self.not_connected_error())
            }
        }
    }

    /// Apply a state transition and notify listeners.
    ///
    /// Returns false (and changes nothing) if the transition is not allowed.
    fn transition(&self, next: SessionState) -> bool {
        let (previous, session_id) = {
            let mut core = self.core.lock();
            if !core.state.can_transition_to(next) {
                return false;
            }
            let previous = core.state;
            core.state = next;
            (previous, core.session_id)
        };

        info!(
            target: "tessera::session",
            primitive = %self.name,
            partition = %self.partition.id(),
            session = ?session_id.map(|id| id.as_u64()),
            from = ?previous,
            to = ?next,
            "Session state changed"
        );

        if next.is_terminal() {
            self.keep_alive.cancel();
        }

        if let Some(state) = next.as_primitive_state() {
            let listeners: Vec<StateListener> = self
                .listeners
                .lock()
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                listener(state);
            }
        }
        true
    }

    fn on_open(&self, result: Result<OpenSessionResponse>) -> Result<Opened> {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    target: "tessera::session",
                    primitive = %self.name,
                    partition = %self.partition.id(),
                    error = %e,
                    "Failed to open session"
                );
                self.transition(SessionState::Closed);
                return Err(e);
            }
        };

        {
            let mut core = self.core.lock();
            if core.state.is_terminal() {
                drop(core);
                let release = self.partition.channel().close_session(CloseSessionRequest {
                    name: self.name.clone(),
                    partition: self.partition.id(),
                    session_id: response.session_id,
                    delete: false,
                });
                return Ok(Opened::Superseded(release));
            }
            core.session_id = Some(response.session_id);
            if !response.timeout.is_zero() {
                core.timeout = response.timeout;
            }
            core.last_keep_alive = Instant::now();
        }

        self.transition(SessionState::Connected);
        Ok(Opened::Connected)
    }

    fn send_command(&self, payload: Vec<u8>) -> Result<(RequestHeader, Vec<u8>, PendingResponse)> {
        let header = {
            let mut core = self.core.lock();
            let session_id = self.ready_session(&core)?;
            core.sequence += 1;
            RequestHeader {
                name: self.name.clone(),
                partition: self.partition.id(),
                session_id,
                sequence: core.sequence,
                consistency: None,
            }
        };
        debug!(target: "tessera::session", primitive = %self.name, sequence = header.sequence, "Sending command");
        let response = self.partition.channel().command(header.clone(), payload.clone());
        Ok((header, payload, response))
    }

    fn send_query(&self, payload: Vec<u8>) -> Result<(RequestHeader, Vec<u8>, PendingResponse)> {
        let header = {
            let core = self.core.lock();
            let session_id = self.ready_session(&core)?;
            RequestHeader {
                name: self.name.clone(),
                partition: self.partition.id(),
                session_id,
                sequence: core.sequence,
                consistency: Some(self.config.read_consistency),
            }
        };
        let response = self.partition.channel().query(header.clone(), payload.clone());
        Ok((header, payload, response))
    }

    fn send_subscribe(&self, payload: Vec<u8>) -> Result<BoxFuture<'static, Result<EventStream>>> {
        let header = {
            let core = self.core.lock();
            let session_id = self.ready_session(&core)?;
            RequestHeader {
                name: self.name.clone(),
                partition: self.partition.id(),
                session_id,
                sequence: core.sequence,
                consistency: None,
            }
        };
        Ok(self.partition.channel().subscribe(header, payload))
    }

    /// Await a response, resending on `Unavailable` with the same header.
    async fn await_with_retry(
        self: Arc<Self>,
        header: RequestHeader,
        payload: Vec<u8>,
        first: PendingResponse,
    ) -> Result<Vec<u8>> {
        let mut response = first;
        let mut attempt = 0u32;
        loop {
            match response.await {
                Err(e) if e.is_retryable() && attempt < self.config.max_command_retries => {
                    attempt += 1;
                    warn!(
                        target: "tessera::session",
                        primitive = %self.name,
                        sequence = header.sequence,
                        attempt,
                        error = %e,
                        "Resending request"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    if self.session_state().is_terminal() {
                        return Err(self.closed_error());
                    }
                    response = if header.is_query() {
                        self.partition.channel().query(header.clone(), payload.clone())
                    } else {
                        self.partition.channel().command(header.clone(), payload.clone())
                    };
                }
                other => return other,
            }
        }
    }

    fn send_keep_alive(&self) -> Option<BoxFuture<'static, Result<()>>> {
        let request = {
            let core = self.core.lock();
            if core.state.is_terminal() {
                return None;
            }
            KeepAliveRequest {
                name: self.name.clone(),
                partition: self.partition.id(),
                session_id: core.session_id?,
                last_sequence: core.sequence,
            }
        };
        Some(self.partition.channel().keep_alive(request))
    }

    /// Fold a keep-alive outcome into the state machine.
    ///
    /// Returns whether keep-alives should continue.
    fn on_keep_alive(&self, result: Result<()>) -> bool {
        match result {
            Ok(()) => {
                let resumed = {
                    let mut core = self.core.lock();
                    core.keep_alive_failures = 0;
                    core.last_keep_alive = Instant::now();
                    core.state == SessionState::Suspended
                };
                debug!(target: "tessera::session", primitive = %self.name, "Keep-alive succeeded");
                if resumed {
                    self.transition(SessionState::Connected);
                }
                !self.session_state().is_terminal()
            }
            Err(Error::SessionExpired { session_id }) => {
                warn!(
                    target: "tessera::session",
                    primitive = %self.name,
                    session = session_id,
                    "Session expired on the server"
                );
                self.transition(SessionState::Closed);
                false
            }
            Err(e) => {
                let (failures, deadline_passed, state) = {
                    let mut core = self.core.lock();
                    core.keep_alive_failures += 1;
                    (
                        core.keep_alive_failures,
                        core.last_keep_alive.elapsed() >= core.timeout,
                        core.state,
                    )
                };
                warn!(
                    target: "tessera::session",
                    primitive = %self.name,
                    failures,
                    error = %e,
                    "Keep-alive failed"
                );
                if deadline_passed {
                    self.transition(SessionState::Closed);
                    return false;
                }
                if failures >= self.config.keep_alive_failure_threshold
                    && state == SessionState::Connected
                {
                    self.transition(SessionState::Suspended);
                }
                !state.is_terminal()
            }
        }
    }

    /// One keep-alive round. Returns whether keep-alives should continue.
    async fn keep_alive_round(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        let response = match self.context.call(move || this.send_keep_alive()).await {
            Ok(Some(response)) => response,
            _ => return false,
        };
        let result = response.await;
        let this = Arc::clone(self);
        self.context
            .call(move || this.on_keep_alive(result))
            .await
            .unwrap_or(false)
    }

    fn begin_close(&self, delete: bool) -> Option<BoxFuture<'static, Result<()>>> {
        let request = {
            let core = self.core.lock();
            if core.state.is_terminal() {
                return None;
            }
            core.session_id.map(|session_id| CloseSessionRequest {
                name: self.name.clone(),
                partition: self.partition.id(),
                session_id,
                delete,
            })
        };
        let response = request.map(|request| self.partition.channel().close_session(request));
        self.transition(SessionState::Closed);
        response
    }
}

async fn run_keep_alive_loop(session: Weak<SessionInner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = session.upgrade() else { break };
                if !inner.keep_alive_round().await {
                    break;
                }
            }
        }
    }
    debug!(target: "tessera::session", "Keep-alive loop stopped");
}

/// A session on one partition, pinned to one execution context
///
/// Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ManagedSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("ManagedSession")
            .field("name", &self.inner.name)
            .field("partition", &self.inner.partition.id())
            .field("session_id", &core.session_id)
            .field("state", &core.state)
            .finish()
    }
}

impl ManagedSession {
    /// Create a session in the `Connecting` state. Nothing is sent until
    /// [`open`](Self::open).
    pub fn new(
        name: PrimitiveName,
        kind: PrimitiveKind,
        partition: Partition,
        context: ExecutionContext,
        config: SessionConfig,
    ) -> Self {
        let timeout = config.timeout;
        Self {
            inner: Arc::new(SessionInner {
                name,
                kind,
                partition,
                context,
                config,
                core: Mutex::new(SessionCore {
                    state: SessionState::Connecting,
                    session_id: None,
                    timeout,
                    sequence: 0,
                    keep_alive_failures: 0,
                    last_keep_alive: Instant::now(),
                    open_started: false,
                }),
                listeners: Mutex::new(Vec::new()),
                keep_alive: CancellationToken::new(),
            }),
        }
    }

    /// Primitive name
    pub fn name(&self) -> &PrimitiveName {
        &self.inner.name
    }

    /// Primitive kind
    pub fn kind(&self) -> PrimitiveKind {
        self.inner.kind
    }

    /// Partition this session lives on
    pub fn partition_id(&self) -> tessera_core::PartitionId {
        self.inner.partition.id()
    }

    /// Execution context the session is pinned to
    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Server-assigned id, once opened
    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.core.lock().session_id
    }

    /// Internal state, including `Connecting`
    pub fn session_state(&self) -> SessionState {
        self.inner.session_state()
    }

    /// Externally visible state. A session that has not finished opening
    /// reports `Suspended`.
    pub fn state(&self) -> PrimitiveState {
        self.session_state()
            .as_primitive_state()
            .unwrap_or(PrimitiveState::Suspended)
    }

    /// Highest command sequence number issued so far
    pub fn last_sequence(&self) -> u64 {
        self.inner.core.lock().sequence
    }

    /// Register a lifecycle listener. Listeners run on the session's context.
    pub fn add_state_listener(&self, listener: StateListener) -> ListenerId {
        let id = ListenerId::next();
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Remove a lifecycle listener; returns whether it was registered
    pub fn remove_state_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Open the server session and start keep-alives.
    ///
    /// On failure the session is `Closed` and the cause is returned. Calling
    /// `open` again reports the outcome of the first call without sending
    /// anything.
    pub async fn open(&self) -> Result<()> {
        {
            let mut core = self.inner.core.lock();
            if core.state.is_terminal() {
                return Err(self.inner.closed_error());
            }
            if core.open_started {
                return match core.state {
                    SessionState::Connected | SessionState::Suspended => Ok(()),
                    SessionState::Connecting => Err(self.inner.not_connected_error()),
                    SessionState::Closed => Err(self.inner.closed_error()),
                };
            }
            core.open_started = true;
        }

        debug!(
            target: "tessera::session",
            primitive = %self.inner.name,
            partition = %self.inner.partition.id(),
            "Opening session"
        );
        let request = OpenSessionRequest {
            name: self.inner.name.clone(),
            kind: self.inner.kind,
            partition: self.inner.partition.id(),
            timeout: self.inner.config.timeout,
        };
        let result = self.inner.partition.channel().open_session(request).await;

        let inner = Arc::clone(&self.inner);
        let opened = match self.inner.context.call(move || inner.on_open(result)).await {
            Ok(outcome) => outcome?,
            Err(e) => {
                self.inner.transition(SessionState::Closed);
                return Err(e);
            }
        };
        if let Opened::Superseded(release) = opened {
            match release.await {
                Ok(()) => debug!(
                    target: "tessera::session",
                    primitive = %self.inner.name,
                    "Released session closed while opening"
                ),
                Err(e) => warn!(
                    target: "tessera::session",
                    primitive = %self.inner.name,
                    error = %e,
                    "Failed to release session closed while opening"
                ),
            }
            return Err(self.inner.closed_error());
        }

        self.start_keep_alive();
        Ok(())
    }

    fn start_keep_alive(&self) {
        let interval = (self.inner.core.lock().timeout / 2).max(Duration::from_millis(1));
        debug!(
            target: "tessera::session",
            primitive = %self.inner.name,
            interval_ms = interval.as_millis() as u64,
            "Keep-alive started"
        );
        tokio::spawn(run_keep_alive_loop(
            Arc::downgrade(&self.inner),
            interval,
            self.inner.keep_alive.clone(),
        ));
    }

    /// Send a state-mutating request tagged with the next sequence number.
    ///
    /// Fails fast with `Closed` after close or expiry and with `NotConnected`
    /// before the session is open. While `Suspended` the request is still sent.
    pub fn command(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        let sent = self.inner.context.call({
            let inner = Arc::clone(&self.inner);
            move || inner.send_command(payload)
        });
        async move {
            let (header, payload, response) = sent.await??;
            inner.await_with_retry(header, payload, response).await
        }
        .boxed()
    }

    /// Send a read. Carries the last issued sequence number and the configured
    /// read consistency; does not advance the sequence.
    pub fn query(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
        let inner = Arc::clone(&self.inner);
        let sent = self.inner.context.call({
            let inner = Arc::clone(&self.inner);
            move || inner.send_query(payload)
        });
        async move {
            let (header, payload, response) = sent.await??;
            inner.await_with_retry(header, payload, response).await
        }
        .boxed()
    }

    /// Open a server-streaming event subscription scoped to this session
    pub fn subscribe(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<EventStream>> {
        let sent = self.inner.context.call({
            let inner = Arc::clone(&self.inner);
            move || inner.send_subscribe(payload)
        });
        async move { sent.await??.await }.boxed()
    }

    /// Run one keep-alive round now.
    ///
    /// The outcome is folded into the state machine; the result only reports
    /// whether the session is still usable afterwards.
    pub async fn keep_alive(&self) -> Result<()> {
        self.inner.keep_alive_round().await;
        if self.session_state().is_terminal() {
            Err(self.inner.closed_error())
        } else {
            Ok(())
        }
    }

    /// Close the session, optionally deleting the primitive's server state.
    ///
    /// The session is `Closed` when this returns whatever the server answered;
    /// a failed close request is only logged. Idempotent.
    pub async fn close(&self, delete: bool) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let pending = match self.inner.context.call(move || inner.begin_close(delete)).await {
            Ok(pending) => pending,
            // Context gone (client stopping): tear down from the caller instead
            Err(_) => self.inner.begin_close(delete),
        };

        if let Some(response) = pending {
            match response.await {
                Ok(()) => debug!(
                    target: "tessera::session",
                    primitive = %self.inner.name,
                    delete,
                    "Session closed"
                ),
                Err(e) => warn!(
                    target: "tessera::session",
                    primitive = %self.inner.name,
                    error = %e,
                    "Session close request failed"
                ),
            }
        }
        Ok(())
    }
}

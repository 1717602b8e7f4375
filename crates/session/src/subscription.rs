//! Reconnecting event subscriptions
//!
//! An [`EventSubscription`] keeps one server-streaming subscription open on a
//! [`ManagedSession`] for as long as at least one listener is registered.
//! When the stream ends (server completion or failure) it is re-opened.
//! Failed opens, and streams that end before delivering an event or living
//! `reconnect_max_backoff`, count as failed attempts: they are spaced with
//! exponential backoff and abandoned after `max_reconnect_attempts` in a row.
//! A later [`add_listener`](EventSubscription::add_listener) or
//! [`resume`](EventSubscription::resume) starts over.
//!
//! Delivery is at-most-once: events published while the stream is down are
//! not replayed. Stream listeners hear [`StreamState::Lost`] whenever an open
//! stream ends and [`StreamState::Open`] on every (re)open, so consumers
//! holding derived state know when it may be stale. All listeners run on the
//! session's execution context, in stream order.

use crate::managed::ManagedSession;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::{Error, ListenerId, Result, SessionState, StreamListener, StreamState};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callback receiving decoded events
pub type EventListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

type Decoder<E> = Arc<dyn Fn(&[u8]) -> Result<E> + Send + Sync>;

struct Listeners<E> {
    entries: Vec<(ListenerId, EventListener<E>)>,
    stream_listeners: Vec<(ListenerId, StreamListener)>,
    /// Generation and cancel handle of the running stream loop
    running: Option<(u64, CancellationToken)>,
    generation: u64,
}

struct SubscriptionInner<E> {
    session: ManagedSession,
    request: Vec<u8>,
    decode: Decoder<E>,
    listeners: Mutex<Listeners<E>>,
}

impl<E: Send + 'static> SubscriptionInner<E> {
    fn dispatch(&self, bytes: &[u8]) {
        let event = match (self.decode)(bytes) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    target: "tessera::subscription",
                    primitive = %self.session.name(),
                    error = %e,
                    "Dropping undecodable event"
                );
                return;
            }
        };
        let listeners: Vec<EventListener<E>> = self
            .listeners
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let dispatched = self.session.context().execute(move || {
            for listener in &listeners {
                listener(&event);
            }
        });
        if dispatched.is_err() {
            debug!(target: "tessera::subscription", primitive = %self.session.name(), "Context closed, event dropped");
        }
    }

    fn notify(&self, state: StreamState) {
        let listeners: Vec<StreamListener> = self
            .listeners
            .lock()
            .stream_listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return;
        }
        let dispatched = self.session.context().execute(move || {
            for listener in &listeners {
                listener(state);
            }
        });
        if dispatched.is_err() {
            debug!(target: "tessera::subscription", primitive = %self.session.name(), ?state, "Context closed, stream state dropped");
        }
    }

    fn finish(&self, generation: u64) {
        let mut listeners = self.listeners.lock();
        if matches!(listeners.running, Some((running, _)) if running == generation) {
            listeners.running = None;
        }
    }

    /// Spawn the stream loop unless one is running or nobody listens
    fn start(self: &Arc<Self>, listeners: &mut Listeners<E>) -> Option<oneshot::Receiver<Result<()>>> {
        if listeners.running.is_some() || listeners.entries.is_empty() {
            return None;
        }
        listeners.generation += 1;
        let generation = listeners.generation;
        let cancel = CancellationToken::new();
        listeners.running = Some((generation, cancel.clone()));
        let (tx, rx) = oneshot::channel();
        tokio::spawn(run_subscription(Arc::clone(self), generation, cancel, tx));
        Some(rx)
    }
}

enum StreamStep {
    Cancelled,
    Event(Vec<u8>),
    Failed(Error),
    Completed,
}

async fn run_subscription<E: Send + 'static>(
    inner: Arc<SubscriptionInner<E>>,
    generation: u64,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);
    let config = inner.session.config().clone();
    let mut backoff = config.reconnect_initial_backoff;
    let mut failures = 0u32;

    'subscription: loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break 'subscription,
            opened = inner.session.subscribe(inner.request.clone()) => opened,
        };

        let error = match opened {
            Ok(mut stream) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                debug!(target: "tessera::subscription", primitive = %inner.session.name(), "Event stream opened");
                inner.notify(StreamState::Open);
                let opened_at = Instant::now();
                let mut delivered = false;

                let ended = loop {
                    let step = tokio::select! {
                        _ = cancel.cancelled() => StreamStep::Cancelled,
                        item = stream.next() => match item {
                            Some(Ok(bytes)) => StreamStep::Event(bytes),
                            Some(Err(e)) => StreamStep::Failed(e),
                            None => StreamStep::Completed,
                        },
                    };
                    match step {
                        StreamStep::Cancelled => break 'subscription,
                        StreamStep::Event(bytes) => {
                            delivered = true;
                            inner.dispatch(&bytes);
                        }
                        StreamStep::Failed(e) => {
                            warn!(
                                target: "tessera::subscription",
                                primitive = %inner.session.name(),
                                error = %e,
                                "Event stream failed"
                            );
                            break e;
                        }
                        StreamStep::Completed => {
                            debug!(target: "tessera::subscription", primitive = %inner.session.name(), "Event stream completed");
                            break Error::transport("event stream completed by server");
                        }
                    }
                };
                inner.notify(StreamState::Lost);

                if delivered || opened_at.elapsed() >= config.reconnect_max_backoff {
                    failures = 0;
                    backoff = config.reconnect_initial_backoff;
                    continue 'subscription;
                }
                ended
            }
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                    break 'subscription;
                }
                e
            }
        };

        if inner.session.session_state() == SessionState::Closed {
            debug!(target: "tessera::subscription", primitive = %inner.session.name(), "Session closed, subscription stopped");
            break 'subscription;
        }
        failures += 1;
        if failures >= config.max_reconnect_attempts {
            warn!(
                target: "tessera::subscription",
                primitive = %inner.session.name(),
                attempts = failures,
                error = %error,
                "Giving up on event stream"
            );
            break 'subscription;
        }
        warn!(
            target: "tessera::subscription",
            primitive = %inner.session.name(),
            attempt = failures,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Event stream reconnect failed"
        );
        tokio::select! {
            _ = cancel.cancelled() => break 'subscription,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.reconnect_max_backoff);
    }

    inner.finish(generation);
}

/// Listener registry driving one reconnecting event stream
pub struct EventSubscription<E> {
    inner: Arc<SubscriptionInner<E>>,
}

impl<E> Clone for EventSubscription<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Send + 'static> EventSubscription<E> {
    /// Create a subscription that opens streams with `request` and decodes
    /// each streamed payload with `decode`. Nothing is sent until the first
    /// listener is added.
    pub fn new(
        session: ManagedSession,
        request: Vec<u8>,
        decode: impl Fn(&[u8]) -> Result<E> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(SubscriptionInner {
                session,
                request,
                decode: Arc::new(decode),
                listeners: Mutex::new(Listeners {
                    entries: Vec::new(),
                    stream_listeners: Vec::new(),
                    running: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Register a listener.
    ///
    /// The first listener opens the stream and resolves once the server has
    /// accepted it; if that open fails the listener is removed again and the
    /// cause returned.
    pub async fn add_listener(&self, listener: EventListener<E>) -> Result<ListenerId> {
        let id = ListenerId::next();
        let ready = {
            let mut listeners = self.inner.listeners.lock();
            listeners.entries.push((id, listener));
            self.inner.start(&mut listeners)
        };

        if let Some(ready) = ready {
            let outcome = ready
                .await
                .unwrap_or_else(|_| Err(Error::closed(self.inner.session.name().to_string())));
            if let Err(e) = outcome {
                self.remove_listener(id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Remove a listener; the stream is cancelled with the last one.
    ///
    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(existing, _)| *existing != id);
        let removed = listeners.entries.len() != before;
        if listeners.entries.is_empty() {
            if let Some((_, cancel)) = listeners.running.take() {
                cancel.cancel();
            }
        }
        removed
    }

    /// Restart a stream loop that gave up while listeners remain
    ///
    /// Returns whether a new loop was started. A failed first open ends the
    /// new loop at once; call again to retry.
    pub fn resume(&self) -> bool {
        let started = self.inner.start(&mut self.inner.listeners.lock()).is_some();
        if started {
            debug!(target: "tessera::subscription", primitive = %self.inner.session.name(), "Resuming event stream");
        }
        started
    }

    /// Register a listener for stream opens and losses
    ///
    /// Does not open a stream by itself.
    pub fn add_stream_listener(&self, listener: StreamListener) -> ListenerId {
        let id = ListenerId::next();
        self.inner.listeners.lock().stream_listeners.push((id, listener));
        id
    }

    /// Remove a stream listener
    pub fn remove_stream_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.stream_listeners.len();
        listeners.stream_listeners.retain(|(existing, _)| *existing != id);
        listeners.stream_listeners.len() != before
    }

    /// Drop every listener and stop the stream
    pub fn close(&self) {
        let mut listeners = self.inner.listeners.lock();
        listeners.entries.clear();
        listeners.stream_listeners.clear();
        if let Some((_, cancel)) = listeners.running.take() {
            cancel.cancel();
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().entries.len()
    }

    /// Whether a stream loop is active
    pub fn is_running(&self) -> bool {
        self.inner.listeners.lock().running.is_some()
    }
}

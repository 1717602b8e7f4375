//! Session plumbing shared by the session-backed primitives

use crate::protocol::{self, Operation, Response};
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use tessera_core::{
    ListenerId, PrimitiveKind, PrimitiveName, PrimitiveState, Result, StateListener,
    StreamListener,
};
use tessera_session::{EventListener, EventSubscription, ManagedSession};
use tracing::debug;

/// One session plus its (optional) event stream
pub(crate) struct PrimitiveProxy<E> {
    session: ManagedSession,
    events: Option<EventSubscription<E>>,
}

impl PrimitiveProxy<()> {
    /// Proxy for a primitive that publishes no events
    pub(crate) fn without_events(session: ManagedSession) -> Self {
        Self {
            session,
            events: None,
        }
    }
}

impl<E> PrimitiveProxy<E>
where
    E: serde::de::DeserializeOwned + Send + 'static,
{
    /// Proxy whose events are MessagePack-encoded `E`
    pub(crate) fn with_events(session: ManagedSession) -> Self {
        let events = EventSubscription::new(session.clone(), Vec::new(), |bytes: &[u8]| {
            protocol::decode::<E>(bytes)
        });
        Self {
            session,
            events: Some(events),
        }
    }

    pub(crate) async fn add_listener(&self, listener: EventListener<E>) -> Result<ListenerId> {
        match &self.events {
            Some(events) => events.add_listener(listener).await,
            None => Err(tessera_core::Error::unsupported(format!(
                "{} has no events",
                self.session.kind()
            ))),
        }
    }

    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        self.events
            .as_ref()
            .map(|events| events.remove_listener(id))
            .unwrap_or(false)
    }
}

impl<E: Send + 'static> PrimitiveProxy<E> {
    pub(crate) fn session(&self) -> &ManagedSession {
        &self.session
    }

    pub(crate) fn name(&self) -> &PrimitiveName {
        self.session.name()
    }

    pub(crate) fn kind(&self) -> PrimitiveKind {
        self.session.kind()
    }

    pub(crate) fn state(&self) -> PrimitiveState {
        self.session.state()
    }

    pub(crate) fn add_state_listener(&self, listener: StateListener) -> ListenerId {
        self.session.add_state_listener(listener)
    }

    pub(crate) fn remove_state_listener(&self, id: ListenerId) -> bool {
        self.session.remove_state_listener(id)
    }

    /// Without an event stream nothing can be missed, so the listener is
    /// accepted and never called
    pub(crate) fn add_stream_listener(&self, listener: StreamListener) -> ListenerId {
        match &self.events {
            Some(events) => events.add_stream_listener(listener),
            None => ListenerId::next(),
        }
    }

    pub(crate) fn remove_stream_listener(&self, id: ListenerId) -> bool {
        self.events
            .as_ref()
            .map(|events| events.remove_stream_listener(id))
            .unwrap_or(false)
    }

    pub(crate) fn resume_events(&self) {
        if let Some(events) = &self.events {
            events.resume();
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        if let Some(events) = &self.events {
            events.close();
        }
        self.session.close(false).await
    }

    pub(crate) async fn delete(&self) -> Result<()> {
        if let Some(events) = &self.events {
            events.close();
        }
        self.session.close(true).await
    }

    /// Run a state-mutating operation
    pub(crate) fn command(&self, op: Operation) -> BoxFuture<'static, Result<Response>> {
        debug!(target: "tessera::session", primitive = %self.session.name(), op = op.label(), "command");
        match protocol::encode(&op) {
            Ok(payload) => self
                .session
                .command(payload)
                .map(|result| result.and_then(|bytes| protocol::decode(&bytes)))
                .boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    /// Run a read-only operation
    pub(crate) fn query(&self, op: Operation) -> BoxFuture<'static, Result<Response>> {
        match protocol::encode(&op) {
            Ok(payload) => self
                .session
                .query(payload)
                .map(|result| result.and_then(|bytes| protocol::decode(&bytes)))
                .boxed(),
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }
}

/// Flatten one batched read into a stream of its items
pub(crate) fn batch_stream<T, F>(
    response: BoxFuture<'static, Result<Response>>,
    extract: F,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnOnce(Response) -> Result<Vec<T>> + Send + 'static,
{
    stream::once(response.map(move |result| result.and_then(extract)))
        .flat_map(|result| {
            let items: Vec<Result<T>> = match result {
                Ok(items) => items.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(items)
        })
        .boxed()
}

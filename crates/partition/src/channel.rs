//! Transport contract between the client core and a partition.
//!
//! A [`PartitionChannel`] carries session lifecycle calls, session-tagged
//! unary commands and queries, and server-streaming event subscriptions to
//! one replica set. The payload encoding of primitive operations is opaque at
//! this layer.
//!
//! # Ordering
//!
//! Every method hands the request to the transport *before* it returns; the
//! returned future only waits for the response. Callers that need requests
//! to leave in a particular order (the session sequencing commands) rely on
//! this by issuing calls in that order from one execution context.

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessera_core::{
    PartitionId, PrimitiveKind, PrimitiveName, ReadConsistency, Result, SessionId,
};

/// Header attached to every session-scoped command and query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Target primitive
    pub name: PrimitiveName,
    /// Target partition
    pub partition: PartitionId,
    /// Session the request belongs to
    pub session_id: SessionId,
    /// For commands: this command's sequence number. For queries: the last
    /// command sequence the session issued.
    pub sequence: u64,
    /// Set on queries only
    pub consistency: Option<ReadConsistency>,
}

impl RequestHeader {
    /// Whether this header tags a query
    pub fn is_query(&self) -> bool {
        self.consistency.is_some()
    }
}

/// Session-create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    /// Primitive the session is for
    pub name: PrimitiveName,
    /// Kind of the primitive, so the server can create its state
    pub kind: PrimitiveKind,
    /// Target partition
    pub partition: PartitionId,
    /// Requested session timeout
    pub timeout: Duration,
}

/// Session-create response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    /// Assigned session id
    pub session_id: SessionId,
    /// Timeout granted by the server (may differ from the request)
    pub timeout: Duration,
}

/// Session keep-alive request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveRequest {
    /// Primitive the session is for
    pub name: PrimitiveName,
    /// Target partition
    pub partition: PartitionId,
    /// Session being kept alive
    pub session_id: SessionId,
    /// Highest command sequence issued so far
    pub last_sequence: u64,
}

/// Session-close request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    /// Primitive the session is for
    pub name: PrimitiveName,
    /// Target partition
    pub partition: PartitionId,
    /// Session being closed
    pub session_id: SessionId,
    /// Also destroy the primitive's state on the server
    pub delete: bool,
}

/// Stream of encoded event payloads
pub type EventStream = BoxStream<'static, Result<Vec<u8>>>;

/// Channel to one partition's replica set
pub trait PartitionChannel: Send + Sync {
    /// Create a session
    fn open_session(&self, request: OpenSessionRequest)
        -> BoxFuture<'static, Result<OpenSessionResponse>>;

    /// Refresh a session's timeout
    ///
    /// Fails with `SessionExpired` if the server no longer knows the session.
    fn keep_alive(&self, request: KeepAliveRequest) -> BoxFuture<'static, Result<()>>;

    /// Close a session, optionally deleting the primitive
    fn close_session(&self, request: CloseSessionRequest) -> BoxFuture<'static, Result<()>>;

    /// State-mutating request
    fn command(&self, header: RequestHeader, payload: Vec<u8>)
        -> BoxFuture<'static, Result<Vec<u8>>>;

    /// Read-only request
    fn query(&self, header: RequestHeader, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>>;

    /// Open a server-streaming event subscription scoped to the session
    ///
    /// The future resolves once the server has accepted the subscription; the
    /// stream ends when the server completes it or the channel fails.
    fn subscribe(&self, header: RequestHeader, payload: Vec<u8>)
        -> BoxFuture<'static, Result<EventStream>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_header_detection() {
        let mut header = RequestHeader {
            name: PrimitiveName::new("ns", "counter"),
            partition: PartitionId(1),
            session_id: SessionId(9),
            sequence: 4,
            consistency: None,
        };
        assert!(!header.is_query());
        header.consistency = Some(ReadConsistency::Sequential);
        assert!(header.is_query());
    }
}

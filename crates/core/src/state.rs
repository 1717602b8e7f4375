//! Primitive lifecycle states
//!
//! A managed session moves through
//! `Connecting -> Connected -> Suspended -> Connected | Closed`, with
//! `Connecting -> Closed` on open failure. `Closed` is terminal.
//!
//! Listeners only observe the three externally visible states in
//! [`PrimitiveState`]; `Connecting` is internal to the session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Externally observable lifecycle state of a primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveState {
    /// Session open and keep-alives succeeding
    Connected,
    /// Keep-alives failing; remote updates may be missed
    Suspended,
    /// Session closed or expired; no further operations accepted
    Closed,
}

impl PrimitiveState {
    /// Severity rank used when aggregating partition states
    fn rank(&self) -> u8 {
        match self {
            PrimitiveState::Connected => 0,
            PrimitiveState::Suspended => 1,
            PrimitiveState::Closed => 2,
        }
    }

    /// The most degraded of the given states (`Connected` when empty)
    pub fn worst<I: IntoIterator<Item = PrimitiveState>>(states: I) -> PrimitiveState {
        states
            .into_iter()
            .max_by_key(|s| s.rank())
            .unwrap_or(PrimitiveState::Connected)
    }
}

impl fmt::Display for PrimitiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimitiveState::Connected => "CONNECTED",
            PrimitiveState::Suspended => "SUSPENDED",
            PrimitiveState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Internal session state, including the pre-open phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Open request not yet answered
    Connecting,
    /// See [`PrimitiveState::Connected`]
    Connected,
    /// See [`PrimitiveState::Suspended`]
    Suspended,
    /// See [`PrimitiveState::Closed`]
    Closed,
}

impl SessionState {
    /// Externally visible projection (`None` while connecting)
    pub fn as_primitive_state(&self) -> Option<PrimitiveState> {
        match self {
            SessionState::Connecting => None,
            SessionState::Connected => Some(PrimitiveState::Connected),
            SessionState::Suspended => Some(PrimitiveState::Suspended),
            SessionState::Closed => Some(PrimitiveState::Closed),
        }
    }

    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Connected)
                | (Connecting, Closed)
                | (Connected, Suspended)
                | (Connected, Closed)
                | (Suspended, Connected)
                | (Suspended, Closed)
        )
    }

    /// Whether operations are rejected outright
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

/// Callback invoked on lifecycle transitions
pub type StateListener = Arc<dyn Fn(PrimitiveState) + Send + Sync>;

/// Liveness of a primitive's event stream
///
/// Independent of [`PrimitiveState`]: a session can stay `Connected` while
/// its event stream is down, and events published in that window are lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// A stream is open and delivering events
    Open,
    /// No stream is open; events may be missed until the next `Open`
    Lost,
}

/// Callback invoked when an event stream opens or is lost
pub type StreamListener = Arc<dyn Fn(StreamState) + Send + Sync>;

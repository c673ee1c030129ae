//! Linear Session Lifecycle
//!
//! Every connection session moves New -> Signaling -> Connected and ends in
//! exactly one terminal state. The lifecycle is consumed on each transition so
//! a closed or failed session can never be revived.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::LifecycleError;
use crate::types::Timestamp;

// ----------------------------------------------------------------------------
// Session Roles and Origins
// ----------------------------------------------------------------------------

/// Which side of the offer/answer exchange a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    Initiator,
    Responder,
}

/// Why a session was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionOrigin {
    /// Out-of-band code pairing driven by the handshake coordinator
    Manual,
    /// Pairing negotiated over the local discovery medium
    Discovery,
    /// Replay of a saved peer's last signal
    Reconnect,
}

impl fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOrigin::Manual => write!(f, "manual"),
            SessionOrigin::Discovery => write!(f, "discovery"),
            SessionOrigin::Reconnect => write!(f, "reconnect"),
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle States
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionLifecycle {
    New {
        created_at: Timestamp,
    },
    Signaling {
        since: Timestamp,
        signals: u32,
    },
    Connected {
        since: Timestamp,
    },
    Closed {
        at: Timestamp,
    },
    Failed {
        at: Timestamp,
        reason: String,
    },
}

/// Events that drive the lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The link produced a local description
    LocalSignal,
    /// A remote description was fed to the link
    RemoteSignal,
    /// The link reported that the data channel is open
    LinkUp,
    /// The link reported an error
    LinkError { reason: String },
    /// Closed locally or by the remote side
    Close,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::LocalSignal => "LocalSignal",
            LifecycleEvent::RemoteSignal => "RemoteSignal",
            LifecycleEvent::LinkUp => "LinkUp",
            LifecycleEvent::LinkError { .. } => "LinkError",
            LifecycleEvent::Close => "Close",
        }
    }
}

impl SessionLifecycle {
    pub fn new(now: Timestamp) -> Self {
        SessionLifecycle::New { created_at: now }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            SessionLifecycle::New { .. } => "New",
            SessionLifecycle::Signaling { .. } => "Signaling",
            SessionLifecycle::Connected { .. } => "Connected",
            SessionLifecycle::Closed { .. } => "Closed",
            SessionLifecycle::Failed { .. } => "Failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionLifecycle::Connected { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionLifecycle::Closed { .. } | SessionLifecycle::Failed { .. }
        )
    }

    /// Consume the current state and produce the next one
    pub fn transition(self, event: LifecycleEvent, now: Timestamp) -> Result<Self, LifecycleError> {
        use LifecycleEvent as E;
        use SessionLifecycle as S;

        let invalid = |state: &S, event: &E| LifecycleError {
            from: state.state_name().to_string(),
            event: event.name().to_string(),
        };

        match (self, event) {
            (S::New { .. }, E::LocalSignal | E::RemoteSignal) => Ok(S::Signaling {
                since: now,
                signals: 1,
            }),
            (S::Signaling { since, signals }, E::LocalSignal | E::RemoteSignal) => {
                Ok(S::Signaling {
                    since,
                    signals: signals.saturating_add(1),
                })
            }
            // Links may renegotiate after the channel is open
            (state @ S::Connected { .. }, E::LocalSignal | E::RemoteSignal) => Ok(state),

            (S::New { .. } | S::Signaling { .. }, E::LinkUp) => Ok(S::Connected { since: now }),

            (state, E::LinkError { reason }) if !state.is_terminal() => Ok(S::Failed {
                at: now,
                reason,
            }),
            (state, E::Close) if !state.is_terminal() => Ok(S::Closed { at: now }),

            (state, event) => Err(invalid(&state, &event)),
        }
    }
}

impl fmt::Display for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state_name())
    }
}

//! Session state shared between the stream reader (sole writer) and callers.
//!
//! The `(session_id, state)` pair is published as one snapshot through a
//! `watch` channel, so a caller never observes an `Open` state without its
//! session id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::CallError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub state: StreamState,
}

/// Effect of a handshake event on the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// First handshake: `Connecting → Open`.
    Opened,
    /// Repeated handshake with the current id.
    Unchanged,
    /// Handshake carrying a new id while open; pending calls are kept.
    Refreshed { previous: String },
    /// Handshake after the stream was closed.
    Ignored,
}

#[derive(Debug)]
pub struct Session {
    state: watch::Sender<SessionSnapshot>,
    reader_claimed: AtomicBool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot {
            session_id: None,
            state: StreamState::Connecting,
        });
        Self {
            state,
            reader_claimed: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> StreamState {
        self.state.borrow().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.borrow().session_id.clone()
    }

    /// Session id to frame an outgoing call with.
    pub fn ready_id(&self) -> Result<String, CallError> {
        let snap = self.state.borrow();
        match (snap.state, snap.session_id.as_ref()) {
            (StreamState::Open, Some(id)) => Ok(id.clone()),
            (StreamState::Closed, _) => Err(CallError::StreamClosed),
            _ => Err(CallError::SessionNotReady),
        }
    }

    /// Wait until the handshake arrives or the stream closes.
    ///
    /// Fails with `SessionNotReady` when `timeout` elapses first and with
    /// `StreamClosed` when the stream ends without a handshake.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<String, CallError> {
        let mut rx = self.state.subscribe();
        let snap = match tokio::time::timeout(
            timeout,
            rx.wait_for(|s| s.state != StreamState::Connecting),
        )
        .await
        {
            Ok(Ok(snap)) => snap.clone(),
            Ok(Err(_)) => return Err(CallError::StreamClosed),
            Err(_) => return Err(CallError::SessionNotReady),
        };

        match (snap.state, snap.session_id) {
            (StreamState::Open, Some(id)) => Ok(id),
            _ => Err(CallError::StreamClosed),
        }
    }

    pub(crate) fn apply_handshake(&self, session_id: String) -> HandshakeOutcome {
        let mut outcome = HandshakeOutcome::Ignored;
        self.state.send_modify(|snap| {
            outcome = match (snap.state, snap.session_id.as_deref()) {
                (StreamState::Closed, _) => HandshakeOutcome::Ignored,
                (StreamState::Open, Some(current)) if current == session_id => {
                    HandshakeOutcome::Unchanged
                }
                (StreamState::Open, Some(current)) => HandshakeOutcome::Refreshed {
                    previous: current.to_string(),
                },
                _ => HandshakeOutcome::Opened,
            };
            if matches!(
                outcome,
                HandshakeOutcome::Opened | HandshakeOutcome::Refreshed { .. }
            ) {
                snap.session_id = Some(session_id);
                snap.state = StreamState::Open;
            }
        });
        outcome
    }

    /// Move to `Closed`. Returns `false` if the session was already closed.
    pub(crate) fn close(&self) -> bool {
        self.state.send_if_modified(|snap| {
            if snap.state == StreamState::Closed {
                return false;
            }
            snap.state = StreamState::Closed;
            true
        })
    }

    /// Mark the single reader slot as taken. Returns `false` if it already was.
    pub(crate) fn claim_reader(&self) -> bool {
        !self.reader_claimed.swap(true, Ordering::SeqCst)
    }
}

//! The per-connection state machine on the server side:
//! `Handshaking -> Serving -> Closing -> Closed`, with only two legal paths
//! through it.

/// Where one server-side connection currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// The `Option` handshake record hasn't been read yet (or is being read
    /// right now).
    Handshaking,
    /// Handshake succeeded; requests are being read and dispatched.
    Serving,
    /// The read loop has exited; no new requests are accepted, but
    /// in-flight dispatches are still allowed to finish and write their
    /// response.
    Closing,
    /// The connection is fully torn down.
    Closed,
}

impl ConnState {
    /// Whether moving from `self` to `next` is one of the two legal paths:
    /// `Handshaking -> Closed` (handshake failure) or
    /// `Serving -> Closing -> Closed`.
    pub fn allows(self, next: ConnState) -> bool {
        use ConnState::*;
        matches!(
            (self, next),
            (Handshaking, Serving) | (Handshaking, Closed) | (Serving, Closing) | (Closing, Closed)
        )
    }
}

/// A `ConnState` plus the transition check, so `serve_conn` can't silently
/// skip a state or move backwards.
pub struct ConnStateCell {
    current: ConnState,
}

impl ConnStateCell {
    pub fn new() -> Self {
        ConnStateCell {
            current: ConnState::Handshaking,
        }
    }

    pub fn current(&self) -> ConnState {
        self.current
    }

    /// Move to `next`. Panics if the transition isn't one `allows` permits —
    /// this is a connection-handling bug, not a runtime condition a caller
    /// could hit through network input.
    pub fn transition(&mut self, next: ConnState) {
        assert!(
            self.current.allows(next),
            "illegal connection state transition: {:?} -> {:?}",
            self.current,
            next
        );
        self.current = next;
    }
}

impl Default for ConnStateCell {
    fn default() -> Self {
        Self::new()
    }
}

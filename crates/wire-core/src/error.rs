//! The error taxonomy shared by the client and server halves of the runtime.
//!
//! A single enum covers every failure kind the wire protocol distinguishes:
//! transport, handshake, protocol, timeout, shutdown, and usage errors.
//! Handlers that only care whether a call failed can match on `WireError`
//! directly; callers that care about the *kind* of failure can match on the
//! variant.

use std::fmt;
use std::sync::Arc;

/// Errors produced anywhere in the wire runtime.
///
/// `WireError` is `Clone` so a single instance can be fanned out to every
/// pending call during shutdown without re-allocating a message per call.
#[derive(Debug, Clone)]
pub enum WireError {
    /// Connect, read, or write failure, or an unexpected end of stream.
    Transport(Arc<str>),
    /// Handshake failed: bad magic number, unknown codec, or a malformed
    /// handshake record.
    Handshake(Arc<str>),
    /// A header or body frame failed to decode.
    Decode(Arc<str>),
    /// The dialer's connect timeout elapsed.
    ConnectTimeout,
    /// A synchronous call's cancellation future fired before the reply
    /// arrived.
    CallCancelled(Arc<str>),
    /// The server's per-request handle timeout elapsed before the handler
    /// produced a response.
    HandleTimeout,
    /// The client called `close()` and is no longer accepting submissions.
    Shutdown,
    /// The remote peer reported an application-level error for this call.
    /// This is the only variant that can appear in `Header::error` on the
    /// wire; all others are local.
    Remote(String),
    /// A precondition a caller is responsible for upholding was violated.
    /// Reserved for programming errors (e.g. a zero-capacity done channel)
    /// where callers should fix the call site rather than handle the error
    /// at runtime.
    Usage(Arc<str>),
}

impl WireError {
    pub fn transport(msg: impl Into<String>) -> Self {
        WireError::Transport(Arc::from(msg.into()))
    }

    pub fn handshake(msg: impl Into<String>) -> Self {
        WireError::Handshake(Arc::from(msg.into()))
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        WireError::Decode(Arc::from(msg.into()))
    }

    pub fn call_cancelled(msg: impl Into<String>) -> Self {
        WireError::CallCancelled(Arc::from(msg.into()))
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        WireError::Usage(Arc::from(msg.into()))
    }

    /// True for the variants that mean the client or connection is no
    /// longer usable: it has been explicitly shut down, or the transport
    /// itself is gone.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WireError::Shutdown | WireError::Transport(_) | WireError::ConnectTimeout
        )
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Transport(msg) => write!(f, "transport error: {msg}"),
            WireError::Handshake(msg) => write!(f, "handshake error: {msg}"),
            WireError::Decode(msg) => write!(f, "decode error: {msg}"),
            WireError::ConnectTimeout => write!(f, "connect timeout"),
            WireError::CallCancelled(msg) => write!(f, "call cancelled: {msg}"),
            WireError::HandleTimeout => write!(f, "server handle timeout"),
            WireError::Shutdown => write!(f, "connection is shut down"),
            WireError::Remote(msg) => write!(f, "{msg}"),
            WireError::Usage(msg) => write!(f, "usage error: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_display() {
        assert_eq!(WireError::Shutdown.to_string(), "connection is shut down");
    }

    #[test]
    fn remote_display_is_bare_message() {
        let err = WireError::Remote("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn is_terminal() {
        assert!(WireError::Shutdown.is_terminal());
        assert!(WireError::ConnectTimeout.is_terminal());
        assert!(WireError::transport("eof").is_terminal());
        assert!(!WireError::HandleTimeout.is_terminal());
        assert!(!WireError::Remote("boom".into()).is_terminal());
    }

    #[test]
    fn clone_is_cheap_and_preserves_message() {
        let err = WireError::handshake("bad magic");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn io_error_converts_to_transport() {
        let io_err = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let err: WireError = io_err.into();
        assert!(matches!(err, WireError::Transport(_)));
    }
}

//! The server loop: accept connections, handshake, then read and dispatch
//! framed requests concurrently through a `wire_registry::ServiceRegistry`.
//!
//! [`serve`] is the usual entry point for a TCP listener; [`serve_conn`]
//! handles a single already-accepted connection (useful for tests, or for
//! a caller with its own accept loop).

mod conn;
mod listener;
mod state;

pub use conn::serve_conn;
pub use listener::serve;
pub use state::ConnState;

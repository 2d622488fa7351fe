//! The pending-call table: the "state lock" side of a client connection.
//!
//! Everything guarded by this lock is a quick, synchronous field touch —
//! insert, remove, or a flag check — never an await. The lock is a
//! `parking_lot::Mutex` for exactly that reason: it's always held for O(1)
//! work and never across a suspension point.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use wire_core::WireError;

use crate::call::{CallRecord, PendingCall};

struct State {
    next_seq: u64,
    pending: HashMap<u64, Arc<dyn PendingCall>>,
    closing: bool,
    shutdown: bool,
}

/// Seq→Call table plus the `closing`/`shutdown` flags that gate new
/// registrations. One instance per connection, shared between the client
/// handle and its receive task.
pub struct PendingTable {
    state: Mutex<State>,
}

impl PendingTable {
    pub fn new() -> Self {
        PendingTable {
            state: Mutex::new(State {
                next_seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        }
    }

    /// Register a new call, assigning it the next sequence number, unless
    /// the connection is already closing or shut down. Callers are expected
    /// to hold the send lock for the duration of registration plus the wire
    /// write that follows, so that no seq number is ever skipped or reused
    /// out of order.
    pub fn register<Rep>(
        &self,
        service_method: String,
        done: mpsc::Sender<Arc<CallRecord<Rep>>>,
    ) -> Result<Arc<CallRecord<Rep>>, WireError>
    where
        Rep: serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        if state.closing || state.shutdown {
            return Err(WireError::Shutdown);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        let call = CallRecord::new(seq, service_method, done);
        state.pending.insert(seq, call.clone() as Arc<dyn PendingCall>);
        Ok(call)
    }

    /// Remove and return the call for `seq`, if still pending. Used both by
    /// the receive loop (matching a reply) and by a timed-out `call()`
    /// (abandoning its own registration).
    pub fn remove(&self, seq: u64) -> Option<Arc<dyn PendingCall>> {
        self.state.lock().pending.remove(&seq)
    }

    /// `true` iff the connection still accepts new calls.
    pub fn is_available(&self) -> bool {
        let state = self.state.lock();
        !state.closing && !state.shutdown
    }

    /// Mark the connection as user-closed. Returns an error if it already
    /// was (closing or shut down) — closing is monotonic, never undone or
    /// repeated.
    pub fn mark_closing(&self) -> Result<(), WireError> {
        let mut state = self.state.lock();
        if state.closing || state.shutdown {
            return Err(WireError::Shutdown);
        }
        state.closing = true;
        Ok(())
    }

    /// Mark the connection as fault-shut-down and drain every pending call.
    /// The caller is responsible for completing each drained call with the
    /// triggering error; this only does the bookkeeping that must happen
    /// under the state lock.
    pub fn shutdown_and_drain(&self) -> Vec<Arc<dyn PendingCall>> {
        let mut state = self.state.lock();
        state.shutdown = true;
        state.pending.drain().map(|(_, call)| call).collect()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn done_channel<Rep>() -> mpsc::Sender<Arc<CallRecord<Rep>>> {
        mpsc::channel(1).0
    }

    #[test]
    fn register_assigns_increasing_sequence_numbers() {
        let table = PendingTable::new();
        let a = table.register::<u32>("Foo.A".into(), done_channel()).unwrap();
        let b = table.register::<u32>("Foo.B".into(), done_channel()).unwrap();
        assert_eq!(a.seq(), 1);
        assert_eq!(b.seq(), 2);
    }

    #[test]
    fn remove_returns_and_forgets_the_call() {
        let table = PendingTable::new();
        let call = table.register::<u32>("Foo.A".into(), done_channel()).unwrap();
        assert!(table.remove(call.seq()).is_some());
        assert!(table.remove(call.seq()).is_none());
    }

    #[test]
    fn register_after_closing_fails() {
        let table = PendingTable::new();
        table.mark_closing().unwrap();
        let err = table
            .register::<u32>("Foo.A".into(), done_channel())
            .unwrap_err();
        assert!(matches!(err, WireError::Shutdown));
    }

    #[test]
    fn mark_closing_is_monotonic() {
        let table = PendingTable::new();
        table.mark_closing().unwrap();
        assert!(table.mark_closing().is_err());
    }

    #[test]
    fn is_available_reflects_both_flags() {
        let table = PendingTable::new();
        assert!(table.is_available());
        table.mark_closing().unwrap();
        assert!(!table.is_available());
    }

    #[test]
    fn shutdown_and_drain_empties_the_table_and_sets_the_flag() {
        let table = PendingTable::new();
        table.register::<u32>("Foo.A".into(), done_channel()).unwrap();
        table.register::<u32>("Foo.B".into(), done_channel()).unwrap();
        let drained = table.shutdown_and_drain();
        assert_eq!(drained.len(), 2);
        assert!(!table.is_available());
        assert!(table.shutdown_and_drain().is_empty());
    }
}

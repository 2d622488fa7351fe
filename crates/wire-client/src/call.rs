//! The per-call record and the type-erased handle the pending table holds.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use wire_core::{CodecKind, WireError};

/// Outcome of a finished call: the decoded reply, or the error that closed
/// it out (remote, transport, cancellation, or shutdown).
pub type CallResult<Rep> = Result<Rep, WireError>;

/// A single in-flight (or just-finished) call.
///
/// One `CallRecord` is shared between whoever is waiting on it (the caller,
/// via its own `Arc<CallRecord<Rep>>`) and the receive task, which reaches
/// it through the pending table as `Arc<dyn PendingCall>` — a second,
/// type-erased `Arc` over the same allocation. Only the pending table's
/// `Arc` is ever turned `dyn`; the caller's stays concretely typed so it can
/// decode its own reply.
pub struct CallRecord<Rep> {
    seq: u64,
    service_method: String,
    result: Mutex<Option<CallResult<Rep>>>,
    done: mpsc::Sender<Arc<CallRecord<Rep>>>,
}

impl<Rep> CallRecord<Rep> {
    pub(crate) fn new(
        seq: u64,
        service_method: String,
        done: mpsc::Sender<Arc<CallRecord<Rep>>>,
    ) -> Arc<Self> {
        Arc::new(CallRecord {
            seq,
            service_method,
            result: Mutex::new(None),
            done,
        })
    }

    /// A record that was never registered with a connection, because
    /// registration itself failed (the client was already closing or shut
    /// down). Its `seq` is a sentinel; it is never inserted into a pending
    /// table and never observed by a receive task, so it must be signalled
    /// done explicitly by whoever constructs it.
    pub(crate) fn already_failed(
        service_method: String,
        done: mpsc::Sender<Arc<CallRecord<Rep>>>,
        err: WireError,
    ) -> Arc<Self> {
        Arc::new(CallRecord {
            seq: 0,
            service_method,
            result: Mutex::new(Some(Err(err))),
            done,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Take the result out, if the call has finished. Leaves `None` behind,
    /// so this can only be observed once.
    pub fn take_result(&self) -> Option<CallResult<Rep>> {
        self.result.lock().unwrap().take()
    }

    /// Push this call onto its own done channel without touching its
    /// result. Used for the "never registered" path, where the result was
    /// set at construction and no receive task will ever signal it.
    pub(crate) async fn signal(self: &Arc<Self>) {
        let _ = self.done.send(self.clone()).await;
    }
}

/// Type-erased handle to a [`CallRecord<Rep>`] for some `Rep` the pending
/// table does not track. The table only needs to route a completed frame to
/// the right call and signal it done; decoding into the concrete `Rep`
/// happens inside `complete_ok`, where the type is still known.
#[async_trait]
pub trait PendingCall: Send + Sync {
    fn seq(&self) -> u64;

    /// Decode `body` as this call's reply type, store it, and signal done.
    async fn complete_ok(self: Arc<Self>, kind: CodecKind, body: &[u8]);

    /// Store `err` as this call's result and signal done.
    async fn complete_err(self: Arc<Self>, err: WireError);
}

#[async_trait]
impl<Rep> PendingCall for CallRecord<Rep>
where
    Rep: serde::de::DeserializeOwned + Send + Sync + 'static,
{
    fn seq(&self) -> u64 {
        self.seq
    }

    async fn complete_ok(self: Arc<Self>, kind: CodecKind, body: &[u8]) {
        let result = kind.decode(body);
        *self.result.lock().unwrap() = Some(result);
        let _ = self.done.send(self.clone()).await;
    }

    async fn complete_err(self: Arc<Self>, err: WireError) {
        *self.result.lock().unwrap() = Some(Err(err));
        let _ = self.done.send(self.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_ok_decodes_and_signals_done() {
        let (tx, mut rx) = mpsc::channel(1);
        let call: Arc<CallRecord<u32>> = CallRecord::new(1, "Foo.Sum".into(), tx);
        let bytes = wire_core::CodecKind::Postcard.encode(&42u32).unwrap();

        (call.clone() as Arc<dyn PendingCall>)
            .complete_ok(wire_core::CodecKind::Postcard, &bytes)
            .await;

        let signalled = rx.recv().await.unwrap();
        assert_eq!(signalled.take_result().unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn complete_err_stores_error_and_signals_done() {
        let (tx, mut rx) = mpsc::channel(1);
        let call: Arc<CallRecord<u32>> = CallRecord::new(1, "Foo.Sum".into(), tx);

        (call.clone() as Arc<dyn PendingCall>)
            .complete_err(WireError::Shutdown)
            .await;

        let signalled = rx.recv().await.unwrap();
        assert!(matches!(
            signalled.take_result().unwrap(),
            Err(WireError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn already_failed_call_carries_its_error_without_registration() {
        let (tx, _rx) = mpsc::channel::<Arc<CallRecord<u32>>>(1);
        let call = CallRecord::already_failed("Foo.Sum".into(), tx, WireError::Shutdown);
        assert_eq!(call.seq(), 0);
        assert!(matches!(call.take_result(), Some(Err(WireError::Shutdown))));
    }
}

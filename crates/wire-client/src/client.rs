//! The client engine: one instance per connection, multiplexing any number
//! of concurrent calls over a single framed stream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use wire_core::{Codec, CodecKind, FrameReader, FrameWriter, Header, RpcOption, WireError, lookup_codec};

use crate::call::{CallRecord, PendingCall};
use crate::pending::PendingTable;

/// Capacity used for the done channel when a caller doesn't supply its own.
const DEFAULT_DONE_CAPACITY: usize = 10;

struct ClientInner<S> {
    writer: AsyncMutex<FrameWriter<WriteHalf<S>>>,
    pending: PendingTable,
    codec_kind: CodecKind,
}

/// A handle to one live connection. Cheap to clone: every clone shares the
/// same send lock, pending table, and receive task.
pub struct Client<S> {
    inner: Arc<ClientInner<S>>,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Client {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Write the handshake on `stream`, split it into a framed codec, and
    /// spawn the receive task. The returned client is immediately usable;
    /// any handshake failure is returned directly, with no receive task
    /// spawned.
    pub(crate) async fn handshake_and_spawn(mut stream: S, opt: RpcOption) -> Result<Self, WireError> {
        opt.write_to(&mut stream).await?;
        let kind = lookup_codec(&opt.codec_type).ok_or_else(|| {
            WireError::handshake(format!("unregistered codec type {:?}", opt.codec_type))
        })?;

        let codec = Codec::new(stream, kind);
        let (reader, writer) = codec.into_parts();

        let inner = Arc::new(ClientInner {
            writer: AsyncMutex::new(writer),
            pending: PendingTable::new(),
            codec_kind: kind,
        });

        tokio::spawn(receive_loop(reader, inner.clone()));

        Ok(Client { inner })
    }

    /// `true` iff the connection is neither closing nor shut down.
    pub fn is_available(&self) -> bool {
        self.inner.pending.is_available()
    }

    /// Close the connection. Idempotent only in the sense that a second
    /// call observes [`WireError::Shutdown`] rather than double-closing the
    /// stream.
    pub async fn close(&self) -> Result<(), WireError> {
        let mut writer = self.inner.writer.lock().await;
        self.inner.pending.mark_closing()?;
        writer.close().await
    }

    /// Submit a call without waiting for its reply. Returns once the
    /// request has been written to the wire (or has failed to register or
    /// to write) — never once the reply arrives. The reply, when it does
    /// arrive, is delivered on `done` (or an internally-owned channel of
    /// default capacity, if `done` is `None`).
    ///
    /// Passing `Some` sender with zero buffer capacity is a programming
    /// error: `tokio::sync::mpsc::channel` panics at construction, before
    /// this function is ever reached.
    pub async fn go<Args, Rep>(
        &self,
        service_method: impl Into<String>,
        args: Args,
        done: Option<mpsc::Sender<Arc<CallRecord<Rep>>>>,
    ) -> Arc<CallRecord<Rep>>
    where
        Args: Serialize + Send,
        Rep: DeserializeOwned + Send + Sync + 'static,
    {
        let service_method = service_method.into();
        let done = done.unwrap_or_else(|| mpsc::channel(DEFAULT_DONE_CAPACITY).0);

        let mut writer = self.inner.writer.lock().await;
        let call = match self
            .inner
            .pending
            .register(service_method.clone(), done.clone())
        {
            Ok(call) => call,
            Err(e) => {
                drop(writer);
                let call = CallRecord::already_failed(service_method, done, e);
                call.signal().await;
                return call;
            }
        };

        let header = Header::request(call.service_method().to_string(), call.seq());
        if let Err(e) = writer.write(&header, &args).await {
            drop(writer);
            if self.inner.pending.remove(call.seq()).is_some() {
                call.clone().complete_err(e).await;
            }
            return call;
        }

        call
    }

    /// Submit a call and wait for its reply, unbounded by any timeout.
    pub async fn call<Args, Rep>(
        &self,
        service_method: impl Into<String>,
        args: Args,
    ) -> Result<Rep, WireError>
    where
        Args: Serialize + Send,
        Rep: DeserializeOwned + Send + Sync + 'static,
    {
        self.call_with_cancel(std::future::pending(), service_method, args)
            .await
    }

    /// Submit a call and wait for its reply, or for `cancel` to resolve
    /// first — in which case the call's registration is abandoned (if it
    /// hadn't already completed) and [`WireError::CallCancelled`] is
    /// returned. `cancel` resolving is the Rust analogue of a context
    /// being done; pass `tokio::time::sleep(d)` for a plain timeout.
    pub async fn call_with_cancel<Args, Rep, C>(
        &self,
        cancel: C,
        service_method: impl Into<String>,
        args: Args,
    ) -> Result<Rep, WireError>
    where
        Args: Serialize + Send,
        Rep: DeserializeOwned + Send + Sync + 'static,
        C: Future<Output = ()> + Send,
    {
        let service_method = service_method.into();
        let (tx, mut rx) = mpsc::channel(1);
        let call = self.go(service_method, args, Some(tx)).await;

        tokio::select! {
            biased;
            received = rx.recv() => {
                match received {
                    Some(finished) => finished
                        .take_result()
                        .unwrap_or_else(|| Err(WireError::transport("call signalled done without a result"))),
                    None => Err(WireError::transport("done channel closed without a result")),
                }
            },
            () = cancel => {
                self.inner.pending.remove(call.seq());
                Err(WireError::call_cancelled(call.service_method().to_string()))
            },
        }
    }

    /// Convenience over [`Client::call_with_cancel`] for a plain duration
    /// timeout. A zero duration means unbounded, matching [`RpcOption`]'s
    /// own convention for `connect_timeout`/`handle_timeout`.
    pub async fn call_timeout<Args, Rep>(
        &self,
        timeout: Duration,
        service_method: impl Into<String>,
        args: Args,
    ) -> Result<Rep, WireError>
    where
        Args: Serialize + Send,
        Rep: DeserializeOwned + Send + Sync + 'static,
    {
        if timeout.is_zero() {
            self.call(service_method, args).await
        } else {
            self.call_with_cancel(tokio::time::sleep(timeout), service_method, args)
                .await
        }
    }
}

async fn receive_loop<S>(mut reader: FrameReader<ReadHalf<S>>, inner: Arc<ClientInner<S>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let err = loop {
        let header = match reader.read_header().await {
            Ok(h) => h,
            Err(e) => break e,
        };
        let call = inner.pending.remove(header.seq);
        // The body frame must be consumed whether or not a call is still
        // pending for it, to keep the stream's framing in sync.
        let body = match reader.read_body_bytes().await {
            Ok(b) => b,
            Err(e) => break e,
        };
        if let Some(call) = call {
            if header.is_error() {
                call.complete_err(WireError::Remote(header.error)).await;
            } else {
                call.complete_ok(inner.codec_kind, &body).await;
            }
        }
    };

    tracing::debug!(error = %err, "client receive loop ending, terminating pending calls");
    terminate_calls(&inner, err).await;
}

async fn terminate_calls<S>(inner: &Arc<ClientInner<S>>, err: WireError)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let _send_guard = inner.writer.lock().await;
    let calls = inner.pending.shutdown_and_drain();
    for call in calls {
        call.complete_err(err.clone()).await;
    }
}

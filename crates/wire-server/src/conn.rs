//! Per-connection handshake, read loop, and concurrent request dispatch.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf, split};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use wire_core::{CodecKind, FrameReader, FrameWriter, Header, RpcOption, WireError, lookup_codec};
use wire_registry::ServiceRegistry;

use crate::state::{ConnState, ConnStateCell};

/// Handle one accepted connection end to end: handshake, then the read loop,
/// then draining in-flight dispatches before closing.
///
/// Never returns an error to its caller — every failure (bad handshake,
/// dropped connection, decode error) is local to this connection and is
/// logged, not propagated, so one misbehaving peer can't take down the
/// accept loop.
pub async fn serve_conn<S>(stream: S, registry: Arc<ServiceRegistry>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut state = ConnStateCell::new();
    let mut reader = BufReader::new(stream);

    let opt = match RpcOption::read_from(&mut reader).await {
        Ok(opt) => opt,
        Err(e) => {
            tracing::warn!(error = %e, "handshake decode failed, closing connection");
            state.transition(ConnState::Closed);
            return;
        }
    };

    if opt.magic_number != wire_core::DEFAULT_MAGIC_NUMBER {
        tracing::warn!(
            got = opt.magic_number,
            want = wire_core::DEFAULT_MAGIC_NUMBER,
            "handshake magic number mismatch, closing connection"
        );
        state.transition(ConnState::Closed);
        return;
    }

    let kind = match lookup_codec(&opt.codec_type) {
        Some(kind) => kind,
        None => {
            tracing::warn!(codec_type = %opt.codec_type, "unregistered codec type, closing connection");
            state.transition(ConnState::Closed);
            return;
        }
    };

    state.transition(ConnState::Serving);

    let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = split(reader.into_inner());
    let mut reader = FrameReader::new(read_half, kind);
    let writer = Arc::new(AsyncMutex::new(FrameWriter::new(write_half, kind)));
    let handle_timeout = opt.handle_timeout;

    let mut dispatches = JoinSet::new();

    loop {
        let header = match reader.read_header().await {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(error = %e, "read loop ending");
                break;
            }
        };
        let body = match reader.read_body_bytes().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(error = %e, "read loop ending while reading body");
                break;
            }
        };

        dispatches.spawn(dispatch_one(
            header,
            body,
            kind,
            registry.clone(),
            writer.clone(),
            handle_timeout,
        ));
    }

    state.transition(ConnState::Closing);
    while dispatches.join_next().await.is_some() {}

    state.transition(ConnState::Closed);
    let mut writer = writer.lock().await;
    if let Err(e) = writer.close().await {
        tracing::debug!(error = %e, "error closing connection");
    }
}

/// Run one request through the registry, enforcing `handle_timeout` if
/// non-zero, then write exactly one response for this `Seq`.
async fn dispatch_one<W>(
    header: Header,
    body: Vec<u8>,
    kind: CodecKind,
    registry: Arc<ServiceRegistry>,
    writer: Arc<AsyncMutex<FrameWriter<W>>>,
    handle_timeout: Duration,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let seq = header.seq;
    let service_method = header.service_method;

    let (resp_header, resp_body) = if handle_timeout.is_zero() {
        run_handler(&registry, &service_method, seq, kind, body).await
    } else {
        match tokio::time::timeout(
            handle_timeout,
            run_handler(&registry, &service_method, seq, kind, body),
        )
        .await
        {
            Ok(response) => response,
            Err(_elapsed) => {
                tracing::warn!(%service_method, seq, ?handle_timeout, "handler exceeded handle timeout");
                let mut resp_header = Header::request(service_method, seq);
                resp_header.error = WireError::HandleTimeout.to_string();
                (resp_header, Vec::new())
            }
        }
    };

    let mut writer = writer.lock().await;
    if let Err(e) = writer.write_raw(&resp_header, &resp_body).await {
        tracing::warn!(seq, error = %e, "failed to write response");
    }
}

/// Dispatch through the registry and shape the result into a response
/// header/body pair. Never fails: registry errors (unknown method, decode
/// failure, handler-reported error) become an error response rather than a
/// dropped connection, preserving framing for the next message.
async fn run_handler(
    registry: &ServiceRegistry,
    service_method: &str,
    seq: u64,
    kind: CodecKind,
    body: Vec<u8>,
) -> (Header, Vec<u8>) {
    match registry.dispatch(service_method, kind, body).await {
        Ok(reply_bytes) => (Header::request(service_method.to_string(), seq), reply_bytes),
        Err(msg) => {
            let mut header = Header::request(service_method.to_string(), seq);
            header.error = msg;
            (header, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Args {
        a: i32,
        b: i32,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sum(i32);

    fn sum_registry() -> Arc<ServiceRegistry> {
        Arc::new(
            ServiceRegistry::builder()
                .register("Math", "Sum", |args: Args| async move { Ok(Sum(args.a + args.b)) })
                .build(),
        )
    }

    #[tokio::test]
    async fn serve_conn_closes_on_magic_mismatch_without_writing_frames() {
        let (mut client, server) = tokio::io::duplex(4096);
        let mut bad_opt = RpcOption::default();
        bad_opt.magic_number = 0xdead_beef;
        bad_opt.write_to(&mut client).await.unwrap();

        serve_conn(server, sum_registry()).await;

        // Connection was closed without ever sending a frame back.
        let mut buf = [0u8; 1];
        use tokio::io::AsyncReadExt;
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn serve_conn_dispatches_a_request_and_writes_the_response() {
        let (mut client, server) = tokio::io::duplex(4096);
        let opt = RpcOption::default();
        opt.write_to(&mut client).await.unwrap();

        let server_task = tokio::spawn(serve_conn(server, sum_registry()));

        let kind = CodecKind::Postcard;
        let (client_read, client_write) = split(client);
        let mut writer = FrameWriter::new(client_write, kind);
        writer
            .write(&Header::request("Math.Sum", 1), &Args { a: 4, b: 5 })
            .await
            .unwrap();

        let mut reader = FrameReader::new(client_read, kind);
        let resp_header = reader.read_header().await.unwrap();
        assert_eq!(resp_header.seq, 1);
        assert!(!resp_header.is_error());
        let reply: Sum = reader.read_body().await.unwrap();
        assert_eq!(reply, Sum(9));

        drop(writer);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_method_gets_an_error_response_not_a_dropped_connection() {
        let (mut client, server) = tokio::io::duplex(4096);
        let opt = RpcOption::default();
        opt.write_to(&mut client).await.unwrap();

        let server_task = tokio::spawn(serve_conn(server, sum_registry()));

        let kind = CodecKind::Postcard;
        let (client_read, client_write) = split(client);
        let mut writer = FrameWriter::new(client_write, kind);
        writer
            .write(&Header::request("Math.Mul", 1), &Args { a: 1, b: 2 })
            .await
            .unwrap();

        let mut reader = FrameReader::new(client_read, kind);
        let resp_header = reader.read_header().await.unwrap();
        assert!(resp_header.is_error());
        assert!(resp_header.error.contains("Math.Mul"));

        drop(writer);
        server_task.await.unwrap();
    }
}

//! Connecting to a server with a bounded connect timeout.

use tokio::net::TcpStream;
use wire_core::{RpcOption, WireError, lookup_codec};

use crate::client::Client;

/// Connect to `address` over TCP, optionally bounded by `opts[0].connect_timeout`.
///
/// `opts` holds at most one element; passing more is a usage error. The
/// timeout, when non-zero, bounds the raw TCP connect and the
/// handshake-plus-client-construction step separately — each gets its own
/// `connect_timeout` budget, not a budget shared between the two.
pub async fn dial(
    network: &str,
    address: impl AsRef<str>,
    opts: &[RpcOption],
) -> Result<Client<TcpStream>, WireError> {
    if network != "tcp" {
        return Err(WireError::usage(format!(
            "unsupported network {network:?}, only \"tcp\" is supported"
        )));
    }

    let opt = parse_option(opts)?;
    let address = address.as_ref();
    let connect_timeout = opt.connect_timeout;

    let stream = if connect_timeout.is_zero() {
        TcpStream::connect(address).await?
    } else {
        tokio::time::timeout(connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| WireError::ConnectTimeout)??
    };

    let (tx, rx) = tokio::sync::oneshot::channel();
    let task = tokio::spawn(async move {
        let result = Client::handshake_and_spawn(stream, opt).await;
        // oneshot::Sender::send never blocks and does not require a live
        // receiver, so a caller who gave up after the timeout elapsed
        // doesn't wedge this task.
        let _ = tx.send(result);
    });

    if connect_timeout.is_zero() {
        rx.await
            .map_err(|_| WireError::transport("client construction task dropped"))?
    } else {
        match tokio::time::timeout(connect_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WireError::transport("client construction task dropped")),
            Err(_elapsed) => {
                // The background task still owns the socket; aborting it
                // drops that socket along with it instead of leaving both
                // running past the caller's timeout.
                task.abort();
                Err(WireError::ConnectTimeout)
            }
        }
    }
}

/// At most one `Option` may be supplied; `opts` beyond the first are a usage
/// error, and an empty slice defaults to [`RpcOption::default`].
fn parse_option(opts: &[RpcOption]) -> Result<RpcOption, WireError> {
    let opt = match opts {
        [] => RpcOption::default(),
        [one] => one.clone().normalized(),
        _ => return Err(WireError::usage("at most one Option may be supplied to dial")),
    };
    if lookup_codec(&opt.codec_type).is_none() {
        return Err(WireError::handshake(format!(
            "unregistered codec type {:?}",
            opt.codec_type
        )));
    }
    Ok(opt)
}

//! The top-level accept loop: one task reads connections off a listener and
//! hands each to its own `serve_conn` task.

use std::sync::Arc;

use tokio::net::TcpListener;
use wire_registry::ServiceRegistry;

use crate::conn::serve_conn;

/// Accept connections from `listener` forever, dispatching each to its own
/// task. A failed `accept` is logged and retried; it never ends the loop,
/// since an accept failure is local to one attempted connection, not the
/// listener itself.
pub async fn serve(listener: TcpListener, registry: Arc<ServiceRegistry>) -> ! {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let registry = registry.clone();
                tokio::spawn(async move {
                    tracing::debug!(%peer, "accepted connection");
                    serve_conn(stream, registry).await;
                    tracing::debug!(%peer, "connection closed");
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }
}

//! Echo demo server: registers `Math.Sum` and accepts connections on
//! [`echo_demo::ADDR`].
//!
//! Run with `cargo run --bin server -p echo-demo`, then the client in a
//! second terminal.

use std::sync::Arc;

use echo_demo::{ADDR, SumArgs, SumReply};
use tokio::net::TcpListener;
use wire_registry::ServiceRegistry;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let registry = ServiceRegistry::builder()
        .register("Math", "Sum", |args: SumArgs| async move {
            Ok(SumReply(args.a + args.b))
        })
        .build();

    let listener = TcpListener::bind(ADDR).await.expect("bind");
    tracing::info!(addr = ADDR, "echo server listening");
    wire_server::serve(listener, Arc::new(registry)).await;
}

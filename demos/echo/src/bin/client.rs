//! Echo demo client: five concurrent `Math.Sum` calls over one connection,
//! demonstrating multiplexing, followed by a graceful close.
//!
//! Run the server first: `cargo run --bin server -p echo-demo`.

use echo_demo::{ADDR, SumArgs, SumReply};
use wire_client::dial;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let client = dial("tcp", ADDR, &[]).await.expect("dial");

    let mut handles = Vec::new();
    for i in 0..5i32 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let reply: SumReply = client
                .call("Math.Sum", SumArgs { a: i, b: i * 10 })
                .await
                .expect("call");
            println!("Math.Sum({i}, {}) = {}", i * 10, reply.0);
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    client.close().await.expect("close");
}

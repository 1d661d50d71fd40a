//! Connect to an echo server, send a few messages and close.
//!
//! ```text
//! RUST_LOG=cwsock=debug cargo run --example echo -- 127.0.0.1 9001 /
//! ```

use std::sync::Arc;
use std::time::Duration;

use cwsock::{CloseCode, TcpTransport, WebSocket};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let server = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(9001);
    let path = args.next().unwrap_or_else(|| "/".to_string());

    let ws = WebSocket::new(Arc::new(TcpTransport::new()));
    if !ws.initialize(&server, port, &path, false) {
        eprintln!("invalid endpoint {server}:{port}{path}");
        return;
    }

    let finished = Arc::new(Notify::new());
    let controller = ws.handle();
    let on_text = ws.handle();
    let mut received = 0;

    ws.on_open(move || {
        println!("connected");
        for i in 0..3 {
            controller.send_text(&format!("message {i}"));
        }
    })
    .on_text_message(move |text: &str| {
        println!("echo: {text}");
        received += 1;
        if received == 3 {
            on_text.close(CloseCode::Normal, "done");
        }
    })
    .on_close(|code: CloseCode, reason: Option<&str>, clean: bool| {
        println!("closed by us: {code} {reason:?} clean={clean}");
    })
    .on_closing(|code: CloseCode, reason: Option<&str>, clean: bool| {
        println!("closed by server: {code} {reason:?} clean={clean}");
    })
    .on_closed({
        let finished = Arc::clone(&finished);
        move || finished.notify_one()
    })
    .on_error({
        let finished = Arc::clone(&finished);
        move |err: &cwsock::Error| {
            eprintln!("error: {err}");
            finished.notify_one();
        }
    });

    ws.connect(Duration::ZERO);
    finished.notified().await;

    // Teardown blocks until the transport has released the connection.
    tokio::task::block_in_place(move || drop(ws));
}

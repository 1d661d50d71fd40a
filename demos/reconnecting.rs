//! Keep a connection up: reconnect with backoff whenever it ends.
//!
//! ```text
//! RUST_LOG=cwsock=debug cargo run --example reconnecting -- 127.0.0.1 9001
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cwsock::{CloseCode, TcpTransport, WebSocket};
use tracing::info;
use tracing_subscriber::EnvFilter;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(250u64.saturating_mul(1 << attempt.min(7))).min(MAX_BACKOFF)
}

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

    let ws = WebSocket::new(Arc::new(TcpTransport::new()));
    if !ws.initialize(&server, port, "/", false) {
        eprintln!("invalid endpoint {server}:{port}");
        return;
    }

    let attempts = Arc::new(AtomicU32::new(0));

    ws.on_open({
        let attempts = Arc::clone(&attempts);
        let controller = ws.handle();
        move || {
            attempts.store(0, Ordering::SeqCst);
            info!("connected");
            controller.send_text("hello again");
        }
    })
    .on_text_message(|text: &str| info!(text, "message"))
    .on_closing(|code: CloseCode, reason: Option<&str>, clean: bool| {
        info!(%code, ?reason, clean, "server closed the connection");
    })
    .on_closed({
        let attempts = Arc::clone(&attempts);
        let controller = ws.handle();
        move || {
            let delay = backoff(attempts.fetch_add(1, Ordering::SeqCst));
            info!(?delay, "connection ended, reconnecting");
            controller.connect(delay);
        }
    })
    .on_error({
        let attempts = Arc::clone(&attempts);
        let controller = ws.handle();
        move |err: &cwsock::Error| {
            if err.is_usage_error() {
                info!(error = %err, "ignored");
                return;
            }
            let delay = backoff(attempts.fetch_add(1, Ordering::SeqCst));
            info!(error = %err, ?delay, "connection failed, retrying");
            controller.connect(delay);
        }
    });

    ws.connect(Duration::ZERO);
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    tokio::task::block_in_place(move || drop(ws));
}

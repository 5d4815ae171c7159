//! Mock upstream servers for integration tests
//!
//! Stands in for the streaming-avatar service:
//! - `EchoUpstream` answers text with `echo: <text>` and echoes binary frames
//! - `SilentUpstream` accepts the handshake and never reads
//! - `refused_target` points at a port with nothing listening

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Connection statistics shared with the test
#[derive(Default)]
pub struct MockStats {
    pub connections: AtomicU64,
    pub closed: AtomicU64,
    closed_notify: Notify,
}

impl MockStats {
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` upstream connections have ended.
    pub async fn wait_closed(&self, count: u64) {
        loop {
            let notified = self.closed_notify.notified();
            if self.closed() >= count {
                return;
            }
            notified.await;
        }
    }

    fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.closed_notify.notify_waiters();
    }
}

/// Echo server: replies `echo: <text>` to text and echoes binary frames.
pub struct EchoUpstream {
    pub addr: SocketAddr,
    pub stats: Arc<MockStats>,
    handle: JoinHandle<()>,
}

impl EchoUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(MockStats::default());

        let handle = {
            let stats = stats.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let stats = stats.clone();
                    tokio::spawn(async move {
                        stats.connections.fetch_add(1, Ordering::SeqCst);
                        let _ = handle_echo_connection(stream).await;
                        stats.record_close();
                    });
                }
            })
        };

        Self {
            addr,
            stats,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/streaming", self.addr)
    }
}

impl Drop for EchoUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_echo_connection(
    stream: TcpStream,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => {
                write
                    .send(Message::text(format!("echo: {}", text.as_str())))
                    .await?;
            }
            Message::Binary(data) => write.send(Message::Binary(data)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Accepts the WebSocket handshake, then never reads or writes.
pub struct SilentUpstream {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl SilentUpstream {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    held.push(ws);
                }
            }
        });

        Self { addr, handle }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/v1/streaming", self.addr)
    }
}

impl Drop for SilentUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A ws:// target on a port that refuses connections.
pub async fn refused_target() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/v1/streaming")
}

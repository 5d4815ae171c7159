//! End-to-end relay tests
//!
//! Runs a real gateway on an ephemeral port against mock upstream servers and
//! drives it with a tokio-tungstenite client.

mod mock_upstream;

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use heygen_gateway::{Gateway, ServerConfig, state::AppState};
use mock_upstream::{EchoUpstream, SilentUpstream, refused_target};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestGateway {
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new(config).await;
        let (tx, rx) = oneshot::channel::<()>();

        let server = tokio::spawn(Gateway::new(state.clone()).serve(listener, async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            state,
            shutdown: Some(tx),
            server,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws/heygen", self.addr)
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.ws_url()).await.unwrap();
        client
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = timeout(Duration::from_secs(10), &mut self.server).await;
    }

    async fn wait_for_sessions(&self, count: usize, within: Duration) -> bool {
        timeout(within, async {
            while self.state.registry.len() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

fn config_for(upstream_url: String) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.upstream_url = upstream_url;
    config.upstream_connect_timeout_ms = 1000;
    config.shutdown_grace_secs = 2;
    config
}

/// Read until a close frame arrives, skipping data frames.
async fn next_close(client: &mut Client) -> Option<CloseFrame> {
    while let Some(message) = client.next().await {
        match message {
            Ok(Message::Close(frame)) => return frame,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

async fn next_text(client: &mut Client) -> String {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_hello_is_echoed_through_gateway() {
    let upstream = EchoUpstream::start().await;
    let gateway = TestGateway::start(config_for(upstream.url())).await;

    let mut client = gateway.connect().await;
    client.send(Message::text("hello")).await.unwrap();

    let reply = timeout(Duration::from_secs(5), next_text(&mut client))
        .await
        .unwrap();
    assert_eq!(reply, "echo: hello");

    client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    match timeout(Duration::from_secs(5), client.next()).await.unwrap() {
        Some(Ok(Message::Binary(data))) => assert_eq!(&data[..], &[1, 2, 3]),
        other => panic!("expected binary echo, got {other:?}"),
    }

    client.close(None).await.unwrap();
    gateway.stop().await;
}

#[tokio::test]
async fn test_order_preserved_end_to_end() {
    let upstream = EchoUpstream::start().await;
    let gateway = TestGateway::start(config_for(upstream.url())).await;

    let mut client = gateway.connect().await;
    for i in 0..50 {
        client.send(Message::text(format!("msg-{i}"))).await.unwrap();
    }
    for i in 0..50 {
        let reply = timeout(Duration::from_secs(5), next_text(&mut client))
            .await
            .unwrap();
        assert_eq!(reply, format!("echo: msg-{i}"));
    }

    client.close(None).await.unwrap();
    gateway.stop().await;
}

#[tokio::test]
async fn test_refused_upstream_closes_client_with_1011() {
    let gateway = TestGateway::start(config_for(refused_target().await)).await;

    let mut client = gateway.connect().await;
    let frame = timeout(Duration::from_secs(6), next_close(&mut client))
        .await
        .expect("client was not closed within 6s")
        .expect("close frame");

    assert_eq!(u16::from(frame.code), 1011);
    assert!(gateway.wait_for_sessions(0, Duration::from_secs(1)).await);
    gateway.stop().await;
}

#[tokio::test]
async fn test_client_close_releases_upstream_and_registry() {
    let upstream = EchoUpstream::start().await;
    let gateway = TestGateway::start(config_for(upstream.url())).await;

    let mut client = gateway.connect().await;
    client.send(Message::text("ping")).await.unwrap();
    assert_eq!(next_text(&mut client).await, "echo: ping");
    assert_eq!(gateway.state.registry.len(), 1);

    client.close(None).await.unwrap();

    timeout(Duration::from_secs(1), upstream.stats.wait_closed(1))
        .await
        .expect("upstream not closed within 1s");
    assert!(gateway.wait_for_sessions(0, Duration::from_secs(1)).await);
    gateway.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_with_1001() {
    let upstream = SilentUpstream::start().await;
    let mut gateway = TestGateway::start(config_for(upstream.url())).await;

    let mut client = gateway.connect().await;
    assert!(gateway.wait_for_sessions(1, Duration::from_secs(2)).await);

    let _ = gateway.shutdown.take().unwrap().send(());

    let frame = timeout(Duration::from_secs(5), next_close(&mut client))
        .await
        .unwrap()
        .expect("close frame");
    assert_eq!(u16::from(frame.code), 1001);

    let _ = timeout(Duration::from_secs(10), &mut gateway.server).await;
    assert!(gateway.state.registry.is_empty());
}

#[tokio::test]
async fn test_missing_subprotocol_closes_with_1002() {
    let upstream = EchoUpstream::start().await;
    let mut config = config_for(upstream.url());
    config.client_subprotocol = Some("heygen.v1".to_string());
    let gateway = TestGateway::start(config).await;

    let mut client = gateway.connect().await;
    let frame = timeout(Duration::from_secs(5), next_close(&mut client))
        .await
        .unwrap()
        .expect("close frame");

    assert_eq!(u16::from(frame.code), 1002);
    assert_eq!(upstream.stats.connections(), 0);
    gateway.stop().await;
}

#[tokio::test]
async fn test_matching_subprotocol_is_selected() {
    let upstream = EchoUpstream::start().await;
    let mut config = config_for(upstream.url());
    config.client_subprotocol = Some("heygen.v1".to_string());
    let gateway = TestGateway::start(config).await;

    let mut request = gateway.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", "heygen.v1".parse().unwrap());
    let (mut client, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], "heygen.v1");

    client.send(Message::text("hi")).await.unwrap();
    assert_eq!(next_text(&mut client).await, "echo: hi");

    client.close(None).await.unwrap();
    gateway.stop().await;
}

#[tokio::test]
async fn test_per_ip_limit_rejects_upgrade_with_429() {
    let upstream = EchoUpstream::start().await;
    let mut config = config_for(upstream.url());
    config.max_connections_per_ip = 1;
    let gateway = TestGateway::start(config).await;

    let mut first = gateway.connect().await;
    match connect_async(gateway.ws_url()).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 429),
        other => panic!("expected 429 rejection, got {:?}", other.map(|_| ())),
    }

    first.close(None).await.unwrap();
    gateway.stop().await;
}

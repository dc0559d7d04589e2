//! End-to-end integration tests using real WebSocket clients.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use chorus_server::config::ServerConfig;
use chorus_server::server::ChorusServer;

const TIMEOUT: Duration = Duration::from_secs(5);
const PAGE: &str = "<!doctype html><title>chorus test</title>";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    server: ChorusServer,
    addr: SocketAddr,
    listener: JoinHandle<()>,
    _page: tempfile::NamedTempFile,
}

impl TestServer {
    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// Boot a server on an ephemeral port.
async fn boot_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut page = tempfile::Builder::new().suffix(".html").tempfile().unwrap();
    page.write_all(PAGE.as_bytes()).unwrap();

    let mut config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        index_path: page.path().to_path_buf(),
        ..ServerConfig::default()
    };
    configure(&mut config);

    let server = ChorusServer::new(config, None);
    let (addr, listener) = server.listen().await.unwrap();
    TestServer {
        server,
        addr,
        listener,
        _page: page,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

/// Wait for the registry to reach `expected` live connections.
async fn wait_for_connections(server: &ChorusServer, expected: usize) {
    timeout(TIMEOUT, async {
        while server.registry().connection_count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn recv(ws: &mut WsStream) -> Message {
    timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap()
}

/// Assert nothing arrives on `ws` within a short window.
async fn assert_silent(ws: &mut WsStream) {
    let next = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {next:?}");
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    let _ = timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

#[tokio::test]
async fn broadcast_reaches_everyone_and_skips_departed_client() {
    let ts = boot_server(|_| {}).await;
    let url = ts.ws_url();

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;
    wait_for_connections(&ts.server, 3).await;

    a.send(Message::Text("hello".into())).await.unwrap();
    for ws in [&mut a, &mut b, &mut c] {
        assert_eq!(recv(ws).await, Message::Text("hello".into()));
    }

    b.close(None).await.unwrap();
    wait_for_connections(&ts.server, 2).await;

    a.send(Message::Text("ping".into())).await.unwrap();
    assert_eq!(recv(&mut a).await, Message::Text("ping".into()));
    assert_eq!(recv(&mut c).await, Message::Text("ping".into()));
    assert_silent(&mut a).await;
    assert_silent(&mut c).await;

    ts.server.shutdown().shutdown();
}

#[tokio::test]
async fn binary_frames_are_relayed_as_binary() {
    let ts = boot_server(|_| {}).await;
    let url = ts.ws_url();

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    wait_for_connections(&ts.server, 2).await;

    let payload = vec![0_u8, 159, 146, 150];
    a.send(Message::Binary(payload.clone().into())).await.unwrap();
    assert_eq!(recv(&mut b).await, Message::Binary(payload.into()));

    ts.server.shutdown().shutdown();
}

#[tokio::test]
async fn dropped_client_is_removed() {
    let ts = boot_server(|_| {}).await;
    let url = ts.ws_url();

    let mut a = connect(&url).await;
    let b = connect(&url).await;
    wait_for_connections(&ts.server, 2).await;

    // No close handshake: the read loop sees the stream end or error.
    drop(b);
    wait_for_connections(&ts.server, 1).await;

    a.send(Message::Text("still here".into())).await.unwrap();
    assert_eq!(recv(&mut a).await, Message::Text("still here".into()));

    ts.server.shutdown().shutdown();
}

#[tokio::test]
async fn cross_origin_upgrade_is_forbidden_when_strict() {
    let ts = boot_server(|config| config.allow_any_origin = false).await;

    let mut request = ts.ws_url().into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("Origin", "http://evil.example".parse().unwrap());

    let err = timeout(TIMEOUT, connect_async(request))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("expected HTTP 403, got {other:?}"),
    }
    assert_eq!(ts.server.registry().connection_count().await, 0);

    // Clients without an Origin header still connect.
    let _ws = connect(&ts.ws_url()).await;
    wait_for_connections(&ts.server, 1).await;

    ts.server.shutdown().shutdown();
}

#[tokio::test]
async fn health_reports_live_connections() {
    let ts = boot_server(|_| {}).await;
    let _a = connect(&ts.ws_url()).await;
    wait_for_connections(&ts.server, 1).await;

    let response = http_get(ts.addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains(r#""connections":1"#), "{response}");

    ts.server.shutdown().shutdown();
}

#[tokio::test]
async fn other_paths_serve_client_page() {
    let ts = boot_server(|_| {}).await;

    let response = http_get(ts.addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with(PAGE), "{response}");

    ts.server.shutdown().shutdown();
}

#[tokio::test]
async fn stop_closes_open_clients() {
    let ts = boot_server(|_| {}).await;
    let mut a = connect(&ts.ws_url()).await;
    let mut b = connect(&ts.ws_url()).await;
    wait_for_connections(&ts.server, 2).await;

    let report = timeout(TIMEOUT, ts.server.stop(ts.listener)).await.unwrap();
    assert_eq!(report.closed_connections, 2);
    assert!(!report.aborted);
    assert_eq!(ts.server.registry().connection_count().await, 0);

    // The client sees a Close frame or the stream ending.
    for ws in [&mut a, &mut b] {
        let next = timeout(TIMEOUT, ws.next()).await.unwrap();
        assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use timelane_core::ListenerHub;

use crate::listener::WsListener;

// ---------------------------------------------------------------------------
// Origin validation
// ---------------------------------------------------------------------------

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - `http://localhost:*` or `http://127.0.0.1:*` (local dev)
/// - `null` (file:// contexts)
/// - Absent origin header (non-browser clients like curl, native apps)
///
/// All other origins are rejected with HTTP 403.
fn validate_origin(
    req: &tokio_tungstenite::tungstenite::handshake::server::Request,
    resp: tokio_tungstenite::tungstenite::handshake::server::Response,
) -> Result<
    tokio_tungstenite::tungstenite::handshake::server::Response,
    tokio_tungstenite::tungstenite::handshake::server::ErrorResponse,
> {
    if let Some(origin) = req.headers().get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        if origin_str == "null"
            || origin_str.starts_with("http://localhost")
            || origin_str.starts_with("http://127.0.0.1")
        {
            return Ok(resp);
        }
        tracing::warn!(origin = %origin_str, "ws: rejected connection from disallowed origin");
        let err_resp = http::Response::builder()
            .status(http::StatusCode::FORBIDDEN)
            .body(Some("Origin not allowed".into()))
            .expect("building error response");
        return Err(err_resp);
    }
    // No origin header = non-browser client (curl, native app), allow.
    Ok(resp)
}

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// Default maximum number of concurrent WebSocket connections.
const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// WebSocket push server for timeline events and source health.
///
/// Every accepted client is registered with the hub as its own listener, so
/// the hub replays recent history to it on join and fans every subsequent
/// broadcast to it. Clients send nothing meaningful; inbound text frames are
/// ignored, pings are answered.
pub struct WsServer {
    addr: SocketAddr,
    hub: Arc<ListenerHub>,
    cancel: CancellationToken,
    max_connections: usize,
    conn_seq: AtomicU64,
}

impl WsServer {
    pub fn new(addr: SocketAddr, hub: Arc<ListenerHub>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            hub,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            conn_seq: AtomicU64::new(0),
        }
    }

    /// Set the maximum number of concurrent WebSocket connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Run the WebSocket server: bind TCP, accept connections, and spawn
    /// per-client handlers until the cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, max_connections = self.max_connections, "ws server listening");
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let hub = Arc::clone(&self.hub);
                            let cancel = self.cancel.clone();
                            let seq = self.conn_seq.fetch_add(1, Ordering::Relaxed);
                            let name = format!("ws:{peer}#{seq}");
                            tokio::spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_hdr_async(stream, validate_origin).await {
                                    Ok(ws_stream) => {
                                        if let Err(e) = handle_ws_client(ws_stream, &hub, &name, cancel).await {
                                            tracing::debug!(peer = %peer, error = %e, "ws client handler finished with error");
                                        }
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

async fn handle_ws_client(
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    hub: &Arc<ListenerHub>,
    name: &str,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (listener, mut frames) = WsListener::channel();
    // Registration replays recent history into the frame queue before any
    // new broadcast reaches it.
    if !hub.add_listener(name, Arc::new(listener)) {
        return Err(format!("listener name collision: {name}").into());
    }
    tracing::debug!(listener = name, "ws client connected");

    let outcome: Result<(), Box<dyn std::error::Error + Send + Sync>> = async {
        loop {
            tokio::select! {
                // --- incoming WebSocket message ---
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) => {
                            tracing::debug!("ws client sent close frame");
                            return Ok(());
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_tx.send(Message::Pong(data)).await?;
                        }
                        // push-only endpoint; inbound payloads are ignored
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "ws read error, dropping client");
                            return Err(e.into());
                        }
                        None => {
                            tracing::debug!("ws client disconnected (stream ended)");
                            return Ok(());
                        }
                    }
                }

                // --- frame queued by this client's hub listener ---
                frame = frames.recv() => {
                    match frame {
                        Some(text) => ws_tx.send(Message::Text(text)).await?,
                        None => return Ok(()),
                    }
                }

                // --- cancellation ---
                _ = cancel.cancelled() => {
                    tracing::debug!("ws client handler: cancellation requested");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
    .await;

    hub.remove_listener(name);
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use timelane_core::{ReaderState, ReaderStatus};

    struct TestServer {
        addr: SocketAddr,
        hub: Arc<ListenerHub>,
        cancel: CancellationToken,
        _handle: tokio::task::JoinHandle<std::io::Result<()>>,
    }

    async fn start_test_server(max_connections: Option<usize>) -> TestServer {
        let hub = Arc::new(ListenerHub::new());
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = WsServer::new(addr, hub.clone(), cancel.clone());
        if let Some(max) = max_connections {
            server = server.with_max_connections(max);
        }
        let (listener, local_addr) = server.bind().await.unwrap();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        TestServer {
            addr: local_addr,
            hub,
            cancel,
            _handle: handle,
        }
    }

    impl TestServer {
        fn ws_url(&self) -> String {
            format!("ws://127.0.0.1:{}", self.addr.port())
        }

        async fn connect(
            &self,
        ) -> tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        > {
            let (ws, _) = tokio_tungstenite::connect_async(&self.ws_url()).await.unwrap();
            // give the server task a beat to register the hub listener
            tokio::time::sleep(Duration::from_millis(50)).await;
            ws
        }

        async fn connect_with_origin(
            &self,
            origin: &str,
        ) -> Result<
            tokio_tungstenite::WebSocketStream<
                tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
            >,
            tokio_tungstenite::tungstenite::Error,
        > {
            let mut req =
                tokio_tungstenite::tungstenite::client::IntoClientRequest::into_client_request(
                    &self.ws_url(),
                )
                .unwrap();
            req.headers_mut().insert("Origin", origin.parse().unwrap());
            let (ws, _) = tokio_tungstenite::connect_async(req).await?;
            Ok(ws)
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn recv_frame(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> serde_json::Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream ended")
            .expect("read error");
        let Message::Text(text) = msg else {
            panic!("expected text frame, got {:?}", msg);
        };
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn ws_server_can_be_constructed() {
        let hub = Arc::new(ListenerHub::new());
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let server = WsServer::new(addr, hub, cancel);
        assert_eq!(server.addr, addr);
        assert_eq!(server.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn ws_server_custom_max_connections() {
        let hub = Arc::new(ListenerHub::new());
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        let server = WsServer::new(addr, hub, cancel).with_max_connections(128);
        assert_eq!(server.max_connections, 128);
    }

    #[test]
    fn validate_origin_allows_localhost() {
        let req = http::Request::builder()
            .header("origin", "http://localhost:3000")
            .body(())
            .unwrap();
        let resp = http::Response::builder()
            .status(http::StatusCode::SWITCHING_PROTOCOLS)
            .body(())
            .unwrap();
        assert!(validate_origin(&req, resp).is_ok());
    }

    #[test]
    fn validate_origin_allows_null_and_absent() {
        let req = http::Request::builder()
            .header("origin", "null")
            .body(())
            .unwrap();
        let resp = http::Response::builder()
            .status(http::StatusCode::SWITCHING_PROTOCOLS)
            .body(())
            .unwrap();
        assert!(validate_origin(&req, resp).is_ok());

        let req = http::Request::builder().body(()).unwrap();
        let resp = http::Response::builder()
            .status(http::StatusCode::SWITCHING_PROTOCOLS)
            .body(())
            .unwrap();
        assert!(validate_origin(&req, resp).is_ok());
    }

    #[test]
    fn validate_origin_rejects_remote() {
        let req = http::Request::builder()
            .header("origin", "https://evil.example.com")
            .body(())
            .unwrap();
        let resp = http::Response::builder()
            .status(http::StatusCode::SWITCHING_PROTOCOLS)
            .body(())
            .unwrap();
        let result = validate_origin(&req, resp);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().status(), http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn cancel_token_stops_server() {
        let hub = Arc::new(ListenerHub::new());
        let cancel = CancellationToken::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = WsServer::new(addr, hub, cancel.clone());

        let handle = tokio::spawn(async move { server.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "server should have stopped within timeout");
        let inner = result.unwrap().unwrap();
        assert!(inner.is_ok(), "server run should return Ok on cancellation");
    }

    #[tokio::test]
    async fn connected_client_receives_timeline_frames() {
        let server = start_test_server(None).await;
        let mut ws = server.connect().await;

        server.hub.deliver("pipe", "hello over ws");

        let frame = recv_frame(&mut ws).await;
        assert_eq!(frame["event"], "timeline_event");
        assert_eq!(frame["source"], "pipe");
        assert_eq!(frame["message"], "hello over ws");
    }

    #[tokio::test]
    async fn connected_client_receives_state_frames() {
        let server = start_test_server(None).await;
        let mut ws = server.connect().await;

        let mut state = ReaderState::new();
        state.record(ReaderStatus::HadData);
        server.hub.notify_state("pipe", state);

        let frame = recv_frame(&mut ws).await;
        assert_eq!(frame["event"], "state_change");
        assert_eq!(frame["source"], "pipe");
        assert_eq!(frame["current_state"], 4);
        assert_eq!(frame["accumulated_state"], 4);
    }

    #[tokio::test]
    async fn late_joiner_gets_recent_history_replayed() {
        let server = start_test_server(None).await;
        server.hub.deliver("pipe", "older");
        server.hub.deliver("pipe", "newer");

        let mut ws = server.connect().await;
        let first = recv_frame(&mut ws).await;
        let second = recv_frame(&mut ws).await;
        assert_eq!(first["message"], "newer");
        assert_eq!(second["message"], "older");
    }

    #[tokio::test]
    async fn json_lines_are_embedded_as_values() {
        let server = start_test_server(None).await;
        let mut ws = server.connect().await;

        server.hub.deliver("pipe", r#"{"kind":"alert","id":7}"#);

        let frame = recv_frame(&mut ws).await;
        assert_eq!(frame["message"]["kind"], "alert");
        assert_eq!(frame["message"]["id"], 7);
    }

    #[tokio::test]
    async fn disconnect_deregisters_the_hub_listener() {
        let server = start_test_server(None).await;
        let ws = server.connect().await;
        assert_eq!(server.hub.listener_count(), 1);

        drop(ws);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let server = start_test_server(None).await;
        let mut ws = server.connect().await;

        ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout")
            .expect("stream ended")
            .expect("read error");
        assert_eq!(msg, Message::Pong(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn origin_remote_rejected() {
        let server = start_test_server(None).await;
        let result = server.connect_with_origin("https://evil.example.com").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connection_limit_enforced() {
        let server = start_test_server(Some(2)).await;

        let _ws1 = server.connect().await;
        let _ws2 = server.connect().await;

        // Third connection should be rejected. The server drops the TCP stream,
        // so the WS handshake will fail.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = tokio::time::timeout(Duration::from_secs(2), async {
            tokio_tungstenite::connect_async(&server.ws_url()).await
        })
        .await;

        match result {
            Ok(Ok((mut ws, _))) => {
                // Connection may have been accepted at TCP level before the
                // server dropped it. Receiving should fail or end.
                let next = ws.next().await;
                assert!(
                    next.is_none() || next.unwrap().is_err(),
                    "third connection should not be fully functional"
                );
            }
            Ok(Err(_)) => {} // handshake failed — expected
            Err(_) => {}     // timeout — server dropped connection, also fine
        }
    }
}

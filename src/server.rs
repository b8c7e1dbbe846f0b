//! WebSocket board server with per-board event routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Board channel (board_id) ── BoardRouter
//! Client B ──┘          │
//!                        ├── PresenceRegistry / cursors / selections
//!                        ├── PermissionGate (role checks per event)
//!                        └── ObjectStore (authoritative objects)
//!                        │
//!             ┌──────────┼───────────┐
//!             ▼          ▼           ▼
//!          Client A   Client B    Client C
//! ```
//!
//! Each connection runs one task: it completes the `hello` handshake,
//! then drives a [`SessionCoordinator`] from a select loop over the
//! WebSocket, the session's private outbox, and the board broadcast
//! subscription (installed after a successful `board:join`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::auth::TokenVerifier;
use crate::broadcast::Outbound;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::session::{SessionCoordinator, SharedState};
use crate::store::{SharedGate, SharedStore};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per board
    pub broadcast_capacity: usize,
    /// HMAC secret for token verification
    pub jwt_secret: String,
    /// How long a fresh connection may take to send `hello`
    pub handshake_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            jwt_secret: "development-secret".to_string(),
            handshake_timeout_secs: 10,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub total_bytes: u64,
    pub active_boards: usize,
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// The board collaboration server.
pub struct BoardServer {
    config: ServerConfig,
    shared: Arc<SharedState>,
    verifier: TokenVerifier,
    stats: Arc<RwLock<ServerStats>>,
}

impl BoardServer {
    /// Create a new server over the given permission gate and object
    /// store.
    pub fn new(config: ServerConfig, gate: SharedGate, store: SharedStore) -> Self {
        let verifier = TokenVerifier::new(&config.jwt_secret);
        let shared = Arc::new(SharedState::new(gate, store, config.broadcast_capacity));
        Self {
            config,
            shared,
            verifier,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Board server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let shared = self.shared.clone();
            let stats = self.stats.clone();
            let verifier = self.verifier.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, shared, stats, verifier, config).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        shared: Arc<SharedState>,
        stats: Arc<RwLock<ServerStats>>,
        verifier: TokenVerifier,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Handshake: the first frame must be `hello` with a valid
        // token. Anything else gets a single error frame and a close.
        let handshake = tokio::time::timeout(
            Duration::from_secs(config.handshake_timeout_secs),
            Self::await_hello(&mut ws_receiver),
        )
        .await;

        let claims = match handshake {
            Ok(Some(ClientEvent::Hello { token })) => match verifier.verify(&token) {
                Ok(claims) => claims,
                Err(e) => {
                    log::warn!("Handshake from {addr} rejected: {e}");
                    Self::send_event(
                        &mut ws_sender,
                        &ServerEvent::Error { message: "Authentication failed".into() },
                    )
                    .await?;
                    let _ = ws_sender.close().await;
                    Self::connection_closed(&stats, &shared).await;
                    return Ok(());
                }
            },
            Ok(Some(_)) | Ok(None) | Err(_) => {
                log::warn!("Connection from {addr} did not complete handshake");
                Self::send_event(
                    &mut ws_sender,
                    &ServerEvent::Error { message: "Authentication required".into() },
                )
                .await?;
                let _ = ws_sender.close().await;
                Self::connection_closed(&stats, &shared).await;
                return Ok(());
            }
        };

        let user_id = claims.sub;
        log::info!("User {} ({user_id}) authenticated from {addr}", claims.username);
        Self::send_event(&mut ws_sender, &ServerEvent::Welcome { user_id }).await?;

        // Private events from the session back to this connection.
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<ServerEvent>(64);
        let mut session = SessionCoordinator::new(shared.clone(), &claims, outbox_tx);

        // Installed after a successful board:join.
        let mut broadcast_rx: Option<tokio::sync::broadcast::Receiver<Arc<Outbound>>> = None;

        loop {
            // Biased: private events queued by the session are flushed
            // before broadcasts, so `board:state` always precedes the
            // room roster that follows a join.
            tokio::select! {
                biased;

                // Private event for this connection only
                Some(event) = outbox_rx.recv() => {
                    if Self::send_event(&mut ws_sender, &event).await.is_err() {
                        break;
                    }
                }

                // Board broadcast fan-out
                msg = async {
                    if let Some(ref mut rx) = broadcast_rx {
                        rx.recv().await
                    } else {
                        // Not joined yet — wait forever
                        std::future::pending().await
                    }
                } => {
                    match msg {
                        Ok(outbound) => {
                            if outbound.delivers_to(user_id) {
                                let send = ws_sender
                                    .send(Message::Binary(outbound.frame.clone().into()))
                                    .await;
                                if send.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("User {user_id} lagged by {n} broadcasts");
                        }
                        Err(_) => break,
                    }
                }

                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            match ClientEvent::decode(&bytes) {
                                Ok(event) => {
                                    {
                                        let mut s = stats.write().await;
                                        s.total_events += 1;
                                        s.total_bytes += bytes.len() as u64;
                                    }
                                    if let Some(rx) = session.handle(event).await {
                                        broadcast_rx = Some(rx);
                                        let boards = shared.router.board_count().await;
                                        stats.write().await.active_boards = boards;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode event from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }
            }
        }

        // Cleanup is best-effort and runs even when the socket died
        // mid-event.
        drop(broadcast_rx);
        session.disconnect().await;
        Self::connection_closed(&stats, &shared).await;
        Ok(())
    }

    /// Wait for the first decodable client event of a fresh connection.
    async fn await_hello(
        ws_receiver: &mut (impl futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin),
    ) -> Option<ClientEvent> {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    return ClientEvent::decode(&bytes).ok();
                }
                Ok(Message::Close(_)) | Err(_) => return None,
                _ => {}
            }
        }
        None
    }

    async fn send_event(
        ws_sender: &mut WsSink,
        event: &ServerEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let frame = event.encode()?;
        ws_sender.send(Message::Binary(frame.into())).await?;
        Ok(())
    }

    async fn connection_closed(stats: &Arc<RwLock<ServerStats>>, shared: &Arc<SharedState>) {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        s.active_boards = shared.router.board_count().await;
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Shared collaboration state, exposed for inspection in tests and
    /// embedding hosts.
    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryObjectStore, MemoryPermissionGate};

    fn server_with_defaults() -> BoardServer {
        BoardServer::new(
            ServerConfig::default(),
            Arc::new(MemoryPermissionGate::new()),
            Arc::new(MemoryObjectStore::new()),
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.handshake_timeout_secs, 10);
    }

    #[test]
    fn test_server_creation() {
        let server = server_with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = server_with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.active_boards, 0);
    }
}

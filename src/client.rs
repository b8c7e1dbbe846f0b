//! WebSocket board client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle with an authenticating `hello` handshake
//! - Typed send helpers for every client event
//! - A [`BoardEvent`] stream for the application

use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::object::{Fill, Point, Shape};
use crate::protocol::{ClientEvent, ProtocolError, ServerEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the board client.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Handshake completed, identity confirmed by the server
    Connected { user_id: Uuid },
    /// Connection lost
    Disconnected,
    /// An event pushed by the server
    Server(ServerEvent),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// The board client.
///
/// Manages a WebSocket connection to the board server, performs the
/// token handshake, and exposes typed send helpers. Mutations fail
/// when disconnected; cursor and selection sends are silently dropped.
pub struct BoardClient {
    /// Server URL
    server_url: String,

    /// Bearer token presented during the handshake
    token: String,

    /// Identity assigned by the server after a successful handshake
    user_id: Arc<RwLock<Option<Uuid>>>,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to send frames to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    /// Write half, shared with the writer task so `disconnect` can
    /// send a close frame
    writer: Option<Arc<Mutex<WsSink>>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<BoardEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<BoardEvent>,
}

impl BoardClient {
    /// Create a new client for the given server and token.
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            token: token.into(),
            user_id: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            writer: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<BoardEvent>> {
        self.event_rx.take()
    }

    /// Connect and authenticate.
    ///
    /// Sends `hello` and waits for `welcome` before spawning the
    /// reader/writer tasks; a server `error` during the handshake is
    /// returned as [`ProtocolError::HandshakeRejected`].
    pub async fn connect(&mut self) -> Result<Uuid, ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (mut ws_stream, _) = tokio_tungstenite::connect_async(&self.server_url)
            .await
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;

        // Handshake on the unsplit stream.
        let hello = ClientEvent::Hello { token: self.token.clone() }.encode()?;
        ws_stream
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;

        let user_id = loop {
            let msg = ws_stream
                .next()
                .await
                .ok_or(ProtocolError::ConnectionClosed)?
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            match msg {
                Message::Binary(data) => {
                    let bytes: Vec<u8> = data.into();
                    match ServerEvent::decode(&bytes)? {
                        ServerEvent::Welcome { user_id } => break user_id,
                        ServerEvent::Error { message } => {
                            *self.state.write().await = ConnectionState::Disconnected;
                            return Err(ProtocolError::HandshakeRejected(message));
                        }
                        other => {
                            log::warn!("Unexpected {} during handshake", other.name());
                        }
                    }
                }
                Message::Close(_) => {
                    *self.state.write().await = ConnectionState::Disconnected;
                    return Err(ProtocolError::ConnectionClosed);
                }
                _ => {}
            }
        };

        let (ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the WebSocket.
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        let writer = Arc::new(Mutex::new(ws_writer));
        self.writer = Some(writer.clone());
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                let mut w = writer.lock().await;
                if w.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
        });

        *self.user_id.write().await = Some(user_id);
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(BoardEvent::Connected { user_id }).await;

        // Reader task: decode server events and hand them to the app.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match ServerEvent::decode(&bytes) {
                            Ok(event) => {
                                let _ = event_tx.send(BoardEvent::Server(event)).await;
                            }
                            Err(e) => {
                                log::warn!("Failed to decode server event: {e}");
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(BoardEvent::Disconnected).await;
        });

        Ok(user_id)
    }

    /// Close the connection.
    ///
    /// Sends a close frame so the server runs its disconnect cleanup
    /// promptly instead of waiting for the socket to die.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        if let Some(writer) = self.writer.take() {
            let mut w = writer.lock().await;
            let _ = w.send(Message::Close(None)).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    // ── board operations ─────────────────────────────────────────

    /// Join a board. Board state and the room roster arrive as events.
    pub async fn join_board(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::JoinBoard { board_id }).await
    }

    /// Rename a board.
    pub async fn update_board(&self, board_id: Uuid, name: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::UpdateBoard { board_id, name: name.into() }).await
    }

    /// Create an object. The authoritative value arrives as
    /// `object:created`.
    pub async fn create_object(
        &self,
        board_id: Uuid,
        shape: Shape,
        fill: Fill,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::CreateObject { board_id, shape, fill }).await
    }

    /// Update an object.
    pub async fn update_object(
        &self,
        board_id: Uuid,
        object_id: Uuid,
        shape: Shape,
        fill: Fill,
    ) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::UpdateObject { board_id, object_id, shape, fill })
            .await
    }

    /// Delete an object.
    pub async fn delete_object(&self, board_id: Uuid, object_id: Uuid) -> Result<(), ProtocolError> {
        self.send(&ClientEvent::DeleteObject { board_id, object_id }).await
    }

    // ── presence ─────────────────────────────────────────────────

    /// Send a cursor position. Silently dropped when disconnected.
    pub async fn move_cursor(
        &self,
        board_id: Uuid,
        position: Point,
        username: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(&ClientEvent::CursorMove { board_id, position, username: username.into() })
            .await
    }

    /// Remove this client's cursor from the board.
    pub async fn leave_cursor(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(&ClientEvent::CursorLeave { board_id }).await
    }

    /// Replace this client's selection.
    pub async fn update_selection(
        &self,
        board_id: Uuid,
        object_ids: Vec<Uuid>,
    ) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(&ClientEvent::SelectionUpdate { board_id, object_ids }).await
    }

    /// Clear this client's selection.
    pub async fn clear_selection(&self, board_id: Uuid) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(&ClientEvent::SelectionClear { board_id }).await
    }

    // ── accessors ────────────────────────────────────────────────

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Identity assigned by the server, once connected.
    pub async fn user_id(&self) -> Option<Uuid> {
        *self.user_id.read().await
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let encoded = event.encode()?;
        match self.outgoing_tx {
            Some(ref tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

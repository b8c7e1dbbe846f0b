//! Binary wire protocol for the collaboration channel.
//!
//! Every WebSocket frame carries one bincode-encoded event. Clients send
//! [`ClientEvent`]s; the server answers with [`ServerEvent`]s, either
//! privately (to the originating connection) or fanned out to a board
//! room via the broadcaster.
//!
//! The first frame on any connection must be [`ClientEvent::Hello`] with
//! a signed token; nothing else is processed before authentication.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::object::{Board, BoardObject, Fill, Point, Shape};
use crate::presence::{CursorRecord, Participant};

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Authentication handshake; must be the first frame.
    Hello { token: String },
    /// Join a board's live session.
    JoinBoard { board_id: Uuid },
    /// Rename the board.
    UpdateBoard { board_id: Uuid, name: String },
    /// Place a new object. Id and timestamps are assigned by the store.
    CreateObject { board_id: Uuid, shape: Shape, fill: Fill },
    /// Replace an object's shape and fill.
    UpdateObject {
        board_id: Uuid,
        object_id: Uuid,
        shape: Shape,
        fill: Fill,
    },
    /// Remove an object.
    DeleteObject { board_id: Uuid, object_id: Uuid },
    /// High-frequency cursor position update.
    CursorMove {
        board_id: Uuid,
        position: Point,
        username: String,
    },
    /// Cursor left the canvas.
    CursorLeave { board_id: Uuid },
    /// Replace the sender's selection set.
    SelectionUpdate { board_id: Uuid, object_ids: Vec<Uuid> },
    /// Clear the sender's selection set.
    SelectionClear { board_id: Uuid },
}

impl ClientEvent {
    /// Event name for logging and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Hello { .. } => "hello",
            ClientEvent::JoinBoard { .. } => "board:join",
            ClientEvent::UpdateBoard { .. } => "board:update",
            ClientEvent::CreateObject { .. } => "object:create",
            ClientEvent::UpdateObject { .. } => "object:update",
            ClientEvent::DeleteObject { .. } => "object:delete",
            ClientEvent::CursorMove { .. } => "cursor:move",
            ClientEvent::CursorLeave { .. } => "cursor:leave",
            ClientEvent::SelectionUpdate { .. } => "selection:update",
            ClientEvent::SelectionClear { .. } => "selection:clear",
        }
    }

    /// Encode to binary (bincode).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode from binary.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(event)
    }
}

/// Events the server emits.
///
/// Object and board mutations always carry the authoritative post-write
/// value, never the client's proposed payload, so that every client —
/// including the originator — converges on the same store-confirmed
/// state. `by` is the user who performed the mutation; the client-side
/// undo stack records only self-authored entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Handshake acknowledgement.
    Welcome { user_id: Uuid },
    /// Private board snapshot on join.
    BoardState {
        board: Board,
        objects: Vec<BoardObject>,
    },
    /// Current participant list of the board.
    Room { participants: Vec<Participant> },
    CursorUpdate { cursor: CursorRecord },
    CursorLeave { user_id: Uuid },
    SelectionUpdated { user_id: Uuid, object_ids: Vec<Uuid> },
    SelectionCleared { user_id: Uuid },
    ObjectCreated { object: BoardObject, by: Uuid },
    /// `previous` is the pre-update value the store replaced; the
    /// originator's undo stack needs it to compute the inverse.
    ObjectUpdated {
        object: BoardObject,
        previous: BoardObject,
        by: Uuid,
    },
    /// Carries the full deleted object so undo can re-create it.
    ObjectDeleted { object: BoardObject, by: Uuid },
    BoardUpdated { board: Board },
    /// Private failure notice; the action was dropped, the session
    /// continues.
    Error { message: String },
}

impl ServerEvent {
    /// Event name for logging and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome { .. } => "welcome",
            ServerEvent::BoardState { .. } => "board:state",
            ServerEvent::Room { .. } => "room",
            ServerEvent::CursorUpdate { .. } => "cursor:update",
            ServerEvent::CursorLeave { .. } => "cursor:leave",
            ServerEvent::SelectionUpdated { .. } => "selection:updated",
            ServerEvent::SelectionCleared { .. } => "selection:cleared",
            ServerEvent::ObjectCreated { .. } => "object:created",
            ServerEvent::ObjectUpdated { .. } => "object:updated",
            ServerEvent::ObjectDeleted { .. } => "object:deleted",
            ServerEvent::BoardUpdated { .. } => "board:updated",
            ServerEvent::Error { .. } => "error",
        }
    }

    /// Encode to binary (bincode).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode from binary.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (event, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(event)
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rectangle() -> Shape {
        Shape::Rectangle {
            x: 10.0,
            y: 10.0,
            width: 100.0,
            height: 100.0,
        }
    }

    #[test]
    fn test_hello_roundtrip() {
        let event = ClientEvent::Hello {
            token: "abc.def.ghi".into(),
        };
        let encoded = event.encode().unwrap();
        let decoded = ClientEvent::decode(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_create_object_roundtrip() {
        let event = ClientEvent::CreateObject {
            board_id: Uuid::new_v4(),
            shape: rectangle(),
            fill: Fill::rgb(200, 30, 30),
        };
        let encoded = event.encode().unwrap();
        let decoded = ClientEvent::decode(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_cursor_move_roundtrip() {
        let event = ClientEvent::CursorMove {
            board_id: Uuid::new_v4(),
            position: Point::new(150.5, 200.25),
            username: "Alice".into(),
        };
        let encoded = event.encode().unwrap();
        assert_eq!(ClientEvent::decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_path_shape_roundtrip() {
        let event = ClientEvent::CreateObject {
            board_id: Uuid::new_v4(),
            shape: Shape::Path {
                x: 0.0,
                y: 0.0,
                points: vec![Point::new(0.0, 0.0), Point::new(4.0, 8.0), Point::new(9.0, 2.0)],
            },
            fill: Fill::default(),
        };
        let encoded = event.encode().unwrap();
        assert_eq!(ClientEvent::decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_server_event_roundtrip() {
        let object = BoardObject {
            id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            shape: rectangle(),
            fill: Fill::default(),
            created_by: Uuid::new_v4(),
            created_at: 1,
            updated_at: 2,
        };
        let event = ServerEvent::ObjectCreated {
            by: object.created_by,
            object,
        };
        let encoded = event.encode().unwrap();
        assert_eq!(ServerEvent::decode(&encoded).unwrap(), event);
    }

    #[test]
    fn test_object_updated_carries_previous() {
        let mut object = BoardObject {
            id: Uuid::new_v4(),
            board_id: Uuid::new_v4(),
            shape: rectangle(),
            fill: Fill::default(),
            created_by: Uuid::new_v4(),
            created_at: 1,
            updated_at: 2,
        };
        let previous = object.clone();
        object.shape = Shape::Ellipse {
            x: 0.0,
            y: 0.0,
            width: 40.0,
            height: 40.0,
        };

        let event = ServerEvent::ObjectUpdated {
            by: object.created_by,
            object: object.clone(),
            previous: previous.clone(),
        };
        let encoded = event.encode().unwrap();
        match ServerEvent::decode(&encoded).unwrap() {
            ServerEvent::ObjectUpdated { object: o, previous: p, .. } => {
                assert_eq!(o, object);
                assert_eq!(p, previous);
            }
            other => panic!("expected ObjectUpdated, got {}", other.name()),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ClientEvent::decode(&[0xFF, 0xFE, 0xFD]).is_err());
        assert!(ServerEvent::decode(&[0xFF]).is_err());
    }

    #[test]
    fn test_cursor_frame_compact() {
        let event = ClientEvent::CursorMove {
            board_id: Uuid::new_v4(),
            position: Point::new(100.0, 200.0),
            username: "Alice".into(),
        };
        let encoded = event.encode().unwrap();
        // 1 tag + 16 board + 16 position + short username: stays small
        // enough for high-frequency broadcast.
        assert!(encoded.len() < 64, "cursor frame too large: {} bytes", encoded.len());
    }

    #[test]
    fn test_event_names() {
        let join = ClientEvent::JoinBoard { board_id: Uuid::new_v4() };
        assert_eq!(join.name(), "board:join");
        let err = ServerEvent::Error { message: "x".into() };
        assert_eq!(err.name(), "error");
    }
}

//! Per-connection session coordination.
//!
//! One [`SessionCoordinator`] exists per authenticated connection and
//! drives its lifecycle:
//!
//! ```text
//! handshake ok ──► Authenticated (no board)
//!                        │ board:join + access granted
//!                        ▼
//!                  Joined(board)
//!                        │ disconnect
//!                        ▼
//!                  best-effort cleanup fan-out
//! ```
//!
//! Every mutation re-checks edit permission through the gate at the
//! moment it is handled — never cached from join time — because roles
//! can change mid-session and handler state is stale after any await.
//! All per-event failures are converted into a private `error` event to
//! the originating connection only; they never reach other participants
//! and never tear down the session.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

use crate::auth::Claims;
use crate::broadcast::{BoardRouter, Outbound};
use crate::object::{Fill, Point, Shape, MAX_OBJECTS_PER_BOARD};
use crate::presence::{
    CursorRecord, LiveCursorStore, Participant, PresenceRegistry, SelectionStore,
};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::store::{SharedGate, SharedStore};

/// Per-event failures. Each becomes a private `error` event to the
/// originating connection; the display string is the wire message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Already authenticated")]
    AlreadyAuthenticated,
    #[error("Already joined a board")]
    AlreadyJoined,
    #[error("Not joined to this board")]
    NotJoined,
    #[error("Access denied")]
    AccessDenied,
    #[error("Edit permission denied")]
    EditDenied,
    #[error("Failed to join board")]
    JoinFailed,
    #[error("Invalid object geometry")]
    InvalidGeometry,
    #[error("Board update failed")]
    BoardUpdateFailed,
    #[error("Object creation failed")]
    CreateFailed,
    #[error("Object update failed")]
    UpdateFailed,
    #[error("Object deletion failed")]
    DeleteFailed,
}

/// Process-wide collaboration state, injected into every session.
///
/// The presence/cursor/selection maps are explicit services scoped to
/// this server instance — single-process-per-board affinity is assumed,
/// nothing here is shared across processes.
pub struct SharedState {
    pub presence: Mutex<PresenceRegistry>,
    pub cursors: Mutex<LiveCursorStore>,
    pub selections: Mutex<SelectionStore>,
    pub gate: SharedGate,
    pub store: SharedStore,
    pub router: BoardRouter,
}

impl SharedState {
    pub fn new(gate: SharedGate, store: SharedStore, broadcast_capacity: usize) -> Self {
        Self {
            presence: Mutex::new(PresenceRegistry::new()),
            cursors: Mutex::new(LiveCursorStore::new()),
            selections: Mutex::new(SelectionStore::new()),
            gate,
            store,
            router: BoardRouter::new(broadcast_capacity),
        }
    }
}

/// Coordinates one authenticated connection.
pub struct SessionCoordinator {
    shared: Arc<SharedState>,
    user_id: Uuid,
    username: String,
    /// `Some` once the session has joined a board.
    board_id: Option<Uuid>,
    /// Private events back to this connection.
    outbox: mpsc::Sender<ServerEvent>,
}

impl SessionCoordinator {
    pub fn new(shared: Arc<SharedState>, claims: &Claims, outbox: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            shared,
            user_id: claims.sub,
            username: claims.username.clone(),
            board_id: None,
            outbox,
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn board_id(&self) -> Option<Uuid> {
        self.board_id
    }

    /// Dispatch one client event.
    ///
    /// Returns a board subscription receiver when the event was a
    /// successful `board:join`; the connection loop installs it to start
    /// receiving room broadcasts.
    pub async fn handle(
        &mut self,
        event: ClientEvent,
    ) -> Option<broadcast::Receiver<Arc<Outbound>>> {
        log::trace!("user {} event {}", self.user_id, event.name());
        match event {
            ClientEvent::Hello { .. } => {
                // Handshake already completed; a second hello is a
                // client bug, not a session state change.
                self.emit_error(SessionError::AlreadyAuthenticated).await;
                None
            }
            ClientEvent::JoinBoard { board_id } => self.join_board(board_id).await,
            ClientEvent::UpdateBoard { board_id, name } => {
                self.update_board(board_id, name).await;
                None
            }
            ClientEvent::CreateObject { board_id, shape, fill } => {
                self.create_object(board_id, shape, fill).await;
                None
            }
            ClientEvent::UpdateObject { board_id, object_id, shape, fill } => {
                self.update_object(board_id, object_id, shape, fill).await;
                None
            }
            ClientEvent::DeleteObject { board_id, object_id } => {
                self.delete_object(board_id, object_id).await;
                None
            }
            ClientEvent::CursorMove { board_id, position, username } => {
                self.cursor_move(board_id, position, username).await;
                None
            }
            ClientEvent::CursorLeave { board_id } => {
                self.cursor_leave(board_id).await;
                None
            }
            ClientEvent::SelectionUpdate { board_id, object_ids } => {
                self.selection_update(board_id, object_ids).await;
                None
            }
            ClientEvent::SelectionClear { board_id } => {
                self.selection_clear(board_id).await;
                None
            }
        }
    }

    // ── board:join ───────────────────────────────────────────────

    async fn join_board(&mut self, board_id: Uuid) -> Option<broadcast::Receiver<Arc<Outbound>>> {
        if self.board_id.is_some() {
            self.emit_error(SessionError::AlreadyJoined).await;
            return None;
        }

        if !self.shared.gate.can_access_board(self.user_id, board_id).await {
            self.emit_error(SessionError::AccessDenied).await;
            return None;
        }

        let board = match self.shared.store.board(board_id).await {
            Ok(board) => board,
            Err(e) => {
                log::warn!("user {} failed to load board {board_id}: {e}", self.user_id);
                self.emit_error(SessionError::JoinFailed).await;
                return None;
            }
        };
        let objects = match self.shared.store.objects(board_id).await {
            Ok(objects) => objects,
            Err(e) => {
                log::warn!("user {} failed to load objects of {board_id}: {e}", self.user_id);
                self.emit_error(SessionError::JoinFailed).await;
                return None;
            }
        };

        // Subscribe before the room broadcast so the joiner also
        // receives the updated participant list.
        let channel = self.shared.router.get_or_create(board_id).await;
        let receiver = channel.subscribe();

        self.emit(ServerEvent::BoardState { board, objects }).await;

        let participants = {
            let mut presence = self.shared.presence.lock().await;
            presence.join(
                board_id,
                Participant {
                    user_id: self.user_id,
                    display_name: self.username.clone(),
                },
            );
            presence.list(board_id)
        };

        // Replay existing cursors and selections privately, excluding
        // any prior entries of the joiner itself.
        let cursors = self.shared.cursors.lock().await.snapshot(board_id, self.user_id);
        for cursor in cursors {
            self.emit(ServerEvent::CursorUpdate { cursor }).await;
        }
        let selections = self.shared.selections.lock().await.snapshot(self.user_id);
        for (user_id, object_ids) in selections {
            self.emit(ServerEvent::SelectionUpdated { user_id, object_ids }).await;
        }

        self.broadcast(board_id, false, &ServerEvent::Room { participants }).await;

        self.board_id = Some(board_id);
        log::info!("user {} ({}) joined board {board_id}", self.username, self.user_id);
        Some(receiver)
    }

    // ── mutations ────────────────────────────────────────────────

    async fn update_board(&mut self, board_id: Uuid, name: String) {
        if !self.require_joined(board_id).await {
            return;
        }
        if !self.shared.gate.can_edit_board(self.user_id, board_id).await {
            self.emit_error(SessionError::EditDenied).await;
            return;
        }

        match self.shared.store.rename_board(board_id, name).await {
            Ok(board) => {
                self.broadcast(board_id, false, &ServerEvent::BoardUpdated { board }).await;
            }
            Err(e) => {
                log::warn!("board update on {board_id} failed: {e}");
                self.emit_error(SessionError::BoardUpdateFailed).await;
            }
        }
    }

    async fn create_object(&mut self, board_id: Uuid, shape: Shape, fill: Fill) {
        if !self.require_joined(board_id).await {
            return;
        }
        if !self.shared.gate.can_edit_board(self.user_id, board_id).await {
            self.emit_error(SessionError::EditDenied).await;
            return;
        }
        if let Err(e) = shape.validate() {
            log::debug!("rejected {} from user {}: {e}", shape.kind(), self.user_id);
            self.emit_error(SessionError::InvalidGeometry).await;
            return;
        }

        // Object ceiling: a create past the cap is a silent no-op, no
        // error event and no broadcast.
        match self.shared.store.object_count(board_id).await {
            Ok(count) if count >= MAX_OBJECTS_PER_BOARD => {
                log::debug!("board {board_id} at object ceiling, create dropped");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("object count on {board_id} failed: {e}");
                self.emit_error(SessionError::CreateFailed).await;
                return;
            }
        }

        match self
            .shared
            .store
            .create_object(board_id, shape, fill, self.user_id)
            .await
        {
            Ok(object) => {
                // Broadcast the store-assigned value, sender included.
                self.broadcast(
                    board_id,
                    false,
                    &ServerEvent::ObjectCreated { object, by: self.user_id },
                )
                .await;
            }
            Err(e) => {
                log::warn!("object create on {board_id} failed: {e}");
                self.emit_error(SessionError::CreateFailed).await;
            }
        }
    }

    async fn update_object(&mut self, board_id: Uuid, object_id: Uuid, shape: Shape, fill: Fill) {
        if !self.require_joined(board_id).await {
            return;
        }
        if !self.shared.gate.can_edit_board(self.user_id, board_id).await {
            self.emit_error(SessionError::EditDenied).await;
            return;
        }
        if shape.validate().is_err() {
            self.emit_error(SessionError::InvalidGeometry).await;
            return;
        }

        match self.shared.store.update_object(object_id, shape, fill).await {
            Ok((object, previous)) => {
                self.broadcast(
                    board_id,
                    false,
                    &ServerEvent::ObjectUpdated { object, previous, by: self.user_id },
                )
                .await;
            }
            Err(e) => {
                log::warn!("object update {object_id} failed: {e}");
                self.emit_error(SessionError::UpdateFailed).await;
            }
        }
    }

    async fn delete_object(&mut self, board_id: Uuid, object_id: Uuid) {
        if !self.require_joined(board_id).await {
            return;
        }
        if !self.shared.gate.can_edit_board(self.user_id, board_id).await {
            self.emit_error(SessionError::EditDenied).await;
            return;
        }

        match self.shared.store.delete_object(object_id).await {
            Ok(object) => {
                self.broadcast(
                    board_id,
                    false,
                    &ServerEvent::ObjectDeleted { object, by: self.user_id },
                )
                .await;
            }
            Err(e) => {
                log::warn!("object delete {object_id} failed: {e}");
                self.emit_error(SessionError::DeleteFailed).await;
            }
        }
    }

    // ── presence events ──────────────────────────────────────────

    async fn cursor_move(&mut self, board_id: Uuid, position: Point, username: String) {
        if !self.require_joined(board_id).await {
            return;
        }
        let cursor = CursorRecord {
            user_id: self.user_id,
            username,
            board_id,
            position,
        };
        self.shared.cursors.lock().await.set(cursor.clone());
        // Exclude the sender: it already knows where its cursor is.
        self.broadcast(board_id, true, &ServerEvent::CursorUpdate { cursor }).await;
    }

    async fn cursor_leave(&mut self, board_id: Uuid) {
        if !self.require_joined(board_id).await {
            return;
        }
        self.shared.cursors.lock().await.remove(self.user_id);
        self.broadcast(board_id, true, &ServerEvent::CursorLeave { user_id: self.user_id })
            .await;
    }

    async fn selection_update(&mut self, board_id: Uuid, object_ids: Vec<Uuid>) {
        if !self.require_joined(board_id).await {
            return;
        }
        self.shared
            .selections
            .lock()
            .await
            .set(self.user_id, object_ids.clone());
        self.broadcast(
            board_id,
            true,
            &ServerEvent::SelectionUpdated { user_id: self.user_id, object_ids },
        )
        .await;
    }

    async fn selection_clear(&mut self, board_id: Uuid) {
        if !self.require_joined(board_id).await {
            return;
        }
        self.shared.selections.lock().await.remove(self.user_id);
        self.broadcast(
            board_id,
            true,
            &ServerEvent::SelectionCleared { user_id: self.user_id },
        )
        .await;
    }

    // ── disconnect ───────────────────────────────────────────────

    /// Best-effort cleanup when the connection goes away, from any
    /// state. Each step runs regardless of earlier failures so one bad
    /// broadcast cannot leak presence or cursor entries.
    pub async fn disconnect(&mut self) {
        let Some(board_id) = self.board_id.take() else {
            return;
        };

        let participants = {
            let mut presence = self.shared.presence.lock().await;
            presence.leave(board_id, self.user_id);
            presence.list(board_id)
        };
        self.broadcast(board_id, false, &ServerEvent::Room { participants }).await;

        self.shared.cursors.lock().await.remove(self.user_id);
        self.broadcast(board_id, false, &ServerEvent::CursorLeave { user_id: self.user_id })
            .await;

        self.shared.selections.lock().await.remove(self.user_id);
        self.broadcast(
            board_id,
            false,
            &ServerEvent::SelectionCleared { user_id: self.user_id },
        )
        .await;

        self.shared.router.remove_if_idle(board_id).await;
        log::info!("user {} left board {board_id} (disconnect)", self.user_id);
    }

    // ── helpers ──────────────────────────────────────────────────

    /// Mutation and presence events require the session to have joined
    /// the board they name.
    async fn require_joined(&self, board_id: Uuid) -> bool {
        if self.board_id == Some(board_id) {
            true
        } else {
            self.emit_error(SessionError::NotJoined).await;
            false
        }
    }

    async fn emit(&self, event: ServerEvent) {
        if self.outbox.send(event).await.is_err() {
            log::debug!("outbox closed for user {}", self.user_id);
        }
    }

    async fn emit_error(&self, error: SessionError) {
        self.emit(ServerEvent::Error {
            message: error.to_string(),
        })
        .await;
    }

    async fn broadcast(&self, board_id: Uuid, exclude_origin: bool, event: &ServerEvent) {
        if let Some(channel) = self.shared.router.get(board_id).await {
            if let Err(e) = channel.send(self.user_id, exclude_origin, event) {
                log::warn!("broadcast {} to board {board_id} failed: {e}", event.name());
            }
        }
    }
}

// ===================================================================
// Tests
// ===================================================================

//! External collaborator interfaces: permissions and durable objects.
//!
//! The session core never talks to a database directly — it consumes
//! these two narrow traits. [`PermissionGate`] answers access/edit/
//! delete questions from stored role data; [`ObjectStore`] is durable
//! CRUD for boards and board objects.
//!
//! The in-memory implementations here back the tests and the default
//! server wiring; a production embedding substitutes its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::object::{Board, BoardObject, Fill, Shape};

/// Store-level failures. Converted at the session boundary into private
/// error events; never fatal to the connection.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("board {0} not found")]
    BoardNotFound(Uuid),
    #[error("object {0} not found")]
    ObjectNotFound(Uuid),
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Answers permission queries for (user, board) from stored role data.
///
/// Callers must not cache answers across await points — roles can
/// change mid-session, so every mutation re-asks.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn can_access_board(&self, user_id: Uuid, board_id: Uuid) -> bool;
    async fn can_edit_board(&self, user_id: Uuid, board_id: Uuid) -> bool;
    async fn can_delete_board(&self, user_id: Uuid, board_id: Uuid) -> bool;
}

/// Durable CRUD for boards and their objects.
///
/// Mutations return the authoritative post-write value; the store may
/// normalize what it is given (e.g. clamp degenerate dimensions), and
/// broadcasts must carry the normalized result, not the request.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn board(&self, board_id: Uuid) -> Result<Board, StoreError>;
    async fn rename_board(&self, board_id: Uuid, name: String) -> Result<Board, StoreError>;
    async fn objects(&self, board_id: Uuid) -> Result<Vec<BoardObject>, StoreError>;
    async fn object_count(&self, board_id: Uuid) -> Result<usize, StoreError>;
    async fn create_object(
        &self,
        board_id: Uuid,
        shape: Shape,
        fill: Fill,
        created_by: Uuid,
    ) -> Result<BoardObject, StoreError>;
    /// Returns `(updated, previous)`.
    async fn update_object(
        &self,
        object_id: Uuid,
        shape: Shape,
        fill: Fill,
    ) -> Result<(BoardObject, BoardObject), StoreError>;
    /// Returns the deleted object.
    async fn delete_object(&self, object_id: Uuid) -> Result<BoardObject, StoreError>;
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ───────────────────────────────────────────────────────────────────
// In-memory permission gate
// ───────────────────────────────────────────────────────────────────

/// Board role, ordered by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

/// Role-map permission gate: any role grants access, `Editor` and above
/// grant edit, only `Owner` grants delete.
#[derive(Default)]
pub struct MemoryPermissionGate {
    roles: RwLock<HashMap<(Uuid, Uuid), Role>>,
}

impl MemoryPermissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn grant(&self, user_id: Uuid, board_id: Uuid, role: Role) {
        self.roles.write().await.insert((user_id, board_id), role);
    }

    pub async fn revoke(&self, user_id: Uuid, board_id: Uuid) {
        self.roles.write().await.remove(&(user_id, board_id));
    }

    async fn role(&self, user_id: Uuid, board_id: Uuid) -> Option<Role> {
        self.roles.read().await.get(&(user_id, board_id)).copied()
    }
}

#[async_trait]
impl PermissionGate for MemoryPermissionGate {
    async fn can_access_board(&self, user_id: Uuid, board_id: Uuid) -> bool {
        self.role(user_id, board_id).await.is_some()
    }

    async fn can_edit_board(&self, user_id: Uuid, board_id: Uuid) -> bool {
        self.role(user_id, board_id).await >= Some(Role::Editor)
    }

    async fn can_delete_board(&self, user_id: Uuid, board_id: Uuid) -> bool {
        self.role(user_id, board_id).await == Some(Role::Owner)
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory object store
// ───────────────────────────────────────────────────────────────────

/// Minimal dimensions the store normalizes shapes to. A write that
/// arrives with a smaller (or negative) width/height is clamped, which
/// is exactly why broadcasts carry the post-write value.
const MIN_DIMENSION: f64 = 1.0;

struct MemoryStoreInner {
    boards: HashMap<Uuid, Board>,
    objects: HashMap<Uuid, BoardObject>,
}

/// HashMap-backed [`ObjectStore`] for tests and single-process use.
pub struct MemoryObjectStore {
    inner: RwLock<MemoryStoreInner>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                boards: HashMap::new(),
                objects: HashMap::new(),
            }),
        }
    }

    /// Seed a board (board creation is HTTP-side in the full system).
    pub async fn create_board(&self, name: impl Into<String>) -> Board {
        let board = Board {
            id: Uuid::new_v4(),
            name: name.into(),
            updated_at: now_millis(),
        };
        self.inner
            .write()
            .await
            .boards
            .insert(board.id, board.clone());
        board
    }

    fn normalize(shape: Shape) -> Shape {
        match shape {
            Shape::Rectangle { x, y, width, height } => Shape::Rectangle {
                x,
                y,
                width: width.max(MIN_DIMENSION),
                height: height.max(MIN_DIMENSION),
            },
            Shape::Ellipse { x, y, width, height } => Shape::Ellipse {
                x,
                y,
                width: width.max(MIN_DIMENSION),
                height: height.max(MIN_DIMENSION),
            },
            Shape::Note { x, y, width, height } => Shape::Note {
                x,
                y,
                width: width.max(MIN_DIMENSION),
                height: height.max(MIN_DIMENSION),
            },
            Shape::Text { x, y, width, height, value } => Shape::Text {
                x,
                y,
                width: width.max(MIN_DIMENSION),
                height: height.max(MIN_DIMENSION),
                value,
            },
            path @ Shape::Path { .. } => path,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn board(&self, board_id: Uuid) -> Result<Board, StoreError> {
        self.inner
            .read()
            .await
            .boards
            .get(&board_id)
            .cloned()
            .ok_or(StoreError::BoardNotFound(board_id))
    }

    async fn rename_board(&self, board_id: Uuid, name: String) -> Result<Board, StoreError> {
        let mut inner = self.inner.write().await;
        let board = inner
            .boards
            .get_mut(&board_id)
            .ok_or(StoreError::BoardNotFound(board_id))?;
        board.name = name;
        board.updated_at = now_millis();
        Ok(board.clone())
    }

    async fn objects(&self, board_id: Uuid) -> Result<Vec<BoardObject>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn object_count(&self, board_id: Uuid) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .objects
            .values()
            .filter(|o| o.board_id == board_id)
            .count())
    }

    async fn create_object(
        &self,
        board_id: Uuid,
        shape: Shape,
        fill: Fill,
        created_by: Uuid,
    ) -> Result<BoardObject, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.boards.contains_key(&board_id) {
            return Err(StoreError::BoardNotFound(board_id));
        }
        let now = now_millis();
        let object = BoardObject {
            id: Uuid::new_v4(),
            board_id,
            shape: Self::normalize(shape),
            fill,
            created_by,
            created_at: now,
            updated_at: now,
        };
        inner.objects.insert(object.id, object.clone());
        Ok(object)
    }

    async fn update_object(
        &self,
        object_id: Uuid,
        shape: Shape,
        fill: Fill,
    ) -> Result<(BoardObject, BoardObject), StoreError> {
        let mut inner = self.inner.write().await;
        let object = inner
            .objects
            .get_mut(&object_id)
            .ok_or(StoreError::ObjectNotFound(object_id))?;
        let previous = object.clone();
        object.shape = Self::normalize(shape);
        object.fill = fill;
        object.updated_at = now_millis();
        Ok((object.clone(), previous))
    }

    async fn delete_object(&self, object_id: Uuid) -> Result<BoardObject, StoreError> {
        self.inner
            .write()
            .await
            .objects
            .remove(&object_id)
            .ok_or(StoreError::ObjectNotFound(object_id))
    }
}

/// Convenience aliases for the dyn seams the session core holds.
pub type SharedGate = Arc<dyn PermissionGate>;
pub type SharedStore = Arc<dyn ObjectStore>;

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: f64, h: f64) -> Shape {
        Shape::Rectangle {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
        }
    }

    // ── MemoryPermissionGate ─────────────────────────────────────

    #[tokio::test]
    async fn test_gate_no_role_denies_everything() {
        let gate = MemoryPermissionGate::new();
        let (user, board) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(!gate.can_access_board(user, board).await);
        assert!(!gate.can_edit_board(user, board).await);
        assert!(!gate.can_delete_board(user, board).await);
    }

    #[tokio::test]
    async fn test_gate_role_hierarchy() {
        let gate = MemoryPermissionGate::new();
        let board = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let editor = Uuid::new_v4();
        let owner = Uuid::new_v4();
        gate.grant(viewer, board, Role::Viewer).await;
        gate.grant(editor, board, Role::Editor).await;
        gate.grant(owner, board, Role::Owner).await;

        assert!(gate.can_access_board(viewer, board).await);
        assert!(!gate.can_edit_board(viewer, board).await);

        assert!(gate.can_edit_board(editor, board).await);
        assert!(!gate.can_delete_board(editor, board).await);

        assert!(gate.can_edit_board(owner, board).await);
        assert!(gate.can_delete_board(owner, board).await);
    }

    #[tokio::test]
    async fn test_gate_revoke_mid_session() {
        let gate = MemoryPermissionGate::new();
        let (user, board) = (Uuid::new_v4(), Uuid::new_v4());
        gate.grant(user, board, Role::Editor).await;
        assert!(gate.can_edit_board(user, board).await);

        gate.revoke(user, board).await;
        assert!(!gate.can_edit_board(user, board).await);
        assert!(!gate.can_access_board(user, board).await);
    }

    // ── MemoryObjectStore ────────────────────────────────────────

    #[tokio::test]
    async fn test_store_create_assigns_id_and_timestamps() {
        let store = MemoryObjectStore::new();
        let board = store.create_board("b").await;
        let user = Uuid::new_v4();

        let object = store
            .create_object(board.id, rect(100.0, 50.0), Fill::default(), user)
            .await
            .unwrap();
        assert_eq!(object.board_id, board.id);
        assert_eq!(object.created_by, user);
        assert!(object.created_at > 0);
        assert_eq!(store.object_count(board.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_create_on_missing_board_fails() {
        let store = MemoryObjectStore::new();
        let result = store
            .create_object(Uuid::new_v4(), rect(1.0, 1.0), Fill::default(), Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(StoreError::BoardNotFound(_))));
    }

    #[tokio::test]
    async fn test_store_normalizes_degenerate_dimensions() {
        let store = MemoryObjectStore::new();
        let board = store.create_board("b").await;

        let object = store
            .create_object(board.id, rect(-5.0, 0.0), Fill::default(), Uuid::new_v4())
            .await
            .unwrap();
        match object.shape {
            Shape::Rectangle { width, height, .. } => {
                assert_eq!(width, 1.0);
                assert_eq!(height, 1.0);
            }
            other => panic!("expected rectangle, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_store_update_returns_previous() {
        let store = MemoryObjectStore::new();
        let board = store.create_board("b").await;
        let object = store
            .create_object(board.id, rect(10.0, 10.0), Fill::default(), Uuid::new_v4())
            .await
            .unwrap();

        let (updated, previous) = store
            .update_object(object.id, rect(99.0, 99.0), Fill::rgb(1, 2, 3))
            .await
            .unwrap();
        assert_eq!(previous, object);
        assert_eq!(updated.fill, Fill::rgb(1, 2, 3));
        match updated.shape {
            Shape::Rectangle { width, .. } => assert_eq!(width, 99.0),
            other => panic!("expected rectangle, got {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_store_update_missing_object_fails() {
        let store = MemoryObjectStore::new();
        let result = store
            .update_object(Uuid::new_v4(), rect(1.0, 1.0), Fill::default())
            .await;
        assert!(matches!(result, Err(StoreError::ObjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_store_delete_returns_object() {
        let store = MemoryObjectStore::new();
        let board = store.create_board("b").await;
        let object = store
            .create_object(board.id, rect(10.0, 10.0), Fill::default(), Uuid::new_v4())
            .await
            .unwrap();

        let deleted = store.delete_object(object.id).await.unwrap();
        assert_eq!(deleted, object);
        assert_eq!(store.object_count(board.id).await.unwrap(), 0);
        assert!(store.delete_object(object.id).await.is_err());
    }

    #[tokio::test]
    async fn test_store_last_write_wins() {
        let store = MemoryObjectStore::new();
        let board = store.create_board("b").await;
        let object = store
            .create_object(board.id, rect(10.0, 10.0), Fill::default(), Uuid::new_v4())
            .await
            .unwrap();

        // Two "concurrent" updates: whichever reaches the store last is
        // what subsequent reads see; no merge, no version check.
        store
            .update_object(object.id, rect(20.0, 20.0), Fill::default())
            .await
            .unwrap();
        let (second, _) = store
            .update_object(object.id, rect(30.0, 30.0), Fill::default())
            .await
            .unwrap();

        let objects = store.objects(board.id).await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0], second);
    }

    #[tokio::test]
    async fn test_store_rename_board() {
        let store = MemoryObjectStore::new();
        let board = store.create_board("before").await;
        let renamed = store.rename_board(board.id, "after".into()).await.unwrap();
        assert_eq!(renamed.name, "after");
        assert_eq!(store.board(board.id).await.unwrap().name, "after");
    }
}

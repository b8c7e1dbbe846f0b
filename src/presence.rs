//! In-memory presence, cursor, and selection tracking.
//!
//! Three keyed stores, all process-wide and mutated only from within
//! event handlers:
//!
//! - [`PresenceRegistry`] — board → connected participants, deduplicated
//!   by user id, with empty board keys dropped on the last leave.
//! - [`LiveCursorStore`] — user → last-known cursor record, overwritten
//!   on every move (last write wins, no ordering beyond arrival order).
//! - [`SelectionStore`] — user → selected object ids, overwritten on
//!   every update, cleared on disconnect.
//!
//! None of these persist anything; a newly joined client catches up via
//! the snapshot methods and relies on broadcasts from then on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::object::Point;

/// A user currently connected to a board's live session.
///
/// Distinct from a board *member*, which is a persisted role grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Last-known cursor position of one user, tagged with the board the
/// cursor is on so join-time replay can filter by board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub user_id: Uuid,
    pub username: String,
    pub board_id: Uuid,
    pub position: Point,
}

// ───────────────────────────────────────────────────────────────────
// PresenceRegistry
// ───────────────────────────────────────────────────────────────────

/// Board → participant set. Pure data structure, no side effects.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    boards: HashMap<Uuid, Vec<Participant>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent add: if the user is already present on the board the
    /// existing entry is retained and no duplicate is added.
    pub fn join(&mut self, board_id: Uuid, participant: Participant) {
        let participants = self.boards.entry(board_id).or_default();
        if !participants.iter().any(|p| p.user_id == participant.user_id) {
            participants.push(participant);
        }
    }

    /// Remove a participant. When the board's set becomes empty the
    /// board key itself is removed so stale boards never accumulate.
    pub fn leave(&mut self, board_id: Uuid, user_id: Uuid) {
        if let Some(participants) = self.boards.get_mut(&board_id) {
            participants.retain(|p| p.user_id != user_id);
            if participants.is_empty() {
                self.boards.remove(&board_id);
            }
        }
    }

    /// Current participants of a board. Safe to call with no prior join.
    pub fn list(&self, board_id: Uuid) -> Vec<Participant> {
        self.boards.get(&board_id).cloned().unwrap_or_default()
    }

    pub fn is_participant(&self, board_id: Uuid, user_id: Uuid) -> bool {
        self.boards
            .get(&board_id)
            .is_some_and(|ps| ps.iter().any(|p| p.user_id == user_id))
    }

    /// Number of boards with at least one participant.
    pub fn board_count(&self) -> usize {
        self.boards.len()
    }
}

// ───────────────────────────────────────────────────────────────────
// LiveCursorStore
// ───────────────────────────────────────────────────────────────────

/// User → last-known cursor record. Keyed by user globally; records
/// carry the board id for filtering.
#[derive(Debug, Default)]
pub struct LiveCursorStore {
    cursors: HashMap<Uuid, CursorRecord>,
}

impl LiveCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite — last write wins.
    pub fn set(&mut self, record: CursorRecord) {
        self.cursors.insert(record.user_id, record);
    }

    /// Idempotent removal.
    pub fn remove(&mut self, user_id: Uuid) -> Option<CursorRecord> {
        self.cursors.remove(&user_id)
    }

    pub fn get(&self, user_id: Uuid) -> Option<&CursorRecord> {
        self.cursors.get(&user_id)
    }

    /// All cursors on `board_id` except `exclude`'s own, for replay to
    /// a newly joined client.
    pub fn snapshot(&self, board_id: Uuid, exclude: Uuid) -> Vec<CursorRecord> {
        self.cursors
            .values()
            .filter(|c| c.board_id == board_id && c.user_id != exclude)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

// ───────────────────────────────────────────────────────────────────
// SelectionStore
// ───────────────────────────────────────────────────────────────────

/// User → set of selected object ids (order irrelevant).
#[derive(Debug, Default)]
pub struct SelectionStore {
    selections: HashMap<Uuid, Vec<Uuid>>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite — last write wins.
    pub fn set(&mut self, user_id: Uuid, object_ids: Vec<Uuid>) {
        self.selections.insert(user_id, object_ids);
    }

    /// Idempotent removal.
    pub fn remove(&mut self, user_id: Uuid) -> Option<Vec<Uuid>> {
        self.selections.remove(&user_id)
    }

    pub fn get(&self, user_id: Uuid) -> Option<&Vec<Uuid>> {
        self.selections.get(&user_id)
    }

    /// All selections except `exclude`'s own, for replay to a newly
    /// joined client.
    pub fn snapshot(&self, exclude: Uuid) -> Vec<(Uuid, Vec<Uuid>)> {
        self.selections
            .iter()
            .filter(|(uid, _)| **uid != exclude)
            .map(|(uid, ids)| (*uid, ids.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }
}

// ===================================================================
// Tests
// ===================================================================

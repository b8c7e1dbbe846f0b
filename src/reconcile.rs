//! Client-side reconciliation: optimistic mutations, authoritative
//! convergence, and a bounded undo history.
//!
//! The reconciler mirrors the board's object map. Local updates and
//! deletes apply immediately so the UI never waits on the network;
//! creates do not, because only the server assigns object ids. Every
//! broadcast is applied verbatim on arrival, so whatever the server
//! decided (including normalized geometry) replaces the optimistic
//! value and all replicas converge.
//!
//! Undo records are captured from the *authoritative* echo of this
//! user's own mutations, identified by the `by` field, never from the
//! optimistic application. An undo emits the inverse mutation as an
//! [`Intent`] and raises a one-shot flag so the echo of that inverse is
//! not itself recorded as an undoable action.

use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::object::{Board, BoardObject, Fill, Shape, MAX_OBJECTS_PER_BOARD};
use crate::protocol::ServerEvent;

/// Maximum number of undoable actions retained.
pub const UNDO_DEPTH: usize = 10;

/// An outbound mutation the application should send to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    CreateObject { shape: Shape, fill: Fill },
    UpdateObject { object_id: Uuid, shape: Shape, fill: Fill },
    DeleteObject { object_id: Uuid },
}

/// Inverse information for one confirmed local mutation.
#[derive(Debug, Clone)]
enum UndoRecord {
    /// We created it; undo deletes it.
    Created { object_id: Uuid },
    /// We changed it; undo restores the pre-update value.
    Updated { previous: BoardObject },
    /// We deleted it; undo recreates it (under a new id).
    Deleted { object: BoardObject },
}

/// Bounded LIFO of undo records. Pushing past the depth evicts the
/// oldest record.
struct UndoStack {
    records: VecDeque<UndoRecord>,
    depth: usize,
}

impl UndoStack {
    fn new(depth: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(depth),
            depth,
        }
    }

    fn push(&mut self, record: UndoRecord) {
        if self.records.len() == self.depth {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    fn pop(&mut self) -> Option<UndoRecord> {
        self.records.pop_back()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Per-board client state machine.
pub struct ClientReconciler {
    /// This client's identity, used to recognize echoes of its own
    /// mutations.
    user_id: Uuid,
    board: Option<Board>,
    objects: HashMap<Uuid, BoardObject>,
    undo: UndoStack,
    /// Raised when an undo intent has been emitted and its echo has
    /// not yet arrived. That echo must not create a new undo record.
    undo_in_flight: bool,
}

impl ClientReconciler {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            board: None,
            objects: HashMap::new(),
            undo: UndoStack::new(UNDO_DEPTH),
            undo_in_flight: false,
        }
    }

    // ── local (optimistic) mutations ─────────────────────────────

    /// Request an object creation.
    ///
    /// Not applied locally: the object id is server-assigned, so the
    /// object appears only when `object:created` echoes back. Returns
    /// `None` at the object ceiling, mirroring the server's silent
    /// drop.
    pub fn local_create(&self, shape: Shape, fill: Fill) -> Option<Intent> {
        if self.objects.len() >= MAX_OBJECTS_PER_BOARD {
            return None;
        }
        Some(Intent::CreateObject { shape, fill })
    }

    /// Change an object, applying the new value immediately.
    ///
    /// Returns `None` for an unknown object.
    pub fn local_update(&mut self, object_id: Uuid, shape: Shape, fill: Fill) -> Option<Intent> {
        let object = self.objects.get_mut(&object_id)?;
        object.shape = shape.clone();
        object.fill = fill;
        Some(Intent::UpdateObject { object_id, shape, fill })
    }

    /// Delete an object, removing it immediately.
    ///
    /// Returns `None` for an unknown object.
    pub fn local_delete(&mut self, object_id: Uuid) -> Option<Intent> {
        self.objects.remove(&object_id)?;
        Some(Intent::DeleteObject { object_id })
    }

    // ── server events ────────────────────────────────────────────

    /// Apply one server event to the local replica.
    ///
    /// Events that do not concern board content are ignored, so the
    /// whole server stream can be fed through unfiltered.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::BoardState { board, objects } => {
                self.board = Some(board.clone());
                self.objects = objects.iter().map(|o| (o.id, o.clone())).collect();
            }
            ServerEvent::BoardUpdated { board } => {
                self.board = Some(board.clone());
            }
            ServerEvent::ObjectCreated { object, by } => {
                self.objects.insert(object.id, object.clone());
                if *by == self.user_id {
                    if self.undo_in_flight {
                        self.undo_in_flight = false;
                    } else {
                        self.undo.push(UndoRecord::Created { object_id: object.id });
                    }
                }
            }
            ServerEvent::ObjectUpdated { object, previous, by } => {
                // Authoritative value wins over any optimistic apply.
                self.objects.insert(object.id, object.clone());
                if *by == self.user_id {
                    if self.undo_in_flight {
                        self.undo_in_flight = false;
                    } else {
                        self.undo.push(UndoRecord::Updated { previous: previous.clone() });
                    }
                }
            }
            ServerEvent::ObjectDeleted { object, by } => {
                self.objects.remove(&object.id);
                if *by == self.user_id {
                    if self.undo_in_flight {
                        self.undo_in_flight = false;
                    } else {
                        self.undo.push(UndoRecord::Deleted { object: object.clone() });
                    }
                }
            }
            _ => {}
        }
    }

    // ── undo ─────────────────────────────────────────────────────

    /// Undo the most recent confirmed local mutation.
    ///
    /// Returns the inverse intent to send, or `None` when there is
    /// nothing undoable: an empty history, a created object someone
    /// else already deleted, a previous value for an object that no
    /// longer exists, or a recreate that would exceed the object
    /// ceiling. A skipped record is consumed either way. The in-flight
    /// flag is raised only when an intent is actually returned.
    pub fn undo(&mut self) -> Option<Intent> {
        let intent = match self.undo.pop()? {
            UndoRecord::Created { object_id } => {
                if !self.objects.contains_key(&object_id) {
                    return None;
                }
                self.objects.remove(&object_id);
                Intent::DeleteObject { object_id }
            }
            UndoRecord::Updated { previous } => {
                if !self.objects.contains_key(&previous.id) {
                    return None;
                }
                let object_id = previous.id;
                let shape = previous.shape.clone();
                let fill = previous.fill;
                if let Some(object) = self.objects.get_mut(&object_id) {
                    object.shape = shape.clone();
                    object.fill = fill;
                }
                Intent::UpdateObject { object_id, shape, fill }
            }
            UndoRecord::Deleted { object } => {
                if self.objects.len() >= MAX_OBJECTS_PER_BOARD {
                    return None;
                }
                // The recreate is not applied locally: the server
                // assigns a fresh id, just like an ordinary create.
                Intent::CreateObject { shape: object.shape, fill: object.fill }
            }
        };
        self.undo_in_flight = true;
        Some(intent)
    }

    // ── accessors ────────────────────────────────────────────────

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn object(&self, object_id: Uuid) -> Option<&BoardObject> {
        self.objects.get(&object_id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn objects(&self) -> impl Iterator<Item = &BoardObject> {
        self.objects.values()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn can_undo(&self) -> bool {
        self.undo.len() > 0
    }
}

// ===================================================================
// Tests
// ===================================================================

//! # boardcast — Real-time collaborative whiteboard engine
//!
//! Provides WebSocket-based multiplayer boards: presence rosters, live
//! cursors and selections, and authoritative object mutation fan-out
//! with client-side optimistic reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ BoardClient  │ ◄─────────────────► │ BoardServer  │
//! │ (per user)   │    Binary events    │ (authority)  │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                            ┌───────┴────────┐
//! ┌──────────────┐                    │ Session per    │
//! │ Reconciler   │                    │ connection     │
//! │ (optimistic  │                    ├────────────────┤
//! │  + undo)     │                    │ Gate / Store / │
//! └──────────────┘                    │ Presence maps  │
//!                                     └───────┬────────┘
//!                                     ┌───────┴────────┐
//!                                     │ BoardChannel   │
//!                                     │ (fan-out)      │
//!                                     └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded events)
//! - [`object`] — Board and object data model with geometry validation
//! - [`auth`] — Token verification for the connection handshake
//! - [`store`] — Permission gate and object store contracts
//! - [`presence`] — Participant roster, live cursors, selections
//! - [`broadcast`] — Per-board fan-out with sender exclusion
//! - [`session`] — Per-connection event dispatch and cleanup
//! - [`server`] — WebSocket board server
//! - [`client`] — WebSocket board client
//! - [`reconcile`] — Optimistic mutations and bounded undo

pub mod auth;
pub mod broadcast;
pub mod client;
pub mod object;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use auth::{AuthError, Claims, TokenVerifier};
pub use broadcast::{BoardChannel, BoardRouter, ChannelStats, Outbound};
pub use client::{BoardClient, BoardEvent, ConnectionState};
pub use object::{
    Board, BoardObject, Fill, Point, Shape, ShapeError, MAX_OBJECTS_PER_BOARD,
};
pub use presence::{
    CursorRecord, LiveCursorStore, Participant, PresenceRegistry, SelectionStore,
};
pub use protocol::{ClientEvent, ProtocolError, ServerEvent};
pub use reconcile::{ClientReconciler, Intent, UNDO_DEPTH};
pub use server::{BoardServer, ServerConfig, ServerStats};
pub use session::{SessionCoordinator, SessionError, SharedState};
pub use store::{
    MemoryObjectStore, MemoryPermissionGate, ObjectStore, PermissionGate, Role,
    SharedGate, SharedStore, StoreError,
};

//! Per-board fan-out with sender exclusion.
//!
//! Every board with at least one connected session has a
//! [`BoardChannel`] backed by a tokio broadcast channel. Frames are
//! encoded once and shared as `Arc`s; each subscriber filters on the
//! origin tag so "everyone except the sender" broadcasts need no
//! per-receiver bookkeeping.
//!
//! Delivery is at-most-once to currently-subscribed connections: no
//! retry, no persistence of missed frames. A client that is lagging or
//! disconnected at broadcast time catches up from the join-time
//! snapshot, never from replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerEvent};

/// One pre-encoded frame addressed to a board room.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// The connection's user that caused this broadcast.
    pub origin: Uuid,
    /// Skip delivery back to the origin (cursor/selection self-echo
    /// suppression). Participant-list and object broadcasts set this
    /// false so the originator converges on the same confirmed state.
    pub exclude_origin: bool,
    pub frame: Vec<u8>,
}

impl Outbound {
    /// Whether a subscriber authenticated as `user_id` should deliver
    /// this frame.
    pub fn delivers_to(&self, user_id: Uuid) -> bool {
        !(self.exclude_origin && self.origin == user_id)
    }
}

/// Fan-out statistics, tracked lock-free.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub subscribers: usize,
}

/// Broadcast channel for a single board room.
pub struct BoardChannel {
    sender: broadcast::Sender<Arc<Outbound>>,
    capacity: usize,
    frames_sent: AtomicU64,
}

impl BoardChannel {
    /// `capacity` is how many frames a lagging subscriber may buffer
    /// before it starts dropping (and must resync from a fresh join).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Subscribe a connection to this board's frames.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Outbound>> {
        self.sender.subscribe()
    }

    /// Encode `event` once and fan it out. Returns how many subscribers
    /// received it (zero when the room is empty — not an error).
    pub fn send(
        &self,
        origin: Uuid,
        exclude_origin: bool,
        event: &ServerEvent,
    ) -> Result<usize, ProtocolError> {
        let frame = event.encode()?;
        let count = self
            .sender
            .send(Arc::new(Outbound {
                origin,
                exclude_origin,
                frame,
            }))
            .unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(count)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

/// Board id → broadcast channel.
///
/// Channels are created on first join and dropped once no connection
/// subscribes to them, so idle boards cost nothing.
pub struct BoardRouter {
    boards: RwLock<HashMap<Uuid, Arc<BoardChannel>>>,
    default_capacity: usize,
}

impl BoardRouter {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            default_capacity,
        }
    }

    /// Get or create the channel for a board.
    pub async fn get_or_create(&self, board_id: Uuid) -> Arc<BoardChannel> {
        // Fast path: read lock.
        {
            let boards = self.boards.read().await;
            if let Some(channel) = boards.get(&board_id) {
                return channel.clone();
            }
        }

        // Slow path: write lock, double-checked.
        let mut boards = self.boards.write().await;
        if let Some(channel) = boards.get(&board_id) {
            return channel.clone();
        }
        let channel = Arc::new(BoardChannel::new(self.default_capacity));
        boards.insert(board_id, channel.clone());
        channel
    }

    /// Existing channel for a board, if any.
    pub async fn get(&self, board_id: Uuid) -> Option<Arc<BoardChannel>> {
        self.boards.read().await.get(&board_id).cloned()
    }

    /// Drop the board's channel when nothing subscribes to it anymore.
    /// Returns true if it was removed.
    pub async fn remove_if_idle(&self, board_id: Uuid) -> bool {
        let mut boards = self.boards.write().await;
        if let Some(channel) = boards.get(&board_id) {
            if channel.subscriber_count() == 0 {
                boards.remove(&board_id);
                return true;
            }
        }
        false
    }

    pub async fn board_count(&self) -> usize {
        self.boards.read().await.len()
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn room_event() -> ServerEvent {
        ServerEvent::Room {
            participants: vec![],
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_subscribers() {
        let channel = BoardChannel::new(16);
        let mut rx1 = channel.subscribe();
        let mut rx2 = channel.subscribe();

        let origin = Uuid::new_v4();
        let count = channel.send(origin, false, &room_event()).unwrap();
        assert_eq!(count, 2);

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert_eq!(a.frame, b.frame);
        assert_eq!(a.origin, origin);
    }

    #[tokio::test]
    async fn test_send_to_empty_room_is_not_an_error() {
        let channel = BoardChannel::new(16);
        let count = channel.send(Uuid::new_v4(), false, &room_event()).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_exclude_origin_filtering() {
        let origin = Uuid::new_v4();
        let other = Uuid::new_v4();

        let excluded = Outbound {
            origin,
            exclude_origin: true,
            frame: vec![],
        };
        assert!(!excluded.delivers_to(origin));
        assert!(excluded.delivers_to(other));

        let inclusive = Outbound {
            origin,
            exclude_origin: false,
            frame: vec![],
        };
        assert!(inclusive.delivers_to(origin));
        assert!(inclusive.delivers_to(other));
    }

    #[tokio::test]
    async fn test_stats_count_frames() {
        let channel = BoardChannel::new(16);
        let _rx = channel.subscribe();
        channel.send(Uuid::new_v4(), false, &room_event()).unwrap();
        channel.send(Uuid::new_v4(), false, &room_event()).unwrap();

        let stats = channel.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.subscribers, 1);
    }

    #[tokio::test]
    async fn test_router_get_or_create_returns_same_channel() {
        let router = BoardRouter::new(16);
        let board = Uuid::new_v4();

        let a = router.get_or_create(board).await;
        let b = router.get_or_create(board).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(router.board_count().await, 1);
    }

    #[tokio::test]
    async fn test_router_isolates_boards() {
        let router = BoardRouter::new(16);
        let board_a = Uuid::new_v4();
        let board_b = Uuid::new_v4();

        let chan_a = router.get_or_create(board_a).await;
        let chan_b = router.get_or_create(board_b).await;
        let mut rx_b = chan_b.subscribe();

        chan_a.send(Uuid::new_v4(), false, &room_event()).unwrap();
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_router_removes_idle_boards() {
        let router = BoardRouter::new(16);
        let board = Uuid::new_v4();

        let channel = router.get_or_create(board).await;
        let rx = channel.subscribe();

        assert!(!router.remove_if_idle(board).await);
        drop(rx);
        assert!(router.remove_if_idle(board).await);
        assert_eq!(router.board_count().await, 0);
    }
}

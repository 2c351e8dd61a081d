//! In-process room registry backing the `/ws` endpoint.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Event pushed to a connected session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: JsonValue,
}

/// Room-addressed delivery to live client sessions.
pub trait RealtimeTransport: Send + Sync {
    fn join_room(&self, session: SessionId, room: &str);

    fn leave_room(&self, session: SessionId, room: &str);

    /// Returns how many sessions the event was handed to. Zero is not an error.
    fn emit_to_room(&self, room: &str, event: &str, payload: &JsonValue) -> usize;
}

pub const DEFAULT_SESSION_QUEUE: usize = 64;

#[derive(Default)]
struct HubState {
    sessions: HashMap<SessionId, mpsc::Sender<ServerEvent>>,
    rooms: HashMap<String, HashSet<SessionId>>,
}

/// Room registry with a bounded outbound queue per session. Events for a
/// session whose queue is full are dropped rather than buffered.
pub struct RoomHub {
    state: RwLock<HubState>,
    session_queue: usize,
    dropped: AtomicU64,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SESSION_QUEUE)
    }
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(session_queue: usize) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            session_queue: session_queue.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn connect(&self) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.session_queue);

        self.state.write().sessions.insert(id, tx);

        debug!(session = %id, "Realtime session connected");

        (id, rx)
    }

    /// Drops the session and removes it from every room it joined.
    pub fn disconnect(&self, session: SessionId) {
        let mut state = self.state.write();

        state.sessions.remove(&session);
        state.rooms.retain(|_, members| {
            members.remove(&session);
            !members.is_empty()
        });

        debug!(session = %session, "Realtime session disconnected");
    }

    pub fn session_count(&self) -> usize {
        self.state.read().sessions.len()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.state.read().rooms.get(room).map_or(0, HashSet::len)
    }

    /// Events dropped because a session's queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RealtimeTransport for RoomHub {
    fn join_room(&self, session: SessionId, room: &str) {
        let mut state = self.state.write();

        if !state.sessions.contains_key(&session) {
            return;
        }

        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(session);

        debug!(session = %session, room, "Session joined room");
    }

    fn leave_room(&self, session: SessionId, room: &str) {
        let mut state = self.state.write();

        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&session);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }

        debug!(session = %session, room, "Session left room");
    }

    fn emit_to_room(&self, room: &str, event: &str, payload: &JsonValue) -> usize {
        let state = self.state.read();

        let Some(members) = state.rooms.get(room) else {
            return 0;
        };

        let mut delivered = 0;

        for (id, tx) in members
            .iter()
            .filter_map(|id| state.sessions.get(id).map(|tx| (id, tx)))
        {
            let message = ServerEvent {
                event: event.to_string(),
                data: payload.clone(),
            };

            match tx.try_send(message) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(session = %id, room, event, "Session queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(session = %id, room, "Session already closed");
                }
            }
        }

        delivered
    }
}

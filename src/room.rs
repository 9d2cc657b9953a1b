// Room-server seam: the contract between the core and the real-time
// transport layer.
//
// The transport itself is an external collaborator; the core only needs to
// open a match room, push frames to players, and tear the room down. The
// in-process implementation backs both the WebSocket edge and the tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Outbound side of a match room.
#[async_trait]
pub trait RoomHandle: Send + Sync {
    fn room_id(&self) -> &str;
    /// Deliver a frame to one player. Best effort: a missing connection is
    /// not an error.
    async fn send_to(&self, player_id: &str, frame: &serde_json::Value);
    async fn broadcast(&self, frame: &serde_json::Value);
    async fn disconnect(&self);
}

/// Opens match rooms.
#[async_trait]
pub trait RoomServer: Send + Sync {
    async fn open_match_room(
        &self,
        match_id: &str,
        problem_id: &str,
        player_ids: &[String],
    ) -> Result<Arc<dyn RoomHandle>>;

    async fn room(&self, room_id: &str) -> Option<Arc<dyn RoomHandle>>;
}

// ── In-process implementation ─────────────────────────────────────────

pub struct LocalRoom {
    room_id: String,
    pub match_id: String,
    sent: Mutex<Vec<(Option<String>, serde_json::Value)>>,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<serde_json::Value>>>,
    closed: AtomicBool,
}

impl LocalRoom {
    fn new(room_id: String, match_id: String) -> Self {
        LocalRoom {
            room_id,
            match_id,
            sent: Mutex::new(Vec::new()),
            subscribers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Attach a live connection for a player; frames sent to the player or
    /// broadcast are forwarded to the channel.
    pub fn subscribe(&self, player_id: &str) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .insert(player_id.to_string(), tx);
        rx
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Frames delivered directly to a player (test inspection).
    pub fn frames_to(&self, player_id: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| target.as_deref() == Some(player_id))
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Broadcast frames (test inspection).
    pub fn broadcasts(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| target.is_none())
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Everything a player would have seen: direct frames plus broadcasts,
    /// in send order.
    pub fn frames_seen_by(&self, player_id: &str) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(target, _)| {
                target.is_none() || target.as_deref() == Some(player_id)
            })
            .map(|(_, frame)| frame.clone())
            .collect()
    }
}

#[async_trait]
impl RoomHandle for LocalRoom {
    fn room_id(&self) -> &str {
        &self.room_id
    }

    async fn send_to(&self, player_id: &str, frame: &serde_json::Value) {
        self.sent
            .lock()
            .unwrap()
            .push((Some(player_id.to_string()), frame.clone()));
        if let Some(tx) = self.subscribers.lock().unwrap().get(player_id) {
            let _ = tx.send(frame.clone());
        }
        crate::metrics::WEBSOCKET_MESSAGES_SENT_TOTAL.inc();
    }

    async fn broadcast(&self, frame: &serde_json::Value) {
        self.sent.lock().unwrap().push((None, frame.clone()));
        for tx in self.subscribers.lock().unwrap().values() {
            let _ = tx.send(frame.clone());
        }
        crate::metrics::WEBSOCKET_MESSAGES_SENT_TOTAL.inc();
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.subscribers.lock().unwrap().clear();
    }
}

#[derive(Default)]
pub struct LocalRooms {
    rooms: Mutex<HashMap<String, Arc<LocalRoom>>>,
}

impl LocalRooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_room(&self, room_id: &str) -> Option<Arc<LocalRoom>> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    pub fn room_for_match(&self, match_id: &str) -> Option<Arc<LocalRoom>> {
        self.rooms
            .lock()
            .unwrap()
            .values()
            .find(|r| r.match_id == match_id)
            .cloned()
    }
}

#[async_trait]
impl RoomServer for LocalRooms {
    async fn open_match_room(
        &self,
        match_id: &str,
        _problem_id: &str,
        _player_ids: &[String],
    ) -> Result<Arc<dyn RoomHandle>> {
        let room_id = uuid::Uuid::new_v4().to_string();
        let room = Arc::new(LocalRoom::new(room_id.clone(), match_id.to_string()));
        self.rooms.lock().unwrap().insert(room_id, room.clone());
        Ok(room)
    }

    async fn room(&self, room_id: &str) -> Option<Arc<dyn RoomHandle>> {
        self.rooms
            .lock()
            .unwrap()
            .get(room_id)
            .cloned()
            .map(|r| r as Arc<dyn RoomHandle>)
    }
}

// ── Queue-side delivery ───────────────────────────────────────────────

/// Delivery surface for queue notifications. `deliver` returns whether the
/// frame was accepted by a live connection; the controller only detaches a
/// player from the queue room after acceptance.
#[async_trait]
pub trait QueueNotifier: Send + Sync {
    async fn deliver(&self, player_id: &str, frame: &serde_json::Value) -> bool;
    async fn detach(&self, player_id: &str);
}

#[derive(Default)]
pub struct LocalQueueNotifier {
    connections: Mutex<HashMap<String, mpsc::UnboundedSender<serde_json::Value>>>,
    delivered: Mutex<Vec<(String, serde_json::Value)>>,
    detached: Mutex<Vec<String>>,
}

impl LocalQueueNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, player_id: &str) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .unwrap()
            .insert(player_id.to_string(), tx);
        rx
    }

    pub fn delivered_to(&self, player_id: &str) -> Vec<serde_json::Value> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == player_id)
            .map(|(_, f)| f.clone())
            .collect()
    }

    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueNotifier for LocalQueueNotifier {
    async fn deliver(&self, player_id: &str, frame: &serde_json::Value) -> bool {
        self.delivered
            .lock()
            .unwrap()
            .push((player_id.to_string(), frame.clone()));
        match self.connections.lock().unwrap().get(player_id) {
            Some(tx) => tx.send(frame.clone()).is_ok(),
            // No live connection registered; in tests that still counts as
            // accepted so pairing can proceed.
            None => true,
        }
    }

    async fn detach(&self, player_id: &str) {
        self.detached.lock().unwrap().push(player_id.to_string());
        self.connections.lock().unwrap().remove(player_id);
    }
}

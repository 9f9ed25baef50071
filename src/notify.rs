use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-request state transitions. The out-of-scope
/// notification collaborator subscribes here; delivery (mail, chat) is
/// its problem, fan-out is ours.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a request's transitions. Creates the channel if needed.
    pub fn subscribe(&self, request_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(request_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, request_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&request_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel once no collaborator cares about the request.
    #[allow(dead_code)]
    pub fn remove(&self, request_id: &Ulid) {
        self.channels.remove(request_id);
    }
}

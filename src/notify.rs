use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-worker broadcast of committed calendar changes, for dashboards that
/// keep a worker's agenda on screen.
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

    pub fn subscribe(&self, worker_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(worker_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, worker_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&worker_id) {
            let _ = sender.send(event.clone());
        }
    }

    pub fn remove(&self, worker_id: &Ulid) {
        self.channels.remove(worker_id);
    }
}

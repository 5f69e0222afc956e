use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

#[allow(dead_code)]
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed-event feeds, one channel per restaurant.
/// Floor displays and waitlist tooling subscribe here instead of polling.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a restaurant. Creates the channel if needed.
    #[allow(dead_code)]
    pub fn subscribe(&self, restaurant_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(restaurant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, restaurant_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&restaurant_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when the restaurant is deleted).
    pub fn remove(&self, restaurant_id: &Ulid) {
        self.channels.remove(restaurant_id);
    }
}

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Fan-out of committed events, per spot and for all spots.
///
/// Receivers that fall behind see `RecvError::Lagged` and skip ahead; the
/// engine never blocks on slow listeners.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<(Ulid, Event)>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Events for one spot. Creates the channel on first use.
    pub fn subscribe(&self, spot_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(spot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every committed event, tagged with its spot.
    pub fn subscribe_all(&self) -> broadcast::Receiver<(Ulid, Event)> {
        self.all.subscribe()
    }

    pub fn send(&self, spot_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&spot_id) {
            let _ = sender.send(event.clone());
        }
        if self.all.receiver_count() > 0 {
            let _ = self.all.send((spot_id, event.clone()));
        }
    }

    /// Drop a spot's channel; its receivers see `Closed`.
    pub fn remove(&self, spot_id: &Ulid) {
        self.channels.remove(spot_id);
    }
}

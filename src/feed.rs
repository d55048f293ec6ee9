//! In-process change feed. Every committed write publishes an [`Event`];
//! live views subscribe here instead of polling the database.

use tokio::sync::broadcast;

use crate::{chat::Message, connections::Connection, profiles::Profile};

#[derive(Debug, Clone)]
pub enum Event {
    Profile(Profile),
    Connection(Connection),
    Message(Message),
}

#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<Event>,
}

impl Hub {
    pub fn new(capacity: usize) -> Hub {
        Hub {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Having no subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! In-process event bus backed by a tokio broadcast channel
//!
//! Publishing never waits on subscribers; a subscriber that falls more than
//! `capacity` events behind loses the oldest ones.

use std::sync::Arc;

use storage_contracts::EventPublisher;
use storage_types::Event;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("event bus closed")]
    Closed,

    #[error("receiver lagged by {0} events")]
    Lagged(u64),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: Event) {
        debug!("Publishing event: {}", event.name);
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

//! Chain-event fan-out.
//!
//! A closed set of event variants delivered over one channel per
//! subscriber. Events carry the new tip's identity only; observers re-query
//! the chain for anything more. Each externally observable transition is
//! published at most once.

use std::sync::mpsc::{channel, Receiver, Sender};

use log::trace;
use parking_lot::Mutex;

use crate::types::{hex_id, Hash};

/// Everything the engine announces to the outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// The best header chain has a new tip.
    BestHeaderChanged { hash: Hash, height: u64 },
    /// The best content chain advanced or was truncated.
    BestContentChanged { hash: Hash, height: u64 },
}

/// Fan-out point: one unbounded channel per subscriber. Disconnected
/// subscribers are dropped on the next publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ChainEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; events published after this call are
    /// delivered to the returned receiver.
    pub fn subscribe(&self) -> Receiver<ChainEvent> {
        let (sender, receiver) = channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: ChainEvent) {
        match &event {
            ChainEvent::BestHeaderChanged { hash, height } => {
                trace!("publish best header {} at {}", hex_id(hash), height)
            }
            ChainEvent::BestContentChanged { hash, height } => {
                trace!("publish best content {} at {}", hex_id(hash), height)
            }
        }
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

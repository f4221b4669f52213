//! Session fan-out
//!
//! Client sessions subscribe to a controller and receive its events over
//! unbounded channels. Delivery is in subscription-insertion order per
//! event; a session whose receiver has been dropped is reclaimed during
//! the next broadcast sweep, so the controller never keeps a dead session
//! alive.
//!
//! Each delivery carries its wire name. `controller:settings` and
//! `controller:state` are delivered twice, once under the canonical name
//! and once under the historical `Smoothie:` alias, so older clients keep
//! working.

use smoothiekit_core::{SessionEvent, SessionMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

struct SessionSlot {
    id: Uuid,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

/// Ordered registry of subscribed sessions
#[derive(Default)]
pub struct SessionRegistry {
    slots: Vec<SessionSlot>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a new session, returning its id and message receiver
    pub fn subscribe(&mut self) -> (Uuid, mpsc::UnboundedReceiver<SessionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.slots.push(SessionSlot { id, tx });
        tracing::debug!("Session {} subscribed", id);
        (id, rx)
    }

    /// Remove a session by id
    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        before != self.slots.len()
    }

    /// Deliver an event to every live session, in subscription order
    ///
    /// Events with a legacy alias go out a second time under that name.
    pub fn broadcast(&mut self, event: &SessionEvent) {
        self.deliver(event.name(), event);
        if let Some(legacy) = event.legacy_name() {
            self.deliver(legacy, event);
        }
    }

    fn deliver(&mut self, name: &'static str, event: &SessionEvent) {
        self.slots.retain(|slot| {
            let message = SessionMessage {
                name,
                event: event.clone(),
            };
            if slot.tx.send(message).is_err() {
                tracing::debug!("Session {} disconnected, reclaiming slot", slot.id);
                false
            } else {
                true
            }
        });
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no sessions are subscribed
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

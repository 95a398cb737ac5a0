//! Runtime events.
//!
//! The runtime queues what the host may want to react to on a small typed
//! bus; the host drains one event type at a time after `update`.
//! - Both roles: peer connected / disconnected.
//! - Replica: entity spawned / ceased / handed over by the server.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::{
    identity::Identity,
    packets::{Cease, Handover, Spawn},
};

/// A peer finished connecting. On a client the peer is the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConnected {
    pub peer: Identity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDisconnected {
    pub peer: Identity,
}

/// The server announced an entity. The runtime has already created it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spawned(pub Spawn);

/// The server withdrew an entity. The runtime has already destroyed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceased(pub Cease);

/// Authority over an entity moved. Already applied to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandedOver(pub Handover);

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        // Keyed by the type id, so the downcast cannot miss.
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_per_type() {
        let mut bus = EventBus::new();
        bus.push(PeerConnected { peer: Identity(1) });
        bus.push(PeerDisconnected { peer: Identity(2) });
        bus.push(PeerConnected { peer: Identity(3) });

        assert_eq!(
            bus.drain::<PeerConnected>(),
            vec![
                PeerConnected { peer: Identity(1) },
                PeerConnected { peer: Identity(3) }
            ]
        );
        assert!(bus.drain::<PeerConnected>().is_empty());
        assert_eq!(bus.drain::<PeerDisconnected>().len(), 1);
    }
}

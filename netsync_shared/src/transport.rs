//! Transport boundary.
//!
//! The core only needs to hand a payload to a peer on a channel and to drain
//! connection events and received payloads once per tick. How a channel
//! achieves its guarantees is the transport's business.
//!
//! [`MemoryHub`] is an in-process implementation for tests and local play.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::Bytes;
use tracing::trace;

use crate::identity::Identity;

/// Logical delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Unreliable; newest wins. Signature pushes.
    Direct = 0,
    /// Reliable, unordered. Calls, deltas, lookups.
    Irregular = 1,
    /// Reliable, ordered. Snapshots, spawn and cease.
    Ordered = 2,
}

impl Channel {
    pub fn from_u8(v: u8) -> Option<Channel> {
        match v {
            0 => Some(Channel::Direct),
            1 => Some(Channel::Irregular),
            2 => Some(Channel::Ordered),
            _ => None,
        }
    }
}

/// Something the transport observed since the last poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer connected. On a client, `assigned` carries the identity the
    /// server gave this process.
    PeerJoined {
        peer: Identity,
        assigned: Option<Identity>,
    },
    PeerLeft {
        peer: Identity,
    },
    /// A payload, stamped with the sender's clock in milliseconds.
    Received {
        peer: Identity,
        channel: Channel,
        timestamp: u32,
        payload: Bytes,
    },
}

/// What the core needs from a transport.
pub trait Transport {
    /// Fire and forget.
    fn send(&mut self, to: Identity, channel: Channel, payload: Bytes);

    /// Drains pending events in arrival order.
    fn poll(&mut self) -> Vec<TransportEvent>;
}

/// A payload that went through a [`MemoryHub`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub from: Identity,
    pub to: Identity,
    pub channel: Channel,
    pub payload: Bytes,
}

#[derive(Default)]
struct HubState {
    clock: u32,
    inboxes: HashMap<Identity, VecDeque<TransportEvent>>,
    links: HashSet<(Identity, Identity)>,
    log: Vec<Sent>,
}

/// In-process switchboard connecting [`MemoryTransport`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        // A poisoned hub only happens after a panicking test; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates the endpoint answering to `local`.
    pub fn endpoint(&self, local: Identity) -> MemoryTransport {
        self.state().inboxes.entry(local).or_default();
        MemoryTransport {
            local,
            hub: self.clone(),
        }
    }

    /// Links a server and a client, announcing each to the other.
    pub fn connect(&self, server: Identity, client: Identity) {
        let mut s = self.state();
        s.links.insert((server, client));
        s.links.insert((client, server));
        s.inboxes
            .entry(server)
            .or_default()
            .push_back(TransportEvent::PeerJoined {
                peer: client,
                assigned: None,
            });
        s.inboxes
            .entry(client)
            .or_default()
            .push_back(TransportEvent::PeerJoined {
                peer: server,
                assigned: Some(client),
            });
    }

    /// Unlinks two peers; queued but unpolled payloads between them stay put.
    pub fn disconnect(&self, a: Identity, b: Identity) {
        let mut s = self.state();
        s.links.remove(&(a, b));
        s.links.remove(&(b, a));
        s.inboxes
            .entry(a)
            .or_default()
            .push_back(TransportEvent::PeerLeft { peer: b });
        s.inboxes
            .entry(b)
            .or_default()
            .push_back(TransportEvent::PeerLeft { peer: a });
    }

    /// Timestamp stamped onto subsequent sends.
    pub fn set_time(&self, timestamp: u32) {
        self.state().clock = timestamp;
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<Sent> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    /// Removes and returns whatever is queued for `to`.
    pub fn take_inbox(&self, to: Identity) -> Vec<TransportEvent> {
        self.state()
            .inboxes
            .get_mut(&to)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Appends events to the inbox of `to`, e.g. after reordering.
    pub fn deliver(&self, to: Identity, events: impl IntoIterator<Item = TransportEvent>) {
        self.state().inboxes.entry(to).or_default().extend(events);
    }
}

/// One endpoint of a [`MemoryHub`].
pub struct MemoryTransport {
    local: Identity,
    hub: MemoryHub,
}

impl MemoryTransport {
    pub fn local(&self) -> Identity {
        self.local
    }

    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, to: Identity, channel: Channel, payload: Bytes) {
        let mut s = self.hub.state();
        if !s.links.contains(&(self.local, to)) {
            trace!(from = %self.local, %to, "not linked, dropping");
            return;
        }
        let timestamp = s.clock;
        s.log.push(Sent {
            from: self.local,
            to,
            channel,
            payload: payload.clone(),
        });
        s.inboxes
            .entry(to)
            .or_default()
            .push_back(TransportEvent::Received {
                peer: self.local,
                channel,
                timestamp,
                payload,
            });
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.hub.take_inbox(self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_announces_both_sides() {
        let hub = MemoryHub::new();
        let mut server = hub.endpoint(Identity::SERVER);
        let mut client = hub.endpoint(Identity(1));
        hub.connect(Identity::SERVER, Identity(1));

        assert_eq!(
            server.poll(),
            vec![TransportEvent::PeerJoined {
                peer: Identity(1),
                assigned: None
            }]
        );
        assert_eq!(
            client.poll(),
            vec![TransportEvent::PeerJoined {
                peer: Identity::SERVER,
                assigned: Some(Identity(1))
            }]
        );
    }

    #[test]
    fn unlinked_sends_are_dropped() {
        let hub = MemoryHub::new();
        let mut a = hub.endpoint(Identity(1));
        let mut b = hub.endpoint(Identity(2));
        a.send(Identity(2), Channel::Direct, Bytes::from_static(b"x"));
        assert!(b.poll().is_empty());
        assert!(hub.sent().is_empty());
    }

    #[test]
    fn sends_carry_hub_time() {
        let hub = MemoryHub::new();
        let mut server = hub.endpoint(Identity::SERVER);
        let mut client = hub.endpoint(Identity(1));
        hub.connect(Identity::SERVER, Identity(1));
        client.poll();

        hub.set_time(250);
        server.send(Identity(1), Channel::Ordered, Bytes::from_static(b"hi"));
        assert_eq!(
            client.poll(),
            vec![TransportEvent::Received {
                peer: Identity::SERVER,
                channel: Channel::Ordered,
                timestamp: 250,
                payload: Bytes::from_static(b"hi"),
            }]
        );
        assert_eq!(hub.sent()[0].channel, Channel::Ordered);
    }
}

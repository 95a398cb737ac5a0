//! Relevance: which peers should hear about something at a position.
//!
//! Spatial partitioning is out of scope; [`ObserverTable`] is a flat
//! reference implementation good enough for tests and small sessions.

use std::collections::HashMap;

use crate::{
    identity::Identity,
    math::{Aabb, Vec3},
};

/// How widely an update or call is relevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// Every connected peer.
    #[default]
    Everyone,
    /// Peers with an observer whose radius covers the position.
    Observers,
    /// Peers with an observer in a sector that also holds the position.
    Sectors,
    /// `Observers` or `Sectors`.
    General,
}

pub trait Relevance {
    fn is_relevant(&self, peer: Identity, position: Vec3, scope: Scope) -> bool;

    /// Calls `callback` for every peer in `peers` that passes `filter` and is
    /// relevant, in the order given.
    fn for_each_relevant_peer(
        &self,
        peers: &[Identity],
        position: Vec3,
        scope: Scope,
        filter: &dyn Fn(Identity) -> bool,
        callback: &mut dyn FnMut(Identity),
    ) {
        for &peer in peers {
            if filter(peer) && self.is_relevant(peer, position, scope) {
                callback(peer);
            }
        }
    }

    fn relevant_peers(
        &self,
        peers: &[Identity],
        position: Vec3,
        scope: Scope,
        filter: &dyn Fn(Identity) -> bool,
    ) -> Vec<Identity> {
        let mut out = Vec::new();
        self.for_each_relevant_peer(peers, position, scope, filter, &mut |p| out.push(p));
        out
    }
}

/// Everything is relevant to everyone. What a client uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Everyone;

impl Relevance for Everyone {
    fn is_relevant(&self, _peer: Identity, _position: Vec3, _scope: Scope) -> bool {
        true
    }
}

/// A point of view owned by a peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub position: Vec3,
    pub radius: f32,
}

impl Observer {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self { position, radius }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        self.position.distance_sq(point) <= self.radius * self.radius
    }
}

/// Observers per peer plus a list of sectors.
#[derive(Debug, Clone, Default)]
pub struct ObserverTable {
    observers: HashMap<Identity, Vec<Observer>>,
    sectors: Vec<Aabb>,
}

impl ObserverTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, peer: Identity, observer: Observer) {
        self.observers.entry(peer).or_default().push(observer);
    }

    pub fn set_observers(&mut self, peer: Identity, observers: Vec<Observer>) {
        self.observers.insert(peer, observers);
    }

    pub fn remove_peer(&mut self, peer: Identity) {
        self.observers.remove(&peer);
    }

    pub fn add_sector(&mut self, sector: Aabb) {
        self.sectors.push(sector);
    }

    fn observed(&self, peer: Identity, point: Vec3) -> bool {
        self.observers
            .get(&peer)
            .is_some_and(|obs| obs.iter().any(|o| o.contains(point)))
    }

    fn shares_sector(&self, peer: Identity, point: Vec3) -> bool {
        let Some(obs) = self.observers.get(&peer) else {
            return false;
        };
        self.sectors.iter().any(|sector| {
            sector.contains(point) && obs.iter().any(|o| sector.contains(o.position))
        })
    }
}

impl Relevance for ObserverTable {
    fn is_relevant(&self, peer: Identity, position: Vec3, scope: Scope) -> bool {
        match scope {
            Scope::Everyone => true,
            Scope::Observers => self.observed(peer, position),
            Scope::Sectors => self.shares_sector(peer, position),
            Scope::General => {
                self.observed(peer, position) || self.shares_sector(peer, position)
            }
        }
    }
}

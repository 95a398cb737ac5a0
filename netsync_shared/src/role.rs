//! Process roles.
//!
//! A process is either the authoritative server or a replica client; the role
//! is chosen once when the runtime is built and answers every question where
//! the two behave differently:
//! - which identity this process has, and whether it records change logs
//! - which signatures it may push and to whom
//! - which inbound pushes it accepts
//! - where outgoing calls go and what happens to incoming ones

use tracing::info;

use crate::{
    identity::Identity,
    math::Vec3,
    procedure::CallRule,
    relevance::{Relevance, Scope},
    signature::SyncRule,
};

/// Connected peers and the relevance provider, borrowed for one decision.
pub struct Routing<'a> {
    pub peers: &'a [Identity],
    pub relevance: &'a dyn Relevance,
}

impl Routing<'_> {
    fn relevant(
        &self,
        position: Vec3,
        scope: Scope,
        filter: &dyn Fn(Identity) -> bool,
    ) -> Vec<Identity> {
        self.relevance
            .relevant_peers(self.peers, position, scope, filter)
    }

    fn is_connected(&self, peer: Identity) -> bool {
        self.peers.contains(&peer)
    }
}

/// What to do with an inbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallRoute {
    /// Peers the call is forwarded to unchanged.
    pub relay: Vec<Identity>,
    /// Whether the handler runs here.
    pub execute: bool,
}

impl CallRoute {
    pub fn dropped() -> Self {
        Self::default()
    }

    pub fn is_dropped(&self) -> bool {
        self.relay.is_empty() && !self.execute
    }
}

pub trait Role {
    /// `None` on a client that has not been welcomed yet.
    fn local(&self) -> Option<Identity>;

    /// Whether this process owns the truth and records change logs.
    fn is_authoritative(&self) -> bool;

    fn on_joined(&mut self, peer: Identity, assigned: Option<Identity>);

    fn on_left(&mut self, peer: Identity);

    /// Whether a signature of an entity owned by `authority` is pushed from here.
    fn may_push(&self, authority: Identity, rule: SyncRule) -> bool;

    fn sync_targets(
        &self,
        routing: &Routing<'_>,
        authority: Identity,
        rule: SyncRule,
        position: Vec3,
        scope: Scope,
    ) -> Vec<Identity>;

    fn accepts_sync(&self, sender: Identity, authority: Identity, rule: SyncRule) -> bool;

    /// Whether a call with `rule` may start here.
    fn may_originate(&self, rule: CallRule) -> bool;

    fn call_targets(
        &self,
        routing: &Routing<'_>,
        target: Identity,
        position: Vec3,
        scope: Scope,
    ) -> Vec<Identity>;

    fn on_call(
        &self,
        routing: &Routing<'_>,
        sender: Identity,
        target: Identity,
        rule: CallRule,
        position: Vec3,
        scope: Scope,
    ) -> CallRoute;
}

/// The server.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authoritative;

impl Role for Authoritative {
    fn local(&self) -> Option<Identity> {
        Some(Identity::SERVER)
    }

    fn is_authoritative(&self) -> bool {
        true
    }

    fn on_joined(&mut self, peer: Identity, _assigned: Option<Identity>) {
        info!(%peer, "client joined");
    }

    fn on_left(&mut self, peer: Identity) {
        info!(%peer, "client left");
    }

    fn may_push(&self, _authority: Identity, _rule: SyncRule) -> bool {
        true
    }

    fn sync_targets(
        &self,
        routing: &Routing<'_>,
        authority: Identity,
        rule: SyncRule,
        position: Vec3,
        scope: Scope,
    ) -> Vec<Identity> {
        match rule {
            SyncRule::Round | SyncRule::Server => routing.relevant(position, scope, &|_| true),
            SyncRule::Authority => routing.relevant(position, scope, &|p| p != authority),
        }
    }

    fn accepts_sync(&self, sender: Identity, authority: Identity, rule: SyncRule) -> bool {
        sender == authority && matches!(rule, SyncRule::Round | SyncRule::Authority)
    }

    fn may_originate(&self, rule: CallRule) -> bool {
        matches!(rule, CallRule::Any | CallRule::Server)
    }

    fn call_targets(
        &self,
        routing: &Routing<'_>,
        target: Identity,
        position: Vec3,
        scope: Scope,
    ) -> Vec<Identity> {
        if target.is_any() {
            routing.relevant(position, scope, &|_| true)
        } else {
            routing.relevant(position, scope, &|p| p == target)
        }
    }

    fn on_call(
        &self,
        routing: &Routing<'_>,
        sender: Identity,
        target: Identity,
        rule: CallRule,
        position: Vec3,
        scope: Scope,
    ) -> CallRoute {
        if rule == CallRule::Server {
            return CallRoute::dropped();
        }
        let executes_here = matches!(rule, CallRule::Any | CallRule::Client);
        if target.is_any() {
            let relay = if rule == CallRule::Any {
                routing.relevant(position, scope, &|p| p != sender)
            } else {
                Vec::new()
            };
            CallRoute {
                relay,
                execute: executes_here,
            }
        } else if target == Identity::SERVER {
            CallRoute {
                relay: Vec::new(),
                execute: executes_here,
            }
        } else if rule == CallRule::Any && target != sender && routing.is_connected(target) {
            CallRoute {
                relay: routing.relevant(position, scope, &|p| p == target),
                execute: false,
            }
        } else {
            CallRoute::dropped()
        }
    }
}

/// A client. Learns its identity from the server's welcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct Replica {
    local: Option<Identity>,
    connected: bool,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Role for Replica {
    fn local(&self) -> Option<Identity> {
        self.local
    }

    fn is_authoritative(&self) -> bool {
        false
    }

    fn on_joined(&mut self, peer: Identity, assigned: Option<Identity>) {
        if peer != Identity::SERVER {
            return;
        }
        if let Some(identity) = assigned {
            self.local = Some(identity);
        }
        self.connected = true;
        info!(identity = ?self.local, "joined server");
    }

    fn on_left(&mut self, peer: Identity) {
        if peer == Identity::SERVER {
            self.connected = false;
            info!("lost server");
        }
    }

    fn may_push(&self, authority: Identity, rule: SyncRule) -> bool {
        rule != SyncRule::Server && self.local == Some(authority)
    }

    fn sync_targets(
        &self,
        routing: &Routing<'_>,
        _authority: Identity,
        _rule: SyncRule,
        _position: Vec3,
        _scope: Scope,
    ) -> Vec<Identity> {
        server_only(routing)
    }

    fn accepts_sync(&self, sender: Identity, _authority: Identity, _rule: SyncRule) -> bool {
        sender == Identity::SERVER
    }

    fn may_originate(&self, rule: CallRule) -> bool {
        matches!(rule, CallRule::Any | CallRule::Client)
    }

    fn call_targets(
        &self,
        routing: &Routing<'_>,
        _target: Identity,
        _position: Vec3,
        _scope: Scope,
    ) -> Vec<Identity> {
        server_only(routing)
    }

    fn on_call(
        &self,
        _routing: &Routing<'_>,
        sender: Identity,
        target: Identity,
        rule: CallRule,
        _position: Vec3,
        _scope: Scope,
    ) -> CallRoute {
        let addressed = target.is_any() || Some(target) == self.local;
        CallRoute {
            relay: Vec::new(),
            execute: sender == Identity::SERVER
                && addressed
                && matches!(rule, CallRule::Any | CallRule::Server),
        }
    }
}

// Clients only ever talk to the server.
fn server_only(routing: &Routing<'_>) -> Vec<Identity> {
    if routing.is_connected(Identity::SERVER) {
        vec![Identity::SERVER]
    } else {
        Vec::new()
    }
}

//! The replication runtime.
//!
//! One `Runtime` per process. It owns the object and entity registries, the
//! list of connected peers and the event bus, and does all of its work inside
//! [`Runtime::update`]:
//! 1. drain the transport and dispatch every payload on its packet kind
//! 2. push due signatures
//! 3. flush object deltas (server) or snapshot lookups (client)
//!
//! Nothing blocks and nothing is locked; the host calls `update` once per tick.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::{
    config::{NetConfig, DEFAULT_LOOKUP_RETRY_MS},
    entity::{Entity, EntityRegistry},
    event::{Ceased, EventBus, HandedOver, PeerConnected, PeerDisconnected, Spawned},
    identity::{Identity, Key, ObjectId},
    math::Vec3,
    packets::{CallHeader, Cease, Handover, PacketKind, Spawn, SyncHeader},
    procedure::{CallError, Invocation},
    registry::ObjectRegistry,
    relevance::{Everyone, Relevance, Scope},
    role::{Authoritative, Replica, Role, Routing},
    transport::{Channel, Transport, TransportEvent},
    wire::{Reader, WireError, Writer},
};

pub struct Runtime<R, T, V> {
    role: R,
    transport: T,
    relevance: V,
    objects: ObjectRegistry,
    entities: EntityRegistry,
    peers: Vec<Identity>,
    events: EventBus,
    /// Server only: what late joiners are told about.
    spawned: BTreeMap<Identity, Spawn>,
    /// Replica only: units still waiting on a snapshot ask again this often.
    lookup_retry_ms: u64,
    next_lookup_ms: u64,
}

pub type ServerRuntime<T, V> = Runtime<Authoritative, T, V>;
pub type ClientRuntime<T> = Runtime<Replica, T, Everyone>;

impl<R: Role, T: Transport, V: Relevance> Runtime<R, T, V> {
    pub fn new(role: R, transport: T, relevance: V) -> Self {
        let objects = ObjectRegistry::new(role.is_authoritative());
        Self {
            role,
            transport,
            relevance,
            objects,
            entities: EntityRegistry::new(),
            peers: Vec::new(),
            events: EventBus::new(),
            spawned: BTreeMap::new(),
            lookup_retry_ms: DEFAULT_LOOKUP_RETRY_MS,
            next_lookup_ms: 0,
        }
    }

    /// Applies the tunables of `cfg`. Call before creating objects.
    pub fn with_config(mut self, cfg: &NetConfig) -> Self {
        self.objects = ObjectRegistry::new(self.role.is_authoritative())
            .with_reorder_window(cfg.reorder_window);
        self.lookup_retry_ms = cfg.lookup_retry_ms.max(1);
        self
    }

    pub fn role(&self) -> &R {
        &self.role
    }

    pub fn local(&self) -> Option<Identity> {
        self.role.local()
    }

    pub fn peers(&self) -> &[Identity] {
        &self.peers
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectRegistry {
        &mut self.objects
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityRegistry {
        &mut self.entities
    }

    pub fn entity(&self, identity: Identity) -> Option<&Entity> {
        self.entities.get(identity)
    }

    pub fn entity_mut(&mut self, identity: Identity) -> Option<&mut Entity> {
        self.entities.get_mut(identity)
    }

    pub fn relevance(&self) -> &V {
        &self.relevance
    }

    pub fn relevance_mut(&mut self) -> &mut V {
        &mut self.relevance
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drains queued events of one type.
    pub fn drain_events<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.events.drain::<E>()
    }

    /// One tick. `now_ms` drives signature schedules.
    pub fn update(&mut self, now_ms: u64) {
        self.pump();
        self.push_signatures(now_ms);
        self.flush_objects(now_ms);
    }

    /// Sends a call to the procedure `offset:id` of `entity`.
    ///
    /// `target` is a peer or [`Identity::ANY`]. A client always sends to the
    /// server, which relays; the server sends directly to relevant peers.
    /// `args` writes the procedure arguments.
    pub fn call_remote(
        &mut self,
        entity: Identity,
        target: Identity,
        channel: Channel,
        offset: u8,
        id: u8,
        args: impl FnOnce(&mut Writer),
    ) -> Result<(), CallError> {
        if self.role.local() == Some(target) {
            warn!(%entity, %target, "call addressed to self, not sent");
            return Err(CallError::SelfTarget(target));
        }
        let key = Key::combine(offset, id);
        let e = self
            .entities
            .get(entity)
            .ok_or(CallError::UnknownEntity(entity))?;
        let slot = e
            .procedures
            .get(&key)
            .ok_or(CallError::UnknownProcedure { entity, key })?;
        if !self.role.may_originate(slot.rule) {
            return Err(CallError::Unauthorized { rule: slot.rule });
        }

        let routing = Routing {
            peers: &self.peers,
            relevance: &self.relevance,
        };
        let targets = self
            .role
            .call_targets(&routing, target, e.position(), slot.scope);
        if targets.is_empty() {
            debug!(%entity, %key, %target, "no relevant recipient");
            return Ok(());
        }

        let mut w = Writer::new();
        PacketKind::Call.write(&mut w);
        CallHeader {
            target,
            entity,
            key,
        }
        .write(&mut w);
        args(&mut w);
        let payload = w.freeze();
        for to in targets {
            self.transport.send(to, channel, payload.clone());
        }
        Ok(())
    }

    fn pump(&mut self) {
        for event in self.transport.poll() {
            match event {
                TransportEvent::PeerJoined { peer, assigned } => {
                    self.on_peer_joined(peer, assigned)
                }
                TransportEvent::PeerLeft { peer } => self.on_peer_left(peer),
                TransportEvent::Received {
                    peer,
                    channel,
                    timestamp,
                    payload,
                } => {
                    if !self.peers.contains(&peer) {
                        trace!(%peer, "payload from unknown peer dropped");
                        continue;
                    }
                    if let Err(error) = self.dispatch(peer, channel, timestamp, &payload) {
                        warn!(%peer, %error, len = payload.len(), "malformed packet dropped");
                    }
                }
            }
        }
    }

    fn on_peer_joined(&mut self, peer: Identity, assigned: Option<Identity>) {
        self.role.on_joined(peer, assigned);
        if !self.peers.contains(&peer) {
            self.peers.push(peer);
        }
        if self.role.is_authoritative() {
            for spawn in self.spawned.values() {
                self.transport
                    .send(peer, Channel::Ordered, spawn_packet(spawn));
            }
        } else {
            // Anything still waiting on a snapshot asks again.
            self.objects.request_reconfiguring();
        }
        self.events.push(PeerConnected { peer });
    }

    fn on_peer_left(&mut self, peer: Identity) {
        self.role.on_left(peer);
        self.peers.retain(|p| *p != peer);
        if !self.role.is_authoritative() && peer == Identity::SERVER {
            self.objects.reset();
            // The next server may run on a fresh clock.
            for entity in self.entities.iter_mut() {
                entity.forget_sync_times();
            }
        }
        self.events.push(PeerDisconnected { peer });
    }

    fn dispatch(
        &mut self,
        peer: Identity,
        channel: Channel,
        timestamp: u32,
        payload: &Bytes,
    ) -> Result<(), WireError> {
        let mut r = Reader::new(payload);
        let kind = PacketKind::read(&mut r)?;
        let from_server = peer == Identity::SERVER && !self.role.is_authoritative();
        match kind {
            PacketKind::Sync => self.on_sync(peer, timestamp, &mut r),
            PacketKind::Call => self.on_call(peer, channel, payload, &mut r),
            PacketKind::Snapshot if from_server => self.objects.on_snapshot(&mut r),
            PacketKind::Delta if from_server => self.objects.on_delta(&mut r).map(|_| ()),
            PacketKind::Spawn if from_server => {
                self.on_spawn(Spawn::read(&mut r)?);
                Ok(())
            }
            PacketKind::Cease if from_server => {
                self.on_cease(Cease::read(&mut r)?);
                Ok(())
            }
            PacketKind::Handover if from_server => {
                self.on_handover(Handover::read(&mut r)?);
                Ok(())
            }
            PacketKind::Find if self.role.is_authoritative() => {
                if let Some(snapshot) = self.objects.on_find(&mut r)? {
                    self.transport.send(peer, Channel::Ordered, snapshot);
                }
                Ok(())
            }
            other => {
                debug!(%peer, kind = ?other, "packet not meant for this role dropped");
                Ok(())
            }
        }
    }

    fn on_sync(
        &mut self,
        peer: Identity,
        timestamp: u32,
        r: &mut Reader<'_>,
    ) -> Result<(), WireError> {
        let header = SyncHeader::read(r)?;
        let Some(entity) = self.entities.get_mut(header.entity) else {
            trace!(entity = %header.entity, "sync for unknown entity");
            return Ok(());
        };
        let authority = entity.authority();
        let Some(slot) = entity.signatures.get_mut(&header.key) else {
            trace!(entity = %header.entity, key = %header.key, "sync for unknown signature");
            return Ok(());
        };
        if !self.role.accepts_sync(peer, authority, slot.rule) {
            debug!(%peer, entity = %header.entity, key = %header.key, "unauthorised sync dropped");
            return Ok(());
        }
        if !slot.receive(timestamp, r)? {
            trace!(entity = %header.entity, key = %header.key, timestamp, "stale sync dropped");
        }
        Ok(())
    }

    fn on_call(
        &mut self,
        peer: Identity,
        channel: Channel,
        payload: &Bytes,
        r: &mut Reader<'_>,
    ) -> Result<(), WireError> {
        let header = CallHeader::read(r)?;
        let Some(entity) = self.entities.get_mut(header.entity) else {
            trace!(entity = %header.entity, "call for unknown entity");
            return Ok(());
        };
        let Some((rule, scope)) = entity
            .procedures
            .get(&header.key)
            .map(|slot| (slot.rule, slot.scope))
        else {
            trace!(entity = %header.entity, key = %header.key, "call for unknown procedure");
            return Ok(());
        };

        let routing = Routing {
            peers: &self.peers,
            relevance: &self.relevance,
        };
        let route = self.role.on_call(
            &routing,
            peer,
            header.target,
            rule,
            entity.position(),
            scope,
        );
        if route.is_dropped() {
            debug!(%peer, entity = %header.entity, key = %header.key, ?rule, "call dropped");
            return Ok(());
        }
        for to in route.relay {
            self.transport.send(to, channel, payload.clone());
        }
        if route.execute {
            let invocation = Invocation {
                entity: header.entity,
                key: header.key,
                target: header.target,
                sender: peer,
            };
            entity.invoke(&invocation, r)?;
        }
        Ok(())
    }

    fn on_spawn(&mut self, spawn: Spawn) {
        if self.entities.create_entity(spawn.entity, spawn.authority) {
            if let Some(entity) = self.entities.get_mut(spawn.entity) {
                entity.set_position(spawn.position);
            }
        } else if let Some(entity) = self.entities.get_mut(spawn.entity) {
            debug!(entity = %spawn.entity, "spawn for existing entity");
            entity.set_authority(spawn.authority);
        }
        self.events.push(Spawned(spawn));
    }

    fn on_cease(&mut self, cease: Cease) {
        self.entities.destroy_entity(cease.entity);
        self.events.push(Ceased(cease));
    }

    fn on_handover(&mut self, handover: Handover) {
        let Some(entity) = self.entities.get_mut(handover.entity) else {
            trace!(entity = %handover.entity, "handover for unknown entity");
            return;
        };
        entity.set_authority(handover.authority);
        debug!(entity = %handover.entity, authority = %handover.authority, "authority handed over");
        self.events.push(HandedOver(handover));
    }

    fn push_signatures(&mut self, now_ms: u64) {
        let routing = Routing {
            peers: &self.peers,
            relevance: &self.relevance,
        };
        for entity in self.entities.iter_mut() {
            let identity = entity.identity();
            let authority = entity.authority();
            let position = entity.position();
            for (key, slot) in entity.signatures.iter_mut() {
                if !slot.is_due(now_ms) || !self.role.may_push(authority, slot.rule) {
                    continue;
                }
                slot.post(now_ms);
                let targets =
                    self.role
                        .sync_targets(&routing, authority, slot.rule, position, slot.scope);
                if targets.is_empty() {
                    continue;
                }
                let mut w = Writer::new();
                PacketKind::Sync.write(&mut w);
                SyncHeader {
                    entity: identity,
                    key: *key,
                }
                .write(&mut w);
                slot.field.write(&mut w);
                let payload = w.freeze();
                for to in targets {
                    self.transport.send(to, Channel::Direct, payload.clone());
                }
            }
        }
    }

    fn flush_objects(&mut self, now_ms: u64) {
        if self.role.is_authoritative() {
            let deltas = self.objects.flush(!self.peers.is_empty());
            for delta in deltas {
                for &peer in &self.peers {
                    self.transport.send(peer, Channel::Irregular, delta.clone());
                }
            }
        } else if self.peers.contains(&Identity::SERVER) {
            // A lookup or its snapshot may have been lost on the way.
            if now_ms >= self.next_lookup_ms {
                self.objects.request_reconfiguring();
                self.next_lookup_ms = now_ms + self.lookup_retry_ms;
            }
            for lookup in self.objects.take_lookups() {
                self.transport
                    .send(Identity::SERVER, Channel::Irregular, lookup);
            }
        }
    }
}

impl<T: Transport, V: Relevance> Runtime<Authoritative, T, V> {
    pub fn server(transport: T, relevance: V) -> Self {
        Self::new(Authoritative, transport, relevance)
    }

    /// Creates a networked entity and announces it to every connected and
    /// future peer. `false` if the identity is taken.
    pub fn spawn(&mut self, spawn: Spawn) -> bool {
        if !self.entities.create_entity(spawn.entity, spawn.authority) {
            return false;
        }
        if let Some(entity) = self.entities.get_mut(spawn.entity) {
            entity.set_position(spawn.position);
        }
        self.spawned.insert(spawn.entity, spawn);
        let packet = spawn_packet(&spawn);
        for &peer in &self.peers {
            self.transport.send(peer, Channel::Ordered, packet.clone());
        }
        info!(entity = %spawn.entity, authority = %spawn.authority, asset = spawn.asset, "spawned");
        true
    }

    /// Destroys a networked entity and withdraws it from every peer.
    pub fn cease(&mut self, identity: Identity) -> bool {
        let Some(entity) = self.entities.get(identity) else {
            return false;
        };
        let cease = Cease {
            entity: identity,
            authority: entity.authority(),
        };
        self.entities.destroy_entity(identity);
        self.spawned.remove(&identity);

        let mut w = Writer::with_capacity(9);
        PacketKind::Cease.write(&mut w);
        cease.write(&mut w);
        let packet = w.freeze();
        for &peer in &self.peers {
            self.transport.send(peer, Channel::Ordered, packet.clone());
        }
        info!(entity = %identity, "ceased");
        true
    }

    /// Hands authority over an entity to another peer. Connected peers get a
    /// handover packet; late joiners learn it from their spawn packet.
    pub fn set_authority(&mut self, identity: Identity, authority: Identity) -> bool {
        let Some(entity) = self.entities.get_mut(identity) else {
            return false;
        };
        entity.set_authority(authority);
        if let Some(spawn) = self.spawned.get_mut(&identity) {
            spawn.authority = authority;
        }

        let mut w = Writer::with_capacity(9);
        PacketKind::Handover.write(&mut w);
        Handover {
            entity: identity,
            authority,
        }
        .write(&mut w);
        let packet = w.freeze();
        for &peer in &self.peers {
            self.transport.send(peer, Channel::Ordered, packet.clone());
        }
        info!(entity = %identity, %authority, "authority handed over");
        true
    }

    /// Sends the full state of one object to one peer.
    pub fn send_snapshot(&mut self, peer: Identity, id: ObjectId) -> bool {
        match self.objects.snapshot_packet(id) {
            Some(packet) => {
                self.transport.send(peer, Channel::Ordered, packet);
                true
            }
            None => false,
        }
    }

    /// Peers relevant to `position` at `scope`.
    pub fn relevant_peers(&self, position: Vec3, scope: Scope) -> Vec<Identity> {
        self.relevance
            .relevant_peers(&self.peers, position, scope, &|_| true)
    }
}

impl<T: Transport> Runtime<Replica, T, Everyone> {
    pub fn client(transport: T) -> Self {
        Self::new(Replica::new(), transport, Everyone)
    }

    pub fn is_connected(&self) -> bool {
        self.role.is_connected()
    }
}

fn spawn_packet(spawn: &Spawn) -> Bytes {
    let mut w = Writer::with_capacity(41);
    PacketKind::Spawn.write(&mut w);
    spawn.write(&mut w);
    w.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collections::Value,
        procedure::{CallRule, ProcedureDescriptor},
        signature::{SignatureDescriptor, SyncRule},
        transport::{MemoryHub, MemoryTransport, Sent},
    };
    use std::sync::{Arc, Mutex};

    const A: Identity = Identity(1);
    const ENTITY: Identity = Identity(100);

    fn pair() -> (
        MemoryHub,
        ServerRuntime<MemoryTransport, Everyone>,
        ClientRuntime<MemoryTransport>,
    ) {
        let hub = MemoryHub::new();
        let server = Runtime::server(hub.endpoint(Identity::SERVER), Everyone);
        let client = Runtime::client(hub.endpoint(A));
        hub.connect(Identity::SERVER, A);
        (hub, server, client)
    }

    fn kinds(sent: &[Sent]) -> Vec<u8> {
        sent.iter().map(|s| s.payload[0]).collect()
    }

    #[test]
    fn join_is_reported_on_both_sides() {
        let (_hub, mut server, mut client) = pair();
        server.update(0);
        client.update(0);
        assert_eq!(server.peers(), [A]);
        assert_eq!(client.local(), Some(A));
        assert!(client.is_connected());
        assert_eq!(
            client.drain_events::<PeerConnected>(),
            vec![PeerConnected {
                peer: Identity::SERVER
            }]
        );
    }

    #[test]
    fn self_call_is_refused() {
        let (hub, mut server, _client) = pair();
        server.update(0);
        server.spawn(Spawn {
            asset: 1,
            world: Identity(0),
            entity: ENTITY,
            authority: Identity::SERVER,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
        });
        server
            .entity_mut(ENTITY)
            .unwrap()
            .register_procedure(0, ProcedureDescriptor::new(1, CallRule::Any, |_, _| Ok(())));
        hub.clear_log();

        let err = server
            .call_remote(ENTITY, Identity::SERVER, Channel::Irregular, 0, 1, |_| {})
            .unwrap_err();
        assert_eq!(err, CallError::SelfTarget(Identity::SERVER));
        assert!(hub.sent().is_empty());

        assert_eq!(
            server.call_remote(Identity(7), Identity::ANY, Channel::Irregular, 0, 1, |_| {}),
            Err(CallError::UnknownEntity(Identity(7)))
        );
        assert!(matches!(
            server.call_remote(ENTITY, Identity::ANY, Channel::Irregular, 0, 2, |_| {}),
            Err(CallError::UnknownProcedure { .. })
        ));
    }

    #[test]
    fn spawn_reaches_client_and_creates_entity() {
        let (_hub, mut server, mut client) = pair();
        server.update(0);
        client.update(0);
        assert!(server.spawn(Spawn {
            asset: 3,
            world: Identity(0),
            entity: ENTITY,
            authority: A,
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Vec3::ZERO,
        }));
        client.update(10);

        let spawned = client.drain_events::<Spawned>();
        assert_eq!(spawned.len(), 1);
        let e = client.entity(ENTITY).unwrap();
        assert_eq!(e.authority(), A);
        assert_eq!(e.position(), Vec3::new(1.0, 2.0, 3.0));

        assert!(server.cease(ENTITY));
        client.update(20);
        assert!(client.entity(ENTITY).is_none());
        assert_eq!(client.drain_events::<Ceased>().len(), 1);
    }

    #[test]
    fn client_call_is_executed_on_the_server() {
        let (_hub, mut server, mut client) = pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        server.update(0);
        client.update(0);
        server.spawn(Spawn {
            asset: 0,
            world: Identity(0),
            entity: ENTITY,
            authority: A,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
        });
        server.entity_mut(ENTITY).unwrap().register_procedure(
            2,
            ProcedureDescriptor::new(0, CallRule::Client, move |inv, r| {
                sink.lock().unwrap().push((inv.sender, r.read_u32()?));
                Ok(())
            }),
        );
        client.update(1);
        client
            .entity_mut(ENTITY)
            .unwrap()
            .register_procedure(2, ProcedureDescriptor::new(0, CallRule::Client, |_, _| Ok(())));

        client
            .call_remote(ENTITY, Identity::SERVER, Channel::Irregular, 2, 0, |w| {
                w.write_u32(42)
            })
            .unwrap();
        server.update(2);
        assert_eq!(*seen.lock().unwrap(), vec![(A, 42)]);
    }

    #[test]
    fn server_rule_signature_flows_down() {
        let (hub, mut server, mut client) = pair();
        server.update(0);
        client.update(0);
        server.spawn(Spawn {
            asset: 0,
            world: Identity(0),
            entity: ENTITY,
            authority: Identity::SERVER,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
        });
        server
            .entity_mut(ENTITY)
            .unwrap()
            .register_signature(0, SignatureDescriptor::new(0, 10.0, SyncRule::Server, 0u32));
        client.update(0);
        client
            .entity_mut(ENTITY)
            .unwrap()
            .register_signature(0, SignatureDescriptor::new(0, 10.0, SyncRule::Server, 0u32));

        *server.entity_mut(ENTITY).unwrap().field_mut::<u32>(0, 0).unwrap() = 9;
        hub.clear_log();
        hub.set_time(100);
        server.update(100);
        client.update(100);

        assert_eq!(kinds(&hub.sent()), vec![PacketKind::Sync as u8]);
        assert_eq!(hub.sent()[0].channel, Channel::Direct);
        assert_eq!(client.entity(ENTITY).unwrap().field::<u32>(0, 0), Some(&9));
    }

    #[test]
    fn objects_converge_through_lookup() {
        let (_hub, mut server, mut client) = pair();
        let id = server
            .objects_mut()
            .create("Score", 0, 0, Value::new(0i32))
            .unwrap();
        server.objects_mut().get_mut::<Value<i32>>(id).unwrap().set(5).unwrap();
        client.objects_mut().create("Score", 0, 0, Value::new(0i32));

        server.update(0);
        client.update(0);
        server.update(1);
        client.update(1);
        assert_eq!(*client.objects().get::<Value<i32>>(id).unwrap().get(), 5);
        assert!(!client.objects().get::<Value<i32>>(id).unwrap().is_reconfiguring());
    }

    #[test]
    fn lost_lookup_is_asked_again() {
        let (hub, mut server, mut client) = pair();
        let id = server
            .objects_mut()
            .create("Score", 0, 0, Value::new(0i32))
            .unwrap();
        server.objects_mut().get_mut::<Value<i32>>(id).unwrap().set(5).unwrap();
        client.objects_mut().create("Score", 0, 0, Value::new(0i32));

        server.update(0);
        client.update(0);
        // The Find never arrives.
        assert_eq!(hub.take_inbox(Identity::SERVER).len(), 1);
        server.update(1);
        client.update(1);
        assert!(client.objects().get::<Value<i32>>(id).unwrap().is_reconfiguring());

        let retry = DEFAULT_LOOKUP_RETRY_MS;
        server.update(retry);
        client.update(retry);
        server.update(retry + 1);
        client.update(retry + 1);
        let mirrored = client.objects().get::<Value<i32>>(id).unwrap();
        assert!(!mirrored.is_reconfiguring());
        assert_eq!(*mirrored.get(), 5);
    }

    #[test]
    fn losing_the_server_resets_objects() {
        let (hub, mut server, mut client) = pair();
        let id = server
            .objects_mut()
            .create("Score", 0, 0, Value::new(1i32))
            .unwrap();
        client.objects_mut().create("Score", 0, 0, Value::new(0i32));
        server.update(0);
        client.update(0);
        server.update(1);
        client.update(1);
        assert!(!client.objects().get::<Value<i32>>(id).unwrap().is_reconfiguring());

        hub.disconnect(Identity::SERVER, A);
        client.update(2);
        assert!(!client.is_connected());
        assert!(client.objects().get::<Value<i32>>(id).unwrap().is_reconfiguring());
        assert_eq!(client.drain_events::<PeerDisconnected>().len(), 1);
    }

    #[test]
    fn garbage_is_dropped() {
        let (hub, mut server, _client) = pair();
        server.update(0);
        hub.deliver(
            Identity::SERVER,
            [TransportEvent::Received {
                peer: A,
                channel: Channel::Irregular,
                timestamp: 0,
                payload: Bytes::from_static(&[PacketKind::Call as u8, 1]),
            }],
        );
        server.update(1);
        assert!(hub.sent().is_empty());
    }
}

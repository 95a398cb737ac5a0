//! Object registry: every change-log unit of this process, by identifier.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::{
    identity::ObjectId,
    packets::{read_object, write_object, PacketKind},
    unit::{ChangeLog, Ingest, Replicated, Unit, DEFAULT_REORDER_WINDOW},
    wire::{Reader, WireError, Writer},
};

/// Owns the units and the snapshot lookups waiting to be sent.
pub struct ObjectRegistry {
    authoritative: bool,
    reorder_window: u32,
    units: BTreeMap<ObjectId, Box<dyn Unit>>,
    lookups: Vec<ObjectId>,
}

impl ObjectRegistry {
    pub fn new(authoritative: bool) -> Self {
        Self {
            authoritative,
            reorder_window: DEFAULT_REORDER_WINDOW,
            units: BTreeMap::new(),
            lookups: Vec::new(),
        }
    }

    pub fn with_reorder_window(mut self, window: u32) -> Self {
        self.reorder_window = window;
        self
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Registers `state` under the identifier derived from the triple.
    /// Returns `None` if that identifier is already taken.
    ///
    /// A replica immediately queues a lookup so the first snapshot is asked for.
    pub fn create<T: Replicated>(
        &mut self,
        type_tag: &str,
        instance: u16,
        member: u16,
        state: T,
    ) -> Option<ObjectId> {
        let id = ObjectId::derive(type_tag, instance, member);
        if self.units.contains_key(&id) {
            return None;
        }
        let unit = ChangeLog::new(id, state, self.authoritative)
            .with_reorder_window(self.reorder_window);
        self.units.insert(id, Box::new(unit));
        if !self.authoritative {
            self.queue_lookup(id);
        }
        debug!(object = %id, type_tag, instance, member, "object created");
        Some(id)
    }

    /// Forgets the unit and anything queued for it.
    pub fn destroy(&mut self, id: ObjectId) -> bool {
        self.lookups.retain(|l| *l != id);
        self.units.remove(&id).is_some()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.units.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get<T: Replicated>(&self, id: ObjectId) -> Option<&ChangeLog<T>> {
        self.units
            .get(&id)
            .and_then(|u| u.as_any().downcast_ref::<ChangeLog<T>>())
    }

    pub fn get_mut<T: Replicated>(&mut self, id: ObjectId) -> Option<&mut ChangeLog<T>> {
        self.units
            .get_mut(&id)
            .and_then(|u| u.as_any_mut().downcast_mut::<ChangeLog<T>>())
    }

    /// Delta packets for every changed unit. Without listeners the queues are
    /// dropped and nothing is returned.
    pub fn flush(&mut self, listeners: bool) -> Vec<Bytes> {
        let mut out = Vec::new();
        for (id, unit) in self.units.iter_mut() {
            if !unit.is_changed() {
                continue;
            }
            let mut w = Writer::new();
            PacketKind::Delta.write(&mut w);
            write_object(&mut w, *id);
            if unit.flush_delta(&mut w, listeners) {
                out.push(w.freeze());
            }
        }
        out
    }

    /// Snapshot packet for one unit.
    pub fn snapshot_packet(&self, id: ObjectId) -> Option<Bytes> {
        let unit = self.units.get(&id)?;
        let mut w = Writer::new();
        PacketKind::Snapshot.write(&mut w);
        write_object(&mut w, id);
        unit.snapshot(&mut w);
        Some(w.freeze())
    }

    /// Handles a Snapshot body (after the kind byte).
    pub fn on_snapshot(&mut self, r: &mut Reader<'_>) -> Result<(), WireError> {
        let id = read_object(r)?;
        match self.units.get_mut(&id) {
            Some(unit) => unit.apply_full(r),
            None => {
                trace!(object = %id, "snapshot for unknown object");
                Ok(())
            }
        }
    }

    /// Handles a Delta body (after the kind byte).
    pub fn on_delta(&mut self, r: &mut Reader<'_>) -> Result<Option<Ingest>, WireError> {
        let id = read_object(r)?;
        let Some(unit) = self.units.get_mut(&id) else {
            trace!(object = %id, "delta for unknown object");
            return Ok(None);
        };
        let outcome = unit.ingest_delta(r)?;
        if outcome == Ingest::ResyncRequested {
            debug!(object = %id, "gap detected, requesting snapshot");
            self.queue_lookup(id);
        }
        Ok(Some(outcome))
    }

    /// Handles a Find body: the snapshot to answer with, if the object exists.
    pub fn on_find(&self, r: &mut Reader<'_>) -> Result<Option<Bytes>, WireError> {
        let id = read_object(r)?;
        let packet = self.snapshot_packet(id);
        if packet.is_none() {
            trace!(object = %id, "lookup for unknown object");
        }
        Ok(packet)
    }

    /// Queues a lookup for every unit still waiting on a snapshot.
    pub fn request_reconfiguring(&mut self) {
        let waiting: Vec<ObjectId> = self
            .units
            .iter()
            .filter(|(_, u)| u.is_reconfiguring())
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            self.queue_lookup(id);
        }
    }

    /// Drains queued lookups as Find packets.
    pub fn take_lookups(&mut self) -> Vec<Bytes> {
        self.lookups
            .drain(..)
            .map(|id| {
                let mut w = Writer::with_capacity(9);
                PacketKind::Find.write(&mut w);
                write_object(&mut w, id);
                w.freeze()
            })
            .collect()
    }

    pub fn pending_lookups(&self) -> usize {
        self.lookups.len()
    }

    /// Discards all in-flight state; used when the server connection drops.
    pub fn reset(&mut self) {
        for unit in self.units.values_mut() {
            unit.reset();
        }
        self.lookups.clear();
    }

    fn queue_lookup(&mut self, id: ObjectId) {
        if !self.lookups.contains(&id) {
            self.lookups.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{List, Value};

    fn body(packet: &Bytes) -> Reader<'_> {
        let mut r = Reader::new(packet);
        r.read_u8().unwrap();
        r
    }

    #[test]
    fn duplicate_create_is_refused() {
        let mut reg = ObjectRegistry::new(true);
        assert!(reg.create("Score", 0, 0, Value::new(0i32)).is_some());
        assert!(reg.create("Score", 0, 0, Value::new(1i32)).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn typed_access_checks_the_type() {
        let mut reg = ObjectRegistry::new(true);
        let id = reg.create("Score", 0, 0, Value::new(0i32)).unwrap();
        assert!(reg.get::<Value<i32>>(id).is_some());
        assert!(reg.get::<List<i32>>(id).is_none());
    }

    #[test]
    fn replica_create_queues_lookup() {
        let mut reg = ObjectRegistry::new(false);
        let id = reg.create("Score", 0, 0, Value::new(0i32)).unwrap();
        assert_eq!(reg.pending_lookups(), 1);

        let lookups = reg.take_lookups();
        assert_eq!(lookups.len(), 1);
        let mut r = Reader::new(&lookups[0]);
        assert_eq!(PacketKind::read(&mut r).unwrap(), PacketKind::Find);
        assert_eq!(read_object(&mut r).unwrap(), id);
        assert_eq!(reg.pending_lookups(), 0);
    }

    #[test]
    fn find_snapshot_delta_flow() {
        let mut server = ObjectRegistry::new(true);
        let mut client = ObjectRegistry::new(false);
        let id = server.create("Roster", 2, 1, List::<u32>::new()).unwrap();
        client.create("Roster", 2, 1, List::<u32>::new()).unwrap();

        server.get_mut::<List<u32>>(id).unwrap().push(7).unwrap();
        assert_eq!(server.flush(true).len(), 1);

        let find = client.take_lookups().remove(0);
        let snapshot = server.on_find(&mut body(&find)).unwrap().unwrap();
        client.on_snapshot(&mut body(&snapshot)).unwrap();
        assert_eq!(client.get::<List<u32>>(id).unwrap().items(), [7]);

        server.get_mut::<List<u32>>(id).unwrap().push(8).unwrap();
        let deltas = server.flush(true);
        let outcome = client.on_delta(&mut body(&deltas[0])).unwrap();
        assert_eq!(outcome, Some(Ingest::Applied(1)));
        assert_eq!(client.get::<List<u32>>(id).unwrap().items(), [7, 8]);
    }

    #[test]
    fn flush_without_listeners_sends_nothing() {
        let mut reg = ObjectRegistry::new(true);
        let id = reg.create("Score", 0, 0, Value::new(0i32)).unwrap();
        reg.get_mut::<Value<i32>>(id).unwrap().set(4).unwrap();
        assert!(reg.flush(false).is_empty());
        assert!(!reg.get::<Value<i32>>(id).unwrap().is_changed());
    }

    #[test]
    fn unknown_objects_are_ignored() {
        let mut server = ObjectRegistry::new(true);
        let id = server.create("Score", 0, 0, Value::new(1i32)).unwrap();
        let snapshot = server.snapshot_packet(id).unwrap();

        let mut client = ObjectRegistry::new(false);
        assert!(client.on_snapshot(&mut body(&snapshot)).is_ok());
        assert!(server.destroy(id));
        assert!(!server.destroy(id));
    }

    #[test]
    fn gap_queues_exactly_one_lookup() {
        let mut client = ObjectRegistry::new(false);
        let id = client.create("Score", 0, 0, Value::new(0i32)).unwrap();
        client.take_lookups();

        let mut w = Writer::new();
        PacketKind::Snapshot.write(&mut w);
        write_object(&mut w, id);
        w.write_u32(3);
        w.write_i32(0);
        let snapshot = w.freeze();
        client.on_snapshot(&mut body(&snapshot)).unwrap();

        let far_delta = |marker: u32| {
            let mut w = Writer::new();
            PacketKind::Delta.write(&mut w);
            write_object(&mut w, id);
            w.write_u32(marker);
            w.write_i32(1);
            w.write_u8(0);
            w.write_i32(9);
            w.freeze()
        };
        assert_eq!(
            client.on_delta(&mut body(&far_delta(10))).unwrap(),
            Some(Ingest::ResyncRequested)
        );
        assert_eq!(
            client.on_delta(&mut body(&far_delta(11))).unwrap(),
            Some(Ingest::Buffered)
        );
        assert_eq!(client.take_lookups().len(), 1);
    }
}

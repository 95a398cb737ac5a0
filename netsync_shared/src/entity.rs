//! Networked entities and their registry.
//!
//! An entity carries an identity, the peer holding authority over it, a
//! position for relevance, and the signatures and procedures registered by its
//! components. Keys combine a per-component offset with the local id, so two
//! components may both use id 0.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    identity::{Identity, Key},
    math::Vec3,
    procedure::{CallRule, Handler, Invocation, ProcedureDescriptor},
    relevance::Scope,
    signature::{SignatureDescriptor, SignatureSlot, SyncRule},
    wire::{Reader, WireError},
};

pub(crate) struct ProcedureSlot {
    pub rule: CallRule,
    pub scope: Scope,
    pub handler: Handler,
}

pub struct Entity {
    identity: Identity,
    authority: Identity,
    position: Vec3,
    pub(crate) signatures: BTreeMap<Key, SignatureSlot>,
    pub(crate) procedures: BTreeMap<Key, ProcedureSlot>,
}

impl Entity {
    pub fn new(identity: Identity, authority: Identity) -> Self {
        Self {
            identity,
            authority,
            position: Vec3::ZERO,
            signatures: BTreeMap::new(),
            procedures: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn authority(&self) -> Identity {
        self.authority
    }

    pub fn set_authority(&mut self, authority: Identity) {
        self.authority = authority;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// `false` if the key is taken or the rate is not positive.
    pub fn register_signature(&mut self, offset: u8, desc: SignatureDescriptor) -> bool {
        let key = Key::combine(offset, desc.id);
        if self.signatures.contains_key(&key) {
            return false;
        }
        let Some(slot) = SignatureSlot::new(desc) else {
            return false;
        };
        self.signatures.insert(key, slot);
        true
    }

    /// `false` if the key is taken.
    pub fn register_procedure(&mut self, offset: u8, desc: ProcedureDescriptor) -> bool {
        let key = Key::combine(offset, desc.id);
        if self.procedures.contains_key(&key) {
            return false;
        }
        self.procedures.insert(
            key,
            ProcedureSlot {
                rule: desc.rule,
                scope: desc.scope,
                handler: desc.handler,
            },
        );
        true
    }

    pub fn has_signature(&self, key: Key) -> bool {
        self.signatures.contains_key(&key)
    }

    pub fn has_procedure(&self, key: Key) -> bool {
        self.procedures.contains_key(&key)
    }

    pub fn signature_rule(&self, key: Key) -> Option<SyncRule> {
        self.signatures.get(&key).map(|s| s.rule)
    }

    pub fn procedure_rule(&self, key: Key) -> Option<CallRule> {
        self.procedures.get(&key).map(|p| p.rule)
    }

    /// Typed view of a signature's field.
    /// Accepts the next push of every signature whatever its timestamp.
    pub(crate) fn forget_sync_times(&mut self) {
        for slot in self.signatures.values_mut() {
            slot.last = 0;
        }
    }

    pub fn field<T: 'static>(&self, offset: u8, id: u8) -> Option<&T> {
        self.signatures
            .get(&Key::combine(offset, id))
            .and_then(|s| s.field.as_any().downcast_ref::<T>())
    }

    pub fn field_mut<T: 'static>(&mut self, offset: u8, id: u8) -> Option<&mut T> {
        self.signatures
            .get_mut(&Key::combine(offset, id))
            .and_then(|s| s.field.as_any_mut().downcast_mut::<T>())
    }

    /// Runs a procedure handler. `Ok(false)` if the key is not registered.
    pub(crate) fn invoke(
        &mut self,
        invocation: &Invocation,
        r: &mut Reader<'_>,
    ) -> Result<bool, WireError> {
        match self.procedures.get_mut(&invocation.key) {
            Some(slot) => {
                (slot.handler)(invocation, r)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Every networked entity of this process.
#[derive(Default)]
pub struct EntityRegistry {
    entities: BTreeMap<Identity, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` if the identity is taken.
    pub fn create_entity(&mut self, identity: Identity, authority: Identity) -> bool {
        if self.entities.contains_key(&identity) {
            return false;
        }
        self.entities
            .insert(identity, Entity::new(identity, authority));
        debug!(entity = %identity, %authority, "entity created");
        true
    }

    pub fn destroy_entity(&mut self, identity: Identity) -> bool {
        self.entities.remove(&identity).is_some()
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.entities.contains_key(&identity)
    }

    pub fn get(&self, identity: Identity) -> Option<&Entity> {
        self.entities.get(&identity)
    }

    pub fn get_mut(&mut self, identity: Identity) -> Option<&mut Entity> {
        self.entities.get_mut(&identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// A random identity no entity uses yet.
    pub fn unique_identity(&self) -> Identity {
        Identity::generate(|id| self.entities.contains_key(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn registration_is_keyed_by_offset_and_id() {
        let mut e = Entity::new(Identity(10), Identity::SERVER);
        let sig = || SignatureDescriptor::new(0, 10.0, SyncRule::Server, 0i32);
        assert!(e.register_signature(0, sig()));
        assert!(!e.register_signature(0, sig()));
        assert!(e.register_signature(1, sig()));
        assert!(!e.register_signature(2, SignatureDescriptor::new(0, 0.0, SyncRule::Server, 0i32)));

        let call = || ProcedureDescriptor::new(0, CallRule::Any, |_, _| Ok(()));
        assert!(e.register_procedure(0, call()));
        assert!(!e.register_procedure(0, call()));
        assert!(e.register_procedure(3, call()));
    }

    #[test]
    fn fields_are_typed() {
        let mut e = Entity::new(Identity(10), Identity::SERVER);
        e.register_signature(1, SignatureDescriptor::new(2, 10.0, SyncRule::Round, Vec3::ZERO));
        *e.field_mut::<Vec3>(1, 2).unwrap() = Vec3::new(1.0, 1.0, 1.0);
        assert_eq!(e.field::<Vec3>(1, 2), Some(&Vec3::new(1.0, 1.0, 1.0)));
        assert!(e.field::<i32>(1, 2).is_none());
        assert!(e.field::<Vec3>(0, 2).is_none());
    }

    #[test]
    fn invoke_runs_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut e = Entity::new(Identity(10), Identity::SERVER);
        e.register_procedure(
            0,
            ProcedureDescriptor::new(4, CallRule::Any, move |inv, r| {
                sink.lock().unwrap().push((inv.sender, r.read_i32()?));
                Ok(())
            }),
        );

        let inv = Invocation {
            entity: Identity(10),
            key: Key::combine(0, 4),
            target: Identity::ANY,
            sender: Identity(2),
        };
        let bytes = 77i32.to_le_bytes();
        assert!(e.invoke(&inv, &mut Reader::new(&bytes)).unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![(Identity(2), 77)]);

        let missing = Invocation {
            key: Key::combine(0, 5),
            ..inv
        };
        assert!(!e.invoke(&missing, &mut Reader::new(&bytes)).unwrap());
    }

    #[test]
    fn registry_refuses_duplicates() {
        let mut reg = EntityRegistry::new();
        assert!(reg.create_entity(Identity(5), Identity(1)));
        assert!(!reg.create_entity(Identity(5), Identity(2)));
        assert_eq!(reg.get(Identity(5)).unwrap().authority(), Identity(1));

        let fresh = reg.unique_identity();
        assert!(!reg.contains(fresh));
        assert!(reg.destroy_entity(Identity(5)));
        assert!(reg.is_empty());
    }
}

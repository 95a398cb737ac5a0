//! A tiny shared world for the bundled binaries and tests.
//!
//! Both sides must register the same objects and the same entity layout, so
//! the definitions live here:
//! - `Scoreboard`: a replicated map from client identity to ping count.
//! - The beacon: a server-owned entity whose position is pushed to everyone,
//!   which clients can ping and through which the server announces ticks.

use std::sync::{Arc, Mutex};

use crate::{
    collections::Map,
    entity::Entity,
    identity::{Identity, ObjectId},
    math::Vec3,
    packets::Spawn,
    procedure::{CallRule, ProcedureDescriptor},
    registry::ObjectRegistry,
    signature::{SignatureDescriptor, SyncRule},
};

pub const SCOREBOARD: &str = "Scoreboard";

pub type Scoreboard = Map<i32, u32>;

pub const BEACON: Identity = Identity(1_000);
pub const BEACON_ASSET: u32 = 1;

/// Component offset of the beacon's registrations.
pub const BEACON_OFFSET: u8 = 0;
pub const POSITION: u8 = 0;
pub const PING: u8 = 0;
pub const ANNOUNCE: u8 = 1;

/// Pushes per second of the beacon position.
pub const POSITION_RATE: f32 = 10.0;

/// Senders of pings received since the last drain.
pub type PingLog = Arc<Mutex<Vec<Identity>>>;

/// Ticks announced by the server since the last drain.
pub type AnnounceLog = Arc<Mutex<Vec<u32>>>;

pub fn scoreboard_id() -> ObjectId {
    ObjectId::derive(SCOREBOARD, 0, 0)
}

pub fn create_scoreboard(objects: &mut ObjectRegistry) -> Option<ObjectId> {
    objects.create(SCOREBOARD, 0, 0, Scoreboard::new())
}

pub fn beacon_spawn() -> Spawn {
    Spawn {
        asset: BEACON_ASSET,
        world: Identity::SERVER,
        entity: BEACON,
        authority: Identity::SERVER,
        position: Vec3::ZERO,
        rotation: Vec3::ZERO,
    }
}

/// Where the beacon is at `tick`: a slow circle of radius 10.
pub fn beacon_position(tick: u32) -> Vec3 {
    let angle = tick as f32 * 0.05;
    Vec3::new(angle.cos() * 10.0, 0.0, angle.sin() * 10.0)
}

/// Registers the beacon layout on `entity`.
pub fn register_beacon(entity: &mut Entity, pings: PingLog, announces: AnnounceLog) -> bool {
    let position = entity.position();
    let sig = entity.register_signature(
        BEACON_OFFSET,
        SignatureDescriptor::new(POSITION, POSITION_RATE, SyncRule::Server, position),
    );
    let ping = entity.register_procedure(
        BEACON_OFFSET,
        ProcedureDescriptor::new(PING, CallRule::Client, move |inv, _| {
            pings
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(inv.sender);
            Ok(())
        }),
    );
    let announce = entity.register_procedure(
        BEACON_OFFSET,
        ProcedureDescriptor::new(ANNOUNCE, CallRule::Server, move |_, r| {
            let tick = r.read_u32()?;
            announces
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(tick);
            Ok(())
        }),
    );
    sig && ping && announce
}

/// Empties a shared log.
pub fn drain<T>(log: &Arc<Mutex<Vec<T>>>) -> Vec<T> {
    std::mem::take(&mut *log.lock().unwrap_or_else(|e| e.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_layout_registers_once() {
        let mut e = Entity::new(BEACON, Identity::SERVER);
        let pings = PingLog::default();
        let announces = AnnounceLog::default();
        assert!(register_beacon(&mut e, pings.clone(), announces.clone()));
        assert!(!register_beacon(&mut e, pings, announces));
        assert_eq!(e.field::<Vec3>(BEACON_OFFSET, POSITION), Some(&Vec3::ZERO));
    }

    #[test]
    fn scoreboard_id_matches_creation() {
        let mut objects = ObjectRegistry::new(true);
        assert_eq!(create_scoreboard(&mut objects), Some(scoreboard_id()));
    }
}

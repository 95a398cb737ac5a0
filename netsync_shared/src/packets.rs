//! Packet kinds and fixed headers.
//!
//! Every payload handed to the transport starts with a one-byte [`PacketKind`];
//! the header that follows is fixed per kind, the body is type specific.

use crate::{
    identity::{Identity, Key, ObjectId},
    math::Vec3,
    wire::{Reader, WireError, Writer},
};

/// First byte of every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Sync = 1,
    Call = 2,
    Snapshot = 3,
    Delta = 4,
    Find = 5,
    Spawn = 6,
    Cease = 7,
    Handover = 8,
}

impl TryFrom<u8> for PacketKind {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            1 => PacketKind::Sync,
            2 => PacketKind::Call,
            3 => PacketKind::Snapshot,
            4 => PacketKind::Delta,
            5 => PacketKind::Find,
            6 => PacketKind::Spawn,
            7 => PacketKind::Cease,
            8 => PacketKind::Handover,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

impl PacketKind {
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Self::try_from(r.read_u8()?)
    }

    pub fn write(self, w: &mut Writer) {
        w.write_u8(self as u8);
    }
}

/// Header of a signature push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHeader {
    pub entity: Identity,
    pub key: Key,
}

impl SyncHeader {
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            entity: Identity(r.read_i32()?),
            key: Key(r.read_u16()?),
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.entity.0);
        w.write_u16(self.key.0);
    }
}

/// Header of a procedure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallHeader {
    /// Peer the call is addressed to, or [`Identity::ANY`].
    pub target: Identity,
    /// Entity whose procedure is invoked.
    pub entity: Identity,
    pub key: Key,
}

impl CallHeader {
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            target: Identity(r.read_i32()?),
            entity: Identity(r.read_i32()?),
            key: Key(r.read_u16()?),
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.target.0);
        w.write_i32(self.entity.0);
        w.write_u16(self.key.0);
    }
}

/// Announces a networked entity to replicas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spawn {
    pub asset: u32,
    pub world: Identity,
    pub entity: Identity,
    pub authority: Identity,
    pub position: Vec3,
    pub rotation: Vec3,
}

impl Spawn {
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            asset: r.read_u32()?,
            world: Identity(r.read_i32()?),
            entity: Identity(r.read_i32()?),
            authority: Identity(r.read_i32()?),
            position: r.read_vec3()?,
            rotation: r.read_vec3()?,
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_u32(self.asset);
        w.write_i32(self.world.0);
        w.write_i32(self.entity.0);
        w.write_i32(self.authority.0);
        w.write_vec3(self.position);
        w.write_vec3(self.rotation);
    }
}

/// Withdraws a networked entity from replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cease {
    pub entity: Identity,
    pub authority: Identity,
}

impl Cease {
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            entity: Identity(r.read_i32()?),
            authority: Identity(r.read_i32()?),
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.entity.0);
        w.write_i32(self.authority.0);
    }
}

/// Moves authority over a live entity to another peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handover {
    pub entity: Identity,
    pub authority: Identity,
}

impl Handover {
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            entity: Identity(r.read_i32()?),
            authority: Identity(r.read_i32()?),
        })
    }

    pub fn write(&self, w: &mut Writer) {
        w.write_i32(self.entity.0);
        w.write_i32(self.authority.0);
    }
}

/// Reads the object identifier that follows a Snapshot, Delta or Find kind.
pub fn read_object(r: &mut Reader<'_>) -> Result<ObjectId, WireError> {
    Ok(ObjectId(r.read_u64()?))
}

pub fn write_object(w: &mut Writer, id: ObjectId) {
    w.write_u64(id.0);
}

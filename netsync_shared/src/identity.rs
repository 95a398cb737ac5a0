//! Identities, registration keys and object identifiers.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Names a networked entity or, in connection position, a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub i32);

impl Identity {
    /// The authoritative peer.
    pub const SERVER: Identity = Identity(0);
    /// Broadcast call target.
    pub const ANY: Identity = Identity(-1);

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    /// Draws a random positive identity rejected by `taken` until one is free.
    pub fn generate(mut taken: impl FnMut(Identity) -> bool) -> Identity {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = Identity(rng.gen_range(1..i32::MAX));
            if !taken(candidate) {
                return candidate;
            }
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ANY => write!(f, "any"),
            Self::SERVER => write!(f, "server"),
            Identity(v) => write!(f, "#{v}"),
        }
    }
}

/// Signature or procedure key: component offset in the high byte, local id in
/// the low byte. Offset 0 belongs to the entity itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub u16);

impl Key {
    pub const fn combine(offset: u8, id: u8) -> Key {
        Key(((offset as u16) << 8) | id as u16)
    }

    pub const fn offset(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn id(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.offset(), self.id())
    }
}

/// Identifier of a change-log unit.
///
/// Derived from `(type tag, instance, member)` so that server and clients name
/// the same logical object identically without exchanging ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl ObjectId {
    pub fn derive(type_tag: &str, instance: u16, member: u16) -> ObjectId {
        ObjectId(((fnv1a(type_tag) as u64) << 32) | ((instance as u64) << 16) | member as u64)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// Stable across processes and toolchains, unlike `DefaultHasher`.
fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in s.bytes() {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

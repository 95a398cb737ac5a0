//! `netsync_shared`
//!
//! Replication core used by both client and server.
//!
//! Two mechanisms share one runtime:
//! - Change-log units: versioned objects whose mutations travel as numbered
//!   operation ranges, with snapshots to bootstrap and resynchronize.
//! - The invocation multiplexer: per-entity signatures pushed on a timer and
//!   procedures invoked remotely, both gated by authority and relevance.
//!
//! Design goals:
//! - One cooperative tick per process; no locks in the core.
//! - Registries are services owned by the runtime, never globals.
//! - Role differences live behind the `Role` trait.
//! - No `unsafe`.

pub mod arena;
pub mod collections;
pub mod config;
pub mod entity;
pub mod event;
pub mod identity;
pub mod math;
pub mod net;
pub mod packets;
pub mod procedure;
pub mod registry;
pub mod relevance;
pub mod role;
pub mod runtime;
pub mod signature;
pub mod transport;
pub mod unit;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::collections::{List, Map, Value};
    pub use crate::config::NetConfig;
    pub use crate::entity::{Entity, EntityRegistry};
    pub use crate::event::{Ceased, HandedOver, PeerConnected, PeerDisconnected, Spawned};
    pub use crate::identity::{Identity, Key, ObjectId};
    pub use crate::math::{Aabb, Vec3};
    pub use crate::packets::{Cease, Handover, Spawn};
    pub use crate::procedure::{CallError, CallRule, Invocation, ProcedureDescriptor};
    pub use crate::registry::ObjectRegistry;
    pub use crate::relevance::{Everyone, Observer, ObserverTable, Relevance, Scope};
    pub use crate::role::{Authoritative, Replica, Role};
    pub use crate::runtime::{ClientRuntime, Runtime, ServerRuntime};
    pub use crate::signature::{SignatureDescriptor, SyncRule};
    pub use crate::transport::{Channel, MemoryHub, MemoryTransport, Transport, TransportEvent};
    pub use crate::unit::{ChangeLog, Ingest, Operation, Replicated, UnitError};
    pub use crate::wire::{Field, Reader, WireError, Writer};
}

//! `netsync_server`
//!
//! Server-side host:
//! - Fixed-rate replication loop around the authoritative runtime
//! - UDP transport with per-client identities
//! - Arena bookkeeping (scoreboard, beacon)
//!
//! Networking model:
//! - One UDP socket; channels are tags on each datagram
//! - Clients are identified by the address their hello came from

pub mod server;

pub use server::ReplicationServer;

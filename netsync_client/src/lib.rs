//! `netsync_client`
//!
//! Client-side host:
//! - UDP link to the server
//! - Replica runtime mirroring the arena
//! - Console for status and pings

pub mod client;

pub use client::ReplicationClient;

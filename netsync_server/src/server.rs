//! Server implementation.
//!
//! An authoritative replication loop over UDP. It supports:
//! - Client join/leave through the UDP transport's hello/heartbeat scheme
//! - The shared arena: the scoreboard object and the beacon entity
//! - Console commands (status, spawn, cease, quit)
//!
//! Determinism notes:
//! - Keep the tick fixed; signature schedules run on tick time, not wall time.
//! - Use stable ordering when iterating collections.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use netsync_shared::{
    arena::{self, AnnounceLog, PingLog, Scoreboard},
    config::NetConfig,
    event::{PeerConnected, PeerDisconnected},
    identity::Identity,
    math::Vec3,
    net::UdpServerTransport,
    packets::Spawn,
    relevance::{Observer, ObserverTable},
    runtime::{Runtime, ServerRuntime},
    transport::Channel,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// How far a client sees.
const OBSERVER_RADIUS: f32 = 100.0;

/// Ticks between beacon announcements.
const ANNOUNCE_EVERY: u32 = 64;

/// Replication server.
pub struct ReplicationServer {
    pub cfg: NetConfig,
    runtime: ServerRuntime<UdpServerTransport, ObserverTable>,
    pings: PingLog,
    tick: u32,
    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
    quit: bool,
}

impl ReplicationServer {
    /// Binds the socket and sets up the arena.
    pub async fn new(cfg: NetConfig) -> anyhow::Result<Self> {
        let transport = UdpServerTransport::bind(&cfg).await?;
        let mut runtime = Runtime::server(transport, ObserverTable::new()).with_config(&cfg);
        arena::create_scoreboard(runtime.objects_mut()).context("create scoreboard")?;

        let pings = PingLog::default();
        runtime.spawn(arena::beacon_spawn());
        let beacon = runtime
            .entity_mut(arena::BEACON)
            .context("beacon missing after spawn")?;
        // The server never receives announcements; the log only satisfies the layout.
        arena::register_beacon(beacon, pings.clone(), AnnounceLog::default());

        Ok(Self {
            cfg,
            runtime,
            pings,
            tick: 0,
            console_rx: None,
            quit: false,
        })
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.runtime.transport().local_addr()
    }

    pub fn runtime(&self) -> &ServerRuntime<UdpServerTransport, ObserverTable> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut ServerRuntime<UdpServerTransport, ObserverTable> {
        &mut self.runtime
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Ping count per client identity.
    pub fn scores(&self) -> Vec<(i32, u32)> {
        self.runtime
            .objects()
            .get::<Scoreboard>(arena::scoreboard_id())
            .map(|board| board.state().entries().iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_millis(self.cfg.tick_ms());
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step()?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one replication tick.
    pub fn step(&mut self) -> anyhow::Result<()> {
        self.process_console_commands();
        let now_ms = u64::from(self.tick) * self.cfg.tick_ms();

        self.move_beacon();
        self.runtime.update(now_ms);
        self.track_peers();
        self.score_pings()?;

        if self.tick > 0 && self.tick % ANNOUNCE_EVERY == 0 {
            let tick = self.tick;
            self.runtime
                .call_remote(
                    arena::BEACON,
                    Identity::ANY,
                    Channel::Irregular,
                    arena::BEACON_OFFSET,
                    arena::ANNOUNCE,
                    |w| w.write_u32(tick),
                )
                .context("announce tick")?;
        }
        self.tick += 1;
        Ok(())
    }

    fn process_console_commands(&mut self) {
        let lines: Vec<String> = match self.console_rx {
            Some(ref mut rx) => {
                let mut collected = Vec::new();
                while let Ok(line) = rx.try_recv() {
                    collected.push(line);
                }
                collected
            }
            None => Vec::new(),
        };
        for line in lines {
            for out in self.exec_console(&line) {
                println!("{out}");
            }
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return Vec::new();
        };

        match command {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Clients: {}", self.runtime.peers().len()));
                for peer in self.runtime.peers() {
                    out.push(format!("  {peer}"));
                }
                out.push(format!("Objects: {}", self.runtime.objects().len()));
                out.push(format!("Entities: {}", self.runtime.entities().len()));
                for (client, pings) in self.scores() {
                    out.push(format!("  #{client}: {pings} pings"));
                }
                out
            }
            "spawn" => {
                let Some(entity) = tokens.get(1).and_then(|t| t.parse::<i32>().ok()) else {
                    return vec!["Usage: spawn <entity> [authority]".to_string()];
                };
                let authority = tokens
                    .get(2)
                    .and_then(|t| t.parse::<i32>().ok())
                    .map(Identity)
                    .unwrap_or(Identity::SERVER);
                let spawn = Spawn {
                    asset: 0,
                    world: Identity::SERVER,
                    entity: Identity(entity),
                    authority,
                    position: Vec3::ZERO,
                    rotation: Vec3::ZERO,
                };
                if self.runtime.spawn(spawn) {
                    vec![format!("Spawned {}", Identity(entity))]
                } else {
                    vec![format!("Entity {} already exists", Identity(entity))]
                }
            }
            "cease" => match tokens.get(1).and_then(|t| t.parse::<i32>().ok()) {
                Some(entity) if self.runtime.cease(Identity(entity)) => {
                    vec![format!("Ceased {}", Identity(entity))]
                }
                Some(entity) => vec![format!("No entity {}", Identity(entity))],
                None => vec!["Usage: cease <entity>".to_string()],
            },
            "quit" | "exit" => {
                info!("Server shutting down");
                self.runtime.transport_mut().shutdown();
                self.quit = true;
                Vec::new()
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }

    fn move_beacon(&mut self) {
        let position = arena::beacon_position(self.tick);
        if let Some(beacon) = self.runtime.entity_mut(arena::BEACON) {
            beacon.set_position(position);
            if let Some(field) = beacon.field_mut::<Vec3>(arena::BEACON_OFFSET, arena::POSITION) {
                *field = position;
            }
        }
    }

    fn track_peers(&mut self) {
        for PeerConnected { peer } in self.runtime.drain_events::<PeerConnected>() {
            self.runtime
                .relevance_mut()
                .add_observer(peer, Observer::new(Vec3::ZERO, OBSERVER_RADIUS));
        }
        for PeerDisconnected { peer } in self.runtime.drain_events::<PeerDisconnected>() {
            self.runtime.relevance_mut().remove_peer(peer);
        }
    }

    fn score_pings(&mut self) -> anyhow::Result<()> {
        let pings = arena::drain(&self.pings);
        if pings.is_empty() {
            return Ok(());
        }
        let board = self
            .runtime
            .objects_mut()
            .get_mut::<Scoreboard>(arena::scoreboard_id())
            .context("scoreboard missing")?;
        for sender in pings {
            let count = board.get(&sender.0).copied().unwrap_or(0) + 1;
            if let Err(e) = board.insert(sender.0, count) {
                warn!(%sender, error = %e, "score not recorded");
                continue;
            }
            debug!(%sender, count, "ping");
        }
        Ok(())
    }
}

/// Helper for tests: bind to an ephemeral loopback port.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(ReplicationServer, NetConfig)> {
    let cfg = NetConfig {
        server_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string(),
        tick_hz,
        ..Default::default()
    };
    let server = ReplicationServer::new(cfg).await?;
    let mut cfg = server.cfg.clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}

//! Client implementation.
//!
//! The client maintains:
//! - A UDP link to the server (hello until welcomed, heartbeats after)
//! - A replica runtime mirroring the arena
//! - Console commands for poking the server

use anyhow::Context;
use netsync_shared::{
    arena::{self, AnnounceLog, PingLog, Scoreboard},
    config::NetConfig,
    event::{Ceased, HandedOver, PeerConnected, PeerDisconnected, Spawned},
    identity::Identity,
    math::Vec3,
    net::UdpClientTransport,
    runtime::{ClientRuntime, Runtime},
    transport::Channel,
};
use tracing::{debug, info, warn};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Hello sent, no welcome yet.
    Connecting,
    /// Welcomed; replicating.
    Connected,
    /// Lost the server after having joined. Replicated state is discarded and
    /// requested again once the server answers.
    Reconnecting,
}

/// Replication client.
pub struct ReplicationClient {
    pub cfg: NetConfig,
    state: ClientState,
    runtime: ClientRuntime<UdpClientTransport>,
    announces: AnnounceLog,
    last_announce: Option<u32>,
    tick: u32,
    quit: bool,
}

impl ReplicationClient {
    /// Opens the socket and starts knocking. Does not wait for the welcome.
    pub async fn connect(cfg: &NetConfig) -> anyhow::Result<Self> {
        info!(server = %cfg.server_addr, "Connecting to server");
        let transport = UdpClientTransport::connect(cfg).await?;
        let mut runtime = Runtime::client(transport).with_config(cfg);
        arena::create_scoreboard(runtime.objects_mut()).context("create scoreboard")?;

        Ok(Self {
            cfg: cfg.clone(),
            state: ClientState::Connecting,
            runtime,
            announces: AnnounceLog::default(),
            last_announce: None,
            tick: 0,
            quit: false,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Identity assigned by the server.
    pub fn identity(&self) -> Option<Identity> {
        self.runtime.local()
    }

    pub fn runtime(&self) -> &ClientRuntime<UdpClientTransport> {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut ClientRuntime<UdpClientTransport> {
        &mut self.runtime
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Latest tick the server announced through the beacon.
    pub fn last_announce(&self) -> Option<u32> {
        self.last_announce
    }

    /// Replicated scoreboard, once its first snapshot arrived.
    pub fn scores(&self) -> Option<Vec<(i32, u32)>> {
        let board = self
            .runtime
            .objects()
            .get::<Scoreboard>(arena::scoreboard_id())?;
        if board.is_reconfiguring() {
            return None;
        }
        Some(board.state().entries().iter().map(|(k, v)| (*k, *v)).collect())
    }

    pub fn beacon_position(&self) -> Option<Vec3> {
        self.runtime
            .entity(arena::BEACON)?
            .field::<Vec3>(arena::BEACON_OFFSET, arena::POSITION)
            .copied()
    }

    /// Advances one client tick.
    pub fn step(&mut self) {
        let now_ms = u64::from(self.tick) * self.cfg.tick_ms();
        self.runtime.update(now_ms);
        self.handle_events();
        self.tick += 1;
    }

    /// Asks the server to count a ping for this client.
    pub fn ping(&mut self) -> anyhow::Result<()> {
        self.runtime
            .call_remote(
                arena::BEACON,
                Identity::SERVER,
                Channel::Irregular,
                arena::BEACON_OFFSET,
                arena::PING,
                |_| {},
            )
            .context("ping")?;
        Ok(())
    }

    fn handle_events(&mut self) {
        for PeerConnected { peer } in self.runtime.drain_events::<PeerConnected>() {
            info!(%peer, identity = ?self.runtime.local(), "Connected");
            self.state = ClientState::Connected;
        }
        for PeerDisconnected { peer } in self.runtime.drain_events::<PeerDisconnected>() {
            warn!(%peer, "Lost connection, reconnecting");
            self.state = ClientState::Reconnecting;
        }
        for Spawned(spawn) in self.runtime.drain_events::<Spawned>() {
            debug!(entity = %spawn.entity, asset = spawn.asset, "Spawned");
            if spawn.asset != arena::BEACON_ASSET {
                continue;
            }
            let announces = self.announces.clone();
            if let Some(beacon) = self.runtime.entity_mut(spawn.entity) {
                // Pings run on the server only; this log stays empty.
                arena::register_beacon(beacon, PingLog::default(), announces);
            }
        }
        for Ceased(cease) in self.runtime.drain_events::<Ceased>() {
            debug!(entity = %cease.entity, "Ceased");
        }
        for HandedOver(handover) in self.runtime.drain_events::<HandedOver>() {
            debug!(entity = %handover.entity, authority = %handover.authority, "Authority moved");
        }
        for tick in arena::drain(&self.announces) {
            debug!(tick, "Server announced tick");
            self.last_announce = Some(tick);
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
                out.push(format!("State: {:?}", self.state));
                match self.identity() {
                    Some(id) => out.push(format!("Identity: {id}")),
                    None => out.push("Identity: none".to_string()),
                }
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Entities: {}", self.runtime.entities().len()));
                if let Some(p) = self.beacon_position() {
                    out.push(format!("Beacon: ({:.1}, {:.1}, {:.1})", p.x, p.y, p.z));
                }
                if let Some(tick) = self.last_announce {
                    out.push(format!("Last announce: tick {tick}"));
                }
                out
            }
            "ping" => match self.ping() {
                Ok(()) => vec!["Ping sent".to_string()],
                Err(e) => vec![format!("Ping failed: {e:#}")],
            },
            "scores" => match self.scores() {
                Some(scores) if scores.is_empty() => vec!["No pings yet".to_string()],
                Some(scores) => scores
                    .into_iter()
                    .map(|(client, pings)| format!("#{client}: {pings}"))
                    .collect(),
                None => vec!["Scoreboard not synchronized yet".to_string()],
            },
            "quit" | "exit" => {
                self.runtime.transport_mut().shutdown();
                self.quit = true;
                Vec::new()
            }
            other => vec![format!("Unknown command: {other}")],
        }
    }
}

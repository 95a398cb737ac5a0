//! UDP transport.
//!
//! Goals:
//! - Give the runtime a real socket without blocking the tick.
//! - Keep the connection scheme minimal: hello, welcome, heartbeat, bye.
//! - Keep framing explicit: one datagram is one frame.
//!
//! Channels are carried as a tag only. Nothing is retransmitted or reordered,
//! so `Irregular` and `Ordered` are as unreliable as `Direct` here.

use std::{
    collections::HashMap,
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use bytes::Bytes;
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, info, trace, warn};

use crate::{
    config::NetConfig,
    identity::Identity,
    transport::{Channel, Transport, TransportEvent},
    wire::{Reader, WireError, Writer},
};

/// Bumped on any incompatible framing change.
pub const PROTOCOL_VERSION: u32 = 1;

const MAX_DATAGRAM: usize = 64 * 1024;

/// One datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Hello { protocol: u32 },
    Welcome { identity: Identity },
    Heartbeat,
    Data {
        channel: Channel,
        timestamp: u32,
        payload: Bytes,
    },
    Bye,
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        let mut w = Writer::new();
        match self {
            Frame::Hello { protocol } => {
                w.write_u8(0);
                w.write_u32(*protocol);
            }
            Frame::Welcome { identity } => {
                w.write_u8(1);
                w.write_i32(identity.0);
            }
            Frame::Heartbeat => w.write_u8(2),
            Frame::Data {
                channel,
                timestamp,
                payload,
            } => {
                w.write_u8(3);
                w.write_u8(*channel as u8);
                w.write_u32(*timestamp);
                w.write_raw(payload);
            }
            Frame::Bye => w.write_u8(4),
        }
        w.freeze()
    }

    pub fn decode(datagram: &[u8]) -> Result<Frame, WireError> {
        let mut r = Reader::new(datagram);
        Ok(match r.read_u8()? {
            0 => Frame::Hello {
                protocol: r.read_u32()?,
            },
            1 => Frame::Welcome {
                identity: Identity(r.read_i32()?),
            },
            2 => Frame::Heartbeat,
            3 => {
                let raw = r.read_u8()?;
                let channel = Channel::from_u8(raw).ok_or(WireError::UnknownChannel(raw))?;
                let timestamp = r.read_u32()?;
                Frame::Data {
                    channel,
                    timestamp,
                    payload: Bytes::copy_from_slice(r.rest()),
                }
            }
            4 => Frame::Bye,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

/// Milliseconds since `origin`, wrapping.
fn clock_ms(origin: Instant) -> u32 {
    origin.elapsed().as_millis() as u32
}

fn try_send(socket: &UdpSocket, frame: &Frame, to: SocketAddr) {
    match socket.try_send_to(&frame.encode(), to) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            debug!(%to, "socket busy, datagram dropped");
        }
        Err(e) => warn!(%to, error = %e, "udp send failed"),
    }
}

struct ClientLink {
    identity: Identity,
    last_heard: Instant,
    last_sent: Instant,
}

/// Server end: accepts any number of clients on one socket.
pub struct UdpServerTransport {
    socket: UdpSocket,
    origin: Instant,
    timeout: Duration,
    heartbeat: Duration,
    links: HashMap<SocketAddr, ClientLink>,
    addrs: HashMap<Identity, SocketAddr>,
    next_identity: i32,
}

impl UdpServerTransport {
    pub async fn bind(cfg: &NetConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let socket = UdpSocket::bind(addr).await.context("udp bind")?;
        Ok(Self {
            socket,
            origin: Instant::now(),
            timeout: Duration::from_millis(cfg.peer_timeout_ms),
            heartbeat: Duration::from_millis(cfg.heartbeat_ms),
            links: HashMap::new(),
            addrs: HashMap::new(),
            next_identity: 1,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn client_count(&self) -> usize {
        self.links.len()
    }

    /// Says goodbye to every client and forgets them.
    pub fn shutdown(&mut self) {
        for addr in self.links.keys() {
            try_send(&self.socket, &Frame::Bye, *addr);
        }
        self.links.clear();
        self.addrs.clear();
    }

    fn admit(&mut self, from: SocketAddr, now: Instant, events: &mut Vec<TransportEvent>) {
        let identity = match self.links.get_mut(&from) {
            Some(link) => {
                link.last_heard = now;
                link.identity
            }
            None => {
                let identity = Identity(self.next_identity);
                self.next_identity += 1;
                self.links.insert(
                    from,
                    ClientLink {
                        identity,
                        last_heard: now,
                        last_sent: now,
                    },
                );
                self.addrs.insert(identity, from);
                info!(%identity, %from, "client connected");
                events.push(TransportEvent::PeerJoined {
                    peer: identity,
                    assigned: None,
                });
                identity
            }
        };
        // Resent on every hello in case the first welcome was lost.
        try_send(&self.socket, &Frame::Welcome { identity }, from);
    }

    fn forget(&mut self, from: SocketAddr, events: &mut Vec<TransportEvent>) {
        if let Some(link) = self.links.remove(&from) {
            self.addrs.remove(&link.identity);
            events.push(TransportEvent::PeerLeft {
                peer: link.identity,
            });
        }
    }
}

impl Transport for UdpServerTransport {
    fn send(&mut self, to: Identity, channel: Channel, payload: Bytes) {
        let Some(addr) = self.addrs.get(&to).copied() else {
            trace!(%to, "no such client, dropping");
            return;
        };
        let frame = Frame::Data {
            channel,
            timestamp: clock_ms(self.origin),
            payload,
        };
        try_send(&self.socket, &frame, addr);
        if let Some(link) = self.links.get_mut(&addr) {
            link.last_sent = Instant::now();
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let now = Instant::now();
        loop {
            let (n, from) = match self.socket.try_recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "udp recv failed");
                    break;
                }
            };
            let frame = match Frame::decode(&buf[..n]) {
                Ok(frame) => frame,
                Err(error) => {
                    debug!(%from, %error, "bad datagram");
                    continue;
                }
            };
            match frame {
                Frame::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                    self.admit(from, now, &mut events)
                }
                Frame::Hello { protocol } => {
                    warn!(%from, protocol, "protocol mismatch, ignoring hello");
                }
                Frame::Heartbeat => {
                    if let Some(link) = self.links.get_mut(&from) {
                        link.last_heard = now;
                    }
                }
                Frame::Data {
                    channel,
                    timestamp,
                    payload,
                } => match self.links.get_mut(&from) {
                    Some(link) => {
                        link.last_heard = now;
                        events.push(TransportEvent::Received {
                            peer: link.identity,
                            channel,
                            timestamp,
                            payload,
                        });
                    }
                    None => trace!(%from, "data before hello"),
                },
                Frame::Bye => self.forget(from, &mut events),
                Frame::Welcome { .. } => debug!(%from, "unexpected welcome"),
            }
        }

        let expired: Vec<SocketAddr> = self
            .links
            .iter()
            .filter(|(_, link)| now.duration_since(link.last_heard) > self.timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in expired {
            info!(%addr, "client timed out");
            self.forget(addr, &mut events);
        }

        for (addr, link) in self.links.iter_mut() {
            if now.duration_since(link.last_sent) >= self.heartbeat {
                try_send(&self.socket, &Frame::Heartbeat, *addr);
                link.last_sent = now;
            }
        }
        events
    }
}

/// Client end: one socket talking to one server.
pub struct UdpClientTransport {
    socket: UdpSocket,
    server: SocketAddr,
    origin: Instant,
    timeout: Duration,
    heartbeat: Duration,
    identity: Option<Identity>,
    last_heard: Instant,
    last_sent: Instant,
    closed: bool,
}

impl UdpClientTransport {
    /// Binds an ephemeral port and says hello. The join shows up in `poll`
    /// once the server answers.
    pub async fn connect(cfg: &NetConfig) -> anyhow::Result<Self> {
        let server: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let bind_ip = match server.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = UdpSocket::bind(SocketAddr::new(bind_ip, 0))
            .await
            .context("udp bind")?;
        let now = Instant::now();
        let transport = Self {
            socket,
            server,
            origin: now,
            timeout: Duration::from_millis(cfg.peer_timeout_ms),
            heartbeat: Duration::from_millis(cfg.heartbeat_ms),
            identity: None,
            last_heard: now,
            last_sent: now,
            closed: false,
        };
        transport.hello();
        Ok(transport)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.identity
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Says goodbye and stops knocking for good.
    pub fn shutdown(&mut self) {
        self.closed = true;
        if self.identity.take().is_some() {
            try_send(&self.socket, &Frame::Bye, self.server);
        }
    }

    fn hello(&self) {
        try_send(
            &self.socket,
            &Frame::Hello {
                protocol: PROTOCOL_VERSION,
            },
            self.server,
        );
    }
}

impl Transport for UdpClientTransport {
    fn send(&mut self, to: Identity, channel: Channel, payload: Bytes) {
        if to != Identity::SERVER || self.identity.is_none() {
            trace!(%to, "not connected to that peer, dropping");
            return;
        }
        let frame = Frame::Data {
            channel,
            timestamp: clock_ms(self.origin),
            payload,
        };
        try_send(&self.socket, &frame, self.server);
        self.last_sent = Instant::now();
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let now = Instant::now();
        loop {
            let (n, from) = match self.socket.try_recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "udp recv failed");
                    break;
                }
            };
            if from != self.server {
                trace!(%from, "datagram from a stranger");
                continue;
            }
            let frame = match Frame::decode(&buf[..n]) {
                Ok(frame) => frame,
                Err(error) => {
                    debug!(%error, "bad datagram");
                    continue;
                }
            };
            self.last_heard = now;
            match frame {
                Frame::Welcome { identity } => {
                    if self.identity.is_none() {
                        self.identity = Some(identity);
                        info!(%identity, server = %self.server, "welcomed");
                        events.push(TransportEvent::PeerJoined {
                            peer: Identity::SERVER,
                            assigned: Some(identity),
                        });
                    }
                }
                Frame::Data {
                    channel,
                    timestamp,
                    payload,
                } if self.identity.is_some() => events.push(TransportEvent::Received {
                    peer: Identity::SERVER,
                    channel,
                    timestamp,
                    payload,
                }),
                Frame::Bye => {
                    if self.identity.take().is_some() {
                        events.push(TransportEvent::PeerLeft {
                            peer: Identity::SERVER,
                        });
                    }
                }
                _ => {}
            }
        }

        match self.identity {
            Some(_) if now.duration_since(self.last_heard) > self.timeout => {
                info!(server = %self.server, "server timed out");
                self.identity = None;
                events.push(TransportEvent::PeerLeft {
                    peer: Identity::SERVER,
                });
            }
            Some(_) => {
                if now.duration_since(self.last_sent) >= self.heartbeat {
                    try_send(&self.socket, &Frame::Heartbeat, self.server);
                    self.last_sent = now;
                }
            }
            None => {
                // Keep knocking until welcomed.
                if now.duration_since(self.last_sent) >= self.heartbeat {
                    self.hello();
                    self.last_sent = now;
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_layout() {
        let frame = Frame::Data {
            channel: Channel::Irregular,
            timestamp: 0x0102,
            payload: Bytes::from_static(&[9, 9]),
        };
        let bytes = frame.encode();
        assert_eq!(&bytes[..], &[3, 1, 0x02, 0x01, 0, 0, 9, 9]);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn bad_frames_are_rejected() {
        assert_eq!(Frame::decode(&[9]), Err(WireError::UnknownKind(9)));
        assert_eq!(
            Frame::decode(&[3, 7, 0, 0, 0, 0]),
            Err(WireError::UnknownChannel(7))
        );
        assert!(Frame::decode(&[]).is_err());
    }

    #[tokio::test]
    async fn hello_welcome_over_loopback() {
        let cfg = NetConfig {
            server_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let mut server = UdpServerTransport::bind(&cfg).await.unwrap();
        let client_cfg = NetConfig {
            server_addr: server.local_addr().unwrap().to_string(),
            ..Default::default()
        };
        let mut client = UdpClientTransport::connect(&client_cfg).await.unwrap();

        let mut joined = Vec::new();
        for _ in 0..100 {
            joined.extend(server.poll());
            if !joined.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            joined,
            vec![TransportEvent::PeerJoined {
                peer: Identity(1),
                assigned: None
            }]
        );

        let mut welcomed = Vec::new();
        for _ in 0..100 {
            welcomed.extend(client.poll());
            if !welcomed.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(client.identity(), Some(Identity(1)));
        assert_eq!(server.client_count(), 1);
    }
}

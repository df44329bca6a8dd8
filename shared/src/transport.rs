//! Connection-oriented datagram host over UDP
//!
//! A [`Host`] owns one socket and any number of peers. It performs a small
//! connect/accept handshake, assigns each peer a [`PeerId`], and offers two
//! channels per peer:
//! - reliable: sequenced, acknowledged, retransmitted and delivered exactly
//!   once in send order
//! - unreliable: fire-and-forget
//!
//! Callers drive the host with [`Host::service`], which returns one
//! [`TransportEvent`] at a time and performs acks, retransmission,
//! keep-alives and timeout detection as a side effect.

use crate::error::NetError;
use crate::message::PeerId;
use bincode::{deserialize, serialize};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, ToSocketAddrs, UdpSocket};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_DATAGRAM_SIZE: usize = 2048;
/// Room left in a datagram for the frame envelope
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - 64;
/// Id a connecting host gives the server it is attached to
pub const SERVER_PEER: PeerId = 0;

/// Reliable frames further than this ahead of the next expected sequence
/// are neither buffered nor acknowledged
const RECEIVE_WINDOW: u32 = 1024;

/// Datagram envelope, bincode-encoded on the wire
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Frame {
    Connect { protocol_version: u32 },
    Accept { peer_id: PeerId },
    Refuse { reason: String },
    Reliable { sequence: u32, payload: Vec<u8> },
    Unreliable { payload: Vec<u8> },
    Ack { sequence: u32 },
    KeepAlive,
    Disconnect,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetError> {
        serialize(self).map_err(|e| NetError::malformed(format!("frame encoding: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Frame, NetError> {
        deserialize(bytes).map_err(|e| NetError::malformed(format!("frame decoding: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect(PeerId),
    Receive { peer: PeerId, payload: Vec<u8> },
    Disconnect(PeerId),
}

/// Drops outgoing datagrams at random to exercise the reliable channel
#[derive(Debug, Clone, Copy, Default)]
pub struct LossSimulation {
    pub drop_probability: f32,
}

impl LossSimulation {
    pub fn should_drop(&self) -> bool {
        self.drop_probability > 0.0 && rand::random::<f32>() < self.drop_probability
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_peers: usize,
    pub resend_interval: Duration,
    /// Sends of a single reliable frame before its peer is declared lost
    pub max_resend_attempts: u32,
    pub peer_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub connect_timeout: Duration,
    pub loss: LossSimulation,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_peers: 32,
            resend_interval: Duration::from_millis(100),
            max_resend_attempts: 50,
            peer_timeout: Duration::from_secs(5),
            keep_alive_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            loss: LossSimulation::default(),
        }
    }
}

#[derive(Debug)]
struct PendingFrame {
    payload: Vec<u8>,
    last_sent: Instant,
    attempts: u32,
}

/// Per-peer connection and reliability state
#[derive(Debug)]
struct PeerConnection {
    id: PeerId,
    addr: SocketAddr,
    last_seen: Instant,
    last_sent: Instant,
    next_send_sequence: u32,
    unacked: BTreeMap<u32, PendingFrame>,
    next_expected: u32,
    out_of_order: BTreeMap<u32, Vec<u8>>,
}

impl PeerConnection {
    fn new(id: PeerId, addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            addr,
            last_seen: now,
            last_sent: now,
            next_send_sequence: 1,
            unacked: BTreeMap::new(),
            next_expected: 1,
            out_of_order: BTreeMap::new(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn queue_reliable(&mut self, payload: Vec<u8>) -> u32 {
        let sequence = self.next_send_sequence;
        self.next_send_sequence += 1;

        let now = Instant::now();
        self.unacked.insert(
            sequence,
            PendingFrame {
                payload,
                last_sent: now,
                attempts: 1,
            },
        );
        self.last_sent = now;
        sequence
    }

    /// Returns `None` when the frame falls outside the receive window and
    /// must not be acknowledged, otherwise the payloads now deliverable in
    /// order (empty for duplicates and gaps).
    fn accept_reliable(&mut self, sequence: u32, payload: Vec<u8>) -> Option<Vec<Vec<u8>>> {
        if sequence < self.next_expected {
            return Some(Vec::new());
        }
        if sequence - self.next_expected >= RECEIVE_WINDOW {
            return None;
        }

        self.out_of_order.entry(sequence).or_insert(payload);

        let mut ready = Vec::new();
        while let Some(payload) = self.out_of_order.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected += 1;
        }
        Some(ready)
    }
}

/// First IPv4 address, otherwise the first of any family. Servers bind
/// `0.0.0.0` by default, which an IPv6 socket cannot reach.
fn preferred_address<I: IntoIterator<Item = SocketAddr>>(addrs: I) -> Option<SocketAddr> {
    let mut fallback = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback
}

#[derive(Debug)]
pub struct Host {
    socket: UdpSocket,
    config: TransportConfig,
    accepting: bool,
    peers: HashMap<PeerId, PeerConnection>,
    by_addr: HashMap<SocketAddr, PeerId>,
    next_peer_id: PeerId,
    local_id: Option<PeerId>,
    events: VecDeque<TransportEvent>,
    recv_buffer: Vec<u8>,
}

impl Host {
    fn new(socket: UdpSocket, config: TransportConfig, accepting: bool) -> Self {
        Self {
            socket,
            config,
            accepting,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            next_peer_id: 1,
            local_id: None,
            events: VecDeque::new(),
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Binds a host that accepts incoming connections
    pub async fn listen<A: ToSocketAddrs>(addr: A, config: TransportConfig) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| NetError::TransportInitFailed(format!("bind failed: {}", e)))?;

        if let Ok(local) = socket.local_addr() {
            info!("Listening on {}", local);
        }

        Ok(Self::new(socket, config, true))
    }

    /// Binds an ephemeral socket and completes the handshake with `addr`.
    /// The remote side is registered as [`SERVER_PEER`].
    pub async fn connect<A: ToSocketAddrs>(addr: A, config: TransportConfig) -> Result<Self, NetError> {
        let resolved = lookup_host(addr)
            .await
            .map_err(|e| NetError::TransportInitFailed(format!("address lookup failed: {}", e)))?;
        let remote = preferred_address(resolved)
            .ok_or_else(|| NetError::TransportInitFailed("address resolved to nothing".into()))?;

        let bind_addr: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| NetError::TransportInitFailed(format!("bind failed: {}", e)))?;

        let mut host = Self::new(socket, config, false);
        host.handshake(remote).await?;
        Ok(host)
    }

    async fn handshake(&mut self, remote: SocketAddr) -> Result<(), NetError> {
        let deadline = Instant::now() + self.config.connect_timeout;
        let request = Frame::Connect {
            protocol_version: PROTOCOL_VERSION,
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NetError::TransportInitFailed(format!(
                    "no answer from {} within {:?}",
                    remote, self.config.connect_timeout
                )));
            }

            if let Err(e) = self.send_frame(&request, remote).await {
                debug!("Connect request to {} failed: {}", remote, e);
            }

            let wait = remaining.min(self.config.resend_interval);
            let (len, from) =
                match tokio::time::timeout(wait, self.socket.recv_from(&mut self.recv_buffer)).await {
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        debug!("Waiting for {} failed: {}", remote, e);
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                    Ok(Ok(received)) => received,
                };

            if from != remote {
                continue;
            }

            match Frame::from_bytes(&self.recv_buffer[..len]) {
                Ok(Frame::Accept { peer_id }) => {
                    info!("Connected to {} as peer {}", remote, peer_id);
                    self.local_id = Some(peer_id);
                    self.add_peer(SERVER_PEER, remote);
                    return Ok(());
                }
                Ok(Frame::Refuse { reason }) => {
                    return Err(NetError::TransportInitFailed(format!(
                        "{} refused connection: {}",
                        remote, reason
                    )));
                }
                // Anything else arriving before the accept gets retransmitted later
                Ok(_) | Err(_) => continue,
            }
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Id the remote host assigned to us during [`Host::connect`]
    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|p| p.addr)
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    fn add_peer(&mut self, id: PeerId, addr: SocketAddr) {
        self.peers.insert(id, PeerConnection::new(id, addr));
        self.by_addr.insert(addr, id);
        self.events.push_back(TransportEvent::Connect(id));
    }

    fn remove_peer(&mut self, id: PeerId, emit_event: bool) -> bool {
        match self.peers.remove(&id) {
            Some(peer) => {
                self.by_addr.remove(&peer.addr);
                if emit_event {
                    self.events.push_back(TransportEvent::Disconnect(id));
                }
                true
            }
            None => false,
        }
    }

    fn allocate_peer_id(&mut self) -> PeerId {
        loop {
            let id = self.next_peer_id;
            self.next_peer_id = self.next_peer_id.wrapping_add(1);
            if id != SERVER_PEER && !self.peers.contains_key(&id) {
                return id;
            }
        }
    }

    async fn send_frame(&self, frame: &Frame, addr: SocketAddr) -> Result<(), NetError> {
        let data = frame.to_bytes()?;

        if self.config.loss.should_drop() {
            return Ok(());
        }

        self.socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn check_payload(payload: &[u8]) -> Result<(), NetError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(NetError::malformed(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }

    /// Queues `payload` on the peer's reliable channel and sends it once.
    /// Lost datagrams are retransmitted by later [`Host::service`] calls.
    pub async fn send_reliable(&mut self, peer: PeerId, payload: Vec<u8>) -> Result<(), NetError> {
        Self::check_payload(&payload)?;

        let connection = self.peers.get_mut(&peer).ok_or(NetError::PeerNotFound(peer))?;
        let addr = connection.addr;
        let sequence = connection.queue_reliable(payload.clone());

        self.send_frame(&Frame::Reliable { sequence, payload }, addr).await
    }

    pub async fn send_unreliable(&mut self, peer: PeerId, payload: Vec<u8>) -> Result<(), NetError> {
        Self::check_payload(&payload)?;

        let connection = self.peers.get_mut(&peer).ok_or(NetError::PeerNotFound(peer))?;
        connection.last_sent = Instant::now();
        let addr = connection.addr;

        self.send_frame(&Frame::Unreliable { payload }, addr).await
    }

    /// Tells the peer we are leaving and forgets it without emitting a local
    /// disconnect event
    pub async fn disconnect(&mut self, peer: PeerId) -> Result<(), NetError> {
        let addr = self.peer_addr(peer).ok_or(NetError::PeerNotFound(peer))?;
        self.remove_peer(peer, false);
        self.send_frame(&Frame::Disconnect, addr).await
    }

    pub async fn disconnect_all(&mut self) {
        for peer in self.peer_ids() {
            if let Err(e) = self.disconnect(peer).await {
                debug!("Disconnect of peer {} failed: {}", peer, e);
            }
        }
    }

    /// Waits up to `timeout` for the next transport event.
    ///
    /// Returns immediately when an event is already queued or a datagram is
    /// waiting, so calling it in a loop drains everything pending before the
    /// caller gets `None`.
    pub async fn service(&mut self, timeout: Duration) -> Result<Option<TransportEvent>, NetError> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }

        self.maintain().await;
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received =
                match tokio::time::timeout(remaining, self.socket.recv_from(&mut self.recv_buffer)).await {
                    Err(_) => return Ok(None),
                    Ok(result) => result,
                };

            match received {
                Ok((len, addr)) => match Frame::from_bytes(&self.recv_buffer[..len]) {
                    Ok(frame) => self.handle_frame(frame, addr).await,
                    Err(e) => debug!("Dropping datagram from {}: {}", addr, e),
                },
                // ICMP errors from a vanished peer surface here on some platforms
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!("Ignoring socket error: {}", e);
                }
                Err(e) => return Err(e.into()),
            }

            if let Some(event) = self.events.pop_front() {
                return Ok(Some(event));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame, addr: SocketAddr) {
        let Some(peer_id) = self.by_addr.get(&addr).copied() else {
            match frame {
                Frame::Connect { protocol_version } => self.accept(addr, protocol_version).await,
                _ => debug!("Ignoring frame from unknown address {}", addr),
            }
            return;
        };

        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.touch();
        }

        match frame {
            Frame::Connect { .. } => {
                // Our accept was lost, repeat it
                if let Err(e) = self.send_frame(&Frame::Accept { peer_id }, addr).await {
                    warn!("Failed to repeat accept to {}: {}", addr, e);
                }
            }
            Frame::Reliable { sequence, payload } => {
                let Some(peer) = self.peers.get_mut(&peer_id) else {
                    return;
                };
                let Some(ready) = peer.accept_reliable(sequence, payload) else {
                    debug!("Frame {} from peer {} outside receive window", sequence, peer_id);
                    return;
                };

                for payload in ready {
                    self.events.push_back(TransportEvent::Receive {
                        peer: peer_id,
                        payload,
                    });
                }

                if let Err(e) = self.send_frame(&Frame::Ack { sequence }, addr).await {
                    debug!("Failed to ack {} to peer {}: {}", sequence, peer_id, e);
                }
            }
            Frame::Unreliable { payload } => {
                self.events.push_back(TransportEvent::Receive {
                    peer: peer_id,
                    payload,
                });
            }
            Frame::Ack { sequence } => {
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    peer.unacked.remove(&sequence);
                }
            }
            Frame::Disconnect => {
                info!("Peer {} disconnected", peer_id);
                self.remove_peer(peer_id, true);
            }
            Frame::KeepAlive | Frame::Accept { .. } | Frame::Refuse { .. } => {}
        }
    }

    async fn accept(&mut self, addr: SocketAddr, protocol_version: u32) {
        if !self.accepting {
            debug!("Ignoring connect from {}, host does not accept peers", addr);
            return;
        }

        let reply = if protocol_version != PROTOCOL_VERSION {
            warn!(
                "Refusing {}: protocol version {} (expected {})",
                addr, protocol_version, PROTOCOL_VERSION
            );
            Frame::Refuse {
                reason: "Protocol version mismatch".to_string(),
            }
        } else if self.peers.len() >= self.config.max_peers {
            warn!("Refusing {}: server full", addr);
            Frame::Refuse {
                reason: "Server full".to_string(),
            }
        } else {
            let peer_id = self.allocate_peer_id();
            info!("Peer {} connected from {}", peer_id, addr);
            self.add_peer(peer_id, addr);
            Frame::Accept { peer_id }
        };

        if let Err(e) = self.send_frame(&reply, addr).await {
            warn!("Failed to answer connect from {}: {}", addr, e);
        }
    }

    /// Retransmits overdue reliable frames, sends keep-alives and drops
    /// peers that went silent or stopped acknowledging
    async fn maintain(&mut self) {
        let now = Instant::now();
        let mut lost = Vec::new();
        let mut outgoing = Vec::new();

        for peer in self.peers.values_mut() {
            if peer.is_timed_out(self.config.peer_timeout) {
                lost.push(peer.id);
                continue;
            }

            let mut exhausted = false;
            for (&sequence, pending) in peer.unacked.iter_mut() {
                if now.duration_since(pending.last_sent) < self.config.resend_interval {
                    continue;
                }
                if pending.attempts >= self.config.max_resend_attempts {
                    exhausted = true;
                    break;
                }
                pending.attempts += 1;
                pending.last_sent = now;
                peer.last_sent = now;
                outgoing.push((
                    peer.addr,
                    Frame::Reliable {
                        sequence,
                        payload: pending.payload.clone(),
                    },
                ));
            }

            if exhausted {
                lost.push(peer.id);
                continue;
            }

            if now.duration_since(peer.last_sent) >= self.config.keep_alive_interval {
                peer.last_sent = now;
                outgoing.push((peer.addr, Frame::KeepAlive));
            }
        }

        for id in lost {
            warn!("Peer {} timed out", id);
            self.remove_peer(id, true);
        }

        for (addr, frame) in outgoing {
            if !self.by_addr.contains_key(&addr) {
                continue;
            }
            if let Err(e) = self.send_frame(&frame, addr).await {
                debug!("Resend to {} failed: {}", addr, e);
            }
        }
    }
}

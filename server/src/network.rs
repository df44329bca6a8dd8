//! Server network layer: owns the transport host and runs the relay loop

use crate::config::ServerConfig;
use crate::peer_table::PeerTable;
use log::{debug, error, info, warn};
use shared::{
    EndpointState, Host, Lifecycle, Message, MessageRegistry, NetError, PeerId, Position,
    TransportEvent, POLL_INTERVAL,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// State the server handle and its background loop both hold on to
#[derive(Debug, Default)]
struct ServerState {
    lifecycle: Lifecycle,
    peers: PeerTable,
}

/// Position relay server
///
/// Every position a peer reports is stored and forwarded, stamped with the
/// sender's id, to all other connected peers. The work happens on a
/// background task started by [`Server::start`]; the handle itself only
/// offers lifecycle control and read-only diagnostics.
pub struct Server {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    announce_departures: bool,
    /// Moved into the loop on start
    host: Option<Host>,
    loop_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Binds the server socket. Nothing is processed until [`Server::start`].
    pub async fn bind(config: ServerConfig) -> Result<Self, NetError> {
        let host = Host::listen(config.bind_address(), config.transport_config()).await?;
        let local_addr = host
            .local_addr()
            .map_err(|e| NetError::TransportInitFailed(format!("no local address: {}", e)))?;

        info!(
            "Server bound to {} (max {} peers)",
            local_addr, config.max_peers
        );

        Ok(Server {
            state: Arc::new(ServerState::default()),
            local_addr,
            announce_departures: config.announce_departures,
            host: Some(host),
            loop_handle: None,
        })
    }

    /// Spawns the relay loop on the current tokio runtime
    pub fn start(&mut self) -> Result<(), NetError> {
        self.state.lifecycle.begin_start()?;
        let host = self
            .host
            .take()
            .ok_or_else(|| NetError::InvalidState(self.state.lifecycle.state()))?;

        let relay = RelayLoop {
            host,
            state: Arc::clone(&self.state),
            registry: MessageRegistry::new(),
            announce_departures: self.announce_departures,
        };
        self.loop_handle = Some(tokio::spawn(relay.run()));

        info!("Server started on {}", self.local_addr);
        Ok(())
    }

    /// Signals the loop to finish and waits for it. Calling it again, or on
    /// a server that never started, does nothing.
    pub async fn stop(&mut self) {
        if self.state.lifecycle.request_stop() {
            info!("Stopping server on {}", self.local_addr);
        }

        if let Some(handle) = self.loop_handle.take() {
            if let Err(e) = handle.await {
                error!("Server loop ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state.lifecycle.state()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Last position reported by `peer`, `None` once it has disconnected
    pub fn peer_position(&self, peer: PeerId) -> Option<Position> {
        self.state.peers.position(peer)
    }

    pub fn peer_count(&self) -> usize {
        self.state.peers.len()
    }

    pub fn positions(&self) -> HashMap<PeerId, Position> {
        self.state.peers.snapshot()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // The loop notices within one poll interval and cleans up on its own
        self.state.lifecycle.request_stop();
    }
}

/// Receive/dispatch loop running on its own task
struct RelayLoop {
    host: Host,
    state: Arc<ServerState>,
    registry: MessageRegistry,
    announce_departures: bool,
}

impl RelayLoop {
    async fn run(mut self) {
        self.state.lifecycle.enter_running();
        debug!("Relay loop running");

        while self.state.lifecycle.is_running() {
            match self.host.service(POLL_INTERVAL).await {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => {}
                Err(e) => {
                    error!("Transport error: {}", e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        info!(
            "Relay loop exiting, disconnecting {} peers",
            self.host.peer_count()
        );
        self.host.disconnect_all().await;
        self.state.peers.clear();
        self.state.lifecycle.finish();
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect(peer) => {
                // Late joiners learn about others from their next updates
                self.state.peers.add_peer(peer);
            }
            TransportEvent::Receive { peer, payload } => {
                match self.registry.create_from_bytes(&payload) {
                    Ok(message) => self.handle_message(peer, message).await,
                    Err(e) => warn!("Dropping message from peer {}: {}", peer, e),
                }
            }
            TransportEvent::Disconnect(peer) => {
                let known = self.state.peers.remove_peer(peer);
                if known && self.announce_departures {
                    self.broadcast_except(peer, &Message::PeerLeft { peer_id: peer })
                        .await;
                }
            }
        }
    }

    async fn handle_message(&mut self, peer: PeerId, message: Message) {
        match message {
            // The sender is whoever the transport says it is, never the payload
            Message::PositionUpdate { position, .. } => self.relay_position(peer, position).await,
            Message::Chat { text, .. } => {
                info!("Chat from peer {}: {}", peer, text);
                self.broadcast_except(peer, &Message::Chat { sender: peer, text })
                    .await;
            }
            Message::Ping => self.send_to(peer, &Message::Pong).await,
            Message::ClientIdentity { .. } => {
                self.send_to(peer, &Message::ClientIdentity { peer_id: peer })
                    .await
            }
            Message::Pong | Message::PeerLeft { .. } => {
                debug!("Ignoring {:?} from peer {}", message.kind(), peer);
            }
        }
    }

    async fn relay_position(&mut self, peer: PeerId, position: Position) {
        if !position.is_finite() {
            warn!("Dropping non-finite position from peer {}", peer);
            return;
        }

        if let Err(e) = self.state.peers.update_position(peer, position) {
            debug!("Position from peer {} not applied: {}", peer, e);
            return;
        }

        self.broadcast_except(peer, &Message::relayed_position(peer, position))
            .await;
    }

    async fn send_to(&mut self, peer: PeerId, message: &Message) {
        if let Err(e) = self.host.send_reliable(peer, message.encode()).await {
            log_send_failure(peer, &e);
        }
    }

    async fn broadcast_except(&mut self, origin: PeerId, message: &Message) {
        let bytes = message.encode();
        for peer in self.state.peers.recipients_except(origin) {
            if let Err(e) = self.host.send_reliable(peer, bytes.clone()).await {
                log_send_failure(peer, &e);
            }
        }
    }
}

fn log_send_failure(peer: PeerId, e: &NetError) {
    if e.is_recoverable() {
        debug!("Skipping send to peer {}: {}", peer, e);
    } else {
        warn!("Failed to send to peer {}: {}", peer, e);
    }
}

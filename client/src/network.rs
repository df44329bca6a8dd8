//! Client network layer: server connection, outgoing queue and receive loop

use crate::config::ClientConfig;
use log::{debug, error, info, warn};
use shared::transport::MAX_PAYLOAD_SIZE;
use shared::{
    EndpointState, Host, Lifecycle, Message, MessageRegistry, NetError, PeerId, Position,
    PositionTable, TransportEvent, POLL_INTERVAL, SERVER_PEER,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Unread chat lines kept for [`Client::take_chat`]; later lines are
/// dropped until the caller drains the inbox
pub const CHAT_INBOX_CAPACITY: usize = 64;

/// Chat line relayed by the server
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: PeerId,
    pub text: String,
}

/// Work handed from the caller to the loop
#[derive(Debug)]
enum Command {
    Send(Message),
    Ping,
}

#[derive(Debug)]
struct ClientState {
    lifecycle: Lifecycle,
    remote: PositionTable,
    connected: AtomicBool,
    local_id: AtomicU32,
    /// Microseconds, zero until the first pong arrives
    last_rtt_micros: AtomicU64,
}

/// Connection to a position relay server
///
/// Local positions go out through [`Client::submit_position`]; positions of
/// the other players arrive in the background and are read with
/// [`Client::snapshot`]. Neither call touches the network directly, so both
/// are safe to use from a frame loop.
pub struct Client {
    state: Arc<ClientState>,
    server_addr: SocketAddr,
    commands: mpsc::UnboundedSender<Command>,
    chat: mpsc::Receiver<ChatMessage>,
    /// Moved onto its own task by [`Client::start`]
    receiver: Option<ReceiveLoop>,
    loop_handle: Option<JoinHandle<()>>,
}

impl Client {
    /// Resolves `host`, binds a local socket and completes the handshake
    /// with the server before returning
    pub async fn connect(host: &str, port: u16, config: ClientConfig) -> Result<Self, NetError> {
        info!("Connecting to {}:{}...", host, port);

        let transport = Host::connect((host, port), config.transport).await?;
        let local_id = transport
            .local_id()
            .ok_or_else(|| NetError::TransportInitFailed("server assigned no id".into()))?;
        let server_addr = transport
            .peer_addr(SERVER_PEER)
            .ok_or_else(|| NetError::TransportInitFailed("server peer missing".into()))?;

        info!("Connected to {} as client {}", server_addr, local_id);

        let state = Arc::new(ClientState {
            lifecycle: Lifecycle::new(),
            remote: PositionTable::new(),
            connected: AtomicBool::new(true),
            local_id: AtomicU32::new(local_id),
            last_rtt_micros: AtomicU64::new(0),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (chat_tx, chat_rx) = mpsc::channel(CHAT_INBOX_CAPACITY);

        let receiver = ReceiveLoop {
            host: transport,
            state: Arc::clone(&state),
            registry: MessageRegistry::new(),
            commands: command_rx,
            chat: chat_tx,
            ping_sent: None,
        };

        Ok(Client {
            state,
            server_addr,
            commands: command_tx,
            chat: chat_rx,
            receiver: Some(receiver),
            loop_handle: None,
        })
    }

    /// Spawns the receive loop on the current tokio runtime
    pub fn start(&mut self) -> Result<(), NetError> {
        self.state.lifecycle.begin_start()?;
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| NetError::InvalidState(self.state.lifecycle.state()))?;

        self.loop_handle = Some(tokio::spawn(receiver.run()));
        debug!("Client {} started", self.local_id());
        Ok(())
    }

    /// Signals the loop to finish, which disconnects from the server, and
    /// waits for it. Repeated calls do nothing.
    pub async fn stop(&mut self) {
        if self.state.lifecycle.request_stop() {
            info!("Stopping client {}", self.local_id());
        }

        if let Some(handle) = self.loop_handle.take() {
            if let Err(e) = handle.await {
                error!("Client loop ended abnormally: {}", e);
            }
        }
    }

    /// Queues the local position for reliable delivery to the server.
    ///
    /// Every call produces one message, including repeats of the same
    /// position; deciding when to call is up to the caller.
    pub fn submit_position(&self, position: Position) -> Result<(), NetError> {
        if !position.is_finite() {
            return Err(NetError::malformed("position has non-finite components"));
        }
        self.enqueue(Command::Send(Message::position(position)))
    }

    pub fn send_chat(&self, text: impl Into<String>) -> Result<(), NetError> {
        let message = Message::Chat {
            sender: self.local_id(),
            text: text.into(),
        };
        if message.encode().len() > MAX_PAYLOAD_SIZE {
            return Err(NetError::malformed("chat message too long"));
        }
        self.enqueue(Command::Send(message))
    }

    /// Sends a ping; the round trip shows up in [`Client::last_rtt`] once
    /// the pong is back
    pub fn ping(&self) -> Result<(), NetError> {
        self.enqueue(Command::Ping)
    }

    fn enqueue(&self, command: Command) -> Result<(), NetError> {
        self.commands
            .send(command)
            .map_err(|_| NetError::InvalidState(self.state.lifecycle.state()))
    }

    /// Copy of the last known position of every other player
    pub fn snapshot(&self) -> HashMap<PeerId, Position> {
        self.state.remote.snapshot()
    }

    /// Chat lines received since the previous call
    pub fn take_chat(&mut self) -> Vec<ChatMessage> {
        let mut lines = Vec::new();
        while let Ok(line) = self.chat.try_recv() {
            lines.push(line);
        }
        lines
    }

    pub fn last_rtt(&self) -> Option<Duration> {
        match self.state.last_rtt_micros.load(Ordering::Relaxed) {
            0 => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.state.local_id.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> EndpointState {
        self.state.lifecycle.state()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.state.lifecycle.request_stop();

        // A loop that never ran still holds the connection
        if let Some(receiver) = self.receiver.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(receiver.close());
                }
                Err(_) => debug!("No runtime to send disconnect, server will time out"),
            }
        }
    }
}

struct ReceiveLoop {
    host: Host,
    state: Arc<ClientState>,
    registry: MessageRegistry,
    commands: mpsc::UnboundedReceiver<Command>,
    chat: mpsc::Sender<ChatMessage>,
    ping_sent: Option<Instant>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        self.state.lifecycle.enter_running();

        while self.state.lifecycle.is_running() {
            self.flush_commands().await;

            match self.host.service(POLL_INTERVAL).await {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => {}
                Err(e) => {
                    error!("Transport error: {}", e);
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        if self.host.is_connected(SERVER_PEER) {
            self.flush_commands().await;
            if let Err(e) = self.host.disconnect(SERVER_PEER).await {
                debug!("Disconnect from server failed: {}", e);
            }
        }

        // Later submits must fail rather than queue into nothing
        self.commands.close();
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.lifecycle.finish();
        debug!("Client loop finished");
    }

    /// Disconnects a loop that was never started
    async fn close(mut self) {
        if let Err(e) = self.host.disconnect(SERVER_PEER).await {
            debug!("Disconnect from server failed: {}", e);
        }
    }

    async fn flush_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Send(message) => self.send(&message).await,
                Command::Ping => {
                    self.ping_sent = Some(Instant::now());
                    self.send(&Message::Ping).await;
                }
            }
        }
    }

    async fn send(&mut self, message: &Message) {
        if let Err(e) = self.host.send_reliable(SERVER_PEER, message.encode()).await {
            warn!("Failed to send {:?}: {}", message.kind(), e);
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connect(peer) => debug!("Transport connected to peer {}", peer),
            TransportEvent::Disconnect(SERVER_PEER) => {
                warn!("Lost connection to server");
                self.state.remote.clear();
                self.state.connected.store(false, Ordering::SeqCst);
                self.state.lifecycle.cancel();
            }
            TransportEvent::Disconnect(peer) => debug!("Peer {} disconnected", peer),
            TransportEvent::Receive { payload, .. } => {
                match self.registry.create_from_bytes(&payload) {
                    Ok(message) => self.handle_message(message).await,
                    Err(e) => warn!("Dropping message from server: {}", e),
                }
            }
        }
    }

    async fn handle_message(&mut self, message: Message) {
        let local_id = self.state.local_id.load(Ordering::Relaxed);

        match message {
            Message::PositionUpdate {
                origin: Some(peer),
                position,
            } => {
                if peer == local_id {
                    debug!("Ignoring echo of own position");
                } else if !position.is_finite() {
                    warn!("Dropping non-finite position for peer {}", peer);
                } else {
                    self.state.remote.insert(peer, position);
                }
            }
            Message::PositionUpdate { origin: None, .. } => {
                warn!("Dropping position update without origin");
            }
            Message::PeerLeft { peer_id } => {
                if self.state.remote.remove(peer_id).is_some() {
                    info!("Peer {} left", peer_id);
                }
            }
            Message::Chat { sender, text } => {
                info!("[{}] {}", sender, text);
                match self.chat.try_send(ChatMessage { sender, text }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(line)) => {
                        warn!("Chat inbox full, dropping line from {}", line.sender);
                    }
                    Err(TrySendError::Closed(_)) => debug!("Chat inbox closed"),
                }
            }
            Message::Ping => self.send(&Message::Pong).await,
            Message::Pong => match self.ping_sent.take() {
                Some(sent) => {
                    let rtt = sent.elapsed();
                    let micros = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX).max(1);
                    self.state.last_rtt_micros.store(micros, Ordering::Relaxed);
                    debug!("Round trip {:?}", rtt);
                }
                None => debug!("Unsolicited pong"),
            },
            Message::ClientIdentity { peer_id } => {
                if peer_id != local_id {
                    warn!("Server reports id {} (was {})", peer_id, local_id);
                    self.state.local_id.store(peer_id, Ordering::Relaxed);
                }
            }
        }
    }
}

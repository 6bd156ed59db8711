//! Transport abstraction and an in-memory relay.
//!
//! A transport is a broadcast channel to every other peer of one room:
//! `send` delivers `(message_type, payload)` to all of them, and
//! `subscribe` yields incoming messages plus connection changes.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, lexicographically sortable id.
    pub fn random() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened on a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Message {
        message_type: String,
        payload: String,
    },
    /// The connection came back after a drop.
    Reconnected,
    /// The connection dropped; sends fail until it comes back.
    Closed,
}

/// Network error type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    ConnectionFailed(String),
    SendFailed(String),
    AlreadySubscribed,
    Disconnected,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            NetworkError::SendFailed(e) => write!(f, "Send failed: {}", e),
            NetworkError::AlreadySubscribed => write!(f, "Transport already has a subscriber"),
            NetworkError::Disconnected => write!(f, "Disconnected"),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Abstract room transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the connection.
    async fn start(&self) -> Result<(), NetworkError>;

    /// Broadcast a message to every other peer.
    async fn send(&self, message_type: &str, payload: String) -> Result<(), NetworkError>;

    /// Take the incoming event stream. Only one subscriber is supported.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, NetworkError>;
}

/// Network configuration for the in-memory relay.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Probability of message loss (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability of message duplication (0.0 - 1.0)
    pub dup_rate: f64,
    /// Probability of message reordering (0.0 - 1.0)
    pub reorder_rate: f64,
    /// Seed for the fault generator
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            dup_rate: 0.0,
            reorder_rate: 0.0,
            seed: 12345,
        }
    }
}

impl NetworkConfig {
    /// Create a lossy network configuration
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Default::default()
        }
    }

    /// Create a network with duplicates
    pub fn with_dups(dup_rate: f64) -> Self {
        Self {
            dup_rate,
            ..Default::default()
        }
    }

    /// Create a network that swaps the order of some messages
    pub fn reordering(reorder_rate: f64) -> Self {
        Self {
            reorder_rate,
            ..Default::default()
        }
    }

    /// Create a chaotic network (all problems)
    pub fn chaotic() -> Self {
        Self {
            loss_rate: 0.1,
            dup_rate: 0.2,
            reorder_rate: 0.3,
            ..Default::default()
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

struct HubPeer {
    sender: mpsc::UnboundedSender<TransportEvent>,
    receiver: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    connected: bool,
    /// Messages held back to be delivered after a later one.
    held: VecDeque<TransportEvent>,
}

struct HubState {
    peers: HashMap<PeerId, HubPeer>,
    config: NetworkConfig,
    rng_state: u64,
    delivered: u64,
    dropped: u64,
}

impl HubState {
    /// Simple LCG random number generator
    fn next_random(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(1103515245)
            .wrapping_add(12345);
        ((self.rng_state >> 16) & 0x7fff) as f64 / 32768.0
    }

    fn route(&mut self, from: &PeerId, message_type: &str, payload: &str) {
        let mut targets: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(id, peer)| *id != from && peer.connected)
            .map(|(id, _)| id.clone())
            .collect();
        targets.sort();

        for target in targets {
            let event = TransportEvent::Message {
                message_type: message_type.to_string(),
                payload: payload.to_string(),
            };
            if self.next_random() < self.config.loss_rate {
                self.dropped += 1;
                trace!(%from, to = %target, "relay dropped message");
                continue;
            }
            let duplicate = self.next_random() < self.config.dup_rate;
            let hold = self.next_random() < self.config.reorder_rate;
            let Some(peer) = self.peers.get_mut(&target) else {
                continue;
            };
            if hold {
                peer.held.push_back(event);
                continue;
            }
            let mut batch = vec![event.clone()];
            if duplicate {
                batch.push(event);
            }
            batch.extend(peer.held.drain(..));
            for event in batch {
                if peer.sender.send(event).is_ok() {
                    self.delivered += 1;
                }
            }
        }
    }
}

/// In-memory relay connecting any number of [`MemoryTransport`]s, with
/// optional loss, duplication and reordering.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new(config: NetworkConfig) -> Self {
        let rng_state = config.seed;
        Self {
            state: Arc::new(Mutex::new(HubState {
                peers: HashMap::new(),
                config,
                rng_state,
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    /// Register a peer. It receives nothing until its transport is started.
    pub fn transport(&self, id: PeerId) -> MemoryTransport {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state.lock().peers.insert(
            id.clone(),
            HubPeer {
                sender,
                receiver: Some(receiver),
                connected: false,
                held: VecDeque::new(),
            },
        );
        MemoryTransport {
            id,
            state: self.state.clone(),
        }
    }

    pub fn set_config(&self, config: NetworkConfig) {
        self.state.lock().config = config;
    }

    /// Drop a peer's connection; held messages are lost with it.
    pub fn disconnect(&self, id: &PeerId) {
        let mut state = self.state.lock();
        if let Some(peer) = state.peers.get_mut(id) {
            peer.connected = false;
            peer.held.clear();
            let _ = peer.sender.send(TransportEvent::Closed);
            debug!(peer = %id, "relay disconnected peer");
        }
    }

    pub fn reconnect(&self, id: &PeerId) {
        let mut state = self.state.lock();
        if let Some(peer) = state.peers.get_mut(id) {
            peer.connected = true;
            let _ = peer.sender.send(TransportEvent::Reconnected);
            debug!(peer = %id, "relay reconnected peer");
        }
    }

    /// Deliver every held-back message.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let mut delivered = 0;
        for peer in state.peers.values_mut() {
            for event in peer.held.drain(..) {
                if peer.sender.send(event).is_ok() {
                    delivered += 1;
                }
            }
        }
        state.delivered += delivered;
    }

    /// `(delivered, dropped)` message counts.
    pub fn stats(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.delivered, state.dropped)
    }
}

/// One peer's end of a [`MemoryHub`].
pub struct MemoryTransport {
    id: PeerId,
    state: Arc<Mutex<HubState>>,
}

impl MemoryTransport {
    pub fn local_id(&self) -> &PeerId {
        &self.id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        let peer = state
            .peers
            .get_mut(&self.id)
            .ok_or_else(|| NetworkError::ConnectionFailed(self.id.to_string()))?;
        peer.connected = true;
        Ok(())
    }

    async fn send(&self, message_type: &str, payload: String) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        match state.peers.get(&self.id) {
            Some(peer) if peer.connected => {}
            _ => return Err(NetworkError::Disconnected),
        }
        state.route(&self.id, message_type, &payload);
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, NetworkError> {
        self.state
            .lock()
            .peers
            .get_mut(&self.id)
            .and_then(|peer| peer.receiver.take())
            .ok_or(NetworkError::AlreadySubscribed)
    }
}

/// Create a hub with `count` started transports.
pub async fn create_network(
    count: usize,
    config: NetworkConfig,
) -> Result<(MemoryHub, Vec<MemoryTransport>), NetworkError> {
    let hub = MemoryHub::new(config);
    let mut transports = Vec::with_capacity(count);
    for i in 0..count {
        let transport = hub.transport(PeerId::new(format!("peer-{}", i)));
        transport.start().await?;
        transports.push(transport);
    }
    Ok((hub, transports))
}

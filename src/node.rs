//! Chainlet node implementation

use crate::{
    block::Block,
    blockchain::{Blockchain, ChainReplacement, MAX_MAGIC_NUMBER},
    codec::{self, MAX_FRAME_LENGTH},
    error::{ChainletError, NetworkError, Result, StartupError},
    message::{Message, MessageData, MessageType},
    network::{PeerHandle, PeerId, TcpTransport, Transport},
    types::MagicNumber,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long the node waits for a connection before running maintenance
pub const LISTEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Maintenance cycles between latest-block checks
pub const SYNC_CYCLE: u32 = 10;

/// Lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host to listen on; also the host part of the node identity
    pub host: String,

    /// Port to listen on, 0 for an OS-assigned one
    pub port: u16,

    /// `host:port` peers announced to at startup
    pub peers: Vec<String>,

    /// Idle time before a maintenance cycle runs
    pub listen_timeout: Duration,

    /// Maintenance cycles per latest-block check
    pub sync_cycle: u32,

    /// Upper bound for targets and mining draws
    pub max_target: MagicNumber,

    /// Attempt to mine during maintenance
    pub mining_enabled: bool,

    /// Drop a peer after this many consecutive failed deliveries
    pub evict_after_failures: Option<u32>,

    /// Largest accepted frame body
    pub max_frame_length: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            peers: Vec::new(),
            listen_timeout: LISTEN_TIMEOUT,
            sync_cycle: SYNC_CYCLE,
            max_target: MAX_MAGIC_NUMBER,
            mining_enabled: true,
            evict_after_failures: None,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl NodeConfig {
    /// Reject settings the node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync_cycle == 0 {
            return Err(ChainletError::config("sync_cycle must be at least 1"));
        }
        if self.max_target == 0 {
            return Err(ChainletError::config("max_target must be at least 1"));
        }
        if self.listen_timeout.is_zero() {
            return Err(ChainletError::config("listen_timeout must be non-zero"));
        }
        if self.evict_after_failures == Some(0) {
            return Err(ChainletError::config("evict_after_failures must be at least 1"));
        }
        Ok(())
    }
}

/// Everything guarded by the node's single lock
struct NodeState {
    blockchain: Blockchain,
    peers: HashMap<PeerId, PeerHandle>,
}

struct NodeInner {
    id: PeerId,
    state: Mutex<NodeState>,
    status: RwLock<NodeStatus>,
    transport: Arc<dyn Transport>,
    sync_cycle: u32,
    mining_enabled: bool,
    evict_after_failures: Option<u32>,
}

/// Cloneable access to a node's chain, peers and message handlers.
///
/// Every operation takes the node lock for its whole read-modify-reply
/// sequence, broadcasts included.
#[derive(Clone)]
pub struct NodeHandle {
    inner: Arc<NodeInner>,
}

impl NodeHandle {
    /// Wrap a chain and transport into a node in the `Starting` state
    pub fn new(
        id: PeerId,
        blockchain: Blockchain,
        transport: Arc<dyn Transport>,
        config: &NodeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id,
                state: Mutex::new(NodeState {
                    blockchain,
                    peers: HashMap::new(),
                }),
                status: RwLock::new(NodeStatus::Starting),
                transport,
                sync_cycle: config.sync_cycle.max(1),
                mining_enabled: config.mining_enabled,
                evict_after_failures: config.evict_after_failures,
            }),
        }
    }

    /// `host:port` identity stamped on outbound messages
    pub fn id(&self) -> &PeerId {
        &self.inner.id
    }

    /// Current lifecycle state
    pub async fn status(&self) -> NodeStatus {
        *self.inner.status.read().await
    }

    async fn set_status(&self, status: NodeStatus) {
        *self.inner.status.write().await = status;
    }

    /// Snapshot of the chain
    pub async fn blocks(&self) -> Vec<Block> {
        self.inner.state.lock().await.blockchain.blocks().to_vec()
    }

    /// Mining target, if one has been chosen or learned
    pub async fn target(&self) -> Option<MagicNumber> {
        self.inner.state.lock().await.blockchain.target()
    }

    /// Adopt `value` or pick a random target; returns the new one
    pub async fn set_target(&self, value: Option<MagicNumber>) -> MagicNumber {
        self.inner.state.lock().await.blockchain.set_target(value)
    }

    /// Established peers, sorted
    pub async fn peer_ids(&self) -> Vec<PeerId> {
        let state = self.inner.state.lock().await;
        let mut ids: Vec<PeerId> = state.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Get node state for testing/debugging
    pub async fn get_state(&self) -> serde_json::Value {
        let status = self.status().await;
        let state = self.inner.state.lock().await;
        let mut peers: Vec<String> = state.peers.keys().map(|id| id.to_string()).collect();
        peers.sort();
        serde_json::json!({
            "node_id": self.inner.id.to_string(),
            "status": format!("{:?}", status),
            "magic_number": state.blockchain.target(),
            "chain_length": state.blockchain.len(),
            "latest_hash": state.blockchain.latest().map(|b| b.hash().to_string()),
            "peer_count": peers.len(),
            "peers": peers,
        })
    }

    /// Announce ourselves to each configured peer and record it.
    ///
    /// The first unparsable or unreachable address aborts startup.
    pub async fn establish_peers(&self, addrs: &[String]) -> Result<()> {
        info!("establishing peers from passed in list");
        let mut state = self.inner.state.lock().await;
        for addr in addrs {
            let peer = PeerHandle::parse(addr).map_err(|source| {
                StartupError::InvalidPeerAddress {
                    addr: addr.clone(),
                    source,
                }
            })?;

            peer.deliver(
                self.inner.transport.as_ref(),
                &self.inner.id,
                MessageType::PeerInit,
                MessageData::None,
            )
            .await
            .map_err(|source| {
                warn!("check the validity of peers passed in from the command line");
                StartupError::PeerUnreachable {
                    addr: addr.clone(),
                    source,
                }
            })?;

            state.peers.insert(peer.id.clone(), peer);
        }
        Ok(())
    }

    /// Read one message from an accepted connection and dispatch it.
    pub async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, max_frame: usize) {
        info!("handling peer connection from: {}", addr);
        match codec::read_message(stream, max_frame).await {
            Ok(message) => {
                info!("received message: {}", message);
                self.handle_message(message).await;
            },
            Err(e) => warn!("failed to receive message from {}: {}", addr, e),
        }
        debug!("cleaning up client socket");
    }

    /// Dispatch a decoded message to its handler.
    ///
    /// PEER_INIT and PEER_REMV are handled for anyone; every other type is
    /// dropped unless the sender is an established peer.
    pub async fn handle_message(&self, message: Message) {
        let Message {
            sender_id,
            msg_type,
            data,
        } = message;
        let mut state = self.inner.state.lock().await;

        match msg_type {
            MessageType::PeerInit => self.on_peer_init(&mut state, sender_id),
            MessageType::PeerRemove => self.on_peer_remove(&mut state, &sender_id),
            msg_type => {
                if !state.peers.contains_key(&sender_id) {
                    info!("peerid {} not an established peer - doing nothing", sender_id);
                    return;
                }
                self.dispatch(&mut state, &sender_id, msg_type, data).await;
            },
        }
    }

    fn on_peer_init(&self, state: &mut NodeState, sender_id: PeerId) {
        debug!("processing PEER_INIT message");
        if state.peers.contains_key(&sender_id) {
            debug!("already established this peer: {}, ignoring", sender_id);
            return;
        }
        match PeerHandle::parse(sender_id.as_str()) {
            Ok(peer) => {
                info!("storing: {} as established peer", peer);
                state.peers.insert(peer.id.clone(), peer);
            },
            Err(e) => warn!("ignoring PEER_INIT with malformed sender: {}", e),
        }
    }

    fn on_peer_remove(&self, state: &mut NodeState, sender_id: &PeerId) {
        match state.peers.remove(sender_id) {
            Some(peer) => info!("removing peer: {}", peer),
            None => debug!("received PEER_REMV from peer not in my list - ignoring"),
        }
    }

    async fn dispatch(
        &self,
        state: &mut NodeState,
        sender_id: &PeerId,
        msg_type: MessageType,
        data: MessageData,
    ) {
        match (msg_type, data) {
            (MessageType::GetBlockchain, _) => {
                info!("handling GET_BLOCKCHAIN message");
                if state.blockchain.is_empty() {
                    debug!("my blockchain is empty - ignoring message");
                    return;
                }
                let chain = MessageData::Chain(state.blockchain.blocks().to_vec());
                self.send_locked(state, sender_id, MessageType::FullBlockchain, chain)
                    .await;
            },
            (MessageType::FullBlockchain, MessageData::Chain(blocks)) => {
                info!("handling FULL_BLOCKCHAIN message");
                if let ChainReplacement::Invalid { at_position } =
                    state.blockchain.adopt_if_better(blocks)
                {
                    debug!("peer chain from {} broke at position {}", sender_id, at_position);
                }
            },
            (MessageType::NewBlock, MessageData::Block(block)) => {
                info!("handling NEW_BLOCK message");
                if state.blockchain.validate_candidate(&block) {
                    info!("new block is valid - adding");
                    state.blockchain.append(block);
                } else {
                    info!("new block received is not valid - request block chain from peers");
                    self.broadcast_locked(state, MessageType::GetBlockchain, MessageData::None)
                        .await;
                }
            },
            (MessageType::GetLatestBlock, _) => {
                info!("handling GET_LATEST_BLOCK message");
                let Some(latest) = state.blockchain.latest().cloned() else {
                    debug!("no latest block to send - ignoring");
                    return;
                };
                self.send_locked(
                    state,
                    sender_id,
                    MessageType::LatestBlock,
                    MessageData::Block(latest),
                )
                .await;
            },
            (MessageType::LatestBlock, MessageData::Block(block)) => {
                info!("handling LATEST_BLOCK message");
                if state.blockchain.matches_latest(&block) {
                    info!("latest block matches - I'm up to date");
                } else {
                    info!("my latest block didn't match peers latest - requesting the blockchain");
                    self.broadcast_locked(state, MessageType::GetBlockchain, MessageData::None)
                        .await;
                }
            },
            (MessageType::GetMagicNumber, _) => {
                info!("handling GET_MAGIC_NUM message");
                let Some(target) = state.blockchain.target() else {
                    debug!("my magic num isn't set - ignoring message");
                    return;
                };
                self.send_locked(
                    state,
                    sender_id,
                    MessageType::NewMagicNumber,
                    MessageData::MagicNumber(target),
                )
                .await;
            },
            (MessageType::NewMagicNumber, MessageData::MagicNumber(target)) => {
                info!("handling NEW_MAGIC_NUM message");
                state.blockchain.set_target(Some(target));
            },
            (MessageType::Custom(name), _) => {
                info!("received unknown message type: {} - doing nothing", name);
            },
            (msg_type, data) => {
                warn!(
                    "{} from {} carried a {} payload - dropping",
                    msg_type,
                    sender_id,
                    data.kind()
                );
            },
        }
    }

    /// One maintenance tick: learn the target, sync, and try to mine.
    pub async fn maintenance_cycle(&self, sync_count: u32) {
        let mut state = self.inner.state.lock().await;
        debug!("number of peers: {}", state.peers.len());
        debug!("sync count = {}", sync_count);

        if state.blockchain.target().is_none() {
            self.broadcast_locked(&mut state, MessageType::GetMagicNumber, MessageData::None)
                .await;
            return;
        }

        if state.blockchain.is_empty() && !state.peers.is_empty() {
            debug!("blockchain is empty but I have peers - request the blockchain");
            self.broadcast_locked(&mut state, MessageType::GetBlockchain, MessageData::None)
                .await;
        } else if sync_count == self.inner.sync_cycle - 1 {
            debug!("{} timeouts - request the latest block", self.inner.sync_cycle);
            self.broadcast_locked(&mut state, MessageType::GetLatestBlock, MessageData::None)
                .await;
        }

        debug!("current blockchain length {}", state.blockchain.len());
        if !self.inner.mining_enabled {
            return;
        }
        if let Some(block) = state.blockchain.mine_once() {
            info!("new block mined: {}", block);
            self.broadcast_locked(&mut state, MessageType::NewBlock, MessageData::Block(block))
                .await;
        }
    }

    /// Send to every established peer, best effort.
    pub async fn broadcast(&self, msg_type: MessageType, data: MessageData) {
        let mut state = self.inner.state.lock().await;
        self.broadcast_locked(&mut state, msg_type, data).await;
    }

    async fn broadcast_locked(
        &self,
        state: &mut NodeState,
        msg_type: MessageType,
        data: MessageData,
    ) {
        let message = Message::new(self.inner.id.clone(), msg_type, data);
        for peer in state.peers.values_mut() {
            let result = self.inner.transport.send(peer, &message).await;
            record_delivery(peer, &message, result);
        }
        self.evict_failing(state);
    }

    async fn send_locked(
        &self,
        state: &mut NodeState,
        peer_id: &PeerId,
        msg_type: MessageType,
        data: MessageData,
    ) {
        let Some(peer) = state.peers.get_mut(peer_id) else {
            return;
        };
        let message = Message::new(self.inner.id.clone(), msg_type, data);
        let result = self.inner.transport.send(peer, &message).await;
        record_delivery(peer, &message, result);
        self.evict_failing(state);
    }

    fn evict_failing(&self, state: &mut NodeState) {
        let Some(limit) = self.inner.evict_after_failures else {
            return;
        };
        state.peers.retain(|id, peer| {
            let keep = peer.consecutive_failures < limit;
            if !keep {
                let last = peer
                    .last_failure
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default();
                warn!(
                    "evicting peer {} after {} failed deliveries, last at {}",
                    id, peer.consecutive_failures, last
                );
            }
            keep
        });
    }
}

fn record_delivery(
    peer: &mut PeerHandle,
    message: &Message,
    result: std::result::Result<(), NetworkError>,
) {
    match result {
        Ok(()) => peer.record_success(),
        Err(e) => {
            warn!("failed to deliver {} to {}: {}", message.msg_type, peer, e);
            peer.record_failure();
        },
    }
}

/// A bound node ready to run its listen/maintenance loop
pub struct Node {
    handle: NodeHandle,
    listener: TcpListener,
    local_addr: SocketAddr,
    config: NodeConfig,
}

impl Node {
    /// Create a builder for this node
    pub fn builder() -> NodeBuilder {
        NodeBuilder::new()
    }

    /// Bind, derive the identity, and join the configured peers.
    ///
    /// Without startup peers the node picks its own target; with them it
    /// waits to learn one over the network.
    pub async fn start(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        debug!("initializing server socket");
        let bind_addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let id = PeerId::from_parts(&config.host, local_addr.port());

        let blockchain =
            Blockchain::new(id.as_str()).with_max_magic_number(config.max_target);
        let handle = NodeHandle::new(id, blockchain, transport, &config);

        if config.peers.is_empty() {
            handle.set_target(None).await;
        } else {
            handle.establish_peers(&config.peers).await?;
        }

        Ok(Self {
            handle,
            listener,
            local_addr,
            config,
        })
    }

    /// Shared handle to this node's state
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Node identity
    pub fn id(&self) -> &PeerId {
        self.handle.id()
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` fires, then say goodbye.
    ///
    /// Each connection is served by its own task. When no connection
    /// arrives within the listen timeout a maintenance cycle runs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Node {
            handle,
            listener,
            config,
            ..
        } = self;

        handle.set_status(NodeStatus::Running).await;
        info!("BLOCKCHAIN NODE STARTED - {}", handle.id());

        let mut sync_count: u32 = 0;
        loop {
            debug!("listening for peer connections");
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
                accepted = tokio::time::timeout(config.listen_timeout, listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, addr))) => {
                            let handle = handle.clone();
                            let max_frame = config.max_frame_length;
                            tokio::spawn(async move {
                                handle.handle_connection(stream, addr, max_frame).await;
                            });
                        }
                        Ok(Err(e)) => warn!("failed to accept peer connection: {}", e),
                        Err(_) => {
                            handle.maintenance_cycle(sync_count).await;
                            sync_count = (sync_count + 1) % config.sync_cycle;
                        }
                    }
                }
            }
        }

        handle.set_status(NodeStatus::Stopping).await;
        debug!("peer connection listening loop ending");
        debug!("closing server socket");
        drop(listener);

        info!("notifying peers to remove me from their peer list");
        handle
            .broadcast(MessageType::PeerRemove, MessageData::None)
            .await;
        handle.set_status(NodeStatus::Stopped).await;
        Ok(())
    }
}

/// Builder for Chainlet nodes
pub struct NodeBuilder {
    config: NodeConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl NodeBuilder {
    /// Create a new node builder
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            transport: None,
        }
    }

    /// Set the node configuration
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the listen host, also used for the node identity
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the listen port (0 for OS-assigned)
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the `host:port` peers to join at startup
    pub fn peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.peers = peers.into_iter().map(Into::into).collect();
        self
    }

    /// Set the idle time before each maintenance cycle
    pub fn listen_timeout(mut self, timeout: Duration) -> Self {
        self.config.listen_timeout = timeout;
        self
    }

    /// Set the maintenance cycles per latest-block check
    pub fn sync_cycle(mut self, cycle: u32) -> Self {
        self.config.sync_cycle = cycle;
        self
    }

    /// Set the upper bound for targets and draws
    pub fn max_target(mut self, max: MagicNumber) -> Self {
        self.config.max_target = max;
        self
    }

    /// Enable or disable mining during maintenance
    pub fn mining_enabled(mut self, enabled: bool) -> Self {
        self.config.mining_enabled = enabled;
        self
    }

    /// Drop peers after this many consecutive failed deliveries
    pub fn evict_after_failures(mut self, failures: Option<u32>) -> Self {
        self.config.evict_after_failures = failures;
        self
    }

    /// Set the largest accepted frame body
    pub fn max_frame_length(mut self, max: usize) -> Self {
        self.config.max_frame_length = max;
        self
    }

    /// Set the outbound transport (TCP by default)
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bind and start the node
    pub async fn start(self) -> Result<Node> {
        let max_frame = self.config.max_frame_length;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::with_max_frame_length(max_frame)));
        Node::start(self.config, transport).await
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

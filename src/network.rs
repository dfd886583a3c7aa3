//! Networking module for peer-to-peer communication

use crate::codec::{self, MAX_FRAME_LENGTH};
use crate::error::{ChainletError, NetworkError};
use crate::message::{Message, MessageData, MessageType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use tokio::net::TcpStream;
use tracing::debug;

/// Canonical `host:port` identity of a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn from_parts(host: &str, port: u16) -> Self {
        Self(format!("{}:{}", host, port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remote node and the means to reach it
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub host: String,
    pub port: u16,
    pub id: PeerId,
    /// Deliveries that failed since the last success
    pub consecutive_failures: u32,
    pub last_failure: Option<chrono::DateTime<chrono::Utc>>,
}

impl PeerHandle {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let id = PeerId::from_parts(&host, port);
        Self {
            host,
            port,
            id,
            consecutive_failures: 0,
            last_failure: None,
        }
    }

    /// Parse a `host:port` string.
    ///
    /// Exactly one `:` is allowed and the port must be an integer that
    /// fits a TCP port.
    pub fn parse(addr: &str) -> std::result::Result<Self, NetworkError> {
        let invalid = |reason: &str| NetworkError::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        if addr.matches(':').count() != 1 {
            return Err(invalid("expected exactly one ':' separator"));
        }
        let (host, port) = addr
            .split_once(':')
            .ok_or_else(|| invalid("expected exactly one ':' separator"))?;
        let port: u16 = port.parse().map_err(|_| invalid("port is not an integer"))?;

        Ok(Self::new(host, port))
    }

    /// Build a message from this node's identity and send it to the peer.
    ///
    /// Each call opens its own connection; failures are returned, never
    /// retried.
    pub async fn deliver(
        &self,
        transport: &dyn Transport,
        sender_id: &PeerId,
        msg_type: MessageType,
        data: MessageData,
    ) -> std::result::Result<(), NetworkError> {
        let message = Message::new(sender_id.clone(), msg_type, data);
        transport.send(self, &message).await
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.last_failure = Some(chrono::Utc::now());
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ {} ]", self.id)
    }
}

/// Outbound delivery of a single message to a peer
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        peer: &PeerHandle,
        message: &Message,
    ) -> std::result::Result<(), NetworkError>;
}

/// TCP transport: one fresh connection per message
#[derive(Debug, Clone)]
pub struct TcpTransport {
    max_frame_length: usize,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        peer: &PeerHandle,
        message: &Message,
    ) -> std::result::Result<(), NetworkError> {
        debug!("connecting and sending {} to peer: {}", message, peer);
        let stream = TcpStream::connect((peer.host.as_str(), peer.port))
            .await
            .map_err(|source| NetworkError::ConnectionFailed {
                addr: peer.id.to_string(),
                source,
            })?;

        codec::write_message(stream, message, self.max_frame_length)
            .await
            .map_err(|err| match err {
                ChainletError::Network(e) => e,
                ChainletError::Io(source) => NetworkError::SendFailed {
                    addr: peer.id.to_string(),
                    source,
                },
                other => NetworkError::InvalidMessage {
                    reason: other.to_string(),
                },
            })
    }
}

/// In-memory transport that records outbound messages.
///
/// Peers marked unreachable fail every delivery.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(PeerId, Message)>>,
    unreachable: Mutex<HashSet<PeerId>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
        let mut set = lock(&self.unreachable);
        if unreachable {
            set.insert(peer.clone());
        } else {
            set.remove(peer);
        }
    }

    /// Drain everything sent so far
    pub fn take_sent(&self) -> Vec<(PeerId, Message)> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Recipients of every message of the given type sent so far
    pub fn sent_of_type(&self, msg_type: &MessageType) -> Vec<PeerId> {
        lock(&self.sent)
            .iter()
            .filter(|(_, m)| &m.msg_type == msg_type)
            .map(|(to, _)| to.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(
        &self,
        peer: &PeerHandle,
        message: &Message,
    ) -> std::result::Result<(), NetworkError> {
        if lock(&self.unreachable).contains(&peer.id) {
            return Err(NetworkError::Unreachable {
                addr: peer.id.to_string(),
            });
        }
        lock(&self.sent).push((peer.id.clone(), message.clone()));
        Ok(())
    }
}

// Poisoning only follows a panic in a test thread; keep the data.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

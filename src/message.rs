//! Protocol messages exchanged between nodes

use crate::block::Block;
use crate::error::{Result, SerializationError};
use crate::network::PeerId;
use crate::types::MagicNumber;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message types for inter-node communication.
///
/// Types travel by name (`PEER_INIT`, `NEW_BLOCK`, ...), so a name this
/// node does not know still decodes, as [`MessageType::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MessageType {
    /// Sender wants to be recorded as a peer
    PeerInit,
    /// Sender is leaving and should be forgotten
    PeerRemove,
    /// Request for the full chain
    GetBlockchain,
    /// Response carrying the full chain
    FullBlockchain,
    /// Announcement of a freshly mined block
    NewBlock,
    /// Request for the latest block
    GetLatestBlock,
    /// Response carrying the latest block
    LatestBlock,
    /// Request for the mining target
    GetMagicNumber,
    /// Response carrying the mining target
    NewMagicNumber,
    /// Any type this node does not understand
    Custom(String),
}

impl MessageType {
    /// Name used on the wire
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::PeerInit => "PEER_INIT",
            MessageType::PeerRemove => "PEER_REMV",
            MessageType::GetBlockchain => "GET_BLOCKCHAIN",
            MessageType::FullBlockchain => "FULL_BLOCKCHAIN",
            MessageType::NewBlock => "NEW_BLOCK",
            MessageType::GetLatestBlock => "GET_LATEST_BLOCK",
            MessageType::LatestBlock => "LATEST_BLOCK",
            MessageType::GetMagicNumber => "GET_MAGIC_NUM",
            MessageType::NewMagicNumber => "NEW_MAGIC_NUM",
            MessageType::Custom(name) => name,
        }
    }
}

impl From<String> for MessageType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "PEER_INIT" => MessageType::PeerInit,
            "PEER_REMV" => MessageType::PeerRemove,
            "GET_BLOCKCHAIN" => MessageType::GetBlockchain,
            "FULL_BLOCKCHAIN" => MessageType::FullBlockchain,
            "NEW_BLOCK" => MessageType::NewBlock,
            "GET_LATEST_BLOCK" => MessageType::GetLatestBlock,
            "LATEST_BLOCK" => MessageType::LatestBlock,
            "GET_MAGIC_NUM" => MessageType::GetMagicNumber,
            "NEW_MAGIC_NUM" => MessageType::NewMagicNumber,
            _ => MessageType::Custom(name),
        }
    }
}

impl From<MessageType> for String {
    fn from(msg_type: MessageType) -> Self {
        match msg_type {
            MessageType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-dependent message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageData {
    None,
    Block(Block),
    Chain(Vec<Block>),
    MagicNumber(MagicNumber),
}

impl MessageData {
    /// Short label of the payload shape, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            MessageData::None => "none",
            MessageData::Block(_) => "block",
            MessageData::Chain(_) => "chain",
            MessageData::MagicNumber(_) => "magic number",
        }
    }
}

impl fmt::Display for MessageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageData::None => write!(f, "-"),
            MessageData::Block(block) => write!(f, "block #{}", block.index()),
            MessageData::Chain(blocks) => write!(f, "{} blocks", blocks.len()),
            MessageData::MagicNumber(n) => write!(f, "{}", n),
        }
    }
}

/// The envelope sent over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// `host:port` identity of the originating node
    pub sender_id: PeerId,
    /// Message type
    pub msg_type: MessageType,
    /// Message payload
    pub data: MessageData,
}

impl Message {
    /// Create a new message
    pub fn new(sender_id: PeerId, msg_type: MessageType, data: MessageData) -> Self {
        Self {
            sender_id,
            msg_type,
            data,
        }
    }

    /// Create a message with no payload
    pub fn empty(sender_id: PeerId, msg_type: MessageType) -> Self {
        Self::new(sender_id, msg_type, MessageData::None)
    }

    /// Convert message to its binary envelope
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SerializationError::Binary(e).into())
    }

    /// Create message from its binary envelope
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::Binary(e).into())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} from {}: {}]", self.msg_type, self.sender_id, self.data)
    }
}

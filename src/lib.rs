//! Chainlet - a peer-to-peer ledger node
//!
//! Nodes mine blocks by drawing random numbers against a shared "magic
//! number", gossip new blocks to their peers, and converge on the longest
//! valid chain.

// Modules
pub mod block;
pub mod blockchain;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod message;
pub mod network;
pub mod node;
pub mod types;

// Re-exports
pub use block::Block;
pub use blockchain::{Blockchain, ChainReplacement, MAX_MAGIC_NUMBER};
pub use error::{ChainletError, Result};
pub use message::{Message, MessageData, MessageType};
pub use network::{MemoryTransport, PeerHandle, PeerId, TcpTransport, Transport};
pub use node::{Node, NodeBuilder, NodeConfig, NodeHandle, NodeStatus};
pub use types::{BlockHash, MagicNumber};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

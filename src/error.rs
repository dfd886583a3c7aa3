//! Error types for the Chainlet node

use thiserror::Error;

/// Result type alias for Chainlet operations
pub type Result<T> = std::result::Result<T, ChainletError>;

/// Main error type for Chainlet operations
#[derive(Error, Debug)]
pub enum ChainletError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Fatal errors raised while the node is starting
    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network-specific error types
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Peer address is not of the form `host:port`
    #[error("Invalid peer address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// Failed to connect to peer
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        source: std::io::Error,
    },

    /// Connected, but writing the frame failed
    #[error("Failed to send to {addr}: {source}")]
    SendFailed {
        addr: String,
        source: std::io::Error,
    },

    /// Peer closed the connection before a full frame arrived
    #[error("Connection closed before a complete message was received")]
    ConnectionClosed,

    /// Message too large
    #[error("Message size {size} exceeds maximum {max_size}")]
    MessageTooLarge { size: usize, max_size: usize },

    /// Invalid message format
    #[error("Invalid message format: {reason}")]
    InvalidMessage { reason: String },

    /// Peer marked unreachable by an in-memory transport
    #[error("Peer {addr} is unreachable")]
    Unreachable { addr: String },
}

/// Serialization error types
#[derive(Error, Debug)]
pub enum SerializationError {
    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    Binary(#[from] bincode::Error),
}

/// Errors that abort node startup.
///
/// An operator-supplied peer list is expected to be reachable, so none of
/// these are retried: the entry point reports them and exits non-zero.
#[derive(Error, Debug)]
pub enum StartupError {
    /// A configured peer address could not be parsed
    #[error("invalid startup peer {addr:?}, expecting host:port")]
    InvalidPeerAddress {
        addr: String,
        #[source]
        source: NetworkError,
    },

    /// A configured peer did not accept the PEER_INIT announcement
    #[error("configured peer {addr} is unreachable")]
    PeerUnreachable {
        addr: String,
        #[source]
        source: NetworkError,
    },

    /// The listening socket could not be set up
    #[error("cannot listen on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ChainletError {
    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChainletError::Config(msg.into())
    }
}

impl From<bincode::Error> for ChainletError {
    fn from(err: bincode::Error) -> Self {
        ChainletError::Serialization(SerializationError::Binary(err))
    }
}

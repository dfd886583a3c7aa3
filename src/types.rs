//! Common type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Predecessor link carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Block hash type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub String);

impl BlockHash {
    /// The sentinel stored as the genesis block's predecessor.
    pub fn genesis_sentinel() -> Self {
        Self(GENESIS_PREVIOUS_HASH.to_string())
    }

    pub fn is_genesis_sentinel(&self) -> bool {
        self.0 == GENESIS_PREVIOUS_HASH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The shared mining target ("magic number").
pub type MagicNumber = u32;

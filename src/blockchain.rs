//! A node's view of the chain and its mining target

use crate::block::Block;
use crate::types::{BlockHash, MagicNumber};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

/// Largest value a target or a mining draw can take
pub const MAX_MAGIC_NUMBER: MagicNumber = 10;

/// Outcome of examining a peer's chain in [`Blockchain::adopt_if_better`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainReplacement {
    /// The candidate was strictly longer and fully linked; it is now ours
    Replaced,
    /// The candidate was not longer than the current chain
    NotLonger,
    /// The link or target check failed at the block with this position
    Invalid { at_position: usize },
}

/// Ordered blocks plus the target mining draws must hit.
///
/// Blocks are only appended, except when a longer valid chain from a peer
/// replaces them wholesale.
#[derive(Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    magic_number: Option<MagicNumber>,
    max_magic_number: MagicNumber,
    miner_id: String,
    rng: StdRng,
}

impl Blockchain {
    /// Create an empty chain with no target
    pub fn new(miner_id: impl Into<String>) -> Self {
        Self::with_rng(miner_id, StdRng::from_entropy())
    }

    /// Create an empty chain drawing from the given generator
    pub fn with_rng(miner_id: impl Into<String>, rng: StdRng) -> Self {
        Self {
            blocks: Vec::new(),
            magic_number: None,
            max_magic_number: MAX_MAGIC_NUMBER,
            miner_id: miner_id.into(),
            rng,
        }
    }

    /// Change the upper bound for self-chosen targets and mining draws
    pub fn with_max_magic_number(mut self, max: MagicNumber) -> Self {
        self.max_magic_number = max.max(1);
        self
    }

    /// Adopt `value`, or pick one uniformly from `1..=max` when `None`.
    ///
    /// Always overwrites the previous target and returns the new one.
    pub fn set_target(&mut self, value: Option<MagicNumber>) -> MagicNumber {
        let target = match value {
            Some(v) => v,
            None => self.draw(),
        };
        self.magic_number = Some(target);
        info!("set magic number to: {}", target);
        target
    }

    pub fn target(&self) -> Option<MagicNumber> {
        self.magic_number
    }

    /// Whether `block` may be appended as the next block.
    ///
    /// Accepts a genesis block on an empty chain (sentinel predecessor) or
    /// the direct successor of the latest block. In both cases the data
    /// must equal the target; with no target set nothing is valid.
    pub fn validate_candidate(&self, block: &Block) -> bool {
        let Some(target) = self.magic_number else {
            return false;
        };

        let linked = match self.blocks.last() {
            None => block.index() == 0 && block.previous_hash().is_genesis_sentinel(),
            Some(latest) => {
                latest.index().checked_add(1) == Some(block.index())
                    && block.previous_hash() == latest.hash()
            },
        };

        linked && block.data() == target
    }

    /// Append without re-validating; callers check first.
    pub fn append(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn latest(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// One mining trial: draw from `1..=max` and mine if it hits the target.
    pub fn mine_once(&mut self) -> Option<Block> {
        let draw = self.draw();
        self.mine_with_draw(draw)
    }

    /// Mining trial with a caller-supplied draw.
    ///
    /// On a hit the new block is appended and returned; on a miss, or when
    /// the latest index has no successor, nothing changes.
    pub fn mine_with_draw(&mut self, draw: MagicNumber) -> Option<Block> {
        let target = self.magic_number?;
        if draw != target {
            debug!(
                "mining fail - generated number: {} doesn't match magic number: {}",
                draw, target
            );
            return None;
        }

        let block = match self.blocks.last() {
            None => Block::new(0, BlockHash::genesis_sentinel(), draw, self.miner_id.as_str()),
            Some(latest) => match latest.successor(draw, self.miner_id.as_str()) {
                Some(block) => block,
                None => {
                    warn!(
                        "latest block index {} has no successor - not mining",
                        latest.index()
                    );
                    return None;
                },
            },
        };
        self.append(block.clone());
        Some(block)
    }

    /// Structural equality with the latest block; false on an empty chain.
    pub fn matches_latest(&self, block: &Block) -> bool {
        self.blocks.last().is_some_and(|latest| latest == block)
    }

    /// Replace our blocks with `candidate` if it is strictly longer and valid.
    ///
    /// Only consecutive pairs from position 1 on are checked (index step,
    /// hash link, data equals target); the candidate's first block is taken
    /// as is. Any failure leaves the chain untouched.
    pub fn adopt_if_better(&mut self, candidate: Vec<Block>) -> ChainReplacement {
        if candidate.len() <= self.blocks.len() {
            debug!(
                "peer blockchain len: {}, my blockchain len {} - ignoring",
                candidate.len(),
                self.blocks.len()
            );
            return ChainReplacement::NotLonger;
        }

        debug!("blockchain received is longer than current blockchain");
        for (position, pair) in candidate.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            let valid = prev.index().checked_add(1) == Some(curr.index())
                && curr.previous_hash() == prev.hash()
                && Some(curr.data()) == self.magic_number;
            if !valid {
                info!("blockchain received is not valid - ignoring");
                return ChainReplacement::Invalid {
                    at_position: position + 1,
                };
            }
        }

        info!("blockchain received is valid - replacing");
        self.blocks = candidate;
        ChainReplacement::Replaced
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn draw(&mut self) -> MagicNumber {
        self.rng.gen_range(1..=self.max_magic_number)
    }
}

//! Fixed-size content blocks and the XOR parity mix.

use crate::id::Id;

/// One storable block: data padded to exactly the tier block size,
/// its hash, and the bs58 key form used by the content-addressed
/// store. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    data: Vec<u8>,
    hash: Id,
    key: String,
}

impl Block {
    /// Build a block from raw content. Shorter input is zero-padded to
    /// `block_size`; longer input is rejected.
    pub fn new(data: &[u8], block_size: usize) -> Result<Self, BlockError> {
        if block_size == 0 {
            return Err(BlockError::InvalidArgument);
        }
        if data.len() > block_size {
            return Err(BlockError::InvalidArgument);
        }
        let mut padded = data.to_vec();
        padded.resize(block_size, 0);
        let hash = Id::digest(&padded);
        let key = hash.to_base58();
        Ok(Block {
            data: padded,
            hash,
            key,
        })
    }

    /// Random filler block (chaff). Stored like any other block so
    /// mixes that reference it stay reconstructable.
    pub fn random(block_size: usize) -> Result<Self, BlockError> {
        use rand::RngCore;
        let mut data = vec![0u8; block_size];
        rand::thread_rng().fill_bytes(&mut data);
        Block::new(&data, block_size)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self) -> &Id {
        &self.hash
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytewise XOR with another block of the same size. Self-inverse:
    /// mixing and unmixing are the same operation.
    pub fn parity(&self, other: &Block) -> Result<Block, BlockError> {
        if self.data.len() != other.data.len() {
            return Err(BlockError::SizeMismatch);
        }
        let mixed: Vec<u8> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        Block::new(&mixed, self.data.len())
    }
}

/// Check received bytes against the hash they were requested under.
/// Applied to every block accepted from the network.
pub fn verify(data: &[u8], claimed: &Id) -> bool {
    Id::digest(data) == *claimed
}

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("invalid block data")]
    InvalidArgument,
    #[error("block sizes do not match")]
    SizeMismatch,
}

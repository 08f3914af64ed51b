//! Reconstruction descriptor: accumulates per-chunk tuples and seals
//! them into a forward-linked chain of storable blocks.

use crate::block::{Block, BlockError};
use crate::id::Id;

/// Bytes reserved per hash in descriptor payloads (one Sha256 digest).
pub const DESCRIPTOR_PAD: usize = 32;

/// Hashes per tuple: the mixed output block plus its filler blocks.
pub const TUPLE_SIZE: usize = 3;

/// Largest descriptor payload per block: a whole number of hash pads.
/// Non-terminal chain blocks keep the trailing pad for the forward
/// pointer to the next chain block.
pub fn cut_point(block_size: usize) -> usize {
    (block_size / DESCRIPTOR_PAD) * DESCRIPTOR_PAD
}

/// Total tuple bytes a stream of `stream_length` produces at
/// `block_size`. Zero-length streams still flush one zero-padded
/// block, hence the floor of one tuple.
pub fn tuple_bytes(block_size: usize, stream_length: u64) -> usize {
    let blocks = (stream_length as usize).div_ceil(block_size).max(1);
    blocks * DESCRIPTOR_PAD * TUPLE_SIZE
}

/// Per-stream tuple accumulator. Grows by whole tuples, seals exactly
/// once into the descriptor block chain; the chain head is the
/// reconstruction entry point recorded on the stream handle.
#[derive(Debug, Clone)]
pub struct Descriptor {
    block_size: usize,
    cut_point: usize,
    capacity: usize,
    data: Vec<u8>,
    chain: Vec<Block>,
}

impl Descriptor {
    pub fn new(block_size: usize, stream_length: u64) -> Result<Self, DescriptorError> {
        // Need room in one block for at least one payload pad plus the
        // forward pointer pad.
        if block_size < 2 * DESCRIPTOR_PAD {
            return Err(DescriptorError::BlockSize);
        }
        Ok(Descriptor {
            block_size,
            cut_point: cut_point(block_size),
            capacity: tuple_bytes(block_size, stream_length),
            data: Vec::new(),
            chain: Vec::new(),
        })
    }

    pub fn sealed(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Append one tuple of block hashes (mixed output first, then its
    /// fillers, in mix order).
    pub fn push_tuple(&mut self, hashes: &[Id]) -> Result<(), DescriptorError> {
        if self.sealed() {
            return Err(DescriptorError::Sealed);
        }
        if hashes.len() != TUPLE_SIZE {
            return Err(DescriptorError::InvalidTuple);
        }
        if self.data.len() + TUPLE_SIZE * DESCRIPTOR_PAD > self.capacity {
            return Err(DescriptorError::Overflow);
        }
        for hash in hashes {
            self.data.extend_from_slice(hash.as_bytes());
        }
        Ok(())
    }

    /// Seal the descriptor into its block chain. Cuts pad-aligned
    /// segments off the front of the accumulated bytes, then walks the
    /// segments back to front appending each successor block's hash, so
    /// every non-terminal block ends in a forward pointer and the
    /// terminal block has none. Idempotent: a second call returns the
    /// identical chain.
    pub fn seal(&mut self) -> Result<&[Block], DescriptorError> {
        if self.sealed() {
            return Ok(&self.chain);
        }
        if self.data.len() != self.capacity {
            return Err(DescriptorError::Incomplete);
        }
        let mut data = self.data.as_slice();
        let mut segments: Vec<&[u8]> = Vec::new();
        while data.len() > self.cut_point {
            let (segment, rest) = data.split_at(self.cut_point - DESCRIPTOR_PAD);
            segments.push(segment);
            data = rest;
        }
        if !data.is_empty() {
            segments.push(data);
        }
        let mut chain: Vec<Block> = Vec::with_capacity(segments.len());
        let mut next_hash: Option<Id> = None;
        for segment in segments.iter().rev() {
            let block = match next_hash {
                Some(hash) => {
                    let mut bytes = segment.to_vec();
                    bytes.extend_from_slice(hash.as_bytes());
                    Block::new(&bytes, self.block_size)?
                }
                None => Block::new(segment, self.block_size)?,
            };
            next_hash = Some(*block.hash());
            chain.push(block);
        }
        chain.reverse();
        self.chain = chain;
        Ok(&self.chain)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("block size too small for descriptor blocks")]
    BlockSize,
    #[error("descriptor has been sealed")]
    Sealed,
    #[error("tuple must hold {TUPLE_SIZE} hashes")]
    InvalidTuple,
    #[error("descriptor is too large for the stream length")]
    Overflow,
    #[error("descriptor does not cover the stream length")]
    Incomplete,
    #[error(transparent)]
    Block(#[from] BlockError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> Vec<Id> {
        (0..TUPLE_SIZE).map(|_| Id::random()).collect()
    }

    fn filled(block_size: usize, stream_length: u64) -> Descriptor {
        let mut d = Descriptor::new(block_size, stream_length).unwrap();
        let tuples = tuple_bytes(block_size, stream_length) / (DESCRIPTOR_PAD * TUPLE_SIZE);
        for _ in 0..tuples {
            d.push_tuple(&tuple()).unwrap();
        }
        d
    }

    #[test]
    fn rejects_undersized_block() {
        assert!(matches!(
            Descriptor::new(DESCRIPTOR_PAD, 1000),
            Err(DescriptorError::BlockSize)
        ));
    }

    #[test]
    fn rejects_short_tuple() {
        let mut d = Descriptor::new(1024, 4096).unwrap();
        let short: Vec<Id> = (0..TUPLE_SIZE - 1).map(|_| Id::random()).collect();
        assert!(matches!(
            d.push_tuple(&short),
            Err(DescriptorError::InvalidTuple)
        ));
    }

    #[test]
    fn overflow_never_truncates() {
        let mut d = Descriptor::new(1024, 2048).unwrap(); // two chunks, two tuples
        d.push_tuple(&tuple()).unwrap();
        d.push_tuple(&tuple()).unwrap();
        assert!(matches!(
            d.push_tuple(&tuple()),
            Err(DescriptorError::Overflow)
        ));
        // Rejected tuple left no partial bytes behind: sealing succeeds.
        assert!(d.seal().is_ok());
    }

    #[test]
    fn seal_requires_full_coverage() {
        let mut d = Descriptor::new(1024, 2048).unwrap();
        d.push_tuple(&tuple()).unwrap();
        assert!(matches!(d.seal(), Err(DescriptorError::Incomplete)));
    }

    #[test]
    fn sealed_rejects_append_and_is_idempotent() {
        let mut d = filled(1024, 1024);
        let first: Vec<Block> = d.seal().unwrap().to_vec();
        assert!(matches!(
            d.push_tuple(&tuple()),
            Err(DescriptorError::Sealed)
        ));
        let second: Vec<Block> = d.seal().unwrap().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_length_stream_gets_one_tuple() {
        let mut d = Descriptor::new(1024, 0).unwrap();
        d.push_tuple(&tuple()).unwrap();
        assert!(matches!(
            d.push_tuple(&tuple()),
            Err(DescriptorError::Overflow)
        ));
        assert_eq!(d.seal().unwrap().len(), 1);
    }

    #[test]
    fn chain_links_forward_to_terminal_block() {
        // Small blocks so the chain spans several descriptor blocks.
        let block_size = 4 * DESCRIPTOR_PAD;
        let stream_length = (20 * block_size) as u64;
        let mut d = filled(block_size, stream_length);
        let chain = d.seal().unwrap().to_vec();
        assert!(chain.len() > 1);

        let cut = cut_point(block_size);
        let mut remaining = tuple_bytes(block_size, stream_length);
        for (i, block) in chain.iter().enumerate() {
            if remaining > cut {
                // Non-terminal: trailing pad points at the successor.
                let pointer = &block.data()[cut - DESCRIPTOR_PAD..cut];
                assert_eq!(
                    pointer,
                    chain[i + 1].hash().as_bytes(),
                    "forward pointer must be the next block's hash"
                );
                remaining -= cut - DESCRIPTOR_PAD;
            } else {
                assert_eq!(i, chain.len() - 1, "terminal block must end the chain");
                assert_eq!(remaining, remaining.min(cut));
            }
        }
    }
}

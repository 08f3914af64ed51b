//! Write and read streams. Writing mixes each content chunk with
//! filler blocks into an anonymous parity tuple and records the tuple
//! in a descriptor chain; reading walks the chain and unmixes.

use std::collections::VecDeque;
use std::sync::Arc;

use chaff_core::descriptor::{cut_point, tuple_bytes};
use chaff_core::{
    Block, BlockError, BlockKind, ChaffUrl, Descriptor, DescriptorError, Id, DESCRIPTOR_PAD,
    TUPLE_SIZE,
};
use sha2::{Digest, Sha256};

use crate::rpc::{RpcEngine, RpcError};
use crate::store::{BlockStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid stream handle")]
    InvalidHandle,
    #[error("stream is longer than declared")]
    Overrun,
    #[error("block unavailable: {0}")]
    MissingBlock(String),
    #[error("descriptor chain is corrupt")]
    Corrupt,
    #[error("stream digest mismatch")]
    DigestMismatch,
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Ingests a stream of known length. Content never enters the cache:
/// each full chunk is XOR-mixed with two filler blocks and only the
/// mixed result and the fillers are stored. `finish` seals the
/// descriptor chain and emits the reconstruction handle.
pub struct WriteStream {
    url: ChaffUrl,
    block_size: usize,
    store: Arc<BlockStore>,
    descriptor: Descriptor,
    hasher: Sha256,
    acc: Vec<u8>,
    written: u64,
    chunk_index: usize,
    /// Filler candidates reserved from the cache up front, so repeated
    /// mixes prefer blocks that already exist on the network.
    reserved: Option<VecDeque<String>>,
}

impl WriteStream {
    pub fn new(store: Arc<BlockStore>, stream_length: u64) -> Result<Self, StreamError> {
        let block_size = store.block_size();
        Ok(WriteStream {
            url: ChaffUrl::with_length(stream_length),
            block_size,
            store,
            descriptor: Descriptor::new(block_size, stream_length)?,
            hasher: Sha256::new(),
            acc: Vec::new(),
            written: 0,
            chunk_index: 0,
            reserved: None,
        })
    }

    /// Append stream bytes. Full chunks are mixed and stored as they
    /// accumulate; a partial tail waits for `finish`.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.written += data.len() as u64;
        if self.written > self.url.stream_length {
            return Err(StreamError::Overrun);
        }
        self.hasher.update(data);
        self.acc.extend_from_slice(data);
        while self.acc.len() >= self.block_size {
            let rest = self.acc.split_off(self.block_size);
            let chunk = std::mem::replace(&mut self.acc, rest);
            self.process_chunk(&chunk).await?;
        }
        Ok(())
    }

    /// Flush the partial tail, seal and store the descriptor chain, and
    /// emit the completed handle. Fails with `Incomplete` when fewer
    /// bytes were written than declared.
    pub async fn finish(mut self) -> Result<ChaffUrl, StreamError> {
        if !self.acc.is_empty() {
            let chunk = std::mem::take(&mut self.acc);
            self.process_chunk(&chunk).await?;
        }
        let chain = self.descriptor.seal()?.to_vec();
        for block in &chain {
            self.store.put(block.clone()).await?;
        }
        let head = chain.first().ok_or(StreamError::Corrupt)?;
        self.url.descriptor_hash = head.key().to_string();
        self.url.file_hash = bs58::encode(self.hasher.finalize()).into_string();
        self.url.stream_offset = 0;
        self.url.stream_offset_length = self.url.stream_length;
        Ok(self.url)
    }

    async fn process_chunk(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        let content = Block::new(chunk, self.block_size)?;
        let f1 = self.next_filler(&[content.key()]).await?;
        let f2 = self.next_filler(&[content.key(), f1.key()]).await?;
        let mixed = content.parity(&f1)?.parity(&f2)?;
        self.descriptor
            .push_tuple(&[*mixed.hash(), *f1.hash(), *f2.hash()])?;
        if self.chunk_index < self.url.tuple_block.len() {
            self.url.tuple_block[self.chunk_index] = Some(mixed.key().to_string());
        }
        self.chunk_index += 1;
        self.store.put(mixed).await?;
        Ok(())
    }

    /// Next filler block, distinct from `exclude`. Prefers the reserved
    /// cache keys, then any resident block, and mints a fresh random
    /// block (stored, so mixes stay reconstructable) as a last resort.
    async fn next_filler(&mut self, exclude: &[&str]) -> Result<Block, StreamError> {
        if self.reserved.is_none() {
            let chunks = (self.url.stream_length as usize)
                .div_ceil(self.block_size)
                .max(1);
            let keys = self.store.random_block_list(chunks * (TUPLE_SIZE - 1)).await;
            self.reserved = Some(keys.into());
        }
        if let Some(reserved) = self.reserved.as_mut() {
            while let Some(key) = reserved.pop_front() {
                if exclude.contains(&key.as_str()) {
                    continue;
                }
                if let Some(block) = self.store.get(&key).await {
                    return Ok(block);
                }
            }
        }
        if let Some(block) = self.store.random_block().await {
            if !exclude.contains(&block.key()) {
                return Ok(block);
            }
        }
        let block = Block::random(self.block_size)?;
        self.store.put(block.clone()).await?;
        Ok(block)
    }
}

/// Reassembles a stream from its handle: walks the descriptor chain,
/// fetches each tuple's mixed and filler blocks (locally, then from the
/// network) and unmixes. The result is checked against the handle's
/// whole-stream digest.
pub struct ReadStream {
    url: ChaffUrl,
    kind: BlockKind,
    block_size: usize,
    store: Arc<BlockStore>,
    rpc: Arc<RpcEngine>,
}

impl ReadStream {
    pub fn new(
        url: ChaffUrl,
        kind: BlockKind,
        store: Arc<BlockStore>,
        rpc: Arc<RpcEngine>,
    ) -> Self {
        let block_size = store.block_size();
        ReadStream {
            url,
            kind,
            block_size,
            store,
            rpc,
        }
    }

    /// Local cache first, then an iterative network lookup that lands
    /// the block in the cache on success.
    async fn fetch(&self, key: &str) -> Result<Block, StreamError> {
        if let Some(block) = self.store.get(key).await {
            return Ok(block);
        }
        let hash = Id::from_base58(key).map_err(|_| StreamError::InvalidHandle)?;
        match self.rpc.find_value(&hash, self.kind).await {
            Ok(()) => {}
            Err(RpcError::NotFound) | Err(RpcError::NoPeers) => {
                return Err(StreamError::MissingBlock(key.to_string()))
            }
            Err(err) => return Err(err.into()),
        }
        self.store
            .get(key)
            .await
            .ok_or_else(|| StreamError::MissingBlock(key.to_string()))
    }

    pub async fn read_to_end(&self) -> Result<Vec<u8>, StreamError> {
        let tuples = self.read_descriptor().await?;
        let mut out = Vec::with_capacity(self.url.stream_length as usize);
        let mut left = self.url.stream_length as usize;
        let mut hasher = Sha256::new();
        for tuple in tuples.chunks(DESCRIPTOR_PAD * TUPLE_SIZE) {
            if tuple.len() != DESCRIPTOR_PAD * TUPLE_SIZE || left == 0 {
                return Err(StreamError::Corrupt);
            }
            let mut hashes = tuple.chunks_exact(DESCRIPTOR_PAD);
            let mixed_hash = match hashes.next().map(Id::from_slice) {
                Some(Ok(hash)) => hash,
                _ => return Err(StreamError::Corrupt),
            };
            let mut block = self.fetch(&mixed_hash.to_base58()).await?;
            for filler_hash in hashes {
                let filler_hash =
                    Id::from_slice(filler_hash).map_err(|_| StreamError::Corrupt)?;
                let filler = self.fetch(&filler_hash.to_base58()).await?;
                block = block.parity(&filler)?;
            }
            let take = left.min(self.block_size);
            hasher.update(&block.data()[..take]);
            out.extend_from_slice(&block.data()[..take]);
            left -= take;
        }
        if left != 0 {
            return Err(StreamError::Corrupt);
        }
        let digest = bs58::encode(hasher.finalize()).into_string();
        if digest != self.url.file_hash {
            return Err(StreamError::DigestMismatch);
        }
        Ok(out)
    }

    /// Walk the forward-linked descriptor chain and concatenate the
    /// tuple bytes. Non-terminal blocks end in a pointer pad holding
    /// the next block's hash.
    async fn read_descriptor(&self) -> Result<Vec<u8>, StreamError> {
        let cut = cut_point(self.block_size);
        let mut remaining = tuple_bytes(self.block_size, self.url.stream_length);
        let mut tuples = Vec::with_capacity(remaining);
        let mut key = self.url.descriptor_hash.clone();
        loop {
            let block = self.fetch(&key).await?;
            if remaining > cut {
                tuples.extend_from_slice(&block.data()[..cut - DESCRIPTOR_PAD]);
                remaining -= cut - DESCRIPTOR_PAD;
                let pointer = Id::from_slice(&block.data()[cut - DESCRIPTOR_PAD..cut])
                    .map_err(|_| StreamError::Corrupt)?;
                key = pointer.to_base58();
            } else {
                tuples.extend_from_slice(&block.data()[..remaining]);
                return Ok(tuples);
            }
        }
    }
}

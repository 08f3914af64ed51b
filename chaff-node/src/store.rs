//! In-memory content-addressed block cache, one per size tier.
//! Bounded by block count with LRU eviction; lifecycle events go out
//! over an explicit channel instead of a dynamic event bus.

use std::collections::{HashMap, VecDeque};

use chaff_core::{Block, CuckooFilter, Id};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Cache lifecycle events consumed by the router.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A locally-admitted block that should propagate to the network.
    Admitted(Block),
    /// The cache just reached its block capacity.
    Full,
    /// Occupancy changed; payload is percent free.
    Capacity(u64),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("block not found")]
    NotFound,
    #[error("wrong block size for this tier")]
    WrongSize,
}

struct Inner {
    map: HashMap<String, Block>,
    /// Recency order: front = least recently used.
    order: VecDeque<String>,
}

/// Content-addressed LRU block cache keyed by the block's bs58 key.
pub struct BlockStore {
    block_size: usize,
    max_blocks: usize,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<StoreEvent>,
}

impl BlockStore {
    pub fn new(
        block_size: usize,
        max_blocks: usize,
        events: mpsc::UnboundedSender<StoreEvent>,
    ) -> Self {
        BlockStore {
            block_size,
            max_blocks: max_blocks.max(1),
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            events,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Admit a locally-produced block. A fresh insert is announced as
    /// `Admitted` so the router propagates it to the network.
    pub async fn put(&self, block: Block) -> Result<(), StoreError> {
        self.insert(block, true).await
    }

    /// Accept a block received from the network. Stored and evicted
    /// like any other block, but never re-announced for propagation.
    pub async fn accept(&self, block: Block) -> Result<(), StoreError> {
        self.insert(block, false).await
    }

    async fn insert(&self, block: Block, announce: bool) -> Result<(), StoreError> {
        if block.len() != self.block_size {
            return Err(StoreError::WrongSize);
        }
        let mut inner = self.inner.lock().await;
        let key = block.key().to_string();
        if inner.map.contains_key(&key) {
            touch(&mut inner.order, &key);
            return Ok(());
        }
        let was_full = inner.map.len() >= self.max_blocks;
        if was_full {
            if let Some(evicted) = inner.order.pop_front() {
                inner.map.remove(&evicted);
            }
        }
        inner.order.push_back(key.clone());
        if announce {
            let _ = self.events.send(StoreEvent::Admitted(block.clone()));
        }
        inner.map.insert(key, block);
        let len = inner.map.len();
        drop(inner);
        // only the empty-slot to full transition, not every insert at
        // capacity
        if len == self.max_blocks && !was_full {
            let _ = self.events.send(StoreEvent::Full);
        }
        let _ = self.events.send(StoreEvent::Capacity(self.percent_free(len)));
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Block> {
        let mut inner = self.inner.lock().await;
        let block = inner.map.get(key).cloned()?;
        touch(&mut inner.order, key);
        Some(block)
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.inner.lock().await.map.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    /// One uniformly chosen resident block.
    pub async fn random_block(&self) -> Option<Block> {
        use rand::Rng;
        let inner = self.inner.lock().await;
        if inner.order.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..inner.order.len());
        inner.map.get(&inner.order[idx]).cloned()
    }

    /// Up to `n` distinct resident keys in random order. The write
    /// stream reserves its filler candidates from this list.
    pub async fn random_block_list(&self, n: usize) -> Vec<String> {
        use rand::seq::SliceRandom;
        let inner = self.inner.lock().await;
        let mut keys: Vec<String> = inner.order.iter().cloned().collect();
        keys.shuffle(&mut rand::thread_rng());
        keys.truncate(n);
        keys
    }

    /// The resident block closest by XOR distance to `target` whose key
    /// is not in the caller's exclusion filter.
    pub async fn closest_block(&self, target: &Id, filter: &CuckooFilter) -> Option<Block> {
        let inner = self.inner.lock().await;
        inner
            .map
            .values()
            .filter(|b| !filter.contains(b.key().as_bytes()))
            .min_by_key(|b| b.hash().distance(target))
            .cloned()
    }

    /// Remaining capacity as percent free.
    pub async fn capacity(&self) -> u64 {
        let len = self.inner.lock().await.map.len();
        self.percent_free(len)
    }

    fn percent_free(&self, len: usize) -> u64 {
        let used = len.min(self.max_blocks);
        ((self.max_blocks - used) * 100 / self.max_blocks) as u64
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        if let Some(k) = order.remove(pos) {
            order.push_back(k);
        }
    }
}

//! Router: owns the three size-tier caches and the RPC engine, wires
//! cache lifecycle events to network propagation, and hands out write
//! and read streams.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chaff_core::{Block, BlockKind, ChaffUrl, CuckooFilter, Id, Peer, RoutingBucket};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, warn};

use crate::config::NodeConfig;
use crate::rpc::{RpcConfig, RpcEngine, RpcError, ValueHandler};
use crate::store::{BlockStore, StoreError, StoreEvent};
use crate::stream::{ReadStream, StreamError, WriteStream};

/// One size tier's cache.
struct Tier {
    store: Arc<BlockStore>,
}

/// The three tiers. Implements the server-side operation table by
/// routing each request to the cache of the requested kind.
pub struct Tiers {
    block: Tier,
    mini: Tier,
    nano: Tier,
}

impl Tiers {
    fn tier(&self, kind: BlockKind) -> &Tier {
        match kind {
            BlockKind::Block => &self.block,
            BlockKind::Mini => &self.mini,
            BlockKind::Nano => &self.nano,
        }
    }

    pub fn store(&self, kind: BlockKind) -> &Arc<BlockStore> {
        &self.tier(kind).store
    }
}

#[async_trait]
impl ValueHandler for Tiers {
    async fn store_value(&self, kind: BlockKind, value: Vec<u8>) -> Result<(), StoreError> {
        let store = self.store(kind);
        let block = Block::new(&value, store.block_size()).map_err(|_| StoreError::WrongSize)?;
        // Network-received: admit without re-announcing for propagation.
        store.accept(block).await
    }

    async fn get_value(&self, hash: &Id, kind: BlockKind) -> Result<Vec<u8>, StoreError> {
        self.store(kind)
            .get(&hash.to_base58())
            .await
            .map(|b| b.data().to_vec())
            .ok_or(StoreError::NotFound)
    }

    async fn contains_value(&self, hash: &Id, kind: BlockKind) -> bool {
        self.store(kind).contains(&hash.to_base58()).await
    }

    async fn closest_block(
        &self,
        target: &Id,
        filter: &CuckooFilter,
        kind: BlockKind,
    ) -> Result<Vec<u8>, StoreError> {
        self.store(kind)
            .closest_block(target, filter)
            .await
            .map(|b| b.data().to_vec())
            .ok_or(StoreError::NotFound)
    }

    async fn storage_capacity(&self, kind: BlockKind) -> u64 {
        self.store(kind).capacity().await
    }
}

/// Tier-tagged cache lifecycle events for daemon observers.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Full(BlockKind),
    Capacity(BlockKind, u64),
}

/// Per-key outcome of a hydration run.
#[derive(Debug)]
pub enum HydrateEvent {
    Fetched(String),
    Failed(String, RpcError),
}

/// Handle on a running hydration: the in-flight key filter plus the
/// per-key outcome channel. Keys leave the filter as their lookups
/// complete, whether they succeeded or not.
pub struct FlightBox {
    filter: Arc<Mutex<CuckooFilter>>,
    pub events: mpsc::UnboundedReceiver<HydrateEvent>,
}

impl FlightBox {
    pub async fn in_flight(&self, key: &str) -> bool {
        self.filter.lock().await.contains(key.as_bytes())
    }
}

pub struct Router {
    local: Peer,
    tiers: Arc<Tiers>,
    rpc: Arc<RpcEngine>,
    events: broadcast::Sender<RouterEvent>,
}

impl Router {
    /// Build the tier caches and RPC engine and spawn one propagation
    /// task per tier. Needs a running runtime.
    pub fn new(id: Id, config: &NodeConfig) -> Arc<Self> {
        let local = Peer::new(id, config.listen_ip, config.listen_port);
        let mut channels = Vec::new();
        let mut tier = |kind: BlockKind, size: usize, cache: usize| {
            let (tx, rx) = mpsc::unbounded_channel();
            channels.push((kind, rx));
            Tier {
                store: Arc::new(BlockStore::new(size, cache, tx)),
            }
        };
        let tiers = Arc::new(Tiers {
            block: tier(BlockKind::Block, config.block_size, config.block_cache),
            mini: tier(BlockKind::Mini, config.mini_block_size, config.mini_cache),
            nano: tier(BlockKind::Nano, config.nano_block_size, config.nano_cache),
        });
        let bucket = Arc::new(Mutex::new(RoutingBucket::new(id, config.kbucket_size)));
        let rpc = Arc::new(RpcEngine::new(
            local.clone(),
            bucket,
            tiers.clone() as Arc<dyn ValueHandler>,
            RpcConfig {
                node_count: config.node_count,
                kbucket_size: config.kbucket_size,
                redundancy: config.redundancy,
            },
        ));
        let (events, _) = broadcast::channel(64);
        let router = Arc::new(Router {
            local,
            tiers,
            rpc,
            events,
        });
        for (kind, rx) in channels {
            tokio::spawn(Router::propagate(Arc::clone(&router), kind, rx));
        }
        router
    }

    /// Drain one tier's cache events: push admitted blocks out to the
    /// network, forward the rest to daemon observers.
    async fn propagate(
        self: Arc<Self>,
        kind: BlockKind,
        mut rx: mpsc::UnboundedReceiver<StoreEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                StoreEvent::Admitted(block) => {
                    if let Err(err) = self
                        .rpc
                        .store(block.hash(), kind, block.data().to_vec())
                        .await
                    {
                        debug!(kind = kind.name(), error = %err, "block not propagated");
                    }
                }
                StoreEvent::Full => {
                    let _ = self.events.send(RouterEvent::Full(kind));
                }
                StoreEvent::Capacity(pct) => {
                    let _ = self.events.send(RouterEvent::Capacity(kind, pct));
                }
            }
        }
    }

    pub fn local(&self) -> &Peer {
        &self.local
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.events.subscribe()
    }

    /// Watch channel carrying the connected peer count.
    pub fn connections(&self) -> watch::Receiver<usize> {
        self.rpc.connections()
    }

    pub async fn listen(self: &Arc<Self>) -> std::io::Result<SocketAddr> {
        self.rpc.listen().await
    }

    pub async fn connect(&self, peer: &Peer) -> Result<(), RpcError> {
        self.rpc.connect(peer).await
    }

    /// Join the overlay through seed peers. Unreachable seeds are
    /// skipped; as long as one connects, the bucket is then filled via
    /// a lookup for the local identity.
    pub async fn bootstrap(&self, seeds: &[Peer]) -> Result<(), RpcError> {
        for seed in seeds {
            if let Err(err) = self.rpc.connect(seed).await {
                warn!(seed = %seed.addr(), error = %err, "seed unreachable, skipped");
            }
        }
        self.rpc.find_node(self.local.id()).await
    }

    pub async fn capacity(&self, kind: BlockKind) -> u64 {
        self.tiers.store(kind).capacity().await
    }

    /// Smallest tier whose block size the stream fills at least once;
    /// streams shorter than every block size use the nano tier.
    fn kind_for_length(&self, stream_length: u64) -> BlockKind {
        for kind in [BlockKind::Block, BlockKind::Mini] {
            if stream_length >= self.tiers.store(kind).block_size() as u64 {
                return kind;
            }
        }
        BlockKind::Nano
    }

    pub fn create_write_stream(&self, stream_length: u64) -> Result<WriteStream, StreamError> {
        if stream_length == 0 {
            return Err(StreamError::InvalidHandle);
        }
        let kind = self.kind_for_length(stream_length);
        WriteStream::new(Arc::clone(self.tiers.store(kind)), stream_length)
    }

    pub fn create_read_stream(&self, url: ChaffUrl) -> Result<ReadStream, StreamError> {
        if url.stream_length == 0 {
            return Err(StreamError::InvalidHandle);
        }
        let kind = self.kind_for_length(url.stream_length);
        Ok(ReadStream::new(
            url,
            kind,
            Arc::clone(self.tiers.store(kind)),
            Arc::clone(&self.rpc),
        ))
    }

    /// Prefetch a batch of blocks into the local cache, sequentially.
    /// Every key is recorded in the returned in-flight filter up front
    /// and removed again once its lookup settles.
    pub fn hydrate(self: &Arc<Self>, kind: BlockKind, keys: Vec<String>) -> FlightBox {
        let mut filter = CuckooFilter::with_capacity(keys.len() + keys.len() / 20 + 8);
        for key in &keys {
            filter.insert(key.as_bytes());
        }
        let filter = Arc::new(Mutex::new(filter));
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Arc::clone(self);
        let flight_filter = Arc::clone(&filter);
        tokio::spawn(async move {
            for key in keys {
                let result = match Id::from_base58(&key) {
                    Ok(hash) => router.rpc.find_value(&hash, kind).await,
                    Err(_) => Err(RpcError::NotFound),
                };
                flight_filter.lock().await.remove(key.as_bytes());
                let event = match result {
                    Ok(()) => HydrateEvent::Fetched(key),
                    Err(err) => HydrateEvent::Failed(key, err),
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        FlightBox { filter, events: rx }
    }
}

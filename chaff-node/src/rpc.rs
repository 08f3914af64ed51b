//! RPC engine: binary envelopes over raw TCP and the iterative network
//! algorithms (node lookup, value lookup, redundant store, random
//! sampling, liveness probes).
//!
//! Framing is connection half-close: the requester writes one encoded
//! envelope, shuts down its write side, and reads the single response
//! until EOF. One connection carries exactly one request/response pair.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaff_core::wire::{
    decode_message, encode_message, MessageDecodeError, MessageEncodeError, MAX_MESSAGE_LEN,
};
use chaff_core::{
    block, BlockKind, CuckooFilter, Direction, Envelope, Id, Payload, Peer, RoutingBucket, Status,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Per-exchange deadline covering connect, write and read. A peer that
/// stalls past this is treated like a transport failure and skipped.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rough sizing for the per-lookup queried-peer filter.
const QUERIED_FILTER_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct RpcConfig {
    /// Result-count cap for iterative lookups (`count` on the wire).
    pub node_count: u32,
    /// Shortlist capacity during lookups; also the candidate headroom
    /// added to the redundancy target when storing.
    pub kbucket_size: usize,
    /// Fraction of connected peers that must acknowledge a store.
    pub redundancy: f64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        RpcConfig {
            node_count: 20,
            kbucket_size: 20,
            redundancy: 0.2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("no peers connected")]
    NoPeers,
    #[error("failed to connect")]
    ConnectionFailed,
    #[error("unknown peer")]
    UnknownPeer,
    #[error("value not found")]
    NotFound,
    #[error("value not stored")]
    StoreIncomplete,
    #[error("failed to retrieve random blocks")]
    InsufficientData,
    #[error("remote returned failure")]
    RemoteFailure,
    #[error("unexpected message")]
    Unexpected,
    #[error("request timed out")]
    Timeout,
    #[error("local store rejected value: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("filter encode error: {0}")]
    Filter(#[from] bincode::Error),
    #[error(transparent)]
    Encode(#[from] MessageEncodeError),
    #[error(transparent)]
    Decode(#[from] MessageDecodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Server-side operation table. The router implements this by
/// dispatching each call to the store of the requested tier.
#[async_trait]
pub trait ValueHandler: Send + Sync {
    async fn store_value(&self, kind: BlockKind, value: Vec<u8>)
        -> Result<(), crate::store::StoreError>;
    async fn get_value(&self, hash: &Id, kind: BlockKind)
        -> Result<Vec<u8>, crate::store::StoreError>;
    async fn contains_value(&self, hash: &Id, kind: BlockKind) -> bool;
    async fn closest_block(
        &self,
        target: &Id,
        filter: &CuckooFilter,
        kind: BlockKind,
    ) -> Result<Vec<u8>, crate::store::StoreError>;
    async fn storage_capacity(&self, kind: BlockKind) -> u64;
}

pub struct RpcEngine {
    local: Peer,
    bucket: Arc<Mutex<RoutingBucket>>,
    handler: Arc<dyn ValueHandler>,
    config: RpcConfig,
    next_id: AtomicU16,
    connections_tx: watch::Sender<usize>,
    connections_rx: watch::Receiver<usize>,
}

impl RpcEngine {
    pub fn new(
        local: Peer,
        bucket: Arc<Mutex<RoutingBucket>>,
        handler: Arc<dyn ValueHandler>,
        config: RpcConfig,
    ) -> Self {
        let (connections_tx, connections_rx) = watch::channel(0);
        RpcEngine {
            local,
            bucket,
            handler,
            config,
            next_id: AtomicU16::new(rand::random()),
            connections_tx,
            connections_rx,
        }
    }

    pub fn local(&self) -> &Peer {
        &self.local
    }

    /// Watch channel carrying the routing bucket's peer count.
    pub fn connections(&self) -> watch::Receiver<usize> {
        self.connections_rx.clone()
    }

    fn next_id(&self) -> u16 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn learn_peer(&self, peer: Peer) {
        let mut bucket = self.bucket.lock().await;
        bucket.add(peer);
        let _ = self.connections_tx.send(bucket.count());
    }

    async fn forget_peer(&self, id: &Id) {
        let mut bucket = self.bucket.lock().await;
        bucket.remove(id);
        let _ = self.connections_tx.send(bucket.count());
    }

    /// One request/response round trip over a fresh connection.
    async fn exchange(&self, to: &Peer, request: &Envelope) -> Result<Envelope, RpcError> {
        let bytes = encode_message(request)?;
        let reply = tokio::time::timeout(EXCHANGE_TIMEOUT, async {
            let mut stream = TcpStream::connect(to.addr()).await?;
            stream.write_all(&bytes).await?;
            stream.shutdown().await?;
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            decode_message(&buf).map_err(RpcError::from)
        })
        .await
        .map_err(|_| RpcError::Timeout)??;
        if reply.direction != Direction::Response {
            return Err(RpcError::Unexpected);
        }
        Ok(reply)
    }

    /// Bind the listener and spawn the accept loop. Returns the bound
    /// address (useful when the configured port is 0).
    pub async fn listen(self: &Arc<Self>) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.local.addr()).await?;
        let addr = listener.local_addr()?;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let engine = Arc::clone(&engine);
                        tokio::spawn(async move {
                            let served = tokio::time::timeout(
                                EXCHANGE_TIMEOUT,
                                engine.serve_connection(stream, remote),
                            )
                            .await
                            .unwrap_or(Err(RpcError::Timeout));
                            if let Err(err) = served {
                                debug!(peer = %remote, error = %err, "inbound rpc failed");
                            }
                        });
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed, listener stopping");
                        break;
                    }
                }
            }
        });
        Ok(addr)
    }

    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        remote: SocketAddr,
    ) -> Result<(), RpcError> {
        // Cap the inbound read: one byte past the codec limit is enough
        // to make decode reject the buffer without holding more.
        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_LEN as u64 + 1)
            .read_to_end(&mut buf)
            .await?;
        let request = decode_message(&buf)?;
        if request.direction != Direction::Request {
            return Err(RpcError::Unexpected);
        }
        // Learn the sender: advertised identity and port, observed IP.
        self.learn_peer(request.from.with_ip(remote.ip())).await;
        let response = self.dispatch(&request).await;
        stream.write_all(&encode_message(&response)?).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn dispatch(&self, request: &Envelope) -> Envelope {
        let from = self.local.clone();
        match &request.payload {
            Payload::Ping => {
                Envelope::response(request, from, Status::Success, Payload::Ping)
            }
            Payload::FindNode { id, count } => {
                let nodes = self.bucket.lock().await.closest(id, *count as usize);
                Envelope::response(
                    request,
                    from,
                    Status::Success,
                    Payload::FindNodeReply { nodes },
                )
            }
            Payload::FindValue { hash, count, kind } => {
                match self.handler.get_value(hash, *kind).await {
                    Ok(data) => Envelope::response(
                        request,
                        from,
                        Status::Success,
                        Payload::FindValueReply {
                            hash: *hash,
                            kind: *kind,
                            data: Some(data),
                            nodes: Vec::new(),
                        },
                    ),
                    Err(_) => {
                        let nodes = self.bucket.lock().await.closest(hash, *count as usize);
                        Envelope::response(
                            request,
                            from,
                            Status::Failure,
                            Payload::FindValueReply {
                                hash: *hash,
                                kind: *kind,
                                data: None,
                                nodes,
                            },
                        )
                    }
                }
            }
            Payload::Store { kind, value } => {
                match self.handler.store_value(*kind, value.clone()).await {
                    Ok(()) => {
                        Envelope::response(request, from, Status::Success, Payload::StoreReply)
                    }
                    Err(err) => {
                        debug!(kind = kind.name(), error = %err, "store request rejected");
                        Envelope::response(request, from, Status::Failure, Payload::StoreReply)
                    }
                }
            }
            Payload::Random { kind, filter } => {
                let reply = match bincode::deserialize::<CuckooFilter>(filter) {
                    Ok(exclude) => {
                        self.handler
                            .closest_block(request.from.id(), &exclude, *kind)
                            .await
                    }
                    Err(_) => Err(crate::store::StoreError::NotFound),
                };
                match reply {
                    Ok(value) => Envelope::response(
                        request,
                        from,
                        Status::Success,
                        Payload::RandomReply { kind: *kind, value },
                    ),
                    Err(_) => Envelope::response(
                        request,
                        from,
                        Status::Failure,
                        Payload::RandomReply {
                            kind: *kind,
                            value: Vec::new(),
                        },
                    ),
                }
            }
            Payload::PingValue { hash, kind } => {
                let status = if self.handler.contains_value(hash, *kind).await {
                    Status::Success
                } else {
                    Status::Failure
                };
                Envelope::response(
                    request,
                    from,
                    status,
                    Payload::PingValue {
                        hash: *hash,
                        kind: *kind,
                    },
                )
            }
            Payload::PingStorage { kind } => {
                let capacity = self.handler.storage_capacity(*kind).await;
                Envelope::response(
                    request,
                    from,
                    Status::Success,
                    Payload::PingStorageReply { capacity },
                )
            }
            // A reply payload arriving as a request is a protocol error.
            _ => Envelope::response(request, from, Status::Failure, Payload::Ping),
        }
    }

    /// Liveness probe to a known bucket peer.
    pub async fn ping(&self, id: &Id) -> Result<(), RpcError> {
        let to = self.known_peer(id).await?;
        let request = Envelope::request(self.next_id(), self.local.clone(), Payload::Ping);
        let reply = self.exchange(&to, &request).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(RpcError::RemoteFailure)
        }
    }

    /// Optimistically add a peer, then confirm reachability. The peer
    /// is rolled back out of the bucket when the probe fails.
    pub async fn connect(&self, peer: &Peer) -> Result<(), RpcError> {
        self.learn_peer(peer.clone()).await;
        if self.ping(peer.id()).await.is_err() {
            self.forget_peer(peer.id()).await;
            return Err(RpcError::ConnectionFailed);
        }
        Ok(())
    }

    /// Containment probe: does `id` hold the value?
    pub async fn ping_value(&self, id: &Id, hash: &Id, kind: BlockKind) -> Result<bool, RpcError> {
        let to = self.known_peer(id).await?;
        let request = Envelope::request(
            self.next_id(),
            self.local.clone(),
            Payload::PingValue { hash: *hash, kind },
        );
        let reply = self.exchange(&to, &request).await?;
        Ok(reply.is_success())
    }

    /// Remaining-capacity probe for one tier on a known peer.
    pub async fn ping_storage(&self, id: &Id, kind: BlockKind) -> Result<u64, RpcError> {
        let to = self.known_peer(id).await?;
        let request = Envelope::request(
            self.next_id(),
            self.local.clone(),
            Payload::PingStorage { kind },
        );
        let reply = self.exchange(&to, &request).await?;
        match reply.payload {
            Payload::PingStorageReply { capacity } if reply.is_success() => Ok(capacity),
            _ => Err(RpcError::RemoteFailure),
        }
    }

    async fn known_peer(&self, id: &Id) -> Result<Peer, RpcError> {
        let bucket = self.bucket.lock().await;
        if bucket.is_empty() {
            return Err(RpcError::NoPeers);
        }
        bucket.get(id).cloned().ok_or(RpcError::UnknownPeer)
    }

    /// Seed a lookup shortlist with the bucket's closest peers to
    /// `target`. Errors with `NoPeers` when nothing is connected.
    async fn seed_shortlist(&self, target: &Id) -> Result<RoutingBucket, RpcError> {
        let bucket = self.bucket.lock().await;
        if bucket.is_empty() {
            return Err(RpcError::NoPeers);
        }
        let mut shortlist = RoutingBucket::new(*self.local.id(), self.config.kbucket_size);
        for peer in bucket.closest(target, bucket.count()) {
            shortlist.add(peer);
        }
        Ok(shortlist)
    }

    /// Iterative node lookup. Pops the closest unqueried shortlist peer
    /// one at a time, merging every learned peer into the shortlist and
    /// the routing bucket, until `node_count` responses were gathered
    /// or the shortlist runs dry. Best effort: per-peer failures only
    /// skip that peer.
    pub async fn find_node(&self, target: &Id) -> Result<(), RpcError> {
        let mut shortlist = self.seed_shortlist(target).await?;
        let mut queried = CuckooFilter::with_capacity(QUERIED_FILTER_CAPACITY);
        let mut responses = 0u32;
        while shortlist.count() > 0 && responses < self.config.node_count {
            let to = match shortlist.closest(target, 1).pop() {
                Some(peer) => peer,
                None => break,
            };
            queried.insert(to.id().as_bytes());
            shortlist.remove(to.id());
            let request = Envelope::request(
                self.next_id(),
                self.local.clone(),
                Payload::FindNode {
                    id: *target,
                    count: self.config.node_count,
                },
            );
            let reply = match self.exchange(&to, &request).await {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(peer = %to.id(), error = %err, "find_node peer skipped");
                    continue;
                }
            };
            let nodes = match reply.payload {
                Payload::FindNodeReply { nodes } => nodes,
                _ => continue,
            };
            responses += 1;
            for peer in nodes {
                if peer.id() == self.local.id() {
                    continue;
                }
                if !queried.contains(peer.id().as_bytes()) {
                    shortlist.add(peer.clone());
                }
                self.learn_peer(peer).await;
            }
        }
        Ok(())
    }

    /// Iterative value lookup. A data-bearing response short-circuits:
    /// the value is verified against the requested hash and stored
    /// locally before the call completes. Exhausting the shortlist
    /// without a hit reports `NotFound` rather than hanging.
    pub async fn find_value(&self, hash: &Id, kind: BlockKind) -> Result<(), RpcError> {
        let mut shortlist = self.seed_shortlist(hash).await?;
        let mut queried = CuckooFilter::with_capacity(QUERIED_FILTER_CAPACITY);
        while shortlist.count() > 0 {
            let to = match shortlist.closest(hash, 1).pop() {
                Some(peer) => peer,
                None => break,
            };
            queried.insert(to.id().as_bytes());
            shortlist.remove(to.id());
            let request = Envelope::request(
                self.next_id(),
                self.local.clone(),
                Payload::FindValue {
                    hash: *hash,
                    count: self.config.node_count,
                    kind,
                },
            );
            let reply = match self.exchange(&to, &request).await {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(peer = %to.id(), error = %err, "find_value peer skipped");
                    continue;
                }
            };
            match reply.payload {
                Payload::FindValueReply {
                    data: Some(value), ..
                } => {
                    if !block::verify(&value, hash) {
                        warn!(peer = %to.id(), "received value fails hash check, skipped");
                        continue;
                    }
                    self.handler.store_value(kind, value).await?;
                    return Ok(());
                }
                Payload::FindValueReply { nodes, .. } => {
                    for peer in nodes {
                        if peer.id() == self.local.id() {
                            continue;
                        }
                        if !queried.contains(peer.id().as_bytes()) {
                            shortlist.add(peer.clone());
                        }
                        self.learn_peer(peer).await;
                    }
                }
                _ => continue,
            }
        }
        Err(RpcError::NotFound)
    }

    /// Redundant store. The target acknowledgement count is
    /// `floor(connected * redundancy)`, raised to one when more than
    /// one peer is connected; candidates are the closest
    /// `target + kbucket_size` peers, contacted strictly in ascending
    /// distance order, one outstanding request at a time.
    pub async fn store(&self, hash: &Id, kind: BlockKind, value: Vec<u8>) -> Result<(), RpcError> {
        let (candidates, target) = {
            let bucket = self.bucket.lock().await;
            if bucket.is_empty() {
                return Err(RpcError::NoPeers);
            }
            let mut target = ((bucket.count() as f64) * self.config.redundancy).floor() as usize;
            if target < 1 && bucket.count() > 1 {
                target = 1;
            }
            (bucket.closest(hash, target + self.config.kbucket_size), target)
        };
        let mut acks = 0usize;
        for to in candidates {
            if acks >= target {
                break;
            }
            let request = Envelope::request(
                self.next_id(),
                self.local.clone(),
                Payload::Store {
                    kind,
                    value: value.clone(),
                },
            );
            match self.exchange(&to, &request).await {
                Ok(reply) if reply.is_success() => acks += 1,
                Ok(_) => debug!(peer = %to.id(), "store not acknowledged"),
                Err(err) => debug!(peer = %to.id(), error = %err, "store peer skipped"),
            }
        }
        if acks >= target {
            Ok(())
        } else {
            Err(RpcError::StoreIncomplete)
        }
    }

    /// Sample `count` values of `kind` from randomly chosen peers. The
    /// caller's filter tells the remote side what to skip; accepted
    /// values are verified and stored locally.
    pub async fn random(
        &self,
        count: usize,
        kind: BlockKind,
        filter: &CuckooFilter,
    ) -> Result<(), RpcError> {
        let mut candidates: Vec<Peer> = {
            let bucket = self.bucket.lock().await;
            if bucket.is_empty() {
                return Err(RpcError::NoPeers);
            }
            bucket.peers().cloned().collect()
        };
        let filter_bytes = bincode::serialize(filter)?;
        let mut got = 0usize;
        while !candidates.is_empty() && got < count {
            let idx = {
                use rand::Rng;
                rand::thread_rng().gen_range(0..candidates.len())
            };
            let to = candidates.swap_remove(idx);
            let request = Envelope::request(
                self.next_id(),
                self.local.clone(),
                Payload::Random {
                    kind,
                    filter: filter_bytes.clone(),
                },
            );
            let reply = match self.exchange(&to, &request).await {
                Ok(reply) if reply.is_success() => reply,
                Ok(_) => continue,
                Err(err) => {
                    debug!(peer = %to.id(), error = %err, "random peer skipped");
                    continue;
                }
            };
            if let Payload::RandomReply { value, .. } = reply.payload {
                if value.is_empty() {
                    continue;
                }
                if self.handler.store_value(kind, value).await.is_ok() {
                    got += 1;
                }
            }
        }
        if got >= count {
            Ok(())
        } else {
            Err(RpcError::InsufficientData)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Minimal handler: content-addressed map per kind, no tiers.
    struct TestHandler {
        values: Mutex<HashMap<(BlockKind, Id), Vec<u8>>>,
    }

    impl TestHandler {
        fn new() -> Arc<Self> {
            Arc::new(TestHandler {
                values: Mutex::new(HashMap::new()),
            })
        }

        async fn put(&self, kind: BlockKind, value: Vec<u8>) -> Id {
            let hash = Id::digest(&value);
            self.values.lock().await.insert((kind, hash), value);
            hash
        }

        async fn count(&self, kind: BlockKind) -> usize {
            self.values
                .lock()
                .await
                .keys()
                .filter(|(k, _)| *k == kind)
                .count()
        }
    }

    #[async_trait]
    impl ValueHandler for TestHandler {
        async fn store_value(
            &self,
            kind: BlockKind,
            value: Vec<u8>,
        ) -> Result<(), crate::store::StoreError> {
            self.put(kind, value).await;
            Ok(())
        }

        async fn get_value(
            &self,
            hash: &Id,
            kind: BlockKind,
        ) -> Result<Vec<u8>, crate::store::StoreError> {
            self.values
                .lock()
                .await
                .get(&(kind, *hash))
                .cloned()
                .ok_or(crate::store::StoreError::NotFound)
        }

        async fn contains_value(&self, hash: &Id, kind: BlockKind) -> bool {
            self.values.lock().await.contains_key(&(kind, *hash))
        }

        async fn closest_block(
            &self,
            _target: &Id,
            filter: &CuckooFilter,
            kind: BlockKind,
        ) -> Result<Vec<u8>, crate::store::StoreError> {
            self.values
                .lock()
                .await
                .iter()
                .find(|((k, hash), _)| {
                    *k == kind && !filter.contains(hash.to_base58().as_bytes())
                })
                .map(|(_, v)| v.clone())
                .ok_or(crate::store::StoreError::NotFound)
        }

        async fn storage_capacity(&self, _kind: BlockKind) -> u64 {
            100
        }
    }

    struct Node {
        engine: Arc<RpcEngine>,
        handler: Arc<TestHandler>,
        bucket: Arc<Mutex<RoutingBucket>>,
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn node(config: RpcConfig) -> Node {
        let local = Peer::new(Id::random(), "127.0.0.1".parse().unwrap(), free_port());
        let bucket = Arc::new(Mutex::new(RoutingBucket::new(*local.id(), 20)));
        let handler = TestHandler::new();
        let engine = Arc::new(RpcEngine::new(
            local,
            bucket.clone(),
            handler.clone(),
            config,
        ));
        engine.listen().await.unwrap();
        Node {
            engine,
            handler,
            bucket,
        }
    }

    async fn listening_node() -> Node {
        node(RpcConfig::default()).await
    }

    #[tokio::test]
    async fn connect_and_ping() {
        let a = listening_node().await;
        let b = listening_node().await;
        a.engine.connect(b.engine.local()).await.unwrap();
        assert!(a.bucket.lock().await.contains(b.engine.local().id()));
        // the inbound ping taught b about a
        assert!(b.bucket.lock().await.contains(a.engine.local().id()));
        assert_eq!(*a.engine.connections().borrow(), 1);
    }

    #[tokio::test]
    async fn connect_rolls_back_unreachable_peer() {
        let a = listening_node().await;
        let dead = Peer::new(Id::random(), "127.0.0.1".parse().unwrap(), free_port());
        let err = a.engine.connect(&dead).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionFailed));
        assert!(a.bucket.lock().await.is_empty());
        assert_eq!(*a.engine.connections().borrow(), 0);
    }

    #[tokio::test]
    async fn zero_peers_fail_immediately() {
        let a = listening_node().await;
        let hash = Id::random();
        assert!(matches!(
            a.engine.find_node(&hash).await,
            Err(RpcError::NoPeers)
        ));
        assert!(matches!(
            a.engine.find_value(&hash, BlockKind::Block).await,
            Err(RpcError::NoPeers)
        ));
        assert!(matches!(
            a.engine.store(&hash, BlockKind::Block, vec![1]).await,
            Err(RpcError::NoPeers)
        ));
        let filter = CuckooFilter::with_capacity(8);
        assert!(matches!(
            a.engine.random(1, BlockKind::Block, &filter).await,
            Err(RpcError::NoPeers)
        ));
    }

    #[tokio::test]
    async fn find_value_hits_first_peer_and_stores_locally() {
        let a = listening_node().await;
        let b = listening_node().await;
        let value = b"mixed block bytes".to_vec();
        let hash = b.handler.put(BlockKind::Mini, value.clone()).await;

        a.engine.connect(b.engine.local()).await.unwrap();
        a.engine.find_value(&hash, BlockKind::Mini).await.unwrap();
        assert_eq!(
            a.handler.get_value(&hash, BlockKind::Mini).await.unwrap(),
            value
        );
    }

    #[tokio::test]
    async fn find_value_miss_reports_not_found() {
        let a = listening_node().await;
        let b = listening_node().await;
        a.engine.connect(b.engine.local()).await.unwrap();
        let err = a
            .engine
            .find_value(&Id::random(), BlockKind::Mini)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::NotFound));
    }

    #[tokio::test]
    async fn find_node_learns_peers_of_peers() {
        let a = listening_node().await;
        let b = listening_node().await;
        let c = listening_node().await;
        b.engine.connect(c.engine.local()).await.unwrap();
        a.engine.connect(b.engine.local()).await.unwrap();

        a.engine.find_node(a.engine.local().id()).await.unwrap();
        assert!(a.bucket.lock().await.contains(c.engine.local().id()));
    }

    #[tokio::test]
    async fn store_reaches_redundancy_target() {
        let config = RpcConfig {
            redundancy: 1.0,
            ..RpcConfig::default()
        };
        let a = node(config).await;
        let b = listening_node().await;
        let c = listening_node().await;
        a.engine.connect(b.engine.local()).await.unwrap();
        a.engine.connect(c.engine.local()).await.unwrap();

        let value = b"replicated".to_vec();
        let hash = Id::digest(&value);
        a.engine.store(&hash, BlockKind::Nano, value).await.unwrap();
        assert_eq!(b.handler.count(BlockKind::Nano).await, 1);
        assert_eq!(c.handler.count(BlockKind::Nano).await, 1);
    }

    #[tokio::test]
    async fn store_fails_when_candidates_run_out() {
        let config = RpcConfig {
            redundancy: 1.0,
            ..RpcConfig::default()
        };
        let a = node(config).await;
        let b = listening_node().await;
        a.engine.connect(b.engine.local()).await.unwrap();
        // a dead peer inflates the connected count without serving
        let dead = Peer::new(Id::random(), "127.0.0.1".parse().unwrap(), free_port());
        a.bucket.lock().await.add(dead);

        let value = b"replicated".to_vec();
        let hash = Id::digest(&value);
        let err = a
            .engine
            .store(&hash, BlockKind::Nano, value)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::StoreIncomplete));
    }

    #[tokio::test]
    async fn random_samples_and_respects_filter() {
        let a = listening_node().await;
        let b = listening_node().await;
        let known = b.handler.put(BlockKind::Nano, b"already have".to_vec()).await;
        b.handler.put(BlockKind::Nano, b"fresh".to_vec()).await;
        a.engine.connect(b.engine.local()).await.unwrap();

        let mut filter = CuckooFilter::with_capacity(16);
        filter.insert(known.to_base58().as_bytes());
        a.engine.random(1, BlockKind::Nano, &filter).await.unwrap();
        assert!(
            a.handler
                .contains_value(&Id::digest(b"fresh"), BlockKind::Nano)
                .await
        );
    }

    #[tokio::test]
    async fn random_reports_insufficient_data() {
        let a = listening_node().await;
        let b = listening_node().await;
        a.engine.connect(b.engine.local()).await.unwrap();
        let filter = CuckooFilter::with_capacity(8);
        let err = a
            .engine
            .random(1, BlockKind::Nano, &filter)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InsufficientData));
    }

    #[tokio::test]
    async fn ping_value_and_ping_storage() {
        let a = listening_node().await;
        let b = listening_node().await;
        let hash = b.handler.put(BlockKind::Mini, b"probe me".to_vec()).await;
        a.engine.connect(b.engine.local()).await.unwrap();

        let id = *b.engine.local().id();
        assert!(a.engine.ping_value(&id, &hash, BlockKind::Mini).await.unwrap());
        assert!(!a
            .engine
            .ping_value(&id, &Id::random(), BlockKind::Mini)
            .await
            .unwrap());
        assert_eq!(a.engine.ping_storage(&id, BlockKind::Mini).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn oversized_request_is_cut_off_without_reply() {
        let a = listening_node().await;
        let mut stream = TcpStream::connect(a.engine.local().addr())
            .await
            .unwrap();
        // one byte past the codec limit: the server must stop reading
        // there and close without a response
        let garbage = vec![0u8; MAX_MESSAGE_LEN + 1];
        stream.write_all(&garbage).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert!(reply.is_empty());
        // the listener survives and still serves well-formed requests
        let b = listening_node().await;
        b.engine.connect(a.engine.local()).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_peer_probe_fails() {
        let a = listening_node().await;
        let b = listening_node().await;
        a.engine.connect(b.engine.local()).await.unwrap();
        assert!(matches!(
            a.engine.ping(&Id::random()).await,
            Err(RpcError::UnknownPeer)
        ));
    }
}

//! Wire messages: envelope plus the six request/response kinds.
//! Encoding is bincode; framing is connection half-close (see wire).

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::peer::Peer;

/// Size-tier discriminant carried by every value-bearing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Block,
    Mini,
    Nano,
}

impl BlockKind {
    pub const ALL: [BlockKind; 3] = [BlockKind::Block, BlockKind::Mini, BlockKind::Nano];

    pub fn name(&self) -> &'static str {
        match self {
            BlockKind::Block => "block",
            BlockKind::Mini => "mini",
            BlockKind::Nano => "nano",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Request,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    Failure,
}

/// Type-specific message body. Requests and responses share the enum;
/// the envelope's direction says which one a payload is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    /// Liveness probe; no body. Response carries status only.
    Ping,
    FindNode {
        id: Id,
        count: u32,
    },
    FindNodeReply {
        nodes: Vec<Peer>,
    },
    FindValue {
        hash: Id,
        count: u32,
        kind: BlockKind,
    },
    /// Data present on a hit; nodes populated on a miss.
    FindValueReply {
        hash: Id,
        kind: BlockKind,
        data: Option<Vec<u8>>,
        nodes: Vec<Peer>,
    },
    Store {
        kind: BlockKind,
        value: Vec<u8>,
    },
    StoreReply,
    /// Filter is the requester's serialized cuckoo filter: content the
    /// remote side should not bother returning.
    Random {
        kind: BlockKind,
        filter: Vec<u8>,
    },
    RandomReply {
        kind: BlockKind,
        value: Vec<u8>,
    },
    PingValue {
        hash: Id,
        kind: BlockKind,
    },
    PingStorage {
        kind: BlockKind,
    },
    PingStorageReply {
        capacity: u64,
    },
}

/// One wire message. Ids are per-engine incrementing nonces that wrap
/// on overflow; they are correlation hints, not globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u16,
    pub direction: Direction,
    pub from: Peer,
    pub status: Option<Status>,
    pub payload: Payload,
}

impl Envelope {
    pub fn request(id: u16, from: Peer, payload: Payload) -> Self {
        Envelope {
            id,
            direction: Direction::Request,
            from,
            status: None,
            payload,
        }
    }

    /// Response to `request`, echoing its id.
    pub fn response(request: &Envelope, from: Peer, status: Status, payload: Payload) -> Self {
        Envelope {
            id: request.id,
            direction: Direction::Response,
            from,
            status: Some(status),
            payload,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(Status::Success)
    }
}

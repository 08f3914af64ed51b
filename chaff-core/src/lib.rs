//! CHAFF block overlay protocol reference implementation.
//! Pure protocol logic: no I/O; the node crate owns sockets and storage.

pub mod block;
pub mod bucket;
pub mod descriptor;
pub mod filter;
pub mod id;
pub mod peer;
pub mod proto;
pub mod url;
pub mod wire;

pub use block::{Block, BlockError};
pub use bucket::RoutingBucket;
pub use descriptor::{Descriptor, DescriptorError, DESCRIPTOR_PAD, TUPLE_SIZE};
pub use filter::CuckooFilter;
pub use id::Id;
pub use peer::Peer;
pub use proto::{BlockKind, Direction, Envelope, Payload, Status};
pub use url::ChaffUrl;
pub use wire::{decode_message, encode_message, MessageDecodeError, MessageEncodeError};

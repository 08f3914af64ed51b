//! CHAFF overlay node: tiered block caches, the TCP RPC engine, and
//! the router that turns them into anonymous write and read streams.

pub mod config;
pub mod router;
pub mod rpc;
pub mod store;
pub mod stream;

pub use config::NodeConfig;
pub use router::{FlightBox, HydrateEvent, Router, RouterEvent};
pub use rpc::{RpcConfig, RpcEngine, RpcError, ValueHandler};
pub use store::{BlockStore, StoreError, StoreEvent};
pub use stream::{ReadStream, StreamError, WriteStream};

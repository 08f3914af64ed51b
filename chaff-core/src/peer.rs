//! Peer descriptor: identity plus reachable address.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// A remote node: identity and where to reach it. Immutable once
/// constructed; equality is by id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    id: Id,
    ip: IpAddr,
    port: u16,
}

impl Peer {
    pub fn new(id: Id, ip: IpAddr, port: u16) -> Self {
        Peer { id, ip, port }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Same peer with a different observed address. Used by the server
    /// side to pin the sender's source IP onto its advertised port.
    pub fn with_ip(&self, ip: IpAddr) -> Self {
        Peer {
            id: self.id,
            ip,
            port: self.port,
        }
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Peer {}

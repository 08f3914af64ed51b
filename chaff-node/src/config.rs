//! Load config from file and environment.

use std::net::IpAddr;
use std::path::PathBuf;

use chaff_core::{Id, Peer};
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/chaff/config.toml or
/// /etc/chaff/config.toml. Env overrides: CHAFF_LISTEN_IP,
/// CHAFF_LISTEN_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Listen address (default 0.0.0.0).
    #[serde(default = "default_listen_ip")]
    pub listen_ip: IpAddr,
    /// Listen TCP port (default 4128).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Full-tier block size in bytes (default 1 MiB).
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Mini-tier block size in bytes (default 64 KiB).
    #[serde(default = "default_mini_block_size")]
    pub mini_block_size: usize,
    /// Nano-tier block size in bytes (default 4 KiB).
    #[serde(default = "default_nano_block_size")]
    pub nano_block_size: usize,
    /// Cache capacity per tier, in blocks.
    #[serde(default = "default_block_cache")]
    pub block_cache: usize,
    #[serde(default = "default_mini_cache")]
    pub mini_cache: usize,
    #[serde(default = "default_nano_cache")]
    pub nano_cache: usize,
    /// Neighbor table capacity (default 20).
    #[serde(default = "default_kbucket_size")]
    pub kbucket_size: usize,
    /// Response cap for iterative lookups (default 20).
    #[serde(default = "default_node_count")]
    pub node_count: u32,
    /// Fraction of connected peers a store must reach (default 0.2).
    #[serde(default = "default_redundancy")]
    pub redundancy: f64,
    /// Seed peers as `<base58-id>@ip:port`.
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

fn default_listen_ip() -> IpAddr {
    "0.0.0.0".parse().unwrap()
}
fn default_listen_port() -> u16 {
    4128
}
fn default_block_size() -> usize {
    1024 * 1024
}
fn default_mini_block_size() -> usize {
    64 * 1024
}
fn default_nano_block_size() -> usize {
    4 * 1024
}
fn default_block_cache() -> usize {
    256
}
fn default_mini_cache() -> usize {
    1024
}
fn default_nano_cache() -> usize {
    4096
}
fn default_kbucket_size() -> usize {
    20
}
fn default_node_count() -> u32 {
    20
}
fn default_redundancy() -> f64 {
    0.2
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            block_size: default_block_size(),
            mini_block_size: default_mini_block_size(),
            nano_block_size: default_nano_block_size(),
            block_cache: default_block_cache(),
            mini_cache: default_mini_cache(),
            nano_cache: default_nano_cache(),
            kbucket_size: default_kbucket_size(),
            node_count: default_node_count(),
            redundancy: default_redundancy(),
            bootstrap: Vec::new(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> NodeConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("CHAFF_LISTEN_IP") {
        if let Ok(ip) = s.parse::<IpAddr>() {
            c.listen_ip = ip;
        }
    }
    if let Ok(s) = std::env::var("CHAFF_LISTEN_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.listen_port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/chaff/config.toml"));
    }
    out.push(PathBuf::from("/etc/chaff/config.toml"));
    out
}

fn load_file() -> Option<NodeConfig> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<NodeConfig>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

/// Parse a bootstrap entry of the form `<base58-id>@ip:port`.
pub fn parse_seed(s: &str) -> Result<Peer, SeedError> {
    let (id, addr) = s.split_once('@').ok_or(SeedError::Format)?;
    let id = Id::from_base58(id).map_err(|_| SeedError::Id)?;
    let addr: std::net::SocketAddr = addr.parse().map_err(|_| SeedError::Addr)?;
    Ok(Peer::new(id, addr.ip(), addr.port()))
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("expected <base58-id>@ip:port")]
    Format,
    #[error("invalid peer id")]
    Id,
    #[error("invalid peer address")]
    Addr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = NodeConfig::default();
        assert_eq!(c.listen_port, 4128);
        assert!(c.nano_block_size < c.mini_block_size);
        assert!(c.mini_block_size < c.block_size);
        assert!(c.redundancy > 0.0 && c.redundancy <= 1.0);
    }

    #[test]
    fn toml_overrides_defaults() {
        let c: NodeConfig = toml::from_str(
            "listen_port = 5000\nnano_block_size = 2048\nbootstrap = [\"a@1.2.3.4:5\"]",
        )
        .unwrap();
        assert_eq!(c.listen_port, 5000);
        assert_eq!(c.nano_block_size, 2048);
        assert_eq!(c.bootstrap.len(), 1);
        assert_eq!(c.block_size, 1024 * 1024);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<NodeConfig>("bogus = 1").is_err());
    }

    #[test]
    fn parses_seed() {
        let id = Id::random();
        let seed = format!("{}@10.0.0.1:4128", id.to_base58());
        let peer = parse_seed(&seed).unwrap();
        assert_eq!(peer.id(), &id);
        assert_eq!(peer.addr().to_string(), "10.0.0.1:4128");
    }

    #[test]
    fn rejects_malformed_seeds() {
        assert!(matches!(parse_seed("no-at-sign"), Err(SeedError::Format)));
        assert!(matches!(parse_seed("!!!@1.2.3.4:5"), Err(SeedError::Id)));
        let id = Id::random().to_base58();
        assert!(matches!(
            parse_seed(&format!("{id}@nowhere")),
            Err(SeedError::Addr)
        ));
    }
}

//! Identifiers: one 32-byte keyspace shared by peer IDs and block hashes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier length in bytes (one Sha256 digest).
pub const ID_LEN: usize = 32;

/// Fixed-length identifier. Peer IDs and block hashes live in the same
/// keyspace so value lookups can narrow by XOR distance to a hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(#[serde(with = "bytes_32")] [u8; ID_LEN]);

mod bytes_32 {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    pub fn serialize<S: Serializer>(v: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        v.as_slice().serialize(serializer)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let buf: Vec<u8> = Deserialize::deserialize(d)?;
        buf.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

impl Id {
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Id(bytes)
    }

    /// Parse an identifier from a slice. Errors if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdError> {
        let arr: [u8; ID_LEN] = bytes.try_into().map_err(|_| IdError::Length)?;
        Ok(Id(arr))
    }

    /// Hash arbitrary bytes into an identifier.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Id(hasher.finalize().into())
    }

    /// Random identifier (fresh node identity).
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Id(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// XOR distance to another identifier. Distances compare as
    /// big-endian unsigned integers; smaller means closer.
    pub fn distance(&self, other: &Id) -> [u8; ID_LEN] {
        let mut out = [0u8; ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_base58(s: &str) -> Result<Self, IdError> {
        let bytes = bs58::decode(s).into_vec().map_err(|_| IdError::Encoding)?;
        Self::from_slice(&bytes)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base58())
    }
}

/// Error parsing an identifier.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("expected 32 bytes")]
    Length,
    #[error("invalid base58")]
    Encoding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_symmetric() {
        let a = Id::random();
        let b = Id::random();
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = Id::random();
        assert_eq!(a.distance(&a), [0u8; ID_LEN]);
    }

    #[test]
    fn closer_id_compares_smaller() {
        let target = Id::from_bytes([0u8; ID_LEN]);
        let mut near = [0u8; ID_LEN];
        near[ID_LEN - 1] = 1;
        let mut far = [0u8; ID_LEN];
        far[0] = 1;
        let near = Id::from_bytes(near);
        let far = Id::from_bytes(far);
        assert!(near.distance(&target) < far.distance(&target));
    }

    #[test]
    fn base58_roundtrip() {
        let a = Id::random();
        let s = a.to_base58();
        assert_eq!(Id::from_base58(&s).unwrap(), a);
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(Id::digest(b"chaff"), Id::digest(b"chaff"));
        assert_ne!(Id::digest(b"chaff"), Id::digest(b"wheat"));
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Id::from_slice(&[0u8; 16]).is_err());
    }
}

//! Stream handle: the caller-facing artifact identifying a stored
//! stream. Mutable while a write stream builds it, immutable once
//! emitted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reconstruction handle. `descriptor_hash` is the chain head's key;
/// `file_hash` is the bs58 whole-stream digest; the first up-to-three
/// mixed block keys are recorded for fast partial access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaffUrl {
    pub file_hash: String,
    pub descriptor_hash: String,
    pub stream_length: u64,
    pub stream_offset: u64,
    pub stream_offset_length: u64,
    pub tuple_block: [Option<String>; 3],
}

impl ChaffUrl {
    /// Fresh handle for a stream whose total length is known up front.
    pub fn with_length(stream_length: u64) -> Self {
        ChaffUrl {
            stream_length,
            ..Default::default()
        }
    }
}

impl fmt::Display for ChaffUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chaff://{}/{}?len={}&off={}&offlen={}",
            self.file_hash,
            self.descriptor_hash,
            self.stream_length,
            self.stream_offset,
            self.stream_offset_length,
        )?;
        for (i, key) in self.tuple_block.iter().enumerate() {
            if let Some(key) = key {
                write!(f, "&t{}={}", i + 1, key)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ChaffUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix("chaff://").ok_or(UrlError::Scheme)?;
        let (path, query) = rest.split_once('?').ok_or(UrlError::Malformed)?;
        let (file_hash, descriptor_hash) = path.split_once('/').ok_or(UrlError::Malformed)?;
        let mut url = ChaffUrl {
            file_hash: file_hash.to_string(),
            descriptor_hash: descriptor_hash.to_string(),
            ..Default::default()
        };
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').ok_or(UrlError::Malformed)?;
            match key {
                "len" => url.stream_length = value.parse().map_err(|_| UrlError::Malformed)?,
                "off" => url.stream_offset = value.parse().map_err(|_| UrlError::Malformed)?,
                "offlen" => {
                    url.stream_offset_length = value.parse().map_err(|_| UrlError::Malformed)?
                }
                "t1" => url.tuple_block[0] = Some(value.to_string()),
                "t2" => url.tuple_block[1] = Some(value.to_string()),
                "t3" => url.tuple_block[2] = Some(value.to_string()),
                _ => return Err(UrlError::Malformed),
            }
        }
        Ok(url)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("not a chaff:// url")]
    Scheme,
    #[error("malformed url")]
    Malformed,
}

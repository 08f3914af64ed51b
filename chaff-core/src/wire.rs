//! Message codec. No length prefix: the transport boundary is the
//! sender half-closing its write side, so one TCP connection carries
//! exactly one request/response pair and the codec sees whole buffers.

use crate::proto::Envelope;

/// Upper bound on an inbound message buffer, checked before
/// deserialization. Generous headroom over the largest tier block.
pub const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;

pub fn encode_message(env: &Envelope) -> Result<Vec<u8>, MessageEncodeError> {
    let bytes = bincode::serialize(env)?;
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(MessageEncodeError::TooLarge);
    }
    Ok(bytes)
}

pub fn decode_message(bytes: &[u8]) -> Result<Envelope, MessageDecodeError> {
    if bytes.len() > MAX_MESSAGE_LEN {
        return Err(MessageDecodeError::TooLarge);
    }
    Ok(bincode::deserialize(bytes)?)
}

#[derive(Debug, thiserror::Error)]
pub enum MessageEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("message too large")]
    TooLarge,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageDecodeError {
    #[error("message too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

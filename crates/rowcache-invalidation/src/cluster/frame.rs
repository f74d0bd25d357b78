//! Wire encoding for invalidation messages.
//!
//! Frame format:
//! ```text
//! ┌─────────────┬─────────────┬─────────────┬─────────────────┐
//! │ Magic (4B)  │ From (8B)   │ Length (4B) │ Payload (bincode)│
//! └─────────────┴─────────────┴─────────────┴─────────────────┘
//! ```
//!
//! All integers are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rowcache_common::constants::{FRAME_HEADER_SIZE, FRAME_MAGIC, MAX_FRAME_PAYLOAD};
use rowcache_common::types::NodeId;

use super::{InvalidationMessage, TransportError, TransportResult};

/// Encodes a message into a frame.
pub fn encode(from: NodeId, message: &InvalidationMessage) -> TransportResult<Bytes> {
    let payload = bincode::serialize(message)
        .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;

    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(TransportError::SerializationFailed(format!(
            "message too large: {} bytes",
            payload.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(FRAME_MAGIC);
    buf.put_u64(from.as_u64());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);

    Ok(buf.freeze())
}

/// Decodes a frame into `(from, message)`.
pub fn decode(mut data: Bytes) -> TransportResult<(NodeId, InvalidationMessage)> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err(TransportError::DeserializationFailed(
            "frame too short".to_string(),
        ));
    }

    let magic = data.get_u32();
    if magic != FRAME_MAGIC {
        return Err(TransportError::DeserializationFailed(format!(
            "invalid magic: {:08x}",
            magic
        )));
    }

    let from = NodeId::new(data.get_u64());
    let len = data.get_u32() as usize;

    if len > MAX_FRAME_PAYLOAD {
        return Err(TransportError::DeserializationFailed(format!(
            "message too large: {} bytes",
            len
        )));
    }
    if data.len() < len {
        return Err(TransportError::DeserializationFailed(
            "incomplete frame".to_string(),
        ));
    }

    let message: InvalidationMessage = bincode::deserialize(&data[..len])
        .map_err(|e| TransportError::DeserializationFailed(e.to_string()))?;

    Ok((from, message))
}

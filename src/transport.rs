//! Length-prefixed frame transport
//!
//! Frame layout: `[4-byte length BE] [MessagePack payload]`, identical in
//! both directions. The transport layer knows nothing about payload
//! semantics; it hands byte buffers to the wire codec.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ServerError};
use crate::wire::{RequestEnvelope, ResponseEnvelope};

/// Frames above this size are treated as a transport error.
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Read one frame. Returns `None` on a clean EOF at a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Frame too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Write one frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode a request envelope from a frame payload.
pub fn decode_request(payload: &[u8]) -> Result<RequestEnvelope> {
    rmp_serde::from_slice(payload)
        .map_err(|e| ServerError::MalformedRequest(e.to_string()))
}

/// Encode a response envelope into a frame payload.
///
/// Serialization of server-built responses cannot fail for any reachable
/// payload; a failure here means the connection is unusable, so it is
/// surfaced as an IO error.
pub fn encode_response(envelope: &ResponseEnvelope) -> std::io::Result<Vec<u8>> {
    rmp_serde::to_vec_named(envelope)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

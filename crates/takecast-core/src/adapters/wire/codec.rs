//! Length-prefixed frame codec: `[u32 big-endian length][protobuf bytes]`.

use prost::Message as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::cast_channel::CastMessage;
use crate::domain::error::{Error, Result};

/// Upper bound on a single frame; anything larger is a protocol error rather
/// than an allocation request.
pub const MAX_MESSAGE_SIZE: u32 = 2 * 1024 * 1024;

/// Read one framed message. Truncation surfaces as an I/O error.
pub async fn read_message<R>(reader: &mut R) -> Result<CastMessage>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; 4];
    reader.read_exact(&mut size_buf).await?;
    let size = u32::from_be_bytes(size_buf);
    if size > MAX_MESSAGE_SIZE {
        return Err(Error::Protocol(format!(
            "frame of {size} bytes exceeds cap of {MAX_MESSAGE_SIZE}"
        )));
    }
    let mut body = vec![0u8; size as usize];
    reader.read_exact(&mut body).await?;
    CastMessage::decode(body.as_slice())
        .map_err(|e| Error::Protocol(format!("bad cast message: {e}")))
}

/// Write one framed message: length prefix, then body.
pub async fn write_message<W>(writer: &mut W, msg: &CastMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = msg.encode_to_vec();
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

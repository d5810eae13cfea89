//! Frame codec over an async transport.
//!
//! [`read_frame`] pulls exactly one frame off the transport, [`write_frame`]
//! pushes one frame and flushes. The session's writer task batches frames
//! itself; `write_frame` is the single-frame path.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::wire_format::{FrameTag, Header, HEADER_SIZE, MAX_FRAME_BODY_LENGTH};
use super::Frame;
use crate::error::{MuxError, Result};
use crate::transport::read_fully;

/// Read one frame from the transport.
///
/// Returns `Ok(None)` on a clean end of stream (no header byte read). A
/// Data frame declaring more than [`MAX_FRAME_BODY_LENGTH`] bytes is rejected
/// before any of its body is consumed.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    let n = read_fully(reader, &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if n < HEADER_SIZE {
        return Err(MuxError::InvalidFormat(format!(
            "truncated header: {} of {} bytes",
            n, HEADER_SIZE
        )));
    }

    let header = Header::decode(&buf)?;
    if header.tag != FrameTag::Data || header.length == 0 {
        return Ok(Some(Frame::new(header, Bytes::new())));
    }

    let length = header.length as usize;
    if length > MAX_FRAME_BODY_LENGTH {
        return Err(MuxError::FrameTooLarge(length));
    }

    let mut body = BytesMut::zeroed(length);
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            MuxError::InvalidFormat("incomplete frame body".to_string())
        } else {
            MuxError::Io(e)
        }
    })?;

    Ok(Some(Frame::new(header, body.freeze())))
}

/// Write one frame (header, then body if any) and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.header.encode()).await?;
    if !frame.body.is_empty() {
        writer.write_all(&frame.body).await?;
    }
    writer.flush().await?;
    Ok(())
}

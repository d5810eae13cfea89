//! Transport module - byte-stream plumbing underneath a session.
//!
//! A session runs over any `AsyncRead + AsyncWrite` duplex; this module
//! provides the TCP convenience layer plus the read helper the frame codec
//! is built on.

mod tcp;

pub use tcp::{connect, MuxListener};

use tokio::io::{AsyncRead, AsyncReadExt};

/// Read until `buf` is full or the transport reports end-of-stream.
///
/// Returns the number of bytes read; a short count means end-of-stream was
/// reached part way.
pub async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

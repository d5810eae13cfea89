//! Dedicated writer task for outgoing frames.
//!
//! Streams never touch the transport. They push frames into an unbounded
//! mpsc queue and the writer task serializes them onto the write half, so a
//! stream writer only ever blocks on its own send credit.
//!
//! # Architecture
//!
//! ```text
//! Stream 1 ─┐
//! Stream 2 ─┼─► WriterHandle (mpsc) ─► Writer Task ─► Transport
//! Session  ─┘
//! ```
//!
//! Frames that are already queued are batched into a single vectored write
//! and one flush.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{MuxError, Result};
use crate::protocol::{Frame, HEADER_SIZE};

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the transport.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    /// Pre-encoded header (12 bytes).
    header: [u8; HEADER_SIZE],
    /// Body bytes (empty for everything but non-empty Data frames).
    body: Bytes,
}

impl OutboundFrame {
    #[inline]
    fn new(frame: Frame) -> Self {
        Self {
            header: frame.header.encode(),
            body: frame.body,
        }
    }

    /// Total size of this frame (header + body).
    #[inline]
    fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

enum Command {
    Frame(OutboundFrame),
    /// Write everything queued before this marker, then stop.
    Shutdown,
}

/// Handle for queueing frames to the writer task.
///
/// Cheaply cloneable; every stream of a session holds one.
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: mpsc::UnboundedSender<Command>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
    /// Held across the check and the enqueue, so no frame can land behind
    /// the shutdown marker.
    completed: Arc<Mutex<bool>>,
}

/// Receiving end of the queue, consumed by [`run`].
pub(crate) struct WriterQueue {
    rx: mpsc::UnboundedReceiver<Command>,
    pending: Arc<AtomicUsize>,
}

/// Create the outgoing frame queue.
pub(crate) fn channel() -> (WriterHandle, WriterQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
        completed: Arc::new(Mutex::new(false)),
    };

    (handle, WriterQueue { rx, pending })
}

impl WriterHandle {
    /// Queue a frame. Never blocks.
    ///
    /// Fails with `ConnectionClosed` once the queue has been completed or
    /// the writer task is gone.
    pub(crate) fn send(&self, frame: Frame) -> Result<()> {
        let completed = self.completed.lock();
        if *completed {
            return Err(MuxError::ConnectionClosed);
        }

        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx
            .send(Command::Frame(OutboundFrame::new(frame)))
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::Release);
                MuxError::ConnectionClosed
            })
    }

    /// Stop accepting frames; the writer drains what is queued and exits.
    ///
    /// Idempotent.
    pub(crate) fn complete(&self) {
        let mut completed = self.completed.lock();
        if !*completed {
            *completed = true;
            let _ = self.tx.send(Command::Shutdown);
        }
    }

    #[inline]
    pub(crate) fn is_completed(&self) -> bool {
        *self.completed.lock()
    }

    /// Get current pending frame count.
    #[inline]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Writer loop - receives frames and writes them to the transport.
///
/// Returns `Ok(())` after a shutdown marker (the write half is shut down so
/// the peer sees end-of-stream) or when every handle is dropped. On a write
/// error the queue is closed and the pending count drops to zero.
pub(crate) async fn run<W>(queue: WriterQueue, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let WriterQueue { mut rx, pending } = queue;

    loop {
        let mut shutdown = false;
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

        match rx.recv().await {
            Some(Command::Frame(frame)) => batch.push(frame),
            Some(Command::Shutdown) => shutdown = true,
            None => return Ok(()),
        }

        // Collect additional ready frames (non-blocking)
        while !shutdown && batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(Command::Frame(frame)) => batch.push(frame),
                Ok(Command::Shutdown) => shutdown = true,
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(err) = write_batch(&mut writer, &batch).await {
            rx.close();
            pending.store(0, Ordering::Release);
            return Err(err);
        }
        pending.fetch_sub(batch_size, Ordering::Release);

        if shutdown {
            rx.close();
            debug!("writer queue completed, shutting down transport");
            let _ = writer.shutdown().await;
            return Ok(());
        }
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored), then flush.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MuxError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.body.is_empty() {
            let body_end = offset + frame.body.len();
            if skip_bytes < body_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.body[start..]));
            }
            offset = body_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{flags, read_frame, FrameTag, GoAwayCode};
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::duplex;

    fn data_frame(id: u32, body: &'static [u8]) -> Frame {
        Frame::data(id, 0, Bytes::from_static(body))
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![OutboundFrame::new(data_frame(1, b"hello"))];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::new(data_frame(1, b"hello"))];

        let slices = build_remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 5);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_into_second_frame() {
        let batch = vec![
            OutboundFrame::new(data_frame(1, b"abc")),
            OutboundFrame::new(Frame::ping(9, 0)),
        ];

        let slices = build_remaining_slices(&batch, HEADER_SIZE + 3 + 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), HEADER_SIZE - 2);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5)
            .map(|i| OutboundFrame::new(data_frame(i, b"abc")))
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (client, mut server) = duplex(4096);
        let (handle, queue) = channel();
        let task = tokio::spawn(run(queue, client));

        for i in 1..=10u32 {
            handle.send(Frame::window_update(i, i * 100, 0)).unwrap();
        }
        handle.send(data_frame(11, b"tail")).unwrap();

        for i in 1..=10u32 {
            let frame = read_frame(&mut server).await.unwrap().unwrap();
            assert_eq!(frame.tag(), FrameTag::WindowUpdate);
            assert_eq!(frame.stream_id(), i);
            assert_eq!(frame.header.length, i * 100);
        }
        let last = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(last.body(), b"tail");

        handle.complete();
        task.await.unwrap().unwrap();
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_complete_flushes_then_rejects() {
        let (client, mut server) = duplex(4096);
        let (handle, queue) = channel();
        let task = tokio::spawn(run(queue, client));

        handle.send(Frame::go_away(GoAwayCode::Normal)).unwrap();
        handle.complete();
        handle.complete();

        assert!(handle.is_completed());
        assert!(matches!(
            handle.send(Frame::ping(1, flags::ACK)),
            Err(MuxError::ConnectionClosed)
        ));

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(frame.tag(), FrameTag::GoAway);
        // Write half was shut down after the drain.
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (client, _server) = duplex(4096);
        let (handle, queue) = channel();
        let task = tokio::spawn(run(queue, client));

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces() {
        let (client, server) = duplex(64);
        drop(server);
        let (handle, queue) = channel();
        let task = tokio::spawn(run(queue, client));

        handle.send(data_frame(1, b"lost")).unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(MuxError::Io(_))));
        assert_eq!(handle.pending_count(), 0);

        // The queue is closed, so later frames are refused rather than counted.
        assert!(matches!(
            handle.send(data_frame(1, b"late")),
            Err(MuxError::ConnectionClosed)
        ));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_complete_never_strands_frames() {
        let (client, mut server) = duplex(1 << 16);
        let (handle, queue) = channel();
        let task = tokio::spawn(run(queue, client));

        let senders: Vec<_> = (0..4u32)
            .map(|n| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    (0..200u32)
                        .filter(|i| handle.send(Frame::ping(n * 1000 + i, 0)).is_ok())
                        .count()
                })
            })
            .collect();
        handle.complete();

        let accepted: usize = senders.into_iter().map(|s| s.join().unwrap()).sum();
        task.await.unwrap().unwrap();

        // Every frame that was accepted reached the transport.
        let mut written = 0;
        while read_frame(&mut server).await.unwrap().is_some() {
            written += 1;
        }
        assert_eq!(written, accepted);
        assert_eq!(handle.pending_count(), 0);
    }
}

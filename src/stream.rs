//! Multiplexed stream.
//!
//! A [`Stream`] is one bidirectional conduit inside a [`Session`]. Each side
//! half-closes independently with a FIN; a stream is finished once both
//! halves are closed, when either peer resets it, or when the connection goes
//! away.
//!
//! Flow control is per stream. The peer may have at most
//! [`DEFAULT_CREDIT`] unacknowledged bytes in flight towards us; consumed
//! bytes are granted back in batches of at least half that amount.
//!
//! [`Session`]: crate::Session

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::incoming::IncomingBytes;
use crate::protocol::{flags, Frame, DEFAULT_CREDIT};
use crate::session::Shared;
use crate::signal::Signal;
use crate::writer::WriterHandle;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Both halves open.
    Open,
    /// We sent FIN; the peer may still send.
    SendClosed,
    /// The peer sent FIN; we may still send.
    RecvClosed,
    /// Both halves closed, reset, or connection gone.
    Closed,
}

/// Open/acknowledge flag owed on the first outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingFlag {
    None,
    Syn,
    Ack,
}

struct Control {
    state: StreamState,
    send_window: u32,
    receive_window: u32,
    /// Received but not yet consumed by `read`.
    buffered_bytes: u64,
    pending_flag: PendingFlag,
    awaiting_remote_ack: bool,
    reset: bool,
    connection_closed: bool,
}

impl Control {
    fn can_read(&self) -> bool {
        !matches!(self.state, StreamState::RecvClosed | StreamState::Closed)
    }

    fn can_write(&self) -> bool {
        !matches!(self.state, StreamState::SendClosed | StreamState::Closed)
    }

    /// Merge the owed SYN/ACK into `base`, at most once per stream.
    fn take_pending_flag(&mut self, base: u16) -> u16 {
        let extra = match self.pending_flag {
            PendingFlag::None => 0,
            PendingFlag::Syn => flags::SYN,
            PendingFlag::Ack => flags::ACK,
        };
        self.pending_flag = PendingFlag::None;
        base | extra
    }

    /// Returns `true` if the stream became `Closed`.
    fn close_recv(&mut self) -> bool {
        match self.state {
            StreamState::Closed => false,
            StreamState::SendClosed => {
                self.state = StreamState::Closed;
                true
            }
            _ => {
                self.state = StreamState::RecvClosed;
                false
            }
        }
    }
}

/// Per-stream state shared by the session's read loop and the handle.
pub(crate) struct StreamInner {
    id: u32,
    outbound: bool,
    split_send_size: usize,
    read_after_close: bool,
    control: Mutex<Control>,
    incoming: IncomingBytes,
    /// Set whenever send credit is available or the stream can no longer write.
    send_signal: Signal,
    writer: WriterHandle,
}

impl StreamInner {
    /// A locally opened stream with optimistic send credit.
    pub(crate) fn outbound(id: u32, config: &Config, writer: WriterHandle) -> Self {
        Self::new(id, true, DEFAULT_CREDIT, PendingFlag::Syn, config, writer)
    }

    /// A stream opened by the peer.
    pub(crate) fn inbound(
        id: u32,
        initial_send_window: u32,
        config: &Config,
        writer: WriterHandle,
    ) -> Self {
        Self::new(
            id,
            false,
            initial_send_window,
            PendingFlag::Ack,
            config,
            writer,
        )
    }

    fn new(
        id: u32,
        outbound: bool,
        send_window: u32,
        pending_flag: PendingFlag,
        config: &Config,
        writer: WriterHandle,
    ) -> Self {
        Self {
            id,
            outbound,
            split_send_size: config.split_send_size(),
            read_after_close: config.read_after_close(),
            control: Mutex::new(Control {
                state: StreamState::Open,
                send_window,
                receive_window: DEFAULT_CREDIT,
                buffered_bytes: 0,
                pending_flag,
                awaiting_remote_ack: outbound,
                reset: false,
                connection_closed: false,
            }),
            incoming: IncomingBytes::new(),
            send_signal: Signal::new(send_window > 0),
            writer,
        }
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn is_outbound(&self) -> bool {
        self.outbound
    }

    pub(crate) fn state(&self) -> StreamState {
        self.control.lock().state
    }

    pub(crate) fn is_pending_ack(&self) -> bool {
        self.control.lock().awaiting_remote_ack
    }

    /// Record the peer's first acknowledgement. Returns `true` only once.
    pub(crate) fn mark_acknowledged(&self) -> bool {
        let mut control = self.control.lock();
        std::mem::replace(&mut control.awaiting_remote_ack, false)
    }

    /// Deliver a Data frame body. Returns `true` if the stream became `Closed`.
    pub(crate) fn on_data(&self, body: Bytes, fin: bool) -> Result<bool> {
        let mut control = self.control.lock();
        if control.state == StreamState::Closed {
            return Ok(false);
        }

        let len = body.len();
        if len as u64 > u64::from(control.receive_window) {
            return Err(MuxError::Protocol(format!(
                "stream {}: frame of {} bytes exceeds receive window of {}",
                self.id, len, control.receive_window
            )));
        }

        // Fits in u32: bounded by receive_window above.
        control.receive_window -= len as u32;
        control.buffered_bytes += len as u64;

        let closed = fin && control.close_recv();

        if len > 0 && !self.incoming.try_write(body) {
            control.receive_window += len as u32;
            control.buffered_bytes = control.buffered_bytes.saturating_sub(len as u64);
        }

        if fin {
            self.incoming.complete();
        }

        Ok(closed)
    }

    /// Apply send credit from the peer. Returns `true` if the stream became `Closed`.
    pub(crate) fn on_window_update(&self, credit: u32, fin: bool) -> Result<bool> {
        let mut control = self.control.lock();

        control.send_window = control.send_window.checked_add(credit).ok_or_else(|| {
            MuxError::Protocol(format!("stream {}: send window overflow", self.id))
        })?;

        let closed = fin && control.close_recv();
        if fin {
            self.incoming.complete();
        }

        if control.send_window > 0 {
            self.send_signal.set();
        }

        Ok(closed)
    }

    /// Abort on the peer's request. Returns `true` if the stream became `Closed`.
    pub(crate) fn on_reset(&self) -> bool {
        let mut control = self.control.lock();
        if control.state == StreamState::Closed {
            return false;
        }

        control.state = StreamState::Closed;
        control.reset = true;
        self.incoming.complete_and_drain();
        self.send_signal.set();
        true
    }

    /// Force-close because the whole connection is gone.
    pub(crate) fn on_connection_closed(&self) {
        let mut control = self.control.lock();
        control.connection_closed = true;
        control.state = StreamState::Closed;

        if self.read_after_close {
            self.incoming.complete();
        } else {
            self.incoming.complete_and_drain();
        }
        self.send_signal.set();
    }

    /// Account for `consumed` bytes handed to the application and grant
    /// credit back once enough has accumulated.
    fn on_bytes_consumed(&self, consumed: usize) {
        let mut control = self.control.lock();
        control.buffered_bytes = control.buffered_bytes.saturating_sub(consumed as u64);

        if !control.can_read() {
            return;
        }

        let received = u64::from(DEFAULT_CREDIT - control.receive_window);
        let pending = received.saturating_sub(control.buffered_bytes);
        if pending < u64::from(DEFAULT_CREDIT / 2) {
            return;
        }

        // pending <= received <= DEFAULT_CREDIT
        let credit = pending as u32;
        control.receive_window += credit;

        let frame_flags = control.take_pending_flag(0);
        if let Err(err) = self
            .writer
            .send(Frame::window_update(self.id, credit, frame_flags))
        {
            tracing::debug!(stream_id = self.id, error = %err, "window update not sent");
        }
    }
}

/// Result of one pass of the write loop.
enum WriteStep {
    Sent,
    WaitForCredit,
    Reset,
    Closed,
}

/// Handle to one multiplexed stream.
///
/// Obtained from [`Session::connect_stream`] or [`Session::accept_stream`].
/// Dropping the handle does not close the stream; call [`Stream::close`] or
/// [`Stream::reset`].
///
/// [`Session::connect_stream`]: crate::Session::connect_stream
/// [`Session::accept_stream`]: crate::Session::accept_stream
pub struct Stream {
    inner: Arc<StreamInner>,
    session: Arc<Shared>,
}

impl Stream {
    pub(crate) fn new(inner: Arc<StreamInner>, session: Arc<Shared>) -> Self {
        Self { inner, session }
    }

    /// Stream id; odd for initiator-opened streams, even for responder-opened ones.
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    /// Whether this side opened the stream.
    pub fn is_outbound(&self) -> bool {
        self.inner.outbound
    }

    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    /// Read up to `max_len` bytes.
    ///
    /// Waits until at least one byte is available. An empty result means no
    /// more data will arrive: the peer half-closed, or the connection is gone.
    /// Fails with [`MuxError::StreamReset`] once the stream was reset and its
    /// buffered bytes discarded.
    pub async fn read(&self, max_len: usize) -> Result<Bytes> {
        if max_len == 0 {
            return Ok(Bytes::new());
        }

        {
            let control = self.inner.control.lock();
            if control.reset {
                return Err(MuxError::StreamReset(self.inner.id));
            }
            if control.connection_closed && !self.inner.read_after_close {
                return Ok(Bytes::new());
            }
        }

        let chunk = self.inner.incoming.read(max_len).await;
        if chunk.is_empty() {
            if self.inner.control.lock().reset {
                return Err(MuxError::StreamReset(self.inner.id));
            }
            return Ok(chunk);
        }

        self.inner.on_bytes_consumed(chunk.len());
        Ok(chunk)
    }

    /// Read exactly `len` bytes.
    ///
    /// Fails with [`MuxError::InvalidFormat`] if the stream ends first.
    pub async fn read_exact(&self, len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(len);
        while buf.len() < len {
            let chunk = self.read(len - buf.len()).await?;
            if chunk.is_empty() {
                return Err(MuxError::InvalidFormat(format!(
                    "unexpected end of stream after {} of {} bytes",
                    buf.len(),
                    len
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    /// Write all of `data`, waiting for send credit as needed.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.write_bytes(Bytes::copy_from_slice(data)).await
    }

    /// Write all of `data` without copying it.
    ///
    /// The payload is split into Data frames no larger than the configured
    /// split size and never larger than the credit available at send time.
    pub async fn write_bytes(&self, mut data: Bytes) -> Result<()> {
        while !data.is_empty() {
            match self.try_send_chunk(&mut data) {
                WriteStep::Sent => {}
                WriteStep::WaitForCredit => self.inner.send_signal.wait().await,
                WriteStep::Reset => return Err(MuxError::StreamReset(self.inner.id)),
                WriteStep::Closed => return Err(self.session.closed_error()),
            }
        }
        Ok(())
    }

    fn try_send_chunk(&self, data: &mut Bytes) -> WriteStep {
        let inner = &self.inner;
        let mut control = inner.control.lock();

        if control.reset {
            return WriteStep::Reset;
        }
        if control.connection_closed || !control.can_write() {
            return WriteStep::Closed;
        }
        if control.send_window == 0 {
            inner.send_signal.reset();
            return WriteStep::WaitForCredit;
        }

        let allowed = data
            .len()
            .min(control.send_window as usize)
            .min(inner.split_send_size);
        // allowed <= send_window
        control.send_window -= allowed as u32;
        if control.send_window == 0 {
            inner.send_signal.reset();
        }

        let frame_flags = control.take_pending_flag(0);
        let chunk = data.split_to(allowed);

        // Queued under the stream lock so frames of one stream keep their order.
        match inner.writer.send(Frame::data(inner.id, frame_flags, chunk)) {
            Ok(()) => WriteStep::Sent,
            Err(_) => WriteStep::Closed,
        }
    }

    /// Half-close the sending side. Idempotent.
    ///
    /// Sends a zero-length Data frame with FIN. Once the peer has closed its
    /// side as well the stream is finished.
    pub async fn close(&self) -> Result<()> {
        let (queued, closed) = {
            let mut control = self.inner.control.lock();
            if matches!(
                control.state,
                StreamState::SendClosed | StreamState::Closed
            ) {
                return Ok(());
            }

            let frame_flags = control.take_pending_flag(flags::FIN);
            control.state = if control.state == StreamState::RecvClosed {
                StreamState::Closed
            } else {
                StreamState::SendClosed
            };

            let queued = self
                .inner
                .writer
                .send(Frame::data(self.inner.id, frame_flags, Bytes::new()));
            (queued, control.state == StreamState::Closed)
        };

        tracing::debug!(stream_id = self.inner.id, "stream half-closed");

        if closed {
            self.session.notify_stream_closed(&self.inner);
        }
        queued.map_err(|_| self.session.closed_error())
    }

    /// Abort the stream in both directions.
    ///
    /// Buffered inbound bytes are dropped and the peer is told with a
    /// WindowUpdate carrying RST. Idempotent.
    pub async fn reset(&self) -> Result<()> {
        let queued = {
            let mut control = self.inner.control.lock();
            if control.state == StreamState::Closed {
                return Ok(());
            }

            control.state = StreamState::Closed;
            control.reset = true;
            let frame_flags = control.take_pending_flag(flags::RST);
            self.inner.incoming.complete_and_drain();
            self.inner.send_signal.set();

            self.inner
                .writer
                .send(Frame::window_update(self.inner.id, 0, frame_flags))
        };

        tracing::debug!(stream_id = self.inner.id, "stream reset locally");

        self.session.notify_stream_closed(&self.inner);
        queued.map_err(|_| self.session.closed_error())
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("outbound", &self.inner.outbound)
            .field("state", &self.inner.state())
            .finish()
    }
}

//! Multiplexing session.
//!
//! A [`Session`] owns one transport and runs two background tasks for its
//! whole lifetime:
//!
//! - the **read loop** decodes frames and dispatches them to streams;
//! - the **writer task** drains the outgoing frame queue onto the transport.
//!
//! # Example
//!
//! ```ignore
//! use muxwire::{Mode, Session};
//!
//! let session = Session::new(tcp_stream, Mode::Initiator)?;
//! let stream = session.connect_stream().await?;
//! stream.write(b"hello").await?;
//! stream.close().await?;
//! session.close().await;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::protocol::{
    flags, read_frame, Frame, FrameTag, GoAwayCode, Header, DEFAULT_CREDIT, MAX_ACK_BACKLOG,
};
use crate::signal::Signal;
use crate::stream::{Stream, StreamInner};
use crate::writer::{self, WriterHandle, WriterQueue};

/// Which side of the connection this session is.
///
/// Fixes the parity of locally allocated stream ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Allocates odd ids, starting at 1.
    Initiator,
    /// Allocates even ids, starting at 2.
    Responder,
}

impl Mode {
    fn first_stream_id(self) -> u32 {
        match self {
            Mode::Initiator => 1,
            Mode::Responder => 2,
        }
    }

    /// Whether `id` has the parity the peer allocates from.
    fn is_remote_id(self, id: u32) -> bool {
        if id == 0 {
            return false;
        }
        match self {
            Mode::Initiator => id % 2 == 0,
            Mode::Responder => id % 2 == 1,
        }
    }
}

struct SessionState {
    next_stream_id: u32,
    streams: HashMap<u32, Arc<StreamInner>>,
    /// Locally opened streams the peer has not acknowledged yet.
    pending_acks: usize,
    closed: bool,
    /// Dropped on teardown so `accept_stream` sees the end.
    inbound_tx: Option<mpsc::UnboundedSender<Arc<StreamInner>>>,
}

/// State shared between the session handle, its streams and its tasks.
pub(crate) struct Shared {
    mode: Mode,
    config: Config,
    state: Mutex<SessionState>,
    writer: WriterHandle,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Arc<StreamInner>>>,
    /// Set when a stream slot frees up or the session closes.
    connect_signal: Signal,
    /// Stops the read loop.
    shutdown: Signal,
    /// First transport failure, reported to callers instead of a bare close.
    failure: OnceLock<String>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    write_task: Mutex<Option<JoinHandle<()>>>,
}

/// A multiplexed connection.
///
/// Cheaply cloneable; clones share the same connection.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Start a session over `transport` with the default [`Config`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T>(transport: T, mode: Mode) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(transport, mode, Config::default())
    }

    /// Start a session over `transport`.
    ///
    /// Fails with [`MuxError::InvalidConfig`] if `config` does not validate.
    pub fn with_config<T>(transport: T, mode: Mode, config: Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;

        let (reader, write_half) = tokio::io::split(transport);
        let (writer, queue) = writer::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            mode,
            config,
            state: Mutex::new(SessionState {
                next_stream_id: mode.first_stream_id(),
                streams: HashMap::new(),
                pending_acks: 0,
                closed: false,
                inbound_tx: Some(inbound_tx),
            }),
            writer,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            connect_signal: Signal::new(false),
            shutdown: Signal::new(false),
            failure: OnceLock::new(),
            read_task: Mutex::new(None),
            write_task: Mutex::new(None),
        });

        let write_task = tokio::spawn(write_loop(shared.clone(), queue, write_half));
        let read_task = tokio::spawn(read_loop(shared.clone(), reader));
        *shared.write_task.lock() = Some(write_task);
        *shared.read_task.lock() = Some(read_task);

        tracing::debug!(?mode, "session started");
        Ok(Self { shared })
    }

    pub fn mode(&self) -> Mode {
        self.shared.mode
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Number of streams currently registered (either direction).
    pub fn stream_count(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Frames queued for the transport but not yet written.
    pub fn queued_frames(&self) -> usize {
        self.shared.writer.pending_count()
    }

    /// Open a new outgoing stream.
    ///
    /// Waits while the stream table is full or too many opened streams are
    /// still unacknowledged by the peer. The returned stream can write up to
    /// the default credit right away.
    pub async fn connect_stream(&self) -> Result<Stream> {
        let shared = &self.shared;
        loop {
            {
                let mut state = shared.state.lock();
                if state.closed {
                    drop(state);
                    return Err(shared.closed_error());
                }

                if state.streams.len() < shared.config.max_num_streams()
                    && state.pending_acks < MAX_ACK_BACKLOG
                {
                    let id = state.next_stream_id;
                    if id == 0 || id > u32::MAX - 2 {
                        return Err(MuxError::Protocol(
                            "no more stream ids available".to_string(),
                        ));
                    }
                    state.next_stream_id += 2;

                    let inner = Arc::new(StreamInner::outbound(
                        id,
                        &shared.config,
                        shared.writer.clone(),
                    ));
                    state.streams.insert(id, inner.clone());
                    state.pending_acks += 1;

                    tracing::debug!(stream_id = id, "stream opened");
                    return Ok(Stream::new(inner, shared.clone()));
                }

                shared.connect_signal.reset();
            }

            shared.connect_signal.wait().await;
        }
    }

    /// Wait for the next stream opened by the peer.
    ///
    /// Returns `None` once the session is closed and every stream accepted
    /// before that has been handed out.
    pub async fn accept_stream(&self) -> Option<Stream> {
        let inner = self.shared.inbound_rx.lock().await.recv().await?;
        Some(Stream::new(inner, self.shared.clone()))
    }

    /// Close the session. Idempotent.
    ///
    /// Sends a GoAway, waits for every queued frame to be written, stops the
    /// read loop and force-closes the remaining streams.
    pub async fn close(&self) {
        let shared = &self.shared;
        if !shared.begin_close() {
            return;
        }

        tracing::info!(mode = ?shared.mode, "closing session");
        let _ = shared.writer.send(Frame::go_away(GoAwayCode::Normal));
        shared.writer.complete();

        let write_task = shared.write_task.lock().take();
        if let Some(task) = write_task {
            let _ = task.await;
        }

        shared.shutdown.set();
        let read_task = shared.read_task.lock().take();
        if let Some(task) = read_task {
            let _ = task.await;
        }

        shared.finish();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.shared.mode)
            .field("streams", &self.stream_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Shared {
    /// Error reported to callers once the session is unusable.
    pub(crate) fn closed_error(&self) -> MuxError {
        match self.failure.get() {
            Some(message) => MuxError::TransportFailed(message.clone()),
            None => MuxError::ConnectionClosed,
        }
    }

    /// Drop a finished stream from the table.
    ///
    /// Only the exact registered instance is removed, so a late notification
    /// cannot evict a different stream.
    pub(crate) fn notify_stream_closed(&self, stream: &Arc<StreamInner>) {
        let id = stream.id();
        {
            let mut state = self.state.lock();
            match state.streams.get(&id) {
                Some(entry) if Arc::ptr_eq(entry, stream) => {}
                _ => return,
            }
            state.streams.remove(&id);

            if stream.is_outbound() && stream.is_pending_ack() {
                state.pending_acks = state.pending_acks.saturating_sub(1);
            }
        }

        tracing::debug!(stream_id = id, "stream removed");
        self.connect_signal.set();
    }

    /// Mark the session closed. Returns `false` if it already was.
    fn begin_close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
        }
        self.connect_signal.set();
        true
    }

    /// Close after a fatal error, telling the peer why.
    fn terminate(&self, code: GoAwayCode) {
        if self.begin_close() {
            tracing::warn!(?code, "terminating session");
            let _ = self.writer.send(Frame::go_away(code));
            self.writer.complete();
        }
    }

    fn record_failure(&self, err: &MuxError) {
        let _ = self.failure.set(err.to_string());
    }

    /// Final teardown. Idempotent.
    fn finish(&self) {
        let streams: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending_acks = 0;
            state.inbound_tx = None;
            state.streams.drain().map(|(_, stream)| stream).collect()
        };

        if !streams.is_empty() {
            tracing::debug!(count = streams.len(), "force-closing streams");
        }
        for stream in streams {
            stream.on_connection_closed();
        }

        self.writer.complete();
        self.shutdown.set();
        self.connect_signal.set();
    }

    fn lookup(&self, id: u32) -> Option<Arc<StreamInner>> {
        self.state.lock().streams.get(&id).cloned()
    }

    fn handle_frame(&self, frame: Frame) -> Result<()> {
        let header = frame.header;

        if header.is_ack() && matches!(header.tag, FrameTag::Data | FrameTag::WindowUpdate) {
            self.acknowledge(header.stream_id);
        }

        match header.tag {
            FrameTag::Data => self.handle_data(frame),
            FrameTag::WindowUpdate => self.handle_window_update(&header),
            FrameTag::Ping => {
                self.handle_ping(&header);
                Ok(())
            }
            FrameTag::GoAway => {
                tracing::info!(
                    code = ?GoAwayCode::from_u32(header.length),
                    "received go away"
                );
                self.begin_close();
                Ok(())
            }
        }
    }

    fn acknowledge(&self, id: u32) {
        let acknowledged = {
            let mut state = self.state.lock();
            let newly_acked = state
                .streams
                .get(&id)
                .is_some_and(|stream| stream.mark_acknowledged());
            if newly_acked {
                state.pending_acks = state.pending_acks.saturating_sub(1);
            }
            newly_acked
        };

        if acknowledged {
            self.connect_signal.set();
        }
    }

    fn handle_data(&self, frame: Frame) -> Result<()> {
        let header = frame.header;
        let id = header.stream_id;

        if header.is_rst() {
            self.reset_stream(id);
            return Ok(());
        }

        if header.is_syn() {
            self.check_remote_id(id)?;
            if frame.body.len() > DEFAULT_CREDIT as usize {
                return Err(MuxError::Protocol(format!(
                    "stream {}: opening frame of {} bytes exceeds initial window",
                    id,
                    frame.body.len()
                )));
            }

            let Some(stream) = self.admit(id, DEFAULT_CREDIT)? else {
                return Ok(());
            };
            self.release_if_closed(&stream, stream.on_data(frame.body, header.is_fin())?);
            self.push_inbound(stream);
            return Ok(());
        }

        if let Some(stream) = self.lookup(id) {
            let closed = stream.on_data(frame.body, header.is_fin())?;
            self.release_if_closed(&stream, closed);
        }
        Ok(())
    }

    fn handle_window_update(&self, header: &Header) -> Result<()> {
        let id = header.stream_id;

        if header.is_rst() {
            self.reset_stream(id);
            return Ok(());
        }

        if header.is_syn() {
            self.check_remote_id(id)?;
            let initial_credit = DEFAULT_CREDIT.checked_add(header.length).ok_or_else(|| {
                MuxError::Protocol(format!("stream {}: initial send window overflow", id))
            })?;

            let Some(stream) = self.admit(id, initial_credit)? else {
                return Ok(());
            };
            if header.is_fin() {
                self.release_if_closed(&stream, stream.on_window_update(0, true)?);
            }
            self.push_inbound(stream);
            return Ok(());
        }

        if let Some(stream) = self.lookup(id) {
            let closed = stream.on_window_update(header.length, header.is_fin())?;
            self.release_if_closed(&stream, closed);
        }
        Ok(())
    }

    fn handle_ping(&self, header: &Header) {
        if header.is_ack() {
            return;
        }
        if let Err(err) = self.writer.send(Frame::ping(header.length, flags::ACK)) {
            tracing::debug!(error = %err, "ping reply not sent");
        }
    }

    fn check_remote_id(&self, id: u32) -> Result<()> {
        if self.mode.is_remote_id(id) {
            Ok(())
        } else {
            Err(MuxError::Protocol(format!(
                "stream id {} has the wrong parity for a remote stream",
                id
            )))
        }
    }

    /// Register a stream opened by the peer.
    ///
    /// Returns `None` if the session is already closing.
    fn admit(&self, id: u32, initial_send_window: u32) -> Result<Option<Arc<StreamInner>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(None);
        }
        if state.streams.contains_key(&id) {
            return Err(MuxError::Protocol(format!("stream {} already exists", id)));
        }
        if state.streams.len() >= self.config.max_num_streams() {
            return Err(MuxError::CapacityExceeded(self.config.max_num_streams()));
        }

        let stream = Arc::new(StreamInner::inbound(
            id,
            initial_send_window,
            &self.config,
            self.writer.clone(),
        ));
        state.streams.insert(id, stream.clone());

        tracing::debug!(stream_id = id, "stream accepted");
        Ok(Some(stream))
    }

    fn push_inbound(&self, stream: Arc<StreamInner>) {
        let state = self.state.lock();
        if let Some(tx) = &state.inbound_tx {
            let _ = tx.send(stream);
        }
    }

    fn release_if_closed(&self, stream: &Arc<StreamInner>, closed: bool) {
        if closed {
            self.notify_stream_closed(stream);
        }
    }

    fn reset_stream(&self, id: u32) {
        if let Some(stream) = self.lookup(id) {
            if stream.on_reset() {
                tracing::debug!(stream_id = id, "stream reset by peer");
                self.notify_stream_closed(&stream);
            }
        }
    }
}

/// Read loop - decodes frames until end of stream, a fatal error, or shutdown.
async fn read_loop<R>(shared: Arc<Shared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let result = loop {
        let frame = tokio::select! {
            biased;
            _ = shared.shutdown.wait() => break Ok(()),
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                if let Err(err) = shared.handle_frame(frame) {
                    break Err(err);
                }
            }
            Ok(None) => {
                tracing::debug!("transport reached end of stream");
                break Ok(());
            }
            Err(err) => break Err(err),
        }

        if shared.state.lock().closed {
            break Ok(());
        }
    };

    if let Err(err) = result {
        if matches!(err, MuxError::Io(_)) {
            tracing::error!(error = %err, "transport read failed");
            shared.record_failure(&err);
        } else {
            tracing::warn!(error = %err, "peer violated the protocol");
        }
        shared.terminate(err.go_away_code());
    }

    shared.finish();
}

async fn write_loop<W>(shared: Arc<Shared>, queue: WriterQueue, writer: W)
where
    W: AsyncWrite + Unpin,
{
    if let Err(err) = writer::run(queue, writer).await {
        tracing::error!(error = %err, "transport write failed");
        shared.record_failure(&err);
        shared.finish();
    }
}

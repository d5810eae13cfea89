//! Per-stream inbound byte buffer.
//!
//! The session's read loop pushes Data frame bodies in without ever
//! blocking; the application pulls them out in arbitrary-sized reads.
//! Completing the buffer lets the reader drain what is left and then see
//! end-of-data; completing *and draining* throws the leftovers away.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub(crate) struct IncomingBytes {
    /// `None` once the buffer is complete.
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader: tokio::sync::Mutex<Reader>,
    discarded: AtomicBool,
}

struct Reader {
    rx: mpsc::UnboundedReceiver<Bytes>,
    current: Bytes,
}

impl IncomingBytes {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            reader: tokio::sync::Mutex::new(Reader {
                rx,
                current: Bytes::new(),
            }),
            discarded: AtomicBool::new(false),
        }
    }

    /// Queue a chunk. Returns `false` if the buffer is already complete.
    pub(crate) fn try_write(&self, data: Bytes) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(data).is_ok(),
            None => false,
        }
    }

    /// No more chunks will arrive; queued ones stay readable.
    pub(crate) fn complete(&self) {
        self.tx.lock().take();
    }

    /// No more chunks will arrive and queued ones are dropped.
    pub(crate) fn complete_and_drain(&self) {
        self.discarded.store(true, Ordering::Release);
        self.complete();
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.drain();
        }
    }

    /// Read up to `max_len` bytes, waiting for at least one.
    ///
    /// An empty result means the buffer is complete and fully drained.
    pub(crate) async fn read(&self, max_len: usize) -> Bytes {
        if max_len == 0 {
            return Bytes::new();
        }

        let mut reader = self.reader.lock().await;
        loop {
            if self.discarded.load(Ordering::Acquire) {
                reader.drain();
                return Bytes::new();
            }

            if !reader.current.is_empty() {
                let n = max_len.min(reader.current.len());
                return reader.current.split_to(n);
            }

            match reader.rx.recv().await {
                Some(chunk) => reader.current = chunk,
                None => return Bytes::new(),
            }
        }
    }
}

impl Reader {
    fn drain(&mut self) {
        self.current = Bytes::new();
        while self.rx.try_recv().is_ok() {}
    }
}
